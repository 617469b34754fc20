//! Mock entity platform for testing

use async_trait::async_trait;
use ha_config_entries::{ConfigEntry, EntityPlatform, IntegrationError, RuntimeData};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A mock platform whose setup and unload can be made to fail
#[derive(Default)]
pub struct MockPlatform {
    fail_setup: AtomicBool,
    fail_unload: AtomicBool,
    setups: AtomicUsize,
    unloads: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make setup raise
    pub fn failing_setup() -> Self {
        let platform = Self::default();
        platform.fail_setup.store(true, Ordering::SeqCst);
        platform
    }

    /// Make unload raise (or stop raising)
    pub fn set_fail_unload(&self, fail: bool) {
        self.fail_unload.store(fail, Ordering::SeqCst);
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityPlatform for MockPlatform {
    async fn setup_entry(
        &self,
        _entry: &ConfigEntry,
        _runtime: &RuntimeData,
    ) -> Result<RuntimeData, IntegrationError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err("entities could not be created".into());
        }
        Ok(RuntimeData::empty())
    }

    async fn unload_entry(
        &self,
        _entry: &ConfigEntry,
        _runtime: &RuntimeData,
        _handle: &RuntimeData,
    ) -> Result<bool, IntegrationError> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_unload.load(Ordering::SeqCst) {
            return Err("entity refused to go away".into());
        }
        Ok(true)
    }
}
