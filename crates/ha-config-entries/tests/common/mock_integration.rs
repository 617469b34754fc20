//! Mock integration for testing
//!
//! Setup results are scripted per call; counters and a concurrency gauge
//! let tests assert what the manager actually invoked.

use async_trait::async_trait;
use ha_config_entries::{ConfigEntry, Integration, IntegrationError, RuntimeData, SetupError};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted result of one `setup_entry` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Ready,
    NotReady,
    AuthFailed,
    Unexpected,
    Panic,
    /// Never completes
    Hang,
}

/// A mock integration
pub struct MockIntegration {
    domain: String,
    platforms: Vec<String>,
    version: (u32, u32),
    migration: Option<(u32, u32)>,
    reload_on_update: bool,
    outcomes: Mutex<VecDeque<SetupOutcome>>,
    setup_delay_ms: AtomicU64,
    unload_ok: AtomicBool,

    setup_calls: AtomicUsize,
    unload_calls: AtomicUsize,
    migrate_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockIntegration {
    /// Create a mock integration whose setups succeed
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            platforms: Vec::new(),
            version: (1, 1),
            migration: None,
            reload_on_update: false,
            outcomes: Mutex::new(VecDeque::new()),
            setup_delay_ms: AtomicU64::new(0),
            unload_ok: AtomicBool::new(true),
            setup_calls: AtomicUsize::new(0),
            unload_calls: AtomicUsize::new(0),
            migrate_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Declare platforms to forward
    pub fn with_platforms(mut self, platforms: &[&str]) -> Self {
        self.platforms = platforms.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Declare the current entry version
    pub fn with_version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = (version, minor_version);
        self
    }

    /// Migrate older entries to the given version
    pub fn with_migration(mut self, version: u32, minor_version: u32) -> Self {
        self.migration = Some((version, minor_version));
        self
    }

    /// Ask to be reloaded when an entry changes
    pub fn reloads_on_update(mut self) -> Self {
        self.reload_on_update = true;
        self
    }

    /// Script the next setup results. Unscripted calls succeed.
    pub fn push_outcomes(&self, outcomes: &[SetupOutcome]) {
        self.outcomes.lock().unwrap().extend(outcomes.iter().copied());
    }

    /// Make every setup take `delay`
    pub fn set_setup_delay(&self, delay: Duration) {
        self.setup_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether `unload_entry` reports success
    pub fn set_unload_ok(&self, ok: bool) {
        self.unload_ok.store(ok, Ordering::SeqCst);
    }

    pub fn domain_name(&self) -> &str {
        &self.domain
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn unload_calls(&self) -> usize {
        self.unload_calls.load(Ordering::SeqCst)
    }

    pub fn migrate_calls(&self) -> usize {
        self.migrate_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Most setup/unload calls ever running at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(&self.active)
    }

    fn next_outcome(&self) -> SetupOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SetupOutcome::Ready)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What a successful mock setup hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockClient {
    pub entry_id: String,
}

#[async_trait]
impl Integration for MockIntegration {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn version(&self) -> (u32, u32) {
        self.version
    }

    fn platforms(&self) -> Vec<String> {
        self.platforms.clone()
    }

    fn reload_on_update(&self) -> bool {
        self.reload_on_update
    }

    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<RuntimeData, SetupError> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        let _active = self.enter();

        let delay = self.setup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        match self.next_outcome() {
            SetupOutcome::Ready => Ok(RuntimeData::new(MockClient {
                entry_id: entry.entry_id.clone(),
            })),
            SetupOutcome::NotReady => Err(SetupError::NotReady("device offline".to_string())),
            SetupOutcome::AuthFailed => {
                Err(SetupError::AuthFailed("invalid credentials".to_string()))
            }
            SetupOutcome::Unexpected => Err(SetupError::Unexpected("firmware error".to_string())),
            SetupOutcome::Panic => panic!("integration crashed"),
            SetupOutcome::Hang => std::future::pending().await,
        }
    }

    async fn unload_entry(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
    ) -> Result<bool, IntegrationError> {
        self.unload_calls.fetch_add(1, Ordering::SeqCst);
        let _active = self.enter();

        // The manager must hand back what setup returned
        assert_eq!(
            runtime.downcast_ref::<MockClient>().map(|c| c.entry_id.as_str()),
            Some(entry.entry_id.as_str())
        );
        Ok(self.unload_ok.load(Ordering::SeqCst))
    }

    async fn migrate_entry(&self, entry: &mut ConfigEntry) -> Result<bool, IntegrationError> {
        self.migrate_calls.fetch_add(1, Ordering::SeqCst);
        let Some((version, minor_version)) = self.migration else {
            return Ok(false);
        };
        entry.version = version;
        entry.minor_version = minor_version;
        entry.data.insert("migrated".to_string(), json!(true));
        Ok(true)
    }

    async fn remove_entry(&self, _entry: &ConfigEntry) -> Result<(), IntegrationError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
