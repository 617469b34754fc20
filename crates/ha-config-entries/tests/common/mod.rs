//! Common test utilities for config entry lifecycle tests
//!
//! Scripted mock integrations and platforms, plus helpers to build a
//! manager around them.

mod mock_integration;
mod mock_platform;

pub use mock_integration::*;
pub use mock_platform::*;

use std::sync::Arc;
use std::time::Duration;

use ha_config_entries::{
    ConfigEntries, ConfigEntriesConfig, ConfigEntryState, Integrations, RetryPolicy,
};

/// Settings with a deterministic 30s, 60s, 120s, ... backoff
pub fn test_config() -> ConfigEntriesConfig {
    ConfigEntriesConfig {
        retry: RetryPolicy::fixed(30.0, 480.0),
        ..Default::default()
    }
}

/// Register an integration and its platforms
pub fn register(
    integrations: &Integrations,
    integration: &Arc<MockIntegration>,
    platforms: &[(&str, &Arc<MockPlatform>)],
) {
    integrations.register(integration.clone());
    for (name, platform) in platforms {
        integrations.register_platform(integration.domain_name(), *name, (*platform).clone());
    }
}

/// In-memory manager with one integration registered
pub fn manager_with(
    integration: &Arc<MockIntegration>,
    platforms: &[(&str, &Arc<MockPlatform>)],
) -> ConfigEntries {
    manager_with_config(integration, platforms, test_config())
}

pub fn manager_with_config(
    integration: &Arc<MockIntegration>,
    platforms: &[(&str, &Arc<MockPlatform>)],
    config: ConfigEntriesConfig,
) -> ConfigEntries {
    let integrations = Arc::new(Integrations::new());
    register(&integrations, integration, platforms);
    ConfigEntries::in_memory(integrations, config)
}

/// Poll until the entry reaches `state`, giving up after `within`
pub async fn wait_for_state(
    manager: &ConfigEntries,
    entry_id: &str,
    state: ConfigEntryState,
    within: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if manager.state(entry_id) == Some(state) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
