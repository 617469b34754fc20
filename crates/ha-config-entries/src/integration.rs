//! Integration and platform contracts
//!
//! Integrations are registered explicitly by domain. The manager only talks
//! to them through [`Integration`] and [`EntityPlatform`], and owns whatever
//! [`RuntimeData`] they hand back for the lifetime of a loaded entry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::entry::ConfigEntry;

/// Opaque per-entry state returned by a setup call.
///
/// Handed back to exactly the calls that need it: platform setup/unload and
/// the integration's own unload.
#[derive(Clone)]
pub struct RuntimeData(Arc<dyn Any + Send + Sync>);

impl RuntimeData {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Runtime data for setups that keep nothing around
    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is::<()>()
    }
}

impl Default for RuntimeData {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RuntimeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("RuntimeData(empty)")
        } else {
            f.write_str("RuntimeData(..)")
        }
    }
}

/// Outcome of an integration's `setup_entry` other than success
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// Device or service temporarily unreachable; retried with backoff
    #[error("not ready: {0}")]
    NotReady(String),

    /// Credentials rejected; needs a reauthentication flow
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Anything else the integration reports
    #[error("{0}")]
    Unexpected(String),
}

/// Failure reported by integration or platform code outside setup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct IntegrationError(pub String);

impl From<String> for IntegrationError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for IntegrationError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// An integration that can be set up from config entries
#[async_trait]
pub trait Integration: Send + Sync {
    /// Domain this integration handles (e.g., "hue")
    fn domain(&self) -> &str;

    /// Current `(version, minor_version)` of the entry schema
    fn version(&self) -> (u32, u32) {
        (1, 1)
    }

    /// Platforms forwarded after a successful setup
    fn platforms(&self) -> Vec<String> {
        Vec::new()
    }

    /// Reload loaded entries when their data or options change
    fn reload_on_update(&self) -> bool {
        false
    }

    /// Connect to the device or service described by `entry`
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<RuntimeData, SetupError>;

    /// Release what `setup_entry` acquired. `Ok(false)` means the unload failed.
    async fn unload_entry(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
    ) -> Result<bool, IntegrationError>;

    /// Bring an entry stored with an older version up to date.
    ///
    /// Update `entry.version`/`entry.minor_version` and return `Ok(true)` on
    /// success. The default has no migration path.
    async fn migrate_entry(&self, entry: &mut ConfigEntry) -> Result<bool, IntegrationError> {
        debug!(
            "Integration {} has no migration for entry {}",
            self.domain(),
            entry.entry_id
        );
        Ok(false)
    }

    /// Clean up external state once an entry is permanently removed
    async fn remove_entry(&self, _entry: &ConfigEntry) -> Result<(), IntegrationError> {
        Ok(())
    }
}

/// One platform (sensor, switch, ...) of an integration
#[async_trait]
pub trait EntityPlatform: Send + Sync {
    /// Set up the platform's entities for an entry.
    ///
    /// The returned handle is given back to [`EntityPlatform::unload_entry`].
    async fn setup_entry(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
    ) -> Result<RuntimeData, IntegrationError>;

    /// Tear down the platform's entities. `Ok(false)` means the unload failed.
    async fn unload_entry(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
        handle: &RuntimeData,
    ) -> Result<bool, IntegrationError>;
}

/// Registered integrations and their platforms
#[derive(Default)]
pub struct Integrations {
    /// domain -> integration
    integrations: DashMap<String, Arc<dyn Integration>>,

    /// (domain, platform) -> platform
    platforms: DashMap<(String, String), Arc<dyn EntityPlatform>>,
}

impl Integrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an integration under its domain, replacing any previous one
    pub fn register(&self, integration: Arc<dyn Integration>) {
        let domain = integration.domain().to_string();
        debug!("Registered integration: {}", domain);
        self.integrations.insert(domain, integration);
    }

    /// Register the implementation of one platform of a domain
    pub fn register_platform(
        &self,
        domain: impl Into<String>,
        platform: impl Into<String>,
        implementation: Arc<dyn EntityPlatform>,
    ) {
        let key = (domain.into(), platform.into());
        debug!("Registered platform {}.{}", key.0, key.1);
        self.platforms.insert(key, implementation);
    }

    pub fn get(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(domain).map(|r| r.value().clone())
    }

    pub fn platform(&self, domain: &str, platform: &str) -> Option<Arc<dyn EntityPlatform>> {
        self.platforms
            .get(&(domain.to_string(), platform.to_string()))
            .map(|r| r.value().clone())
    }

    /// Domains with a registered integration
    pub fn domains(&self) -> Vec<String> {
        self.integrations.iter().map(|r| r.key().clone()).collect()
    }
}
