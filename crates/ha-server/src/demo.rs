//! Built-in demo integration
//!
//! Pretends to talk to a hub at `data.host` and exposes a sensor and a
//! switch platform. Set the `offline` option to watch the retry backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ha_config_entries::{
    ConfigEntry, EntityPlatform, Integration, IntegrationError, Integrations, RuntimeData,
    SetupError,
};
use tracing::{debug, info};

pub const DOMAIN: &str = "demo";

/// Connection to the (imaginary) hub, shared by the platforms
#[derive(Debug)]
pub struct DemoHub {
    pub host: String,
    pub connected_at: DateTime<Utc>,
    connected: AtomicBool,
}

impl DemoHub {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Entities a platform created for one entry
#[derive(Debug, Clone)]
pub struct DemoEntities(pub Vec<String>);

pub struct DemoIntegration;

#[async_trait]
impl Integration for DemoIntegration {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn platforms(&self) -> Vec<String> {
        vec!["sensor".to_string(), "switch".to_string()]
    }

    fn reload_on_update(&self) -> bool {
        true
    }

    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<RuntimeData, SetupError> {
        let host = entry
            .data
            .get("host")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SetupError::Unexpected("missing host".to_string()))?;

        if entry.options.get("offline").and_then(|v| v.as_bool()) == Some(true) {
            return Err(SetupError::NotReady(format!("hub at {} is not responding", host)));
        }
        if entry.data.get("token").and_then(|v| v.as_str()) == Some("") {
            return Err(SetupError::AuthFailed("empty access token".to_string()));
        }

        info!("Connected to demo hub at {}", host);
        Ok(RuntimeData::new(DemoHub {
            host: host.to_string(),
            connected_at: Utc::now(),
            connected: AtomicBool::new(true),
        }))
    }

    async fn unload_entry(
        &self,
        _entry: &ConfigEntry,
        runtime: &RuntimeData,
    ) -> Result<bool, IntegrationError> {
        let hub = runtime
            .downcast_ref::<DemoHub>()
            .ok_or_else(|| IntegrationError::from("runtime data is not a demo hub"))?;
        hub.connected.store(false, Ordering::SeqCst);
        info!(
            "Disconnected from demo hub at {} after {}s",
            hub.host,
            (Utc::now() - hub.connected_at).num_seconds()
        );
        Ok(true)
    }
}

/// One entity platform of the demo hub
pub struct DemoPlatform {
    platform: &'static str,
    names: &'static [&'static str],
}

#[async_trait]
impl EntityPlatform for DemoPlatform {
    async fn setup_entry(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
    ) -> Result<RuntimeData, IntegrationError> {
        let hub = runtime
            .downcast_ref::<DemoHub>()
            .ok_or_else(|| IntegrationError::from("runtime data is not a demo hub"))?;
        if !hub.is_connected() {
            return Err("hub disconnected".into());
        }

        let object_id = entry.title.to_lowercase().replace(' ', "_");
        let entities: Vec<String> = self
            .names
            .iter()
            .map(|name| format!("{}.{}_{}", self.platform, object_id, name))
            .collect();
        debug!("Created {} entities: {:?}", self.platform, entities);
        Ok(RuntimeData::new(DemoEntities(entities)))
    }

    async fn unload_entry(
        &self,
        _entry: &ConfigEntry,
        _runtime: &RuntimeData,
        handle: &RuntimeData,
    ) -> Result<bool, IntegrationError> {
        let removed = handle
            .downcast_ref::<DemoEntities>()
            .map(|entities| entities.0.len())
            .unwrap_or(0);
        debug!("Removed {} {} entities", removed, self.platform);
        Ok(true)
    }
}

/// Register the demo integration and its platforms
pub fn register(integrations: &Integrations) {
    integrations.register(Arc::new(DemoIntegration));
    integrations.register_platform(
        DOMAIN,
        "sensor",
        Arc::new(DemoPlatform {
            platform: "sensor",
            names: &["temperature", "humidity"],
        }),
    );
    integrations.register_platform(
        DOMAIN,
        "switch",
        Arc::new(DemoPlatform {
            platform: "switch",
            names: &["outlet"],
        }),
    );
}
