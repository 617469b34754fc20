//! Platform forwarding
//!
//! Sets up and tears down the platforms of an entry. Platforms run
//! concurrently and fail independently: one broken platform never stops the
//! others from being attempted, and only successful forwards are recorded so
//! a later unload touches exactly what is still set up.

use futures::future::join_all;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::entry::ConfigEntry;
use crate::guard::{guarded, CallFailure};
use crate::integration::{IntegrationError, Integrations, RuntimeData};

/// A platform currently forwarded to an entry
#[derive(Debug, Clone)]
pub struct ForwardRecord {
    pub platform: String,
    /// Whatever the platform's setup returned, given back on unload
    pub handle: RuntimeData,
}

/// Why forwarding or unforwarding one platform failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("platform {0} is already forwarded")]
    AlreadyForwarded(String),

    #[error("platform {0} is not registered")]
    NotRegistered(String),

    #[error("platform reported failure")]
    Rejected,

    #[error(transparent)]
    Failed(#[from] IntegrationError),

    #[error(transparent)]
    Call(#[from] CallFailure),
}

/// Result of one platform's setup or teardown
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    pub platform: String,
    pub result: Result<(), ForwardError>,
}

impl ForwardOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Drives platform setup and teardown for one entry
pub struct PlatformForwarder<'a> {
    integrations: &'a Integrations,
    timeout: Duration,
}

impl<'a> PlatformForwarder<'a> {
    pub fn new(integrations: &'a Integrations, timeout: Duration) -> Self {
        Self {
            integrations,
            timeout,
        }
    }

    /// Forward `platforms` to `entry`, appending successes to `records`.
    ///
    /// Every platform is attempted. Returns one outcome per requested name, in
    /// request order.
    pub async fn forward(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
        platforms: &[String],
        records: &mut Vec<ForwardRecord>,
    ) -> Vec<ForwardOutcome> {
        let mut seen: Vec<&str> = records.iter().map(|r| r.platform.as_str()).collect();
        let mut attempts = Vec::with_capacity(platforms.len());
        let mut outcomes: Vec<Option<ForwardOutcome>> = Vec::with_capacity(platforms.len());

        for platform in platforms {
            if seen.contains(&platform.as_str()) {
                outcomes.push(Some(ForwardOutcome {
                    platform: platform.clone(),
                    result: Err(ForwardError::AlreadyForwarded(platform.clone())),
                }));
                continue;
            }
            seen.push(platform);
            outcomes.push(None);
            attempts.push(self.setup_platform(entry, runtime, platform));
        }

        let mut results = join_all(attempts).await.into_iter();
        for slot in outcomes.iter_mut().filter(|o| o.is_none()) {
            if let Some((platform, result)) = results.next() {
                let result = result.map(|handle| {
                    records.push(ForwardRecord {
                        platform: platform.clone(),
                        handle,
                    });
                });
                *slot = Some(ForwardOutcome { platform, result });
            }
        }

        let outcomes: Vec<ForwardOutcome> = outcomes.into_iter().flatten().collect();
        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => debug!(
                    entry_id = %entry.entry_id,
                    domain = %entry.domain,
                    platform = %outcome.platform,
                    "Forwarded platform"
                ),
                Err(err) => error!(
                    entry_id = %entry.entry_id,
                    domain = %entry.domain,
                    platform = %outcome.platform,
                    "Error setting up platform: {}",
                    err
                ),
            }
        }
        outcomes
    }

    /// Tear down every recorded platform.
    ///
    /// Records of platforms that failed to unload stay in `records`, so a
    /// retry only targets those.
    pub async fn unforward(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
        records: &mut Vec<ForwardRecord>,
    ) -> Vec<ForwardOutcome> {
        let pending = std::mem::take(records);
        let results = join_all(
            pending
                .iter()
                .map(|record| self.unload_platform(entry, runtime, record)),
        )
        .await;

        let mut outcomes = Vec::with_capacity(pending.len());
        for (record, result) in pending.into_iter().zip(results) {
            match &result {
                Ok(()) => debug!(
                    entry_id = %entry.entry_id,
                    platform = %record.platform,
                    "Unloaded platform"
                ),
                Err(err) => {
                    warn!(
                        entry_id = %entry.entry_id,
                        domain = %entry.domain,
                        platform = %record.platform,
                        "Error unloading platform: {}",
                        err
                    );
                    records.push(record.clone());
                }
            }
            outcomes.push(ForwardOutcome {
                platform: record.platform,
                result,
            });
        }
        outcomes
    }

    async fn setup_platform(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
        platform: &str,
    ) -> (String, Result<RuntimeData, ForwardError>) {
        let Some(implementation) = self.integrations.platform(&entry.domain, platform) else {
            return (
                platform.to_string(),
                Err(ForwardError::NotRegistered(platform.to_string())),
            );
        };

        let result = match guarded(self.timeout, implementation.setup_entry(entry, runtime)).await
        {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(err)) => Err(ForwardError::Failed(err)),
            Err(failure) => Err(ForwardError::Call(failure)),
        };
        (platform.to_string(), result)
    }

    async fn unload_platform(
        &self,
        entry: &ConfigEntry,
        runtime: &RuntimeData,
        record: &ForwardRecord,
    ) -> Result<(), ForwardError> {
        let implementation = self
            .integrations
            .platform(&entry.domain, &record.platform)
            .ok_or_else(|| ForwardError::NotRegistered(record.platform.clone()))?;

        match guarded(
            self.timeout,
            implementation.unload_entry(entry, runtime, &record.handle),
        )
        .await
        {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ForwardError::Rejected),
            Ok(Err(err)) => Err(ForwardError::Failed(err)),
            Err(failure) => Err(ForwardError::Call(failure)),
        }
    }
}

/// Names of the forwarded platforms, in forward order
pub fn platform_names(records: &[ForwardRecord]) -> Vec<String> {
    records.iter().map(|r| r.platform.clone()).collect()
}
