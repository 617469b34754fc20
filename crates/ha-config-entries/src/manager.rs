//! Config Entries Manager
//!
//! Public lifecycle API: setup, unload, reload and removal of config entries.
//! Every operation on an entry runs inside that entry's coordinator section,
//! and every call into integration code goes through [`guarded`], so nothing
//! an integration does can escape to callers or stall other entries.

use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::config::ConfigEntriesConfig;
use crate::coordinator::{EntrySection, ReloadCoordinator, RetryInfo};
use crate::entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntryState, ConfigEntryUpdate,
};
use crate::error::{ConfigEntriesError, ConfigEntriesResult};
use crate::events::ConfigEntryChange;
use crate::forwarder::{platform_names, ForwardOutcome, PlatformForwarder};
use crate::guard::{guarded, CallFailure};
use crate::integration::{Integration, Integrations, SetupError};
use crate::storage::{Storage, StorageResult};
use crate::store::EntryStore;

/// What `async_remove` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Unloaded and deleted
    Removed,
    /// Unload failed; the entry is deleted once a later unload succeeds
    Deferred,
}

/// Config Entries Manager
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct ConfigEntries {
    shared: Arc<Shared>,
}

struct Shared {
    store: EntryStore,
    integrations: Arc<Integrations>,
    coordinator: ReloadCoordinator,
    config: ConfigEntriesConfig,
    changes: broadcast::Sender<ConfigEntryChange>,
}

impl ConfigEntries {
    /// Create a manager persisting to `.storage/core.config_entries`
    pub fn new(
        storage: Arc<Storage>,
        integrations: Arc<Integrations>,
        config: ConfigEntriesConfig,
    ) -> Self {
        Self::with_store(EntryStore::new(storage), integrations, config)
    }

    /// Create a manager that keeps entries in memory only
    pub fn in_memory(integrations: Arc<Integrations>, config: ConfigEntriesConfig) -> Self {
        Self::with_store(EntryStore::in_memory(), integrations, config)
    }

    fn with_store(
        store: EntryStore,
        integrations: Arc<Integrations>,
        config: ConfigEntriesConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                store,
                integrations,
                coordinator: ReloadCoordinator::new(),
                config,
                changes,
            }),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<usize> {
        self.shared.store.load().await
    }

    pub fn integrations(&self) -> &Arc<Integrations> {
        &self.shared.integrations
    }

    pub fn config(&self) -> &ConfigEntriesConfig {
        &self.shared.config
    }

    /// Subscribe to entry changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEntryChange> {
        self.shared.changes.subscribe()
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.shared.store.get(entry_id)
    }

    /// Get all entries for a domain
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.shared.store.get_by_domain(domain)
    }

    /// Lazily walk the entries of a domain
    pub fn iter_domain<'a>(&'a self, domain: &str) -> impl Iterator<Item = ConfigEntry> + 'a {
        self.shared.store.iter_domain(domain)
    }

    /// Get loaded entries for a domain
    pub fn get_loaded_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.iter_domain(domain).filter(|e| e.is_loaded()).collect()
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.shared.store.get_by_unique_id(domain, unique_id)
    }

    /// Current lifecycle state of an entry
    pub fn state(&self, entry_id: &str) -> Option<ConfigEntryState> {
        self.shared.store.state(entry_id)
    }

    /// The scheduled automatic retry of an entry in `SetupRetry`
    pub fn pending_retry(&self, entry_id: &str) -> Option<RetryInfo> {
        self.shared.coordinator.pending_retry(entry_id)
    }

    /// Run a lifecycle operation on its own task.
    ///
    /// Dropping the returned future does not cancel the operation; it runs
    /// to completion and leaves the entry in a settled state.
    async fn detached<T, F, Fut>(&self, entry_id: &str, op: F) -> ConfigEntriesResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Shared>, String) -> Fut,
        Fut: Future<Output = ConfigEntriesResult<T>> + Send + 'static,
    {
        let task = tokio::spawn(op(self.shared.clone(), entry_id.to_string()).in_current_span());
        task.await.map_err(|err| ConfigEntriesError::Interrupted {
            entry_id: entry_id.to_string(),
            reason: err.to_string(),
        })?
    }

    /// Add a new config entry. It is not set up.
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self.shared.store.add(entry).await?;
        self.shared.emit(ConfigEntryChange::Added {
            entry_id: entry.entry_id.clone(),
            domain: entry.domain.clone(),
        });
        Ok(entry)
    }

    /// Set up an entry.
    ///
    /// Cancels a pending retry and attempts right away. Fails for entries
    /// that are loaded, failed to unload, or are being removed.
    #[instrument(skip(self))]
    pub async fn async_setup(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntryState> {
        self.detached(entry_id, |shared, entry_id| async move {
            let (mut section, entry) = shared.enter(&entry_id).await?;
            section.cancel_retry();

            if entry.pending_removal {
                return Err(not_allowed(&entry, "entry is being removed"));
            }
            match entry.state {
                ConfigEntryState::Loaded => Err(not_allowed(&entry, "entry is already loaded")),
                ConfigEntryState::FailedUnload => {
                    Err(not_allowed(&entry, "entry must be unloaded first"))
                }
                _ => shared.setup_locked(&mut section, entry, 0).await,
            }
        })
        .await
    }

    /// Unload an entry. Unloading a `NotLoaded` entry succeeds without doing anything.
    #[instrument(skip(self))]
    pub async fn async_unload(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntryState> {
        self.detached(entry_id, |shared, entry_id| async move {
            let (mut section, entry) = shared.enter(&entry_id).await?;
            section.cancel_retry();
            shared.unload_and_settle(&mut section, &entry).await
        })
        .await
    }

    /// Unload then set up an entry as one operation.
    ///
    /// When the unload fails the entry stays in `FailedUnload` and setup is
    /// not attempted.
    #[instrument(skip(self))]
    pub async fn async_reload(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntryState> {
        self.detached(entry_id, |shared, entry_id| async move {
            let (mut section, entry) = shared.enter(&entry_id).await?;
            section.cancel_retry();

            if entry.pending_removal {
                return Err(not_allowed(&entry, "entry is being removed"));
            }
            shared.reload_locked(&mut section, &entry).await
        })
        .await
    }

    /// Unload and delete an entry
    #[instrument(skip(self))]
    pub async fn async_remove(&self, entry_id: &str) -> ConfigEntriesResult<Removal> {
        self.detached(entry_id, |shared, entry_id| async move {
            let (mut section, entry) = shared.enter(&entry_id).await?;
            section.cancel_retry();

            let state = shared.unload_locked(&mut section, &entry).await?;
            if state != ConfigEntryState::NotLoaded {
                shared
                    .store
                    .modify(&entry_id, |e| e.pending_removal = true);
                warn!(
                    entry_id = %entry_id,
                    domain = %entry.domain,
                    "Entry could not be unloaded, removal deferred until it unloads"
                );
                return Ok(Removal::Deferred);
            }

            shared.finish_removal(&entry).await?;
            Ok(Removal::Removed)
        })
        .await
    }

    /// Change persisted fields of an entry.
    ///
    /// Returns whether anything changed. A changed, loaded entry of an
    /// integration that asks for it is reloaded.
    #[instrument(skip(self, update))]
    pub async fn async_update_entry(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<bool> {
        self.detached(entry_id, move |shared, entry_id| async move {
            let (entry, changed) = shared.store.update(&entry_id, update).await?;
            if !changed {
                return Ok(false);
            }

            shared.emit(ConfigEntryChange::Updated {
                entry_id: entry.entry_id.clone(),
                domain: entry.domain.clone(),
            });

            let reload = shared
                .integrations
                .get(&entry.domain)
                .map(|integration| integration.reload_on_update())
                .unwrap_or(false);
            if reload {
                // Re-read under the section, the entry may have changed state meanwhile
                let (mut section, entry) = shared.enter(&entry_id).await?;
                if entry.state == ConfigEntryState::Loaded && !entry.pending_removal {
                    debug!(entry_id = %entry_id, "Reloading entry after update");
                    shared.reload_locked(&mut section, &entry).await?;
                }
            }

            Ok(true)
        })
        .await
    }

    /// Disable (`Some`) or enable (`None`) an entry.
    ///
    /// Disabling unloads the entry; enabling sets it up.
    #[instrument(skip(self))]
    pub async fn async_set_disabled_by(
        &self,
        entry_id: &str,
        disabled_by: Option<ConfigEntryDisabledBy>,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        self.detached(entry_id, move |shared, entry_id| async move {
            let (mut section, _) = shared.enter(&entry_id).await?;

            let (entry, changed) = shared.store.set_disabled_by(&entry_id, disabled_by).await?;
            if !changed {
                return Ok(entry.state);
            }

            shared.emit(ConfigEntryChange::Updated {
                entry_id: entry.entry_id.clone(),
                domain: entry.domain.clone(),
            });

            if entry.is_disabled() {
                section.cancel_retry();
                info!(entry_id = %entry_id, domain = %entry.domain, "Disabling entry");
                shared.unload_and_settle(&mut section, &entry).await
            } else if entry.state == ConfigEntryState::NotLoaded && !entry.pending_removal {
                info!(entry_id = %entry_id, domain = %entry.domain, "Enabling entry");
                shared.setup_locked(&mut section, entry, 0).await
            } else {
                Ok(entry.state)
            }
        })
        .await
    }

    /// Set up every enabled entry that is not loaded, concurrently
    pub async fn async_setup_all(&self) -> Vec<ConfigEntriesResult<ConfigEntryState>> {
        let entry_ids: Vec<String> = self
            .shared
            .store
            .iter()
            .filter(|e| {
                !e.is_disabled() && !e.pending_removal && e.state == ConfigEntryState::NotLoaded
            })
            .map(|e| e.entry_id)
            .collect();

        info!("Setting up {} config entries", entry_ids.len());
        join_all(entry_ids.iter().map(|id| self.async_setup(id))).await
    }

    /// Cancel all retries and unload every entry.
    ///
    /// No new retries are scheduled afterwards, even by setups that were
    /// still running.
    pub async fn async_shutdown(&self) {
        let cancelled = self.shared.coordinator.cancel_all();
        debug!("Cancelled {} pending retries", cancelled);

        let entry_ids: Vec<String> = self
            .shared
            .store
            .iter()
            .filter(|e| e.state != ConfigEntryState::NotLoaded)
            .map(|e| e.entry_id)
            .collect();

        let results = join_all(entry_ids.iter().map(|id| self.async_unload(id))).await;
        for (entry_id, result) in entry_ids.iter().zip(results) {
            match result {
                Ok(ConfigEntryState::NotLoaded) => {}
                Ok(state) => warn!(entry_id = %entry_id, state = %state, "Entry left set up at shutdown"),
                Err(err) => error!(entry_id = %entry_id, "Error unloading entry at shutdown: {}", err),
            }
        }
        info!("Config entries shut down");
    }

    /// Get all entry IDs
    pub fn entry_ids(&self) -> Vec<String> {
        self.shared.store.entry_ids()
    }

    /// Get all domains with entries
    pub fn domains(&self) -> Vec<String> {
        self.shared.store.domains()
    }

    pub fn len(&self) -> usize {
        self.shared.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.store.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.shared.store.iter()
    }
}

fn not_allowed(entry: &ConfigEntry, reason: &'static str) -> ConfigEntriesError {
    ConfigEntriesError::OperationNotAllowed {
        entry_id: entry.entry_id.clone(),
        state: entry.state,
        reason,
    }
}

impl Shared {
    fn emit(&self, change: ConfigEntryChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }

    /// Take the entry's section.
    ///
    /// Unknown entries fail before a section is created. An entry left in
    /// an in-progress state by an operation that never finished is moved to
    /// the matching failure state first.
    async fn enter(&self, entry_id: &str) -> ConfigEntriesResult<(EntrySection, ConfigEntry)> {
        self.store.require(entry_id)?;
        let section = self.coordinator.acquire(entry_id).await;

        let entry = match self.store.require(entry_id) {
            Ok(entry) => entry,
            Err(err) => {
                // Removed while we waited
                drop(section);
                self.coordinator.forget(entry_id);
                return Err(err);
            }
        };
        let entry = self.settle_interrupted(entry)?;
        Ok((section, entry))
    }

    fn settle_interrupted(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        let to = match entry.state {
            ConfigEntryState::SetupInProgress => ConfigEntryState::SetupError,
            ConfigEntryState::UnloadInProgress => ConfigEntryState::FailedUnload,
            _ => return Ok(entry),
        };

        warn!(
            entry_id = %entry.entry_id,
            domain = %entry.domain,
            "Previous operation stopped in {}, moving entry to {}",
            entry.state,
            to
        );
        self.transition(&entry.entry_id, to, Some(format!("{} was interrupted", entry.state)))?;
        self.store.require(&entry.entry_id)
    }

    /// Move an entry to `to` and announce it
    fn transition(
        &self,
        entry_id: &str,
        to: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let (from, domain) = self
            .store
            .modify(entry_id, |e| {
                let from = e.state;
                e.try_set_state(to, reason.clone())
                    .map(|()| (from, e.domain.clone()))
            })
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))??;

        debug!(entry_id = %entry_id, domain = %domain, "State {} -> {}", from, to);
        self.emit(ConfigEntryChange::StateChanged {
            entry_id: entry_id.to_string(),
            domain,
            from,
            to,
            reason,
        });
        Ok(())
    }

    async fn setup_locked(
        self: &Arc<Self>,
        section: &mut EntrySection,
        mut entry: ConfigEntry,
        attempt: u32,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        let entry_id = entry.entry_id.clone();

        if entry.is_disabled() {
            debug!(entry_id = %entry_id, "Skipping setup for disabled entry");
            return Ok(entry.state);
        }

        if !section.is_empty() {
            // An interrupted setup left resources behind
            let state = self.unload_locked(section, &entry).await?;
            if state != ConfigEntryState::NotLoaded {
                return Ok(state);
            }
            entry = self.store.require(&entry_id)?;
        }

        self.transition(&entry_id, ConfigEntryState::SetupInProgress, None)?;
        self.store.modify(&entry_id, |e| e.tries = attempt);
        section.clear();

        let Some(integration) = self.integrations.get(&entry.domain) else {
            error!(
                entry_id = %entry_id,
                domain = %entry.domain,
                "No integration registered for domain"
            );
            return self.setup_failed(&entry_id, "integration not found".to_string());
        };

        let entry = match self.migrate(&integration, entry).await {
            Ok(entry) => entry,
            Err(reason) => {
                error!(entry_id = %entry_id, "Migration failed: {}", reason);
                return self.setup_failed(&entry_id, reason);
            }
        };

        let result = guarded(self.config.setup_timeout(), integration.setup_entry(&entry)).await;
        let runtime = match result {
            Ok(Ok(runtime)) => runtime,
            Ok(Err(SetupError::NotReady(reason))) => {
                if attempt == 0 {
                    warn!(
                        entry_id = %entry_id,
                        domain = %entry.domain,
                        "Config entry not ready yet: {}",
                        reason
                    );
                } else {
                    debug!(
                        entry_id = %entry_id,
                        domain = %entry.domain,
                        attempt,
                        "Config entry still not ready: {}",
                        reason
                    );
                }
                return self.retry_later(section, &entry, attempt, reason);
            }
            Ok(Err(SetupError::AuthFailed(reason))) => {
                warn!(
                    entry_id = %entry_id,
                    domain = %entry.domain,
                    "Authentication failed, reauthentication required: {}",
                    reason
                );
                return self.setup_failed(&entry_id, reason);
            }
            Ok(Err(SetupError::Unexpected(reason))) => {
                error!(
                    entry_id = %entry_id,
                    domain = %entry.domain,
                    "Error setting up entry: {}",
                    reason
                );
                return self.setup_failed(&entry_id, reason);
            }
            Err(failure @ CallFailure::TimedOut(_)) => {
                error!(
                    entry_id = %entry_id,
                    domain = %entry.domain,
                    "Setup {}",
                    failure
                );
                return self.retry_later(section, &entry, attempt, format!("setup {}", failure));
            }
            Err(failure @ CallFailure::Panicked(_)) => {
                error!(
                    entry_id = %entry_id,
                    domain = %entry.domain,
                    "Unexpected error setting up entry: {}",
                    failure
                );
                return self.setup_failed(&entry_id, format!("setup {}", failure));
            }
        };

        section.runtime_data = Some(runtime.clone());
        let forwarder = PlatformForwarder::new(&self.integrations, self.config.platform_timeout());
        let outcomes = forwarder
            .forward(&entry, &runtime, &integration.platforms(), &mut section.forwarded)
            .await;

        let platforms = platform_names(&section.forwarded);
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        self.store
            .modify(&entry_id, |e| e.platforms = platforms.clone());
        self.transition(&entry_id, ConfigEntryState::Loaded, None)?;

        info!(
            entry_id = %entry_id,
            domain = %entry.domain,
            "Setup completed for entry: {} (platforms: {:?}, failed: {})",
            entry.title,
            platforms,
            failed
        );
        Ok(ConfigEntryState::Loaded)
    }

    fn setup_failed(
        &self,
        entry_id: &str,
        reason: String,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        self.transition(entry_id, ConfigEntryState::SetupError, Some(reason))?;
        Ok(ConfigEntryState::SetupError)
    }

    fn retry_later(
        self: &Arc<Self>,
        section: &EntrySection,
        entry: &ConfigEntry,
        attempt: u32,
        reason: String,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        let entry_id = entry.entry_id.clone();
        self.transition(&entry_id, ConfigEntryState::SetupRetry, Some(reason))?;
        self.store.modify(&entry_id, |e| e.tries = attempt + 1);

        let delay = self.config.retry.delay_for(attempt);
        let shared = self.clone();
        let retry_id = entry_id.clone();
        let scheduled = section.schedule_retry(attempt, delay, move |generation| {
            retry_entry(shared, retry_id, generation, attempt + 1)
        });

        if scheduled {
            info!(
                entry_id = %entry_id,
                domain = %entry.domain,
                "Retrying setup in {:.1}s (attempt {})",
                delay.as_secs_f64(),
                attempt + 1
            );
        } else {
            debug!(entry_id = %entry_id, "Shutting down, not scheduling a retry");
        }
        Ok(ConfigEntryState::SetupRetry)
    }

    /// Bring the stored entry up to the integration's version
    async fn migrate(
        &self,
        integration: &Arc<dyn Integration>,
        entry: ConfigEntry,
    ) -> Result<ConfigEntry, String> {
        let (version, minor_version) = integration.version();
        if entry.version > version {
            return Err(format!(
                "stored version {}.{} is newer than supported {}.{}",
                entry.version, entry.minor_version, version, minor_version
            ));
        }
        if entry.version == version && entry.minor_version >= minor_version {
            return Ok(entry);
        }

        info!(
            entry_id = %entry.entry_id,
            domain = %entry.domain,
            "Migrating entry from version {}.{} to {}.{}",
            entry.version,
            entry.minor_version,
            version,
            minor_version
        );

        let mut migrated = entry.clone();
        match guarded(
            self.config.setup_timeout(),
            integration.migrate_entry(&mut migrated),
        )
        .await
        {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return Err("migration failed".to_string()),
            Ok(Err(err)) => return Err(format!("migration failed: {}", err)),
            Err(failure) => return Err(format!("migration {}", failure)),
        }

        let update = ConfigEntryUpdate::new()
            .title(migrated.title)
            .data(migrated.data)
            .options(migrated.options)
            .unique_id(migrated.unique_id)
            .version(migrated.version, migrated.minor_version);
        let (updated, changed) = self
            .store
            .update(&entry.entry_id, update)
            .await
            .map_err(|err| format!("failed to save migrated entry: {}", err))?;
        if changed {
            self.emit(ConfigEntryChange::Updated {
                entry_id: updated.entry_id.clone(),
                domain: updated.domain.clone(),
            });
        }
        Ok(updated)
    }

    async fn unload_locked(
        &self,
        section: &mut EntrySection,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        let entry_id = entry.entry_id.as_str();

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(ConfigEntryState::NotLoaded),
            ConfigEntryState::SetupInProgress | ConfigEntryState::UnloadInProgress => {
                return Err(not_allowed(entry, "another operation is in progress"));
            }
            ConfigEntryState::SetupRetry | ConfigEntryState::SetupError if section.is_empty() => {
                // Setup never completed, nothing to tear down
                self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;
                section.clear();
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                return Ok(ConfigEntryState::NotLoaded);
            }
            ConfigEntryState::SetupRetry
            | ConfigEntryState::SetupError
            | ConfigEntryState::Loaded
            | ConfigEntryState::FailedUnload => {}
        }

        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let runtime = section.runtime_data.clone().unwrap_or_default();
        let forwarder = PlatformForwarder::new(&self.integrations, self.config.platform_timeout());
        let outcomes = forwarder
            .unforward(entry, &runtime, &mut section.forwarded)
            .await;

        let remaining = platform_names(&section.forwarded);
        self.store
            .modify(entry_id, |e| e.platforms = remaining.clone());

        if !outcomes.iter().all(ForwardOutcome::is_ok) {
            return self.unload_failed(
                entry_id,
                format!("failed to unload platforms: {}", remaining.join(", ")),
            );
        }

        // Integration teardown already succeeded on an earlier attempt when
        // the runtime data is gone
        if let Some(runtime) = section.runtime_data.clone() {
            let Some(integration) = self.integrations.get(&entry.domain) else {
                error!(entry_id = %entry_id, domain = %entry.domain, "No integration registered for domain");
                return self.unload_failed(entry_id, "integration not found".to_string());
            };

            match guarded(
                self.config.unload_timeout(),
                integration.unload_entry(entry, &runtime),
            )
            .await
            {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    warn!(entry_id = %entry_id, domain = %entry.domain, "Integration reported unload failure");
                    return self.unload_failed(entry_id, "integration unload failed".to_string());
                }
                Ok(Err(err)) => {
                    error!(entry_id = %entry_id, domain = %entry.domain, "Error unloading entry: {}", err);
                    return self.unload_failed(entry_id, err.to_string());
                }
                Err(failure) => {
                    error!(entry_id = %entry_id, domain = %entry.domain, "Unload {}", failure);
                    return self.unload_failed(entry_id, format!("unload {}", failure));
                }
            }
        }

        section.clear();
        self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
        info!(entry_id = %entry_id, domain = %entry.domain, "Unloaded entry: {}", entry.title);
        Ok(ConfigEntryState::NotLoaded)
    }

    fn unload_failed(
        &self,
        entry_id: &str,
        reason: String,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        self.transition(entry_id, ConfigEntryState::FailedUnload, Some(reason))?;
        Ok(ConfigEntryState::FailedUnload)
    }

    /// Unload, completing a deferred removal when the unload succeeds
    async fn unload_and_settle(
        &self,
        section: &mut EntrySection,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        let state = self.unload_locked(section, entry).await?;
        if state == ConfigEntryState::NotLoaded && entry.pending_removal {
            self.finish_removal(entry).await?;
        }
        Ok(state)
    }

    async fn reload_locked(
        self: &Arc<Self>,
        section: &mut EntrySection,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        let state = self.unload_locked(section, entry).await?;
        if state != ConfigEntryState::NotLoaded {
            return Ok(state);
        }

        let entry = self.store.require(&entry.entry_id)?;
        self.setup_locked(section, entry, 0).await
    }

    async fn finish_removal(&self, entry: &ConfigEntry) -> ConfigEntriesResult<()> {
        if let Some(integration) = self.integrations.get(&entry.domain) {
            match guarded(self.config.unload_timeout(), integration.remove_entry(entry)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    entry_id = %entry.entry_id,
                    domain = %entry.domain,
                    "Error cleaning up removed entry: {}",
                    err
                ),
                Err(failure) => error!(
                    entry_id = %entry.entry_id,
                    domain = %entry.domain,
                    "Remove hook {}",
                    failure
                ),
            }
        }

        let removed = self.store.remove(&entry.entry_id).await?;
        self.coordinator.forget(&removed.entry_id);
        self.emit(ConfigEntryChange::Removed {
            entry_id: removed.entry_id,
            domain: removed.domain,
        });
        Ok(())
    }
}

/// Body of a retry timer
fn retry_entry(
    shared: Arc<Shared>,
    entry_id: String,
    generation: u64,
    attempt: u32,
) -> BoxFuture<'static, ()> {
    async move {
        let Ok((mut section, entry)) = shared.enter(&entry_id).await else {
            return;
        };
        if !section.claim_retry(generation) {
            return;
        }
        if entry.state != ConfigEntryState::SetupRetry {
            return;
        }

        debug!(entry_id = %entry_id, attempt, "Retrying setup");
        if let Err(err) = shared.setup_locked(&mut section, entry, attempt).await {
            error!(entry_id = %entry_id, "Error retrying setup: {}", err);
        }
    }
    .boxed()
}
