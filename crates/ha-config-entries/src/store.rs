//! Entry Store
//!
//! Durable collection of config entries with lookups by id, by domain and by
//! (domain, unique_id). Reads are lock-free through the indexes; every
//! persisted mutation goes through a single writer section so duplicate
//! checks and the file on disk stay consistent.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::entry::{ConfigEntry, ConfigEntryDisabledBy, ConfigEntryState, ConfigEntryUpdate};
use crate::error::{ConfigEntriesError, ConfigEntriesResult};
use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 5;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    /// All config entries
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// A pending mutation of one entry
#[derive(Clone, Copy)]
enum Change<'a> {
    Put(&'a ConfigEntry),
    Delete(&'a str),
}

/// Indexed, persisted config entries
pub struct EntryStore {
    /// Storage backend, None keeps everything in memory
    storage: Option<Arc<Storage>>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> entry_ids (ULIDs sort by creation)
    by_domain: DashMap<String, BTreeSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes persisted mutations
    write_lock: Mutex<()>,
}

impl EntryStore {
    /// Create a store persisted to `.storage/core.config_entries`
    pub fn new(storage: Arc<Storage>) -> Self {
        Self::with_storage(Some(storage))
    }

    /// Create a store that never touches disk
    pub fn in_memory() -> Self {
        Self::with_storage(None)
    }

    fn with_storage(storage: Option<Arc<Storage>>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Load entries from storage, returning how many were read
    pub async fn load(&self) -> StorageResult<usize> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };
        let _write = self.write_lock.lock().await;

        let Some(storage_file) = storage.load::<ConfigEntriesData>().await? else {
            return Ok(0);
        };

        info!(
            "Loading {} config entries from storage (v{}.{})",
            storage_file.data.entries.len(),
            storage_file.version,
            storage_file.minor_version
        );

        let count = storage_file.data.entries.len();
        for entry in storage_file.data.entries {
            self.index_entry(entry);
        }
        Ok(count)
    }

    /// Write all entries as they are once `change` is applied. Callers hold
    /// the write lock and touch memory only after this succeeded.
    async fn persist(&self, change: Change<'_>) -> StorageResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let changed_id = match change {
            Change::Put(entry) => entry.entry_id.as_str(),
            Change::Delete(entry_id) => entry_id,
        };
        let mut entries: Vec<ConfigEntry> = self
            .entries
            .iter()
            .filter(|r| r.key() != changed_id)
            .map(|r| r.value().clone())
            .collect();
        if let Change::Put(entry) = change {
            entries.push(entry.clone());
        }
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        let count = entries.len();

        storage
            .save(&ConfigEntriesData { entries }.into_storage_file())
            .await?;
        debug!("Saved {} config entries to storage", count);
        Ok(())
    }

    fn index_entry(&self, entry: ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id.clone());
        }

        self.entries.insert(entry_id, entry);
    }

    fn unindex_unique_id(&self, domain: &str, unique_id: &str, entry_id: &str) {
        // Another entry may have taken over the unique_id while this one was
        // pending removal
        self.by_unique_id
            .remove_if(&(domain.to_string(), unique_id.to_string()), |_, id| {
                id == entry_id
            });
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        let now_empty = self
            .by_domain
            .get_mut(&entry.domain)
            .map(|mut ids| {
                ids.remove(&entry.entry_id);
                ids.is_empty()
            })
            .unwrap_or(false);
        if now_empty {
            self.by_domain
                .remove_if(&entry.domain, |_, ids| ids.is_empty());
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.unindex_unique_id(&entry.domain, unique_id, &entry.entry_id);
        }

        self.entries.remove(&entry.entry_id);
    }

    /// Whether an active entry other than `except` holds (domain, unique_id)
    fn has_active_duplicate(&self, domain: &str, unique_id: &str, except: Option<&str>) -> bool {
        self.get_by_unique_id(domain, unique_id)
            .map(|existing| {
                existing.holds_unique_id() && Some(existing.entry_id.as_str()) != except
            })
            .unwrap_or(false)
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// Get an entry by ID, failing with `NotFound`
    pub fn require(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))
    }

    /// Current lifecycle state of an entry
    pub fn state(&self, entry_id: &str) -> Option<ConfigEntryState> {
        self.entries.get(entry_id).map(|r| r.state)
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.entries.contains_key(entry_id)
    }

    /// Get all entries for a domain
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.iter_domain(domain).collect()
    }

    /// Lazily walk the entries of a domain.
    ///
    /// Entry ids are captured up front; each entry is read as the iterator
    /// reaches it, so entries removed meanwhile are skipped. Call again to
    /// restart.
    pub fn iter_domain<'a>(&'a self, domain: &str) -> impl Iterator<Item = ConfigEntry> + 'a {
        let ids: Vec<String> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.into_iter().filter_map(move |id| self.get(&id))
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    /// Add a new config entry
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        let _write = self.write_lock.lock().await;

        if let Some(ref unique_id) = entry.unique_id {
            if self.has_active_duplicate(&entry.domain, unique_id, None) {
                return Err(ConfigEntriesError::Duplicate {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.persist(Change::Put(&entry)).await?;
        self.index_entry(entry.clone());

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );

        Ok(entry)
    }

    /// Update persisted fields, returning the entry and whether it changed
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<(ConfigEntry, bool)> {
        let _write = self.write_lock.lock().await;

        let current = self.require(entry_id)?;

        let mut preview = current.clone();
        if !update.clone().apply(&mut preview) {
            return Ok((current, false));
        }

        if preview.unique_id != current.unique_id {
            if let Some(ref unique_id) = preview.unique_id {
                if self.has_active_duplicate(&preview.domain, unique_id, Some(entry_id)) {
                    return Err(ConfigEntriesError::Duplicate {
                        domain: preview.domain.clone(),
                        unique_id: unique_id.clone(),
                    });
                }
            }
        }

        self.persist(Change::Put(&preview)).await?;

        if preview.unique_id != current.unique_id {
            if let Some(ref old) = current.unique_id {
                self.unindex_unique_id(&current.domain, old, entry_id);
            }
            if let Some(ref new) = preview.unique_id {
                self.by_unique_id
                    .insert((preview.domain.clone(), new.clone()), entry_id.to_string());
            }
        }

        // Apply to the live record so runtime fields written meanwhile survive
        let updated = self
            .entries
            .get_mut(entry_id)
            .map(|mut live| {
                update.apply(&mut live);
                live.clone()
            })
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        debug!("Updated config entry: {}", entry_id);
        Ok((updated, true))
    }

    /// Persist a new disabled_by value
    pub async fn set_disabled_by(
        &self,
        entry_id: &str,
        disabled_by: Option<ConfigEntryDisabledBy>,
    ) -> ConfigEntriesResult<(ConfigEntry, bool)> {
        let _write = self.write_lock.lock().await;

        let current = self.require(entry_id)?;
        if current.disabled_by == disabled_by {
            return Ok((current, false));
        }

        let mut preview = current;
        preview.disabled_by = disabled_by;
        preview.modified_at = chrono::Utc::now();
        self.persist(Change::Put(&preview)).await?;

        let updated = self
            .modify(entry_id, |live| {
                live.disabled_by = preview.disabled_by;
                live.modified_at = preview.modified_at;
                live.clone()
            })
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        debug!("Entry {} disabled_by set to {:?}", entry_id, disabled_by);
        Ok((updated, true))
    }

    /// Change fields that are never persisted (state, platforms, ...)
    pub fn modify<R>(&self, entry_id: &str, f: impl FnOnce(&mut ConfigEntry) -> R) -> Option<R> {
        self.entries.get_mut(entry_id).map(|mut entry| f(&mut entry))
    }

    /// Remove an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let _write = self.write_lock.lock().await;

        let entry = self.require(entry_id)?;
        self.persist(Change::Delete(entry_id)).await?;
        self.unindex_entry(&entry);

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );

        Ok(entry)
    }

    /// Get all entry IDs
    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Get all domains with entries
    pub fn domains(&self) -> Vec<String> {
        self.by_domain.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all entries
    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }
}
