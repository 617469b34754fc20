//! Config Entries
//!
//! This crate provides the configuration entry system for Home Assistant.
//! Config entries represent individual integration instances and manage
//! their lifecycle (setup, unload, reload, removal).
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`Integration`] / [`EntityPlatform`] - What integrations implement
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries` with
//! version tracking for migrations.

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod events;
pub mod forwarder;
pub mod guard;
pub mod integration;
pub mod manager;
pub mod retry;
pub mod state_machine;
pub mod storage;
pub mod store;

// Re-export main types
pub use config::{ConfigEntriesConfig, ConfigError, ConfigResult};
pub use coordinator::RetryInfo;
pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
};
pub use error::{ConfigEntriesError, ConfigEntriesResult};
pub use events::ConfigEntryChange;
pub use forwarder::{ForwardError, ForwardOutcome, ForwardRecord, PlatformForwarder};
pub use guard::CallFailure;
pub use integration::{
    EntityPlatform, Integration, IntegrationError, Integrations, RuntimeData, SetupError,
};
pub use manager::{ConfigEntries, Removal};
pub use retry::RetryPolicy;
pub use state_machine::InvalidTransition;
pub use storage::{Storage, StorageError, StorageResult};
pub use store::{
    ConfigEntriesData, EntryStore, STORAGE_KEY, STORAGE_MINOR_VERSION, STORAGE_VERSION,
};
