//! Errors surfaced to callers of the config entries API
//!
//! Failures inside integration code never show up here; they become entry
//! states instead.

use thiserror::Error;

use crate::entry::ConfigEntryState;
use crate::state_machine::InvalidTransition;
use crate::storage::StorageError;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    Duplicate { domain: String, unique_id: String },

    #[error("Operation not allowed for entry {entry_id} in state {state}: {reason}")]
    OperationNotAllowed {
        entry_id: String,
        state: ConfigEntryState,
        reason: &'static str,
    },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Operation on entry {entry_id} did not complete: {reason}")]
    Interrupted { entry_id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;
