//! Config entry change notifications
//!
//! Every mutation of the entry collection and every state transition is
//! broadcast so UI and notification layers can follow along.

use serde::{Deserialize, Serialize};

use crate::entry::ConfigEntryState;

/// Default channel capacity for change subscriptions
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A change to a config entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigEntryChange {
    Added {
        entry_id: String,
        domain: String,
    },
    Updated {
        entry_id: String,
        domain: String,
    },
    Removed {
        entry_id: String,
        domain: String,
    },
    StateChanged {
        entry_id: String,
        domain: String,
        from: ConfigEntryState,
        to: ConfigEntryState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ConfigEntryChange {
    /// Entry the change applies to
    pub fn entry_id(&self) -> &str {
        match self {
            ConfigEntryChange::Added { entry_id, .. }
            | ConfigEntryChange::Updated { entry_id, .. }
            | ConfigEntryChange::Removed { entry_id, .. }
            | ConfigEntryChange::StateChanged { entry_id, .. } => entry_id,
        }
    }
}
