//! Event: an immutable record of something that happened.
//!
//! Events are produced when entities appear, change or disappear, when a
//! config entry changes lifecycle state and when the set of backup agents
//! changes.

use serde::{Deserialize, Serialize};

use crate::id::{EntryId, EventId};
use crate::time::{Timestamp, now};

/// What kind of thing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StateChanged,
    EntityAdded,
    EntityRemoved,
    EntryStateChanged,
    BackupAgentsChanged,
}

impl EventType {
    /// Wire name, as serialized.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StateChanged => "state_changed",
            Self::EntityAdded => "entity_added",
            Self::EntityRemoved => "entity_removed",
            Self::EntryStateChanged => "entry_state_changed",
            Self::BackupAgentsChanged => "backup_agents_changed",
        }
    }
}

/// A published domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: EventType,
    pub entry_id: Option<EntryId>,
    pub entity_id: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: Timestamp,
}

impl Event {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            entry_id: None,
            entity_id: None,
            data,
            timestamp: now(),
        }
    }

    /// Attach the config entry the event concerns.
    #[must_use]
    pub fn with_entry(mut self, entry_id: EntryId) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    /// Attach the entity the event concerns.
    #[must_use]
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }
}
