//! Entity: a capability a loaded config entry exposes to the user.
//!
//! An entity belongs to exactly one config entry and is identified by a
//! `unique_id` derived from the entry's identity plus the capability name
//! (e.g. `"{entry_id}-{output_id}"` for a speaker zone). The human-facing
//! `entity_id` is `"{platform}.{slug}"`.

mod attribute_value;
mod state;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use attribute_value::AttributeValue;
pub use state::EntityState;

use crate::error::ValidationError;
use crate::id::EntryId;
use crate::slug::slugify;
use crate::time::{Timestamp, now};

/// Category of entity an integration can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    MediaPlayer,
    Sensor,
    Switch,
}

impl Platform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MediaPlayer => "media_player",
            Self::Sensor => "sensor",
            Self::Switch => "switch",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "media_player" => Ok(Self::MediaPlayer),
            "sensor" => Ok(Self::Sensor),
            "switch" => Ok(Self::Switch),
            other => Err(ValidationError::invalid_field(
                "platform",
                format!("unknown platform {other:?}"),
            )),
        }
    }
}

/// A state holder owned by one config entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub unique_id: String,
    pub entry_id: EntryId,
    pub platform: Platform,
    pub name: String,
    pub state: EntityState,
    pub attributes: HashMap<String, AttributeValue>,
    pub last_changed: Timestamp,
    pub last_updated: Timestamp,
}

impl Entity {
    /// Start building a new [`Entity`].
    #[must_use]
    pub fn builder() -> EntityBuilder {
        EntityBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the unique id or entity id is empty,
    /// or when the entity id does not start with the platform prefix.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.unique_id.trim().is_empty() {
            return Err(ValidationError::EmptyUniqueId);
        }
        if self.entity_id.is_empty() {
            return Err(ValidationError::EmptyEntityId);
        }
        match self.entity_id.split_once('.') {
            Some((platform, object_id))
                if platform == self.platform.as_str() && !object_id.is_empty() =>
            {
                Ok(())
            }
            _ => Err(ValidationError::InvalidEntityId(self.entity_id.clone())),
        }
    }

    /// Apply a new state observed at `ts`.
    ///
    /// `last_updated` always moves; `last_changed` only moves when the
    /// state itself differs.
    pub fn update_state(&mut self, new_state: EntityState, ts: Timestamp) {
        if self.state != new_state {
            self.last_changed = ts;
        }
        self.state = new_state;
        self.last_updated = ts;
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get_attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.is_available()
    }
}

/// Builder for [`Entity`].
#[derive(Debug, Default)]
pub struct EntityBuilder {
    entity_id: Option<String>,
    unique_id: Option<String>,
    entry_id: Option<EntryId>,
    platform: Option<Platform>,
    name: Option<String>,
    state: EntityState,
    attributes: HashMap<String, AttributeValue>,
}

impl EntityBuilder {
    /// Override the derived `"{platform}.{slug(name)}"` entity id.
    #[must_use]
    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    #[must_use]
    pub fn unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    #[must_use]
    pub fn entry_id(mut self, entry_id: EntryId) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn state(mut self, state: EntityState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Build and validate the entity.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a required field is missing or an
    /// invariant fails.
    pub fn build(self) -> Result<Entity, ValidationError> {
        let platform = self
            .platform
            .ok_or_else(|| ValidationError::MissingField("platform".into()))?;
        let entry_id = self
            .entry_id
            .ok_or_else(|| ValidationError::MissingField("entry_id".into()))?;
        let name = self.name.unwrap_or_default();
        let entity_id = self
            .entity_id
            .unwrap_or_else(|| format!("{platform}.{}", slugify(&name)));
        let ts = now();
        let entity = Entity {
            entity_id,
            unique_id: self.unique_id.unwrap_or_default(),
            entry_id,
            platform,
            name,
            state: self.state,
            attributes: self.attributes,
            last_changed: ts,
            last_updated: ts,
        };
        entity.validate()?;
        Ok(entity)
    }
}
