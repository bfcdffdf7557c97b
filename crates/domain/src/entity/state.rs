//! Entity state: the current operational state of an entity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Discrete operational state of an entity.
///
/// Media players use the playback variants; sensors report free-form
/// readings through [`Value`](Self::Value).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntityState {
    On,
    Off,
    Playing,
    Paused,
    Idle,
    #[default]
    Unknown,
    Unavailable,
    Value(String),
}

impl EntityState {
    /// Whether the entity is reachable (anything but [`Unavailable`](Self::Unavailable)).
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
            Self::Playing => f.write_str("playing"),
            Self::Paused => f.write_str("paused"),
            Self::Idle => f.write_str("idle"),
            Self::Unknown => f.write_str("unknown"),
            Self::Unavailable => f.write_str("unavailable"),
            Self::Value(value) => f.write_str(value),
        }
    }
}

impl FromStr for EntityState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "on" => Self::On,
            "off" => Self::Off,
            "playing" => Self::Playing,
            "paused" => Self::Paused,
            "idle" => Self::Idle,
            "unknown" => Self::Unknown,
            "unavailable" => Self::Unavailable,
            other => Self::Value(other.to_string()),
        })
    }
}

impl Serialize for EntityState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let Ok(state) = raw.parse::<Self>();
        Ok(state)
    }
}
