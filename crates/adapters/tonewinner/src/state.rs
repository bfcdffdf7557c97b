//! Last reported amplifier state and its media player rendering.

use plughub_domain::entity::{Entity, EntityState, Platform};
use plughub_domain::error::ValidationError;
use plughub_domain::id::EntryId;

use crate::protocol::{MAX_VOLUME, Response};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub connected: bool,
    pub power: Option<bool>,
    pub volume: Option<u8>,
    pub muted: Option<bool>,
    pub source: Option<String>,
}

impl DeviceState {
    /// Apply a report. Returns `true` when it switched the amplifier on.
    ///
    /// Switching off forgets volume, mute and source: the amplifier stops
    /// reporting them and they are queried again at the next power on.
    pub fn apply(&mut self, response: Response) -> bool {
        match response {
            Response::Power(on) => {
                let powered_on = on && self.power != Some(true);
                self.power = Some(on);
                if !on {
                    self.volume = None;
                    self.muted = None;
                    self.source = None;
                }
                powered_on
            }
            Response::Volume(volume) => {
                self.volume = Some(volume);
                false
            }
            Response::Mute(muted) => {
                self.muted = Some(muted);
                false
            }
            Response::Source(source) => {
                self.source = Some(source);
                false
            }
        }
    }

    /// Connection lost: nothing reported before can be trusted.
    pub fn disconnect(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn entity_state(&self) -> EntityState {
        match (self.connected, self.power) {
            (false, _) => EntityState::Unavailable,
            (true, Some(true)) => EntityState::On,
            (true, Some(false)) => EntityState::Off,
            (true, None) => EntityState::Unknown,
        }
    }
}

/// Amplifier volume step as a level in 0..=1.
#[must_use]
pub fn volume_level(volume: u8) -> f64 {
    f64::from(volume.min(MAX_VOLUME)) / f64::from(MAX_VOLUME)
}

/// Level in 0..=1 as an amplifier volume step.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn volume_from_level(level: f64) -> u8 {
    (level.clamp(0.0, 1.0) * f64::from(MAX_VOLUME)).round() as u8
}

/// Identity of the single media player of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub entry_id: EntryId,
    pub unique_id: String,
    pub name: String,
}

/// # Errors
///
/// Returns [`ValidationError`] when the entity cannot be built.
pub fn render(info: &PlayerInfo, state: &DeviceState) -> Result<Entity, ValidationError> {
    let mut builder = Entity::builder()
        .unique_id(info.unique_id.as_str())
        .entry_id(info.entry_id)
        .platform(Platform::MediaPlayer)
        .name(info.name.as_str())
        .state(state.entity_state());
    if state.connected {
        if let Some(volume) = state.volume {
            builder = builder.attribute("volume_level", volume_level(volume));
        }
        if let Some(muted) = state.muted {
            builder = builder.attribute("is_volume_muted", muted);
        }
        if let Some(source) = &state.source {
            builder = builder.attribute("source", source.as_str());
        }
    }
    builder.build()
}
