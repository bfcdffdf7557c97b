//! Player model and its media player rendering.

use plughub_domain::entity::{Entity, EntityState, Platform};
use plughub_domain::error::ValidationError;
use plughub_domain::id::EntryId;
use plughub_domain::slug::slugify;

use crate::message::{Metadata, PlaybackStatus, PlayerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Live,
    /// The player left the bus.
    Gone,
    /// The agent connection dropped; the player may still exist.
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub player_id: String,
    pub identity: String,
    pub status: Option<PlaybackStatus>,
    pub metadata: Metadata,
    pub presence: Presence,
}

impl Player {
    #[must_use]
    pub fn new(player_id: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            identity: identity.into(),
            status: None,
            metadata: Metadata::default(),
            presence: Presence::Live,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.presence == Presence::Live
    }

    /// Apply one message addressed to this player.
    pub fn apply(&mut self, message: PlayerMessage) {
        match message {
            PlayerMessage::Appeared { identity, .. } => {
                self.identity = identity;
                self.presence = Presence::Live;
            }
            PlayerMessage::Status {
                status, metadata, ..
            } => {
                self.status = Some(status);
                self.metadata = metadata;
                self.presence = Presence::Live;
            }
            PlayerMessage::Gone { .. } => self.leave(Presence::Gone),
            PlayerMessage::InitialSyncDone => {}
        }
    }

    pub fn leave(&mut self, presence: Presence) {
        self.presence = presence;
        self.status = None;
        self.metadata = Metadata::default();
    }

    #[must_use]
    pub fn entity_state(&self) -> EntityState {
        match (self.presence, self.status) {
            (Presence::Disconnected, _) => EntityState::Unavailable,
            (Presence::Gone, _) => EntityState::Off,
            (Presence::Live, None) => EntityState::On,
            (Presence::Live, Some(PlaybackStatus::Playing)) => EntityState::Playing,
            (Presence::Live, Some(PlaybackStatus::Paused)) => EntityState::Paused,
            (Presence::Live, Some(PlaybackStatus::Stopped)) => EntityState::Idle,
        }
    }

    /// # Errors
    ///
    /// Returns [`ValidationError`] when the entity cannot be built.
    pub fn render(&self, entry_id: EntryId) -> Result<Entity, ValidationError> {
        let mut builder = Entity::builder()
            .entity_id(entity_id(&self.player_id))
            .unique_id(unique_id(entry_id, &self.player_id))
            .entry_id(entry_id)
            .platform(Platform::MediaPlayer)
            .name(self.identity.as_str())
            .state(self.entity_state());
        let fields = [
            ("media_title", &self.metadata.title),
            ("media_artist", &self.metadata.artist),
            ("media_album_name", &self.metadata.album),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                builder = builder.attribute(key, value.as_str());
            }
        }
        builder.build()
    }
}

#[must_use]
pub fn unique_id(entry_id: EntryId, player_id: &str) -> String {
    format!("{entry_id}-{player_id}")
}

fn entity_id(player_id: &str) -> String {
    format!("{}.mpris_{}", Platform::MediaPlayer, slugify(player_id))
}
