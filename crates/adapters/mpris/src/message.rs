//! Messages exchanged with the desktop agent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Update pushed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerMessage {
    Appeared {
        player_id: String,
        identity: String,
    },
    Status {
        player_id: String,
        status: PlaybackStatus,
        #[serde(default)]
        metadata: Metadata,
    },
    Gone {
        player_id: String,
    },
    /// Every live player has been announced.
    InitialSyncDone,
}

impl PlayerMessage {
    #[must_use]
    pub fn player_id(&self) -> Option<&str> {
        match self {
            Self::Appeared { player_id, .. }
            | Self::Status { player_id, .. }
            | Self::Gone { player_id } => Some(player_id),
            Self::InitialSyncDone => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerCommand {
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Previous,
}

impl PlayerCommand {
    /// Command behind a media player service, if any.
    #[must_use]
    pub fn from_service(service: &str) -> Option<Self> {
        Some(match service {
            "media_play" => Self::Play,
            "media_pause" => Self::Pause,
            "media_play_pause" => Self::PlayPause,
            "media_stop" => Self::Stop,
            "media_next_track" => Self::Next,
            "media_previous_track" => Self::Previous,
            _ => return None,
        })
    }
}
