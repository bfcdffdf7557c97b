//! Last known server state and how it renders into entities.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use plughub_domain::config_entry::ConfigEntry;
use plughub_domain::entity::{Entity, EntityState, Platform};
use plughub_domain::error::ValidationError;
use plughub_domain::id::EntryId;

use crate::api::{Output, Pipe, PlayState, Player, Playlist, Queue, QueueItem};

pub const CLEAR_QUEUE: &str = "Clear queue";
pub const DEFAULT_SOURCE: &str = "Default (no pipe)";
const PIPE_SUFFIX: &str = " (pipe)";
const PLAYLIST_SUFFIX: &str = " (playlist)";

/// Pipes with a controller plughub knows how to drive.
pub const KNOWN_PIPES: [&str; 1] = ["librespot-java"];

/// Volume restored when unmuting without a remembered level.
pub const DEFAULT_UNMUTE_VOLUME: u8 = 60;

pub const MASTER_NAME: &str = "OwnTone server";

/// Per-entry options.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub tts_pause_time: Duration,
    /// 0..=1
    pub tts_volume: f64,
    pub max_playlists: usize,
    pub librespot_java_port: Option<u16>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tts_pause_time: Duration::from_millis(1200),
            tts_volume: 0.8,
            max_playlists: 10,
            librespot_java_port: None,
        }
    }
}

impl Options {
    /// # Errors
    ///
    /// Returns [`ValidationError`] when an option has the wrong type or range.
    pub fn from_entry(entry: &ConfigEntry) -> Result<Self, ValidationError> {
        let defaults = Self::default();
        let pause: f64 = entry.option_or("tts_pause_time", defaults.tts_pause_time.as_secs_f64())?;
        let tts_pause_time = Duration::try_from_secs_f64(pause)
            .map_err(|err| ValidationError::invalid_field("tts_pause_time", err.to_string()))?;
        let tts_volume: f64 = entry.option_or("tts_volume", defaults.tts_volume)?;
        if !(0.0..=1.0).contains(&tts_volume) {
            return Err(ValidationError::invalid_field("tts_volume", "must be between 0 and 1"));
        }
        Ok(Self {
            tts_pause_time,
            tts_volume,
            max_playlists: entry.option_or("max_playlists", defaults.max_playlists)?,
            librespot_java_port: entry.option_or("librespot_java_port", None)?,
        })
    }
}

/// OwnTone volume (0..=100) as a level in 0..=1.
#[must_use]
pub fn volume_level(volume: u8) -> f64 {
    f64::from(volume.min(100)) / 100.0
}

/// Level in 0..=1 as OwnTone volume.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn volume_from_level(level: f64) -> u8 {
    (level.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub available: bool,
    pub player: Player,
    pub queue: Queue,
    pub outputs: Vec<Output>,
    pub pipes: Vec<Pipe>,
    pub playlists: Vec<Playlist>,
    /// Output id → name of every output a zone entity was created for.
    pub zones: BTreeMap<String, String>,
    /// Outputs as they were when the master was turned off.
    pub last_outputs: Vec<Output>,
    /// Master volume before muting.
    pub last_volume: Option<u8>,
    /// Zone volume before muting, by output id.
    pub zone_last_volume: BTreeMap<String, u8>,
    /// Playlist source picked through `select_source`.
    pub playlist_source: Option<String>,
}

impl Snapshot {
    #[must_use]
    pub fn current_item(&self) -> Option<&QueueItem> {
        let item_id = self.player.item_id?;
        self.queue.items.iter().find(|item| item.id == item_id)
    }

    #[must_use]
    pub fn known_pipes(&self) -> impl Iterator<Item = &Pipe> {
        self.pipes
            .iter()
            .filter(|pipe| KNOWN_PIPES.contains(&pipe.title.as_str()))
    }

    /// Known pipe at the head of the queue.
    #[must_use]
    pub fn active_pipe(&self) -> Option<&Pipe> {
        let first = self.queue.items.first()?;
        self.known_pipes().find(|pipe| pipe.uri == first.uri)
    }

    #[must_use]
    pub fn source(&self) -> String {
        if let Some(pipe) = self.active_pipe() {
            return format!("{}{PIPE_SUFFIX}", pipe.title);
        }
        self.playlist_source
            .clone()
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string())
    }

    #[must_use]
    pub fn source_list(&self, max_playlists: usize) -> Vec<String> {
        let mut sources = vec![CLEAR_QUEUE.to_string(), DEFAULT_SOURCE.to_string()];
        sources.extend(self.known_pipes().map(|pipe| format!("{}{PIPE_SUFFIX}", pipe.title)));
        sources.extend(
            self.playlists
                .iter()
                .take(max_playlists)
                .map(|playlist| format!("{}{PLAYLIST_SUFFIX}", playlist.name)),
        );
        sources
    }

    /// Resolve a source name to what should be enqueued.
    #[must_use]
    pub fn resolve_source(&self, source: &str, max_playlists: usize) -> Option<Source> {
        if source == CLEAR_QUEUE {
            return Some(Source::ClearQueue);
        }
        if source == DEFAULT_SOURCE {
            return Some(Source::Default);
        }
        if let Some(title) = source.strip_suffix(PIPE_SUFFIX) {
            return self
                .known_pipes()
                .find(|pipe| pipe.title == title)
                .map(|pipe| Source::Pipe(pipe.uri.clone()));
        }
        let name = source.strip_suffix(PLAYLIST_SUFFIX)?;
        self.playlists
            .iter()
            .take(max_playlists)
            .find(|playlist| playlist.name == name)
            .map(|playlist| Source::Playlist(playlist.uri.clone()))
    }

    #[must_use]
    pub fn master_state(&self) -> EntityState {
        if !self.available {
            EntityState::Unavailable
        } else if self.outputs.iter().all(|output| !output.selected) {
            EntityState::Off
        } else {
            match self.player.state {
                PlayState::Play => EntityState::Playing,
                PlayState::Pause => EntityState::Paused,
                PlayState::Stop => EntityState::Idle,
            }
        }
    }
}

/// Target of `select_source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    ClearQueue,
    Default,
    Pipe(String),
    Playlist(String),
}

/// Unique id of the zone entity for `output_id`.
#[must_use]
pub fn zone_unique_id(entry_id: EntryId, output_id: &str) -> String {
    format!("{entry_id}-{output_id}")
}

/// Master media player of an entry.
///
/// # Errors
///
/// Returns [`ValidationError`] when the entity cannot be built.
#[allow(clippy::cast_precision_loss)]
pub fn render_master(
    entry_id: EntryId,
    snapshot: &Snapshot,
    options: &Options,
) -> Result<Entity, ValidationError> {
    let player = &snapshot.player;
    let mut builder = Entity::builder()
        .unique_id(entry_id.to_string())
        .entry_id(entry_id)
        .platform(Platform::MediaPlayer)
        .name(MASTER_NAME)
        .state(snapshot.master_state())
        .attribute("volume_level", volume_level(player.volume))
        .attribute("is_volume_muted", player.volume == 0)
        .attribute("shuffle", player.shuffle)
        .attribute("source", snapshot.source())
        .attribute("source_list", snapshot.source_list(options.max_playlists));

    if let Some(item) = snapshot.current_item() {
        let (title, album) = if item.data_kind == "url" {
            (&item.album, &item.title)
        } else {
            (&item.title, &item.album)
        };
        builder = builder
            .attribute("media_content_id", item.uri.as_str())
            .attribute("media_title", title.as_str())
            .attribute("media_album_name", album.as_str())
            .attribute("media_artist", item.artist.as_str())
            .attribute("media_album_artist", item.album_artist.as_str())
            .attribute("media_duration", player.item_length_ms as f64 / 1000.0)
            .attribute("media_position", player.item_progress_ms as f64 / 1000.0);
        if let Some(artwork) = &item.artwork_url {
            builder = builder.attribute("media_image_url", artwork.as_str());
        }
    }
    builder.build()
}

/// Zone for `output_id`. Unavailable when the output is not in `snapshot`.
///
/// # Errors
///
/// Returns [`ValidationError`] when the entity cannot be built.
pub fn render_zone(
    entry_id: EntryId,
    output_id: &str,
    name: &str,
    snapshot: &Snapshot,
) -> Result<Entity, ValidationError> {
    let builder = Entity::builder()
        .unique_id(zone_unique_id(entry_id, output_id))
        .entry_id(entry_id)
        .platform(Platform::MediaPlayer)
        .name(name);
    let output = snapshot
        .available
        .then(|| snapshot.outputs.iter().find(|output| output.id == output_id))
        .flatten();
    let builder = match output {
        None => builder.state(EntityState::Unavailable),
        Some(output) => builder
            .state(if output.selected {
                EntityState::On
            } else {
                EntityState::Off
            })
            .attribute("volume_level", volume_level(output.volume))
            .attribute("is_volume_muted", output.volume == 0)
            .attribute("output_type", output.kind.as_str()),
    };
    builder.build()
}

/// Snapshot shared by the updater and the service handlers.
pub struct Shared {
    snapshot: Mutex<Snapshot>,
    options: Mutex<Options>,
    play_state: watch::Sender<PlayState>,
}

impl Shared {
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self {
            snapshot: Mutex::new(Snapshot::default()),
            options: Mutex::new(options),
            play_state: watch::Sender::new(PlayState::default()),
        }
    }

    pub fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(|err| err.into_inner())
    }

    #[must_use]
    pub fn options(&self) -> Options {
        self.options
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn set_options(&self, options: Options) {
        *self.options.lock().unwrap_or_else(|err| err.into_inner()) = options;
    }

    /// Store a fresh player document and notify waiters.
    pub fn set_player(&self, player: Player) {
        let state = player.state;
        self.snapshot().player = player;
        self.play_state.send_replace(state);
    }

    /// Follow play state changes, starting from the current one.
    #[must_use]
    pub fn watch_play_state(&self) -> watch::Receiver<PlayState> {
        self.play_state.subscribe()
    }
}
