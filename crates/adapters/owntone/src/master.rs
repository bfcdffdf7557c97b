//! Services of the master media player.

use plughub_domain::entity::EntityState;
use plughub_domain::error::{PlugHubError, ValidationError};
use plughub_domain::service::ServiceCall;

use crate::announce::{CALLBACK_TIMEOUT, announce};
use crate::api::{AddOptions, OwnToneClient};
use crate::error::OwnToneError;
use crate::media_content::to_owntone_uri;
use crate::pipe::{LibrespotJava, PipeCommand};
use crate::state::{DEFAULT_UNMUTE_VOLUME, Shared, Source, volume_from_level};

/// How `play_media` places new items in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueue {
    Replace,
    Add,
    Next,
    Play,
}

impl Enqueue {
    fn parse(value: Option<&str>) -> Result<Self, ValidationError> {
        match value {
            None | Some("replace") => Ok(Self::Replace),
            Some("add") => Ok(Self::Add),
            Some("next") => Ok(Self::Next),
            Some("play") => Ok(Self::Play),
            Some(other) => Err(ValidationError::invalid_field(
                "enqueue",
                format!("unknown mode {other:?}"),
            )),
        }
    }
}

/// Service handler for the master entity of one entry.
pub struct Master<'a> {
    pub client: &'a OwnToneClient,
    pub shared: &'a Shared,
    /// Controller of the pipe source, when one is configured.
    pub pipe: Option<LibrespotJava>,
}

impl Master<'_> {
    /// # Errors
    ///
    /// Returns a validation error for unknown services or bad parameters and
    /// an integration error when the server rejects a command.
    #[tracing::instrument(skip_all, fields(service = %call.service))]
    pub async fn handle(&self, call: &ServiceCall) -> Result<(), PlugHubError> {
        match call.service.as_str() {
            "turn_on" => self.turn_on().await?,
            "turn_off" => self.turn_off().await?,
            "toggle" => {
                if self.shared.snapshot().master_state() == EntityState::Off {
                    self.turn_on().await?;
                } else {
                    self.turn_off().await?;
                }
            }
            "volume_set" => {
                let level: f64 = call.param("volume_level")?;
                self.client.set_volume(volume_from_level(level), None).await?;
            }
            "volume_mute" => self.mute(call.param("is_volume_muted")?).await?,
            "media_play" => self.transport(PipeCommand::Play).await?,
            "media_pause" => self.transport(PipeCommand::Pause).await?,
            "media_stop" => {
                if let Some(pipe) = self.active_pipe() {
                    pipe.send(PipeCommand::Pause).await?;
                } else {
                    self.client.stop().await?;
                }
            }
            "media_next_track" => self.transport(PipeCommand::Next).await?,
            "media_previous_track" => self.transport(PipeCommand::Previous).await?,
            "media_seek" => {
                let seconds: f64 = call.param("seek_position")?;
                if seconds < 0.0 {
                    return Err(ValidationError::invalid_field("seek_position", "must not be negative").into());
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let position_ms = (seconds * 1000.0).round() as u64;
                self.client.seek(position_ms).await?;
            }
            "clear_playlist" => self.client.clear_queue().await?,
            "shuffle_set" => self.client.shuffle(call.param("shuffle")?).await?,
            "select_source" => self.select_source(&call.param::<String>("source")?).await?,
            "play_media" => self.play_media(call).await?,
            _ => return Err(call.unsupported().into()),
        }
        Ok(())
    }

    async fn turn_on(&self) -> Result<(), OwnToneError> {
        let (volume, last_outputs, all) = {
            let mut snapshot = self.shared.snapshot();
            let all: Vec<String> = snapshot.outputs.iter().map(|output| output.id.clone()).collect();
            (
                snapshot.last_volume.unwrap_or(DEFAULT_UNMUTE_VOLUME),
                std::mem::take(&mut snapshot.last_outputs),
                all,
            )
        };
        self.client.set_volume(volume, None).await?;
        if last_outputs.is_empty() {
            return self.client.set_enabled_outputs(&all).await;
        }
        for output in &last_outputs {
            self.client
                .change_output(&output.id, Some(output.selected), Some(output.volume))
                .await?;
        }
        Ok(())
    }

    async fn turn_off(&self) -> Result<(), OwnToneError> {
        self.client.pause().await?;
        let any_selected = {
            let mut snapshot = self.shared.snapshot();
            snapshot.last_outputs = snapshot.outputs.clone();
            if snapshot.player.volume > 0 {
                snapshot.last_volume = Some(snapshot.player.volume);
            }
            snapshot.outputs.iter().any(|output| output.selected)
        };
        if any_selected {
            self.client.set_enabled_outputs(&[]).await?;
        }
        Ok(())
    }

    async fn mute(&self, muted: bool) -> Result<(), OwnToneError> {
        let volume = {
            let mut snapshot = self.shared.snapshot();
            if muted {
                // already silent, keep the level muting started from
                if snapshot.player.volume == 0 {
                    return Ok(());
                }
                snapshot.last_volume = Some(snapshot.player.volume);
                0
            } else {
                snapshot.last_volume.take().unwrap_or(DEFAULT_UNMUTE_VOLUME)
            }
        };
        self.client.set_volume(volume, None).await
    }

    /// The pipe controller, when its pipe is what is playing.
    fn active_pipe(&self) -> Option<&LibrespotJava> {
        let pipe = self.pipe.as_ref()?;
        self.shared.snapshot().active_pipe().is_some().then_some(pipe)
    }

    async fn transport(&self, command: PipeCommand) -> Result<(), OwnToneError> {
        if let Some(pipe) = self.active_pipe() {
            return pipe.send(command).await;
        }
        match command {
            PipeCommand::Play => self.client.play().await,
            PipeCommand::Pause => self.client.pause().await,
            PipeCommand::Next => self.client.next().await,
            PipeCommand::Previous => self.client.previous().await,
        }
    }

    async fn select_source(&self, source: &str) -> Result<(), PlugHubError> {
        let max_playlists = self.shared.options().max_playlists;
        let resolved = self.shared.snapshot().resolve_source(source, max_playlists);
        let Some(resolved) = resolved else {
            return Err(ValidationError::invalid_field("source", format!("unknown source {source:?}")).into());
        };
        let play = AddOptions::replace();
        match resolved {
            Source::ClearQueue => self.client.clear_queue().await?,
            Source::Default => {
                self.shared.snapshot().playlist_source = None;
                self.client.clear_queue().await?;
            }
            Source::Pipe(uri) => self.client.add_to_queue(&uri, play).await?,
            Source::Playlist(uri) => {
                self.client.add_to_queue(&uri, play).await?;
                self.shared.snapshot().playlist_source = Some(source.to_string());
            }
        }
        Ok(())
    }

    async fn play_media(&self, call: &ServiceCall) -> Result<(), PlugHubError> {
        let content_id: String = call.param("media_content_id")?;
        let uri = to_owntone_uri(&content_id);
        if call.param_opt::<bool>("announce")?.unwrap_or(false) {
            announce(self.client, self.shared, &uri, CALLBACK_TIMEOUT).await?;
            return Ok(());
        }

        let enqueue = Enqueue::parse(call.param_opt::<String>("enqueue")?.as_deref())?;
        let current = self
            .shared
            .snapshot()
            .current_item()
            .map_or(0, |item| item.position);
        let options = match enqueue {
            Enqueue::Replace => AddOptions::replace(),
            Enqueue::Add => AddOptions {
                play: true,
                ..AddOptions::default()
            },
            Enqueue::Next => AddOptions {
                play: true,
                position: Some(current + 1),
                ..AddOptions::default()
            },
            Enqueue::Play => AddOptions {
                play: true,
                position: Some(current),
                playback_from_position: Some(current),
                ..AddOptions::default()
            },
        };
        self.client.add_to_queue(&uri, options).await?;
        Ok(())
    }
}
