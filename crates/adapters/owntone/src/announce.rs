//! Play an announcement over whatever is playing, then put everything back.

use std::time::Duration;

use tokio::sync::watch;

use crate::api::{AddOptions, OwnToneClient, Output, PlayState, Player};
use crate::error::OwnToneError;
use crate::state::{Shared, volume_from_level};

/// How long to wait for the server to confirm pause or playback.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// What the announcement interrupts.
struct Saved {
    player: Player,
    muted: bool,
    outputs: Vec<Output>,
    queue_uris: Vec<String>,
    position: Option<u32>,
    pipe_uri: Option<String>,
}

async fn wait_for_state(
    states: &mut watch::Receiver<PlayState>,
    wanted: PlayState,
    timeout: Duration,
) -> bool {
    matches!(
        tokio::time::timeout(timeout, states.wait_for(|state| *state == wanted)).await,
        Ok(Ok(_))
    )
}

/// Wait for `wanted` to be reported by an update newer than the last one seen.
async fn wait_for_update(
    states: &mut watch::Receiver<PlayState>,
    wanted: PlayState,
    timeout: Duration,
) -> bool {
    let updated = async {
        while states.changed().await.is_ok() {
            if *states.borrow_and_update() == wanted {
                return true;
            }
        }
        false
    };
    tokio::time::timeout(timeout, updated).await.unwrap_or(false)
}

/// Play `uri` at the TTS volume on every output and restore the previous
/// outputs, volume, mute, queue, position and play state afterwards.
///
/// # Errors
///
/// Fails on the first rejected API call.
#[tracing::instrument(skip(client, shared))]
pub async fn announce(
    client: &OwnToneClient,
    shared: &Shared,
    uri: &str,
    callback_timeout: Duration,
) -> Result<(), OwnToneError> {
    let options = shared.options();
    let saved = {
        let mut snapshot = shared.snapshot();
        let muted = snapshot.player.volume == 0;
        if !muted {
            snapshot.last_volume = Some(snapshot.player.volume);
        }
        Saved {
            player: snapshot.player.clone(),
            muted,
            outputs: snapshot.outputs.clone(),
            queue_uris: snapshot.queue.items.iter().map(|item| item.uri.clone()).collect(),
            position: snapshot.current_item().map(|item| item.position),
            pipe_uri: snapshot.active_pipe().map(|pipe| pipe.uri.clone()),
        }
    };
    let mut states = shared.watch_play_state();

    if saved.player.state == PlayState::Play {
        client.pause().await?;
        if !wait_for_state(&mut states, PlayState::Pause, callback_timeout).await {
            tracing::debug!("no pause confirmation, announcing anyway");
        }
    }

    let all: Vec<String> = saved.outputs.iter().map(|output| output.id.clone()).collect();
    client.set_enabled_outputs(&all).await?;
    client
        .set_volume(volume_from_level(options.tts_volume), None)
        .await?;
    // a play state reported before the announcement was queued does not count
    states.mark_unchanged();
    client.add_to_queue(uri, AddOptions::replace()).await?;

    if wait_for_update(&mut states, PlayState::Play, callback_timeout).await {
        let queue = client.queue().await?;
        let length = queue.items.first().map_or(0, |item| item.length_ms);
        tokio::time::sleep(Duration::from_millis(length) + options.tts_pause_time).await;
    } else {
        tracing::warn!("TTS request timed out");
        tokio::time::sleep(options.tts_pause_time).await;
    }

    restore(client, &saved).await
}

async fn restore(client: &OwnToneClient, saved: &Saved) -> Result<(), OwnToneError> {
    for output in &saved.outputs {
        client
            .change_output(&output.id, Some(output.selected), Some(output.volume))
            .await?;
    }
    let volume = if saved.muted { 0 } else { saved.player.volume };
    client.set_volume(volume, None).await?;

    let resume = saved.player.state != PlayState::Stop;
    if let Some(pipe_uri) = &saved.pipe_uri {
        client
            .add_to_queue(
                pipe_uri,
                AddOptions {
                    clear: true,
                    play: saved.player.state == PlayState::Play,
                    ..AddOptions::default()
                },
            )
            .await?;
        return Ok(());
    }
    if saved.queue_uris.is_empty() {
        return client.clear_queue().await;
    }
    client
        .add_to_queue(
            &saved.queue_uris.join(","),
            AddOptions {
                clear: true,
                ..AddOptions::default()
            },
        )
        .await?;
    if let Some(position) = saved.position
        && resume
    {
        client.play_position(position).await?;
        client.seek(saved.player.item_progress_ms).await?;
        if saved.player.state == PlayState::Pause {
            client.pause().await?;
        }
    }
    Ok(())
}
