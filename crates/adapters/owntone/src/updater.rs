//! Turns server notifications into fresh documents and entity updates.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use plughub_app::ports::EntityContext;
use plughub_domain::error::PlugHubError;

use crate::api::OwnToneClient;
use crate::error::OwnToneError;
use crate::state::{Shared, render_master, render_zone};

/// Notification topics of the OwnTone websocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Player,
    Outputs,
    Volume,
    Options,
    Queue,
    Database,
    #[serde(other)]
    Other,
}

impl Topic {
    pub const SUBSCRIBED: [Topic; 6] = [
        Topic::Player,
        Topic::Outputs,
        Topic::Volume,
        Topic::Options,
        Topic::Queue,
        Topic::Database,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Outputs => "outputs",
            Self::Volume => "volume",
            Self::Options => "options",
            Self::Queue => "queue",
            Self::Database => "database",
            Self::Other => "other",
        }
    }
}

/// What the updater reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Websocket (re)connected: fetch everything, then mark available.
    Connected,
    Changed(BTreeSet<Topic>),
    Disconnected,
    /// Options changed: render again without fetching.
    Republish,
}

/// Consumes [`Signal`]s in order and keeps the entities current.
pub struct Updater<C> {
    client: OwnToneClient,
    shared: Arc<Shared>,
    ctx: C,
    signals: mpsc::Receiver<Signal>,
}

impl<C: EntityContext + Clone + 'static> Updater<C> {
    pub fn start(
        client: OwnToneClient,
        shared: Arc<Shared>,
        ctx: C,
        signals: mpsc::Receiver<Signal>,
    ) -> JoinHandle<()> {
        let updater = Self {
            client,
            shared,
            ctx,
            signals,
        };
        tokio::spawn(updater.run())
    }

    async fn run(mut self) {
        while let Some(signal) = self.signals.recv().await {
            if let Err(err) = self.handle(signal).await {
                tracing::warn!(error = %err, "OwnTone update failed");
            }
        }
        tracing::debug!("OwnTone updater stopped");
    }

    async fn handle(&self, signal: Signal) -> Result<(), PlugHubError> {
        match signal {
            Signal::Connected => {
                self.refresh(&Topic::SUBSCRIBED.into_iter().collect()).await?;
                self.shared.snapshot().available = true;
                tracing::info!(host = self.client.host(), "OwnTone connected");
            }
            Signal::Changed(topics) => {
                if !self.shared.snapshot().available {
                    return Ok(());
                }
                self.refresh(&topics).await?;
            }
            Signal::Disconnected => {
                let mut snapshot = self.shared.snapshot();
                snapshot.available = false;
                snapshot.outputs.clear();
            }
            Signal::Republish => {}
        }
        self.publish().await
    }

    /// Fetch what `topics` invalidated. The queue lands before the player.
    async fn refresh(&self, topics: &BTreeSet<Topic>) -> Result<(), OwnToneError> {
        let any = |wanted: &[Topic]| wanted.iter().any(|topic| topics.contains(topic));

        if any(&[Topic::Queue]) {
            let queue = self.client.queue().await?;
            self.shared.snapshot().queue = queue;
        }
        if any(&[Topic::Outputs, Topic::Volume]) {
            let outputs = self.client.outputs().await?;
            self.shared.snapshot().outputs = outputs;
        }
        if any(&[Topic::Database]) {
            let pipes = self.client.pipes().await?;
            let playlists = self.client.playlists().await?;
            let mut snapshot = self.shared.snapshot();
            snapshot.pipes = pipes;
            snapshot.playlists = playlists;
        }
        if any(&[Topic::Player, Topic::Options, Topic::Volume]) {
            let player = self.client.player().await?;
            self.shared.set_player(player);
        }
        Ok(())
    }

    async fn publish(&self) -> Result<(), PlugHubError> {
        let entry_id = self.ctx.entry_id();
        let options = self.shared.options();
        let entities = {
            let mut snapshot = self.shared.snapshot();
            let seen: Vec<(String, String)> = snapshot
                .outputs
                .iter()
                .map(|output| (output.id.clone(), output.name.clone()))
                .collect();
            for (id, name) in seen {
                if snapshot.zones.insert(id.clone(), name).is_none() {
                    tracing::debug!(output_id = %id, "new OwnTone output");
                }
            }
            let mut entities = vec![render_master(entry_id, &snapshot, &options)?];
            for (id, name) in &snapshot.zones {
                entities.push(render_zone(entry_id, id, name, &snapshot)?);
            }
            entities
        };
        for entity in entities {
            self.ctx.upsert_entity(entity).await?;
        }
        Ok(())
    }
}
