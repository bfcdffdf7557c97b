//! Coordinator: coalesces agent updates per player and keeps entities in
//! step with the players the agent reports.
//!
//! Messages are buffered per player id in arrival order and applied together
//! once the debounce window of the player's first buffered message closes, so
//! a burst of status changes yields one entity update. After the agent's
//! initial sync, every registered player of the entry that is not live is
//! turned off once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use plughub_app::ports::EntityContext;
use plughub_domain::entity::EntityState;

use crate::connector::{MessageStream, MprisConnector};
use crate::error::MprisError;
use crate::message::PlayerMessage;
use crate::player::{Player, Presence, unique_id};

pub const DEBOUNCE: Duration = Duration::from_millis(20);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Players by id, shared with the service handler.
#[derive(Debug, Default)]
pub struct Players(Mutex<BTreeMap<String, Player>>);

impl Players {
    pub fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Player>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_live(&self, player_id: &str) -> bool {
        self.lock().get(player_id).is_some_and(Player::is_live)
    }
}

struct Pending {
    deadline: Instant,
    messages: Vec<PlayerMessage>,
}

enum SessionEnd {
    Closed,
    Stopped,
}

pub struct Coordinator<K, C> {
    connector: Arc<K>,
    ctx: C,
    players: Arc<Players>,
    /// Unique ids already turned off, so each goes off once.
    offed: BTreeSet<String>,
    stop: watch::Receiver<bool>,
    debounce: Duration,
    reconnect_delay: Duration,
}

impl<K: MprisConnector, C: EntityContext + 'static> Coordinator<K, C> {
    pub fn new(
        connector: Arc<K>,
        ctx: C,
        players: Arc<Players>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            connector,
            ctx,
            players,
            offed: BTreeSet::new(),
            stop,
            debounce: DEBOUNCE,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Run the loop, starting with `stream` when a session is already open.
    pub fn start(self, stream: Option<MessageStream>) -> JoinHandle<()> {
        tokio::spawn(self.run(stream))
    }

    async fn run(mut self, mut stream: Option<MessageStream>) {
        let entry_id = self.ctx.entry_id();
        loop {
            if *self.stop.borrow() {
                return;
            }
            let connected = match stream.take() {
                Some(stream) => Ok(stream),
                None => tokio::select! {
                    result = self.connector.connect() => result,
                    _ = self.stop.changed() => return,
                },
            };
            match connected {
                Ok(stream) => match self.consume(stream).await {
                    Ok(SessionEnd::Stopped) => {
                        tracing::debug!(%entry_id, "MPRIS coordinator stopped");
                        return;
                    }
                    Ok(SessionEnd::Closed) => tracing::info!(%entry_id, "MPRIS agent closed the stream"),
                    Err(err) => tracing::warn!(%entry_id, error = %err, "MPRIS agent stream failed"),
                },
                Err(err) => tracing::warn!(%entry_id, error = %err, "cannot reach MPRIS agent"),
            }
            self.disconnect().await;
            tokio::select! {
                () = tokio::time::sleep(self.reconnect_delay) => {}
                _ = self.stop.changed() => return,
            }
        }
    }

    async fn consume(&mut self, mut stream: MessageStream) -> Result<SessionEnd, MprisError> {
        let mut pending: BTreeMap<String, Pending> = BTreeMap::new();
        loop {
            let deadline = pending.values().map(|p| p.deadline).min();
            let window = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                message = stream.next() => {
                    let Some(message) = message else {
                        self.flush(&mut pending, None).await;
                        return Ok(SessionEnd::Closed);
                    };
                    let message = match message {
                        Ok(message) => message,
                        Err(err) => {
                            self.flush(&mut pending, None).await;
                            return Err(err);
                        }
                    };
                    match message.player_id() {
                        Some(player_id) => {
                            let deadline = Instant::now() + self.debounce;
                            pending
                                .entry(player_id.to_string())
                                .or_insert_with(|| Pending { deadline, messages: Vec::new() })
                                .messages
                                .push(message);
                        }
                        None => {
                            self.flush(&mut pending, None).await;
                            self.initial_sync().await;
                        }
                    }
                }
                () = window => {
                    self.flush(&mut pending, Some(Instant::now())).await;
                }
                _ = self.stop.changed() => return Ok(SessionEnd::Stopped),
            }
        }
    }

    /// Apply buffered messages whose window closed by `now`, or all of them.
    async fn flush(&mut self, pending: &mut BTreeMap<String, Pending>, now: Option<Instant>) {
        let due: Vec<String> = pending
            .iter()
            .filter(|(_, p)| now.is_none_or(|now| p.deadline <= now))
            .map(|(player_id, _)| player_id.clone())
            .collect();
        for player_id in due {
            let Some(batch) = pending.remove(&player_id) else {
                continue;
            };
            tracing::trace!(player_id = %player_id, messages = batch.messages.len(), "applying player updates");
            self.apply(&player_id, batch.messages).await;
        }
    }

    async fn apply(&mut self, player_id: &str, messages: Vec<PlayerMessage>) {
        let entry_id = self.ctx.entry_id();
        let rendered = {
            let mut players = self.players.lock();
            let player = players
                .entry(player_id.to_string())
                .or_insert_with(|| Player::new(player_id, player_id));
            for message in messages {
                player.apply(message);
            }
            player.render(entry_id)
        };
        let entity = match rendered {
            Ok(entity) => entity,
            Err(err) => {
                tracing::warn!(player_id, error = %err, "cannot render MPRIS player");
                return;
            }
        };
        if entity.state == EntityState::Off {
            self.offed.insert(entity.unique_id.clone());
        } else {
            self.offed.remove(&entity.unique_id);
        }
        if let Err(err) = self.ctx.upsert_entity(entity).await {
            tracing::warn!(player_id, error = %err, "cannot publish MPRIS player");
        }
    }

    /// Turn off every registered player of the entry the agent did not
    /// report live, unless it is already off.
    async fn initial_sync(&mut self) {
        let entry_id = self.ctx.entry_id();
        let registered = match self.ctx.registered_entities().await {
            Ok(entities) => entities,
            Err(err) => {
                tracing::warn!(%entry_id, error = %err, "cannot list registered MPRIS players");
                Vec::new()
            }
        };
        let live: BTreeSet<String> = self
            .players
            .lock()
            .values()
            .filter(|player| player.is_live())
            .map(|player| unique_id(entry_id, &player.player_id))
            .collect();

        for mut entity in registered {
            if live.contains(&entity.unique_id) || self.offed.contains(&entity.unique_id) {
                continue;
            }
            if let Some(player_id) = entity.unique_id.strip_prefix(&format!("{entry_id}-"))
                && let Some(player) = self.players.lock().get_mut(player_id)
            {
                player.leave(Presence::Gone);
            }
            entity.state = EntityState::Off;
            entity.attributes.clear();
            tracing::debug!(unique_id = %entity.unique_id, "MPRIS player missing after sync");
            self.offed.insert(entity.unique_id.clone());
            if let Err(err) = self.ctx.upsert_entity(entity).await {
                tracing::warn!(%entry_id, error = %err, "cannot turn off missing MPRIS player");
            }
        }
    }

    /// Mark live players unavailable until the agent reports them again.
    async fn disconnect(&mut self) {
        let entry_id = self.ctx.entry_id();
        let rendered: Vec<_> = {
            let mut players = self.players.lock();
            players
                .values_mut()
                .filter(|player| player.is_live())
                .map(|player| {
                    player.leave(Presence::Disconnected);
                    player.render(entry_id)
                })
                .collect()
        };
        for entity in rendered.into_iter().filter_map(Result::ok) {
            if let Err(err) = self.ctx.upsert_entity(entity).await {
                tracing::warn!(%entry_id, error = %err, "cannot mark MPRIS player unavailable");
            }
        }
    }
}
