//! Test doubles: scripted connector, websocket agent, recording context.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use plughub_app::ports::EntityContext;
use plughub_domain::entity::Entity;
use plughub_domain::error::PlugHubError;
use plughub_domain::event::Event;
use plughub_domain::id::EntryId;

use crate::connector::{MessageStream, MprisConnector};
use crate::error::MprisError;
use crate::message::{PlayerCommand, PlayerMessage};
use crate::player::Player;

/// Hands out pre-arranged sessions in order, refusing once they run out.
#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<VecDeque<mpsc::UnboundedReceiver<PlayerMessage>>>,
    connects: Mutex<usize>,
    commands: Mutex<Vec<(String, PlayerCommand)>>,
}

/// Agent side of one [`FakeConnector`] session.
pub struct Session(mpsc::UnboundedSender<PlayerMessage>);

impl Session {
    pub fn push(&self, message: PlayerMessage) {
        self.0.send(message).unwrap();
    }

    /// End the stream.
    pub fn close(self) {}
}

impl FakeConnector {
    pub fn session(&self) -> Session {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push_back(rx);
        Session(tx)
    }

    /// Successful connects so far.
    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }

    pub fn commands(&self) -> Vec<(String, PlayerCommand)> {
        self.commands.lock().unwrap().clone()
    }
}

impl MprisConnector for FakeConnector {
    async fn connect(&self) -> Result<MessageStream, MprisError> {
        let rx = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(MprisError::NotConnected)?;
        *self.connects.lock().unwrap() += 1;
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (Ok(message), rx))
        });
        Ok(stream.boxed())
    }

    async fn send(&self, player_id: &str, command: PlayerCommand) -> Result<(), MprisError> {
        self.commands
            .lock()
            .unwrap()
            .push((player_id.to_string(), command));
        Ok(())
    }
}

/// Websocket agent replaying a script to every client and recording
/// what clients send.
pub struct FakeAgent {
    port: u16,
    commands: Arc<Mutex<Vec<Value>>>,
}

impl FakeAgent {
    pub async fn start(script: Vec<String>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands: Arc<Mutex<Vec<Value>>> = Arc::default();
        let recorded = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = script.clone();
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = socket.split();
                    for text in script {
                        if write.send(Message::text(text)).await.is_err() {
                            return;
                        }
                    }
                    while let Some(Ok(message)) = read.next().await {
                        if let Message::Text(text) = message
                            && let Ok(value) = serde_json::from_str(text.as_str())
                        {
                            recorded.lock().unwrap().push(value);
                        }
                    }
                });
            }
        });
        Self { port, commands }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn commands(&self) -> Vec<Value> {
        self.commands.lock().unwrap().clone()
    }
}

/// Entity context keeping the last version of each entity, optionally
/// seeded with entities registered by an earlier run.
#[derive(Clone)]
pub struct RecordingContext {
    entry_id: EntryId,
    entities: Arc<Mutex<BTreeMap<String, Entity>>>,
    upserts: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl RecordingContext {
    pub fn new(entry_id: EntryId) -> Self {
        Self {
            entry_id,
            entities: Arc::default(),
            upserts: Arc::default(),
        }
    }

    pub fn with_registered(self, entity: Entity) -> Self {
        self.entities
            .lock()
            .unwrap()
            .insert(entity.unique_id.clone(), entity);
        self
    }

    pub fn entity(&self, unique_id: &str) -> Option<Entity> {
        self.entities.lock().unwrap().get(unique_id).cloned()
    }

    /// Number of upserts of `unique_id`.
    pub fn upserts(&self, unique_id: &str) -> usize {
        self.upserts
            .lock()
            .unwrap()
            .get(unique_id)
            .copied()
            .unwrap_or_default()
    }
}

impl EntityContext for RecordingContext {
    fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<Entity, PlugHubError> {
        *self
            .upserts
            .lock()
            .unwrap()
            .entry(entity.unique_id.clone())
            .or_default() += 1;
        self.entities
            .lock()
            .unwrap()
            .insert(entity.unique_id.clone(), entity.clone());
        Ok(entity)
    }

    async fn remove_entity(&self, unique_id: &str) -> Result<(), PlugHubError> {
        self.entities.lock().unwrap().remove(unique_id);
        Ok(())
    }

    async fn publish(&self, _event: Event) -> Result<(), PlugHubError> {
        Ok(())
    }

    async fn registered_entities(&self) -> Result<Vec<Entity>, PlugHubError> {
        Ok(self.entities.lock().unwrap().values().cloned().collect())
    }
}

/// Player entity as an earlier run would have left it.
pub fn registered_player(entry_id: EntryId, player_id: &str) -> Entity {
    let mut player = Player::new(player_id, player_id);
    player.apply(PlayerMessage::Status {
        player_id: player_id.into(),
        status: crate::message::PlaybackStatus::Playing,
        metadata: crate::message::Metadata::default(),
    });
    player.render(entry_id).unwrap()
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
