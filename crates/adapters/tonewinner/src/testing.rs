//! Test doubles: in-memory and TCP amplifiers, a recording entity context.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::FramedRead;

use plughub_app::ports::EntityContext;
use plughub_domain::entity::Entity;
use plughub_domain::error::PlugHubError;
use plughub_domain::event::Event;
use plughub_domain::id::EntryId;

use crate::codec::FrameCodec;
use crate::connection::Connector;

/// Hands out pre-arranged in-memory streams, refusing once they run out.
#[derive(Clone, Default)]
pub struct DuplexConnector {
    pending: Arc<Mutex<VecDeque<DuplexStream>>>,
}

impl DuplexConnector {
    /// Queue a stream for the next `connect` and return its far end.
    pub fn amp(&self) -> FakeAmp {
        let (client, server) = tokio::io::duplex(256);
        self.pending.lock().unwrap().push_back(client);
        FakeAmp::new(server)
    }
}

impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        self.pending
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
    }
}

/// Amplifier side of a duplex stream.
pub struct FakeAmp {
    frames: FramedRead<ReadHalf<DuplexStream>, FrameCodec>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeAmp {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            frames: FramedRead::new(reader, FrameCodec),
            writer,
        }
    }

    /// Next command received, within two seconds.
    pub async fn expect(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.frames.next())
            .await
            .expect("no command in time")
            .expect("stream closed")
            .unwrap()
    }

    pub async fn reply(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }
}

/// TCP amplifier answering queries from a fixed state and echoing settings.
pub struct TcpAmp {
    port: u16,
    commands: Arc<Mutex<Vec<String>>>,
}

impl TcpAmp {
    /// `silent` amplifiers accept connections but never answer.
    pub async fn start(silent: bool) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands: Arc<Mutex<Vec<String>>> = Arc::default();
        let recorded = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut frames = FramedRead::new(reader, FrameCodec);
                    while let Some(Ok(frame)) = frames.next().await {
                        recorded.lock().unwrap().push(frame.clone());
                        if silent {
                            continue;
                        }
                        let answer = match frame.as_str() {
                            "POWER ?" => "POWER ON".to_string(),
                            "VOL ?" => "VOL 40".to_string(),
                            "MUTE ?" => "MUTE OFF".to_string(),
                            "SI ?" => "SI HDMI1".to_string(),
                            setting => setting.to_string(),
                        };
                        if writer.write_all(format!("#{answer}*").as_bytes()).await.is_err() {
                            return;
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

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

/// Entity context keeping the last version of each entity.
#[derive(Clone)]
pub struct RecordingContext {
    entry_id: EntryId,
    entities: Arc<Mutex<BTreeMap<String, Entity>>>,
}

impl RecordingContext {
    pub fn new(entry_id: EntryId) -> Self {
        Self {
            entry_id,
            entities: Arc::default(),
        }
    }

    pub fn entity(&self, unique_id: &str) -> Option<Entity> {
        self.entities.lock().unwrap().get(unique_id).cloned()
    }
}

impl EntityContext for RecordingContext {
    fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<Entity, PlugHubError> {
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
