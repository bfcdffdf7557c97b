//! # plughub-adapter-mpris
//!
//! Media players of a Linux desktop (MPRIS), relayed by an agent running on
//! that desktop. The agent pushes JSON messages over a websocket:
//!
//! ```json
//! {"type": "appeared", "player_id": "vlc", "identity": "VLC media player"}
//! {"type": "status", "player_id": "vlc", "status": "playing", "metadata": {"title": "..."}}
//! {"type": "gone", "player_id": "vlc"}
//! {"type": "initial_sync_done"}
//! ```
//!
//! and accepts `{"type": "command", "player_id": "vlc", "command": "play_pause"}`.
//!
//! Each player becomes one media player entity with unique id
//! `"{entry_id}-{player_id}"`.

mod connector;
mod coordinator;
mod error;
mod message;
mod player;

#[cfg(test)]
mod testing;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use plughub_app::ports::{EntityContext, Integration, ValidatedEntry};
use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::Entity;
use plughub_domain::error::{NotFoundError, PlugHubError, SetupError, ValidationError};
use plughub_domain::flow::{FlowError, FlowErrorCode};
use plughub_domain::id::EntryId;
use plughub_domain::service::ServiceCall;

pub use connector::{MessageStream, MprisConnector, WebSocketConnector};
pub use coordinator::{DEBOUNCE, RECONNECT_DELAY};
pub use error::MprisError;
pub use message::{Metadata, PlaybackStatus, PlayerCommand, PlayerMessage};

use crate::coordinator::{Coordinator, Players};

pub const DOMAIN: &str = "mpris";

/// How long validation and setup wait for the agent handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long unload waits for the coordinator before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Agent {
    host: String,
    port: u16,
}

impl Agent {
    fn from_input(input: &EntryData) -> Result<Self, FlowError> {
        let host = input
            .get("host")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or(FlowError::field("host", FlowErrorCode::Unknown))?;
        let port = input
            .get("port")
            .and_then(serde_json::Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port > 0)
            .ok_or(FlowError::field("port", FlowErrorCode::Unknown))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    fn from_entry(entry: &ConfigEntry) -> Result<Self, SetupError> {
        let fatal = |err: ValidationError| SetupError::Fatal(err.to_string());
        Ok(Self {
            host: entry.data_field("host").map_err(fatal)?,
            port: entry.data_field("port").map_err(fatal)?,
        })
    }

    fn connector(&self) -> WebSocketConnector {
        WebSocketConnector::new(&self.host, self.port)
    }
}

async fn connect<K: MprisConnector>(connector: &K, timeout: Duration) -> Result<MessageStream, MprisError> {
    tokio::time::timeout(timeout, connector.connect())
        .await
        .map_err(|_| MprisError::Timeout)?
}

fn flow_error(err: &MprisError) -> FlowError {
    let code = match err {
        MprisError::Timeout => FlowErrorCode::Timeout,
        MprisError::WebSocket(_) | MprisError::NotConnected => FlowErrorCode::CannotConnect,
        MprisError::Json(_) | MprisError::PlayerUnavailable(_) => FlowErrorCode::Unknown,
    };
    FlowError::base(code)
}

/// Live state of a loaded entry.
pub struct MprisRuntime<K = WebSocketConnector> {
    entry_id: EntryId,
    connector: Arc<K>,
    players: Arc<Players>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<K: MprisConnector> MprisRuntime<K> {
    fn start<C: EntityContext + 'static>(
        entry_id: EntryId,
        connector: Arc<K>,
        ctx: C,
        stream: Option<MessageStream>,
        reconnect_delay: Duration,
    ) -> Self {
        let players = Arc::new(Players::default());
        let (stop, stopped) = watch::channel(false);
        let task = Coordinator::new(Arc::clone(&connector), ctx, Arc::clone(&players), stopped)
            .with_reconnect_delay(reconnect_delay)
            .start(stream);
        Self {
            entry_id,
            connector,
            players,
            stop,
            task: Mutex::new(Some(task)),
        }
    }

    /// Ask the coordinator to stop, aborting it if it does not in time.
    async fn shutdown(&self) {
        self.stop.send_replace(true);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut task) = task
            && tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err()
        {
            tracing::warn!(entry_id = %self.entry_id, "MPRIS coordinator did not stop, aborting");
            task.abort();
        }
    }

    async fn command(&self, entity: &Entity, call: &ServiceCall) -> Result<(), PlugHubError> {
        let command = PlayerCommand::from_service(&call.service).ok_or_else(|| call.unsupported())?;
        let player_id = entity
            .unique_id
            .strip_prefix(&format!("{}-", self.entry_id))
            .ok_or_else(|| NotFoundError {
                entity: "Player",
                id: entity.unique_id.clone(),
            })?;
        if !self.players.is_live(player_id) {
            return Err(MprisError::PlayerUnavailable(player_id.to_string()).into());
        }
        tracing::debug!(player_id, command = ?command, "forwarding MPRIS command");
        self.connector.send(player_id, command).await?;
        Ok(())
    }
}

/// The MPRIS integration.
pub struct MprisIntegration {
    timeout: Duration,
    reconnect_delay: Duration,
}

impl Default for MprisIntegration {
    fn default() -> Self {
        Self {
            timeout: CONNECT_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

impl MprisIntegration {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl Integration for MprisIntegration {
    type Runtime = MprisRuntime;

    fn domain(&self) -> &'static str {
        DOMAIN
    }

    #[tracing::instrument(skip_all, fields(domain = DOMAIN))]
    async fn validate_input(&self, input: &EntryData) -> Result<ValidatedEntry, FlowError> {
        let agent = Agent::from_input(input)?;
        connect(&agent.connector(), self.timeout).await.map_err(|err| {
            tracing::warn!(host = %agent.host, port = agent.port, error = %err, "MPRIS agent unreachable");
            flow_error(&err)
        })?;

        let mut data = EntryData::new();
        data.insert("host".into(), agent.host.clone().into());
        data.insert("port".into(), agent.port.into());
        Ok(ValidatedEntry {
            title: format!("MPRIS on {}", agent.host),
            unique_id: Some(format!("{}:{}", agent.host, agent.port)),
            data,
        })
    }

    #[tracing::instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn setup_entry<C>(&self, entry: &ConfigEntry, ctx: C) -> Result<MprisRuntime, SetupError>
    where
        C: EntityContext + Clone + 'static,
    {
        let agent = Agent::from_entry(entry)?;
        let connector = Arc::new(agent.connector());
        let stream = connect(connector.as_ref(), self.timeout)
            .await
            .map_err(|err| SetupError::NotReady(err.to_string()))?;
        tracing::info!(url = %connector.url(), "MPRIS agent connected");
        Ok(MprisRuntime::start(
            entry.entry_id,
            connector,
            ctx,
            Some(stream),
            self.reconnect_delay,
        ))
    }

    async fn unload_entry(&self, runtime: Arc<MprisRuntime>) -> Result<(), PlugHubError> {
        runtime.shutdown().await;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(entity_id = %entity.entity_id, service = %call.service))]
    async fn handle_service_call(
        &self,
        runtime: &MprisRuntime,
        entity: &Entity,
        call: &ServiceCall,
    ) -> Result<(), PlugHubError> {
        runtime.command(entity, call).await
    }
}
