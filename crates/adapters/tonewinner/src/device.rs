//! Connection loop: keeps one session open, applies reports, sends commands.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use plughub_app::ports::EntityContext;

use crate::connection::{Connection, Connector};
use crate::error::TonewinnerError;
use crate::protocol::{Command, Response};
use crate::state::{DeviceState, PlayerInfo, render};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// State shared between the loop and the service handler.
#[derive(Debug, Default)]
pub struct SharedState(Mutex<DeviceState>);

impl SharedState {
    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

enum SessionEnd {
    /// The amplifier closed the stream.
    Closed,
    /// Every command sender is gone.
    Stopped,
}

pub struct Device<K: Connector, C> {
    connector: K,
    ctx: C,
    info: PlayerInfo,
    state: Arc<SharedState>,
    commands: mpsc::Receiver<Command>,
    reconnect_delay: Duration,
}

impl<K: Connector, C: EntityContext + 'static> Device<K, C> {
    pub fn new(
        connector: K,
        ctx: C,
        info: PlayerInfo,
        state: Arc<SharedState>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            connector,
            ctx,
            info,
            state,
            commands,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Run the loop, starting with `connection` when one is already open.
    pub fn start(self, connection: Option<Connection<K::Stream>>) -> JoinHandle<()> {
        tokio::spawn(self.run(connection))
    }

    async fn run(mut self, mut connection: Option<Connection<K::Stream>>) {
        loop {
            let opened = match connection.take() {
                Some(connection) => Ok(connection),
                None => self
                    .connector
                    .connect()
                    .await
                    .map(|stream| Connection::new(stream, crate::codec::FrameCodec)),
            };
            match opened {
                Ok(connection) => match self.session(connection).await {
                    Ok(SessionEnd::Stopped) => {
                        tracing::debug!(unique_id = %self.info.unique_id, "tonewinner loop stopped");
                        return;
                    }
                    Ok(SessionEnd::Closed) => {
                        tracing::info!(unique_id = %self.info.unique_id, "amplifier closed the connection");
                    }
                    Err(err) => {
                        tracing::warn!(unique_id = %self.info.unique_id, error = %err, "amplifier session failed");
                    }
                },
                Err(err) => {
                    tracing::warn!(unique_id = %self.info.unique_id, error = %err, "cannot reach amplifier");
                }
            }
            self.state.lock().disconnect();
            self.publish().await;
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn session(
        &mut self,
        mut connection: Connection<K::Stream>,
    ) -> Result<SessionEnd, TonewinnerError> {
        for query in Command::QUERIES {
            connection.feed(query).await?;
        }
        connection.flush().await?;
        self.state.lock().connected = true;
        tracing::info!(unique_id = %self.info.unique_id, "amplifier connected");
        self.publish().await;

        loop {
            tokio::select! {
                frame = connection.next() => {
                    let Some(frame) = frame else {
                        return Ok(SessionEnd::Closed);
                    };
                    let frame = frame?;
                    let Some(response) = Response::parse(&frame) else {
                        tracing::debug!(frame = %frame, "ignoring amplifier frame");
                        continue;
                    };
                    let powered_on = self.state.lock().apply(response);
                    if powered_on {
                        for query in &Command::QUERIES[1..] {
                            connection.feed(query.clone()).await?;
                        }
                        connection.flush().await?;
                    }
                    self.publish().await;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Ok(SessionEnd::Stopped);
                    };
                    tracing::debug!(command = %command, "sending amplifier command");
                    connection.send(command).await?;
                }
            }
        }
    }

    async fn publish(&self) {
        let rendered = render(&self.info, &self.state.lock());
        let result = match rendered {
            Ok(entity) => self.ctx.upsert_entity(entity).await.map(drop),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            tracing::warn!(unique_id = %self.info.unique_id, error = %err, "cannot publish amplifier state");
        }
    }
}
