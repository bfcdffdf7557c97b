//! Agent transport: a stream of player updates plus a command channel.

use std::future::Future;

use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::MprisError;
use crate::message::{PlayerCommand, PlayerMessage};

pub type MessageStream = BoxStream<'static, Result<PlayerMessage, MprisError>>;

/// Source of player updates. Each `connect` starts a fresh session whose
/// stream opens with the currently live players and `initial_sync_done`.
pub trait MprisConnector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<MessageStream, MprisError>> + Send;

    fn send(
        &self,
        player_id: &str,
        command: PlayerCommand,
    ) -> impl Future<Output = Result<(), MprisError>> + Send;
}

type Sink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Serialize)]
struct CommandMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    player_id: &'a str,
    command: PlayerCommand,
}

/// JSON websocket to the desktop agent.
pub struct WebSocketConnector {
    url: String,
    sink: Mutex<Option<Sink>>,
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}/"),
            sink: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl MprisConnector for WebSocketConnector {
    async fn connect(&self) -> Result<MessageStream, MprisError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (write, read) = socket.split();
        *self.sink.lock().await = Some(write);
        tracing::debug!(url = %self.url, "connected to MPRIS agent");

        let messages = read.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                    Ok(message) => Some(Ok(message)),
                    Err(err) => {
                        tracing::debug!(message = %text.as_str(), error = %err, "ignoring agent message");
                        None
                    }
                },
                Ok(_) => None,
                Err(err) => Some(Err(MprisError::from(err))),
            }
        });
        Ok(messages.boxed())
    }

    async fn send(&self, player_id: &str, command: PlayerCommand) -> Result<(), MprisError> {
        let payload = serde_json::to_string(&CommandMessage {
            kind: "command",
            player_id,
            command,
        })?;
        let mut sink = self.sink.lock().await;
        let Some(write) = sink.as_mut() else {
            return Err(MprisError::NotConnected);
        };
        if let Err(err) = write.send(Message::text(payload)).await {
            *sink = None;
            return Err(err.into());
        }
        Ok(())
    }
}
