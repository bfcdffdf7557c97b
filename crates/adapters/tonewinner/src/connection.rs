//! Byte transport to the amplifier's serial bridge.

use std::future::Future;
use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::error::TonewinnerError;
use crate::protocol::{Command, Response};

/// How long validation waits for the answer to `POWER ?`.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub type Connection<S> = Framed<S, FrameCodec>;

/// Opens a fresh byte stream on each call.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Raw TCP socket, as exposed by serial-over-IP bridges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Connect and wait for the power report answering `POWER ?`.
///
/// # Errors
///
/// [`TonewinnerError::Timeout`] when nothing answers within `timeout`,
/// [`TonewinnerError::Io`] or [`TonewinnerError::Closed`] otherwise.
pub async fn probe<K: Connector>(
    connector: &K,
    timeout: Duration,
) -> Result<(Connection<K::Stream>, bool), TonewinnerError> {
    tokio::time::timeout(timeout, query_power(connector))
        .await
        .map_err(|_| TonewinnerError::Timeout)?
}

async fn query_power<K: Connector>(
    connector: &K,
) -> Result<(Connection<K::Stream>, bool), TonewinnerError> {
    let stream = connector.connect().await?;
    let mut connection = Framed::new(stream, FrameCodec);
    connection.send(Command::Power(None)).await?;
    while let Some(frame) = connection.next().await {
        if let Some(Response::Power(on)) = Response::parse(&frame?) {
            return Ok((connection, on));
        }
    }
    Err(TonewinnerError::Closed)
}
