//! MPRIS adapter error types.

use plughub_domain::error::PlugHubError;

#[derive(Debug, thiserror::Error)]
pub enum MprisError {
    #[error("websocket error")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed agent message")]
    Json(#[from] serde_json::Error),

    #[error("agent is not connected")]
    NotConnected,

    #[error("agent did not answer in time")]
    Timeout,

    /// The player left or never appeared.
    #[error("player {0} is not available")]
    PlayerUnavailable(String),
}

impl MprisError {
    /// Convert into a [`PlugHubError::Integration`] for propagation across
    /// port boundaries.
    pub fn into_domain(self) -> PlugHubError {
        PlugHubError::integration(self)
    }
}

impl From<MprisError> for PlugHubError {
    fn from(err: MprisError) -> Self {
        err.into_domain()
    }
}
