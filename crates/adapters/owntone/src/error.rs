//! OwnTone adapter error types.

use plughub_domain::error::PlugHubError;

/// Errors talking to an OwnTone server.
#[derive(Debug, thiserror::Error)]
pub enum OwnToneError {
    #[error("request to OwnTone failed")]
    Http(#[from] reqwest::Error),

    #[error("OwnTone answered {status} to {path}")]
    Status { status: u16, path: String },

    #[error("websocket error")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// `websocket_port` is missing or zero in the server config.
    #[error("websocket notifications are not enabled")]
    WebSocketDisabled,
}

impl OwnToneError {
    /// The server rejected the password.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    /// Convert into a [`PlugHubError::Integration`] for propagation across
    /// port boundaries.
    pub fn into_domain(self) -> PlugHubError {
        PlugHubError::integration(self)
    }
}

impl From<OwnToneError> for PlugHubError {
    fn from(err: OwnToneError) -> Self {
        err.into_domain()
    }
}
