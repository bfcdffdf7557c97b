//! Tonewinner adapter error types.

use plughub_domain::error::PlugHubError;

#[derive(Debug, thiserror::Error)]
pub enum TonewinnerError {
    #[error("connection to amplifier failed")]
    Io(#[from] std::io::Error),

    #[error("amplifier did not answer in time")]
    Timeout,

    /// The connection closed before the amplifier answered.
    #[error("connection closed")]
    Closed,

    #[error("amplifier is not connected")]
    NotConnected,
}

impl TonewinnerError {
    /// Convert into a [`PlugHubError::Integration`] for propagation across
    /// port boundaries.
    pub fn into_domain(self) -> PlugHubError {
        PlugHubError::integration(self)
    }
}

impl From<TonewinnerError> for PlugHubError {
    fn from(err: TonewinnerError) -> Self {
        err.into_domain()
    }
}
