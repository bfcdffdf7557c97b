//! Backblaze adapter error types.

use plughub_app::ports::BackupAgentError;
use plughub_domain::error::PlugHubError;

/// Errors returned by the B2 native API client.
#[derive(Debug, thiserror::Error)]
pub enum B2Error {
    /// The request never got an answer (DNS, TLS, connection refused, …).
    #[error("request to Backblaze failed")]
    Http(#[from] reqwest::Error),

    /// B2 answered with an error document.
    #[error("{code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The configured bucket is not visible to the application key.
    #[error("bucket {0} not found")]
    BucketNotFound(String),
}

impl B2Error {
    /// The key was rejected or the token expired.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { status: 401, .. })
    }

    /// The file or version does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// Wrap into the agent error reported to the backup manager.
    pub fn into_agent(self, message: impl Into<String>) -> BackupAgentError {
        BackupAgentError::with_source(message, self)
    }

    /// Convert into a [`PlugHubError::Integration`] for propagation across
    /// port boundaries.
    pub fn into_domain(self) -> PlugHubError {
        PlugHubError::integration(self)
    }
}

impl From<B2Error> for PlugHubError {
    fn from(err: B2Error) -> Self {
        err.into_domain()
    }
}
