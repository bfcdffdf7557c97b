//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`PlugHubError`] via `#[from]` or an explicit `From` impl, so that port
//! boundaries only ever carry a single error type.

/// Top-level error carried across port boundaries.
#[derive(Debug, thiserror::Error)]
pub enum PlugHubError {
    /// A domain invariant was violated by the caller's input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The requested record does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// A config entry could not be set up, or is not loaded.
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// An integration failed while talking to its external system.
    #[error("integration error")]
    Integration(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The persistence layer failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PlugHubError {
    /// Wrap any adapter error as [`PlugHubError::Integration`].
    pub fn integration<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Integration(Box::new(err))
    }
}

/// Violations of domain invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("domain must not be empty")]
    EmptyDomain,
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("unique_id must not be empty")]
    EmptyUniqueId,
    #[error("entity_id must not be empty")]
    EmptyEntityId,
    #[error("entity_id {0:?} must be formatted as <platform>.<object_id>")]
    InvalidEntityId(String),
    #[error("missing field {0:?}")]
    MissingField(String),
    #[error("invalid field {field:?}: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unsupported service {0:?}")]
    UnsupportedService(String),
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidField`].
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A lookup by identifier returned nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    /// Kind of record that was looked up (e.g. `"ConfigEntry"`).
    pub entity: &'static str,
    /// Identifier that was requested.
    pub id: String,
}

/// Why a config entry could not be set up.
///
/// The entry manager maps each variant onto an
/// [`EntryState`](crate::config_entry::EntryState):
/// `NotReady` is retried later, `AuthFailed` waits for a reauth flow and
/// `Fatal` waits for the user to reconfigure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// Transient failure (network, device offline). Retried automatically.
    #[error("not ready: {0}")]
    NotReady(String),
    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Unrecoverable configuration problem.
    #[error("setup failed: {0}")]
    Fatal(String),
}

impl SetupError {
    /// Whether the entry manager should schedule another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }

    /// Human-readable reason stored on the config entry.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::NotReady(reason) | Self::AuthFailed(reason) | Self::Fatal(reason) => reason,
        }
    }
}
