//! # plughub-adapter-backblaze
//!
//! Backblaze B2 backup agent.
//!
//! ## Config flow
//!
//! | field | meaning |
//! |-------|---------|
//! | `key_id` | application key id |
//! | `application_key` | application key secret |
//! | `bucket` | bucket name |
//! | `prefix` | optional folder inside the bucket, normalised to end with `/` |
//!
//! Validation authorizes the key, checks it may list, read, write and delete
//! files and resolves the bucket. Unique id: `"{bucket}/{prefix}"`.
//!
//! ## Dependency rule
//!
//! Depends on `plughub-app` (port traits) and `plughub-domain` only.

mod agent;
mod client;
mod error;
mod metadata;
mod store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use plughub_app::ports::{BackupAgent, EntityContext, Integration, ValidatedEntry};
use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::Entity;
use plughub_domain::error::{PlugHubError, SetupError};
use plughub_domain::flow::{FlowError, FlowErrorCode};
use plughub_domain::service::ServiceCall;

pub use agent::{BackblazeAgent, CACHE_TTL, MAX_BACKUP_SIZE};
pub use client::{B2Bucket, B2Client, DEFAULT_AUTH_URL};
pub use error::B2Error;
pub use store::{FileInfo, ObjectStore};

pub const DOMAIN: &str = "backblaze";

/// Capabilities the application key needs.
pub const REQUIRED_CAPABILITIES: [&str; 4] = ["listFiles", "readFiles", "writeFiles", "deleteFiles"];

const INVALID_BUCKET_NAME: FlowErrorCode = FlowErrorCode::Custom("invalid_bucket_name");
const INVALID_CAPABILITY: FlowErrorCode = FlowErrorCode::Custom("invalid_capability");

/// Connection parameters of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    key_id: String,
    application_key: String,
    bucket: String,
    prefix: String,
}

impl Credentials {
    fn from_input(input: &EntryData) -> Result<Self, FlowError> {
        let text = |field: &'static str| {
            input
                .get(field)
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
                .ok_or(FlowError::field(field, FlowErrorCode::Unknown))
        };
        Ok(Self {
            key_id: text("key_id")?,
            application_key: text("application_key")?,
            bucket: text("bucket")?,
            prefix: normalize_prefix(
                input
                    .get("prefix")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default(),
            ),
        })
    }

    fn from_entry(entry: &ConfigEntry) -> Result<Self, SetupError> {
        let field = |key: &str| {
            entry
                .data_field::<String>(key)
                .map_err(|err| SetupError::Fatal(err.to_string()))
        };
        Ok(Self {
            key_id: field("key_id")?,
            application_key: field("application_key")?,
            bucket: field("bucket")?,
            prefix: normalize_prefix(
                &entry
                    .data_field_opt::<String>("prefix")
                    .map_err(|err| SetupError::Fatal(err.to_string()))?
                    .unwrap_or_default(),
            ),
        })
    }

    fn into_data(self) -> EntryData {
        let mut data = EntryData::new();
        data.insert("key_id".into(), self.key_id.into());
        data.insert("application_key".into(), self.application_key.into());
        data.insert("bucket".into(), self.bucket.into());
        data.insert("prefix".into(), self.prefix.into());
        data
    }
}

/// `"backups"` and `"/backups/"` both become `"backups/"`; blank stays blank.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn flow_error(err: &B2Error) -> FlowError {
    let code = match err {
        err if err.is_unauthorized() => FlowErrorCode::InvalidAuth,
        B2Error::Http(err) if err.is_timeout() => FlowErrorCode::Timeout,
        B2Error::Http(_) => FlowErrorCode::CannotConnect,
        B2Error::BucketNotFound(_) => return FlowError::field("bucket", INVALID_BUCKET_NAME),
        B2Error::Api { .. } => FlowErrorCode::Unknown,
    };
    FlowError::base(code)
}

fn setup_error(err: B2Error) -> SetupError {
    match err {
        err if err.is_unauthorized() => SetupError::AuthFailed(err.to_string()),
        B2Error::BucketNotFound(bucket) => SetupError::Fatal(format!("bucket {bucket} not found")),
        err @ B2Error::Http(_) => SetupError::NotReady(err.to_string()),
        err @ B2Error::Api { .. } => SetupError::NotReady(err.to_string()),
    }
}

/// Live state of a loaded entry.
pub struct BackblazeRuntime {
    agent: Arc<BackblazeAgent<B2Bucket>>,
}

/// The Backblaze integration.
pub struct BackblazeIntegration {
    http: reqwest::Client,
    auth_url: String,
}

impl Default for BackblazeIntegration {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_AUTH_URL)
    }
}

impl BackblazeIntegration {
    #[must_use]
    pub fn new(http: reqwest::Client, auth_url: impl Into<String>) -> Self {
        Self {
            http,
            auth_url: auth_url.into(),
        }
    }

    fn client(&self, credentials: &Credentials) -> B2Client {
        B2Client::new(
            self.http.clone(),
            self.auth_url.clone(),
            credentials.key_id.clone(),
            credentials.application_key.clone(),
        )
    }
}

impl Integration for BackblazeIntegration {
    type Runtime = BackblazeRuntime;

    fn domain(&self) -> &'static str {
        DOMAIN
    }

    #[tracing::instrument(skip_all, fields(domain = DOMAIN))]
    async fn validate_input(&self, input: &EntryData) -> Result<ValidatedEntry, FlowError> {
        let credentials = Credentials::from_input(input)?;
        let client = self.client(&credentials);

        let session = client.authorize().await.map_err(|err| {
            tracing::warn!(error = %err, "authorization failed");
            flow_error(&err)
        })?;
        let missing: Vec<&str> = REQUIRED_CAPABILITIES
            .iter()
            .copied()
            .filter(|capability| !session.allowed.capabilities.iter().any(|c| c == capability))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(?missing, "application key lacks capabilities");
            return Err(FlowError::base(INVALID_CAPABILITY));
        }
        client.find_bucket(&credentials.bucket).await.map_err(|err| {
            tracing::warn!(bucket = %credentials.bucket, error = %err, "bucket lookup failed");
            flow_error(&err)
        })?;

        Ok(ValidatedEntry {
            title: credentials.bucket.clone(),
            unique_id: Some(format!("{}/{}", credentials.bucket, credentials.prefix)),
            data: credentials.into_data(),
        })
    }

    #[tracing::instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn setup_entry<C>(&self, entry: &ConfigEntry, _ctx: C) -> Result<BackblazeRuntime, SetupError>
    where
        C: EntityContext + Clone + 'static,
    {
        let credentials = Credentials::from_entry(entry)?;
        let client = Arc::new(self.client(&credentials));
        client.authorize().await.map_err(setup_error)?;
        let bucket = client
            .find_bucket(&credentials.bucket)
            .await
            .map_err(setup_error)?;
        tracing::info!(bucket = %bucket.bucket_name, prefix = %credentials.prefix, "backblaze bucket ready");

        let store = B2Bucket::new(client, bucket);
        Ok(BackblazeRuntime {
            agent: Arc::new(BackblazeAgent::new(store, credentials.prefix)),
        })
    }

    async fn unload_entry(&self, _runtime: Arc<BackblazeRuntime>) -> Result<(), PlugHubError> {
        Ok(())
    }

    async fn handle_service_call(
        &self,
        _runtime: &BackblazeRuntime,
        _entity: &Entity,
        call: &ServiceCall,
    ) -> Result<(), PlugHubError> {
        Err(call.unsupported().into())
    }

    fn backup_agent(
        &self,
        runtime: &Arc<BackblazeRuntime>,
        _entry: &ConfigEntry,
    ) -> Option<Arc<dyn BackupAgent>> {
        Some(Arc::clone(&runtime.agent) as Arc<dyn BackupAgent>)
    }
}
