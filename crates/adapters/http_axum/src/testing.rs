//! Test application: in-memory SQLite, a stub integration and an in-memory
//! backup agent behind the real router.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use futures::future::BoxFuture;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use plughub_adapter_storage_sqlite_sqlx::{
    Config, SqliteConfigEntryRepository, SqliteEntityRepository,
};
use plughub_app::backup_registry::BackupAgentRegistry;
use plughub_app::event_bus::InProcessEventBus;
use plughub_app::ports::{
    BackupAgent, BackupAgentError, ByteStream, EntityContext, Integration, ValidatedEntry,
};
use plughub_app::services::backup_manager::BackupManager;
use plughub_app::services::config_entries::ConfigEntries;
use plughub_app::services::entity_service::EntityService;
use plughub_app::services::hub::Hub;
use plughub_domain::backup::AgentBackup;
use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::{Entity, EntityState, Platform};
use plughub_domain::error::{PlugHubError, SetupError};
use plughub_domain::flow::{FlowError, FlowErrorCode};
use plughub_domain::service::ServiceCall;

use crate::router;
use crate::state::AppState;

pub type TestState = AppState<
    Arc<SqliteConfigEntryRepository>,
    SqliteEntityRepository,
    Arc<InProcessEventBus>,
>;

/// Integration publishing one switch per entry.
pub struct StubIntegration;

impl Integration for StubIntegration {
    type Runtime = ();

    fn domain(&self) -> &'static str {
        "stub"
    }

    async fn validate_input(&self, input: &EntryData) -> Result<ValidatedEntry, FlowError> {
        let host = input
            .get("host")
            .and_then(Value::as_str)
            .ok_or(FlowError::field("host", FlowErrorCode::Unknown))?;
        if host == "unreachable" {
            return Err(FlowError::base(FlowErrorCode::CannotConnect));
        }
        Ok(ValidatedEntry {
            title: host.to_string(),
            unique_id: Some(host.to_string()),
            data: input.clone(),
        })
    }

    async fn setup_entry<C>(&self, entry: &ConfigEntry, ctx: C) -> Result<(), SetupError>
    where
        C: EntityContext + Clone + 'static,
    {
        let entity = Entity::builder()
            .unique_id(format!("{}-main", entry.entry_id))
            .entry_id(entry.entry_id)
            .platform(Platform::Switch)
            .name(format!("Stub {}", entry.title))
            .state(EntityState::Off)
            .build()
            .map_err(|err| SetupError::Fatal(err.to_string()))?;
        ctx.upsert_entity(entity)
            .await
            .map_err(|err| SetupError::NotReady(err.to_string()))?;
        Ok(())
    }

    async fn unload_entry(&self, _runtime: Arc<()>) -> Result<(), PlugHubError> {
        Ok(())
    }

    async fn handle_service_call(
        &self,
        _runtime: &(),
        _entity: &Entity,
        call: &ServiceCall,
    ) -> Result<(), PlugHubError> {
        match call.service.as_str() {
            "turn_on" => Ok(()),
            "explode" => Err(PlugHubError::integration(std::io::Error::other("device refused"))),
            _ => Err(call.unsupported().into()),
        }
    }
}

/// Backup agent keeping archives in memory.
#[derive(Default)]
pub struct MemoryAgent {
    backups: Mutex<BTreeMap<String, (AgentBackup, Vec<u8>)>>,
}

impl MemoryAgent {
    pub fn insert(&self, backup: AgentBackup, bytes: &[u8]) {
        self.backups
            .lock()
            .unwrap()
            .insert(backup.backup_id.clone(), (backup, bytes.to_vec()));
    }
}

impl BackupAgent for MemoryAgent {
    fn name(&self) -> &str {
        "memory"
    }

    fn list_backups(&self) -> BoxFuture<'_, Result<Vec<AgentBackup>, BackupAgentError>> {
        Box::pin(async move {
            let backups = self.backups.lock().unwrap();
            Ok(backups.values().map(|(backup, _)| backup.clone()).collect())
        })
    }

    fn get_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<AgentBackup, BackupAgentError>> {
        Box::pin(async move {
            let backups = self.backups.lock().unwrap();
            backups
                .get(backup_id)
                .map(|(backup, _)| backup.clone())
                .ok_or_else(|| BackupAgentError::NotFound(backup_id.to_string()))
        })
    }

    fn upload_backup(
        &self,
        stream: ByteStream,
        backup: AgentBackup,
    ) -> BoxFuture<'_, Result<(), BackupAgentError>> {
        Box::pin(async move {
            let chunks: Vec<Bytes> = stream.try_collect().await?;
            self.insert(backup, &chunks.concat());
            Ok(())
        })
    }

    fn download_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<ByteStream, BackupAgentError>> {
        Box::pin(async move {
            let backups = self.backups.lock().unwrap();
            let (_, bytes) = backups
                .get(backup_id)
                .ok_or_else(|| BackupAgentError::NotFound(backup_id.to_string()))?;
            let chunks: Vec<Result<Bytes, BackupAgentError>> = bytes
                .chunks(4)
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect();
            Ok(futures::stream::iter(chunks).boxed())
        })
    }

    fn delete_backup<'a>(
        &'a self,
        backup_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackupAgentError>> {
        Box::pin(async move {
            self.backups
                .lock()
                .unwrap()
                .remove(backup_id)
                .map(|_| ())
                .ok_or_else(|| BackupAgentError::NotFound(backup_id.to_string()))
        })
    }
}

pub fn backup(backup_id: &str) -> AgentBackup {
    AgentBackup {
        backup_id: backup_id.to_string(),
        name: "Nightly".to_string(),
        date: "2024-11-22T11:48:48.727189+01:00".to_string(),
        size: 11,
        addons: Vec::new(),
        folders: Vec::new(),
        database_included: true,
        homeassistant_included: true,
        homeassistant_version: Some("2024.12.0".to_string()),
        extra_metadata: serde_json::Map::new(),
        protected: false,
    }
}

pub struct TestApp {
    pub state: TestState,
    pub agent: Arc<MemoryAgent>,
}

impl TestApp {
    pub async fn start() -> Self {
        let db = Config {
            database_url: "sqlite::memory:".to_string(),
        }
        .build()
        .await
        .unwrap();
        let bus = Arc::new(InProcessEventBus::new(64));
        let entries = Arc::new(SqliteConfigEntryRepository::new(db.pool().clone()));
        let entities = Arc::new(EntityService::new(
            SqliteEntityRepository::new(db.pool().clone()),
            Arc::clone(&bus),
        ));
        let registry = Arc::new(BackupAgentRegistry::new());
        let agent = Arc::new(MemoryAgent::default());
        registry.register("memory.test".to_string(), Arc::clone(&agent) as Arc<dyn BackupAgent>);
        let manager = ConfigEntries::new(
            StubIntegration,
            Arc::clone(&entries),
            Arc::clone(&entities),
            Arc::clone(&bus),
            Arc::clone(&registry),
        );
        let hub = Hub::new(entries, entities, BackupManager::new(registry))
            .with_integration(Arc::new(manager));
        Self {
            state: AppState::new(Arc::new(hub), bus),
            agent,
        }
    }

    pub fn router(&self) -> Router {
        router::build(self.state.clone())
    }

    /// Send a request and return the status with the raw body.
    pub async fn raw(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Bytes) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes)
    }

    /// Send a request and decode the JSON body (`Null` when empty).
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.raw(method, uri, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Run the user flow for `host` and return the created entry id.
    pub async fn create_entry(&self, host: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/config_entries/flow/stub",
                Some(serde_json::json!({"host": host})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["entry"]["entry_id"].as_str().unwrap().to_string()
    }
}
