//! In-memory port implementations shared by the unit tests of this crate.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};

use plughub_domain::backup::AgentBackup;
use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::{Entity, EntityState, Platform};
use plughub_domain::error::{PlugHubError, SetupError};
use plughub_domain::event::{Event, EventType};
use plughub_domain::flow::{FlowError, FlowErrorCode};
use plughub_domain::id::EntryId;
use plughub_domain::service::ServiceCall;

use crate::ports::{
    BackupAgent, BackupAgentError, ByteStream, ConfigEntryRepository, EntityContext,
    EntityRepository, EventPublisher, Integration, ValidatedEntry,
};

#[derive(Default)]
pub struct InMemoryEntityRepo {
    store: Mutex<HashMap<String, Entity>>,
}

impl EntityRepository for InMemoryEntityRepo {
    async fn save(&self, entity: Entity) -> Result<Entity, PlugHubError> {
        let mut store = self.store.lock().unwrap();
        store.insert(entity.unique_id.clone(), entity.clone());
        Ok(entity)
    }

    async fn get_by_unique_id(&self, unique_id: &str) -> Result<Option<Entity>, PlugHubError> {
        Ok(self.store.lock().unwrap().get(unique_id).cloned())
    }

    async fn get_by_entity_id(&self, entity_id: &str) -> Result<Option<Entity>, PlugHubError> {
        let store = self.store.lock().unwrap();
        Ok(store.values().find(|e| e.entity_id == entity_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Entity>, PlugHubError> {
        Ok(self.store.lock().unwrap().values().cloned().collect())
    }

    async fn find_by_entry(&self, entry_id: EntryId) -> Result<Vec<Entity>, PlugHubError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .values()
            .filter(|e| e.entry_id == entry_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, unique_id: &str) -> Result<(), PlugHubError> {
        self.store.lock().unwrap().remove(unique_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConfigEntryRepo {
    store: Mutex<HashMap<EntryId, ConfigEntry>>,
}

impl ConfigEntryRepository for InMemoryConfigEntryRepo {
    async fn create(&self, entry: ConfigEntry) -> Result<ConfigEntry, PlugHubError> {
        self.store
            .lock()
            .unwrap()
            .insert(entry.entry_id, entry.clone());
        Ok(entry)
    }

    async fn get_by_id(&self, id: EntryId) -> Result<Option<ConfigEntry>, PlugHubError> {
        Ok(self.store.lock().unwrap().get(&id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<ConfigEntry>, PlugHubError> {
        Ok(self.store.lock().unwrap().values().cloned().collect())
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Vec<ConfigEntry>, PlugHubError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .values()
            .filter(|e| e.domain == domain)
            .cloned()
            .collect())
    }

    async fn find_by_unique_id(
        &self,
        domain: &str,
        unique_id: &str,
    ) -> Result<Option<ConfigEntry>, PlugHubError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .values()
            .find(|e| e.domain == domain && e.unique_id.as_deref() == Some(unique_id))
            .cloned())
    }

    async fn update(&self, entry: ConfigEntry) -> Result<ConfigEntry, PlugHubError> {
        self.store
            .lock()
            .unwrap()
            .insert(entry.entry_id, entry.clone());
        Ok(entry)
    }

    async fn delete(&self, id: EntryId) -> Result<(), PlugHubError> {
        self.store.lock().unwrap().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<EventType> {
        self.events().iter().map(|e| e.event_type).collect()
    }
}

impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: Event) -> Result<(), PlugHubError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Backup agent keeping archives in memory.
#[derive(Default)]
pub struct MemoryBackupAgent {
    backups: Mutex<BTreeMap<String, (AgentBackup, Vec<u8>)>>,
    pub fail_listing: bool,
}

impl MemoryBackupAgent {
    pub fn with_backup(backup: AgentBackup, bytes: &[u8]) -> Self {
        let agent = Self::default();
        agent
            .backups
            .lock()
            .unwrap()
            .insert(backup.backup_id.clone(), (backup, bytes.to_vec()));
        agent
    }

    pub fn failing() -> Self {
        Self {
            fail_listing: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, backup_id: &str) -> bool {
        self.backups.lock().unwrap().contains_key(backup_id)
    }
}

impl BackupAgent for MemoryBackupAgent {
    fn name(&self) -> &str {
        "memory"
    }

    fn list_backups(&self) -> BoxFuture<'_, Result<Vec<AgentBackup>, BackupAgentError>> {
        Box::pin(async move {
            if self.fail_listing {
                return Err(BackupAgentError::agent("Failed to list backups"));
            }
            let backups = self.backups.lock().unwrap();
            Ok(backups.values().map(|(b, _)| b.clone()).collect())
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
                .map(|(b, _)| b.clone())
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
            let bytes = chunks.concat();
            self.backups
                .lock()
                .unwrap()
                .insert(backup.backup_id.clone(), (backup, bytes));
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
            let chunk = Bytes::from(bytes.clone());
            Ok(futures::stream::once(async move { Ok(chunk) }).boxed())
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

#[derive(Default)]
pub struct FakeState {
    pub setup_results: Mutex<VecDeque<Result<(), SetupError>>>,
    pub setup_delay: Mutex<Duration>,
    pub setups: AtomicUsize,
    pub unloads: AtomicUsize,
    pub options_updates: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl FakeState {
    pub fn script(&self, results: impl IntoIterator<Item = Result<(), SetupError>>) {
        self.setup_results.lock().unwrap().extend(results);
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

/// Integration validating `{"host": ...}` and exposing one switch per entry.
#[derive(Clone, Default)]
pub struct FakeIntegration {
    pub state: Arc<FakeState>,
    pub with_backup: bool,
}

pub struct FakeRuntime;

impl FakeIntegration {
    pub fn main_unique_id(entry_id: EntryId) -> String {
        format!("{entry_id}-main")
    }
}

impl Integration for FakeIntegration {
    type Runtime = FakeRuntime;

    fn domain(&self) -> &'static str {
        "fake"
    }

    async fn validate_input(&self, input: &EntryData) -> Result<ValidatedEntry, FlowError> {
        let host = input
            .get("host")
            .and_then(serde_json::Value::as_str)
            .ok_or(FlowError::field("host", FlowErrorCode::Unknown))?;
        match host {
            "unreachable" => Err(FlowError::base(FlowErrorCode::CannotConnect)),
            "locked" => Err(FlowError::base(FlowErrorCode::InvalidAuth)),
            _ => Ok(ValidatedEntry {
                title: host.to_string(),
                unique_id: input
                    .get("serial")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(host)
                    .to_string()
                    .into(),
                data: input.clone(),
            }),
        }
    }

    async fn setup_entry<C>(&self, entry: &ConfigEntry, ctx: C) -> Result<FakeRuntime, SetupError>
    where
        C: EntityContext + Clone + 'static,
    {
        self.state.setups.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.setup_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.state.setup_results.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(()))?;
        let entity = Entity::builder()
            .unique_id(Self::main_unique_id(entry.entry_id))
            .entry_id(entry.entry_id)
            .platform(Platform::Switch)
            .name(entry.title.clone())
            .state(EntityState::On)
            .build()
            .map_err(|err| SetupError::Fatal(err.to_string()))?;
        ctx.upsert_entity(entity)
            .await
            .map_err(|err| SetupError::NotReady(err.to_string()))?;
        Ok(FakeRuntime)
    }

    async fn unload_entry(&self, _runtime: Arc<FakeRuntime>) -> Result<(), PlugHubError> {
        self.state.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_service_call(
        &self,
        _runtime: &FakeRuntime,
        entity: &Entity,
        call: &ServiceCall,
    ) -> Result<(), PlugHubError> {
        if call.service == "explode" {
            return Err(call.unsupported().into());
        }
        self.state
            .calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", entity.unique_id, call.service));
        Ok(())
    }

    async fn options_updated(&self, _runtime: &FakeRuntime, _entry: &ConfigEntry) {
        self.state.options_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn backup_agent(
        &self,
        _runtime: &Arc<FakeRuntime>,
        _entry: &ConfigEntry,
    ) -> Option<Arc<dyn BackupAgent>> {
        self.with_backup
            .then(|| Arc::new(MemoryBackupAgent::default()) as Arc<dyn BackupAgent>)
    }
}

pub fn backup(backup_id: &str) -> AgentBackup {
    AgentBackup {
        backup_id: backup_id.to_string(),
        name: "Nightly".to_string(),
        date: "2024-11-22T11:48:48.727189+01:00".to_string(),
        size: 4,
        addons: vec![],
        folders: vec![],
        database_included: true,
        homeassistant_included: true,
        homeassistant_version: Some("2024.12.0".to_string()),
        extra_metadata: serde_json::Map::new(),
        protected: false,
    }
}
