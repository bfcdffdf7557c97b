//! Test fixtures.

use plughub_app::ports::EntityContext;
use plughub_domain::backup::AgentBackup;
use plughub_domain::entity::Entity;
use plughub_domain::error::PlugHubError;
use plughub_domain::event::Event;
use plughub_domain::id::EntryId;

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

#[derive(Clone, Default)]
pub struct NullContext;

impl EntityContext for NullContext {
    fn entry_id(&self) -> EntryId {
        EntryId::default()
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<Entity, PlugHubError> {
        Ok(entity)
    }

    async fn remove_entity(&self, _unique_id: &str) -> Result<(), PlugHubError> {
        Ok(())
    }

    async fn publish(&self, _event: Event) -> Result<(), PlugHubError> {
        Ok(())
    }
}
