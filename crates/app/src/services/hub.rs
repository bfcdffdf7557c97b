//! Hub: routes API requests to the integration that owns them.

use std::collections::BTreeMap;
use std::sync::Arc;

use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::Entity;
use plughub_domain::error::{NotFoundError, PlugHubError};
use plughub_domain::flow::FlowResult;
use plughub_domain::id::EntryId;
use plughub_domain::service::ServiceCall;

use crate::ports::{ConfigEntryRepository, EntityRepository, EventPublisher};
use crate::services::backup_manager::BackupManager;
use crate::services::config_entries::IntegrationHandle;
use crate::services::entity_service::EntityService;

/// Every enabled integration plus the shared registries.
pub struct Hub<CR, ER, EP> {
    entries: CR,
    entity_service: Arc<EntityService<ER, EP>>,
    integrations: BTreeMap<&'static str, Arc<dyn IntegrationHandle>>,
    backups: BackupManager,
}

impl<CR, ER, EP> Hub<CR, ER, EP>
where
    CR: ConfigEntryRepository + Send + Sync,
    ER: EntityRepository + Send + Sync,
    EP: EventPublisher + Send + Sync,
{
    pub fn new(
        entries: CR,
        entity_service: Arc<EntityService<ER, EP>>,
        backups: BackupManager,
    ) -> Self {
        Self {
            entries,
            entity_service,
            integrations: BTreeMap::new(),
            backups,
        }
    }

    /// Enable an integration. A second handle for the same domain replaces the first.
    #[must_use]
    pub fn with_integration(mut self, handle: Arc<dyn IntegrationHandle>) -> Self {
        self.integrations.insert(handle.domain(), handle);
        self
    }

    /// Domains of the enabled integrations, sorted.
    #[must_use]
    pub fn domains(&self) -> Vec<&'static str> {
        self.integrations.keys().copied().collect()
    }

    #[must_use]
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] when no integration has this domain.
    pub fn integration(&self, domain: &str) -> Result<&Arc<dyn IntegrationHandle>, PlugHubError> {
        self.integrations.get(domain).ok_or_else(|| {
            NotFoundError {
                entity: "Integration",
                id: domain.to_string(),
            }
            .into()
        })
    }

    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list_entries(&self) -> Result<Vec<ConfigEntry>, PlugHubError> {
        let mut entries = self.entries.get_all().await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry.
    pub async fn get_entry(&self, entry_id: EntryId) -> Result<ConfigEntry, PlugHubError> {
        self.entries.get_by_id(entry_id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "ConfigEntry",
                id: entry_id.to_string(),
            }
            .into()
        })
    }

    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown domain.
    pub async fn start_flow(
        &self,
        domain: &str,
        input: EntryData,
    ) -> Result<FlowResult, PlugHubError> {
        self.integration(domain)?.start_user_flow(input).await
    }

    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry.
    pub async fn start_reauth(
        &self,
        entry_id: EntryId,
        input: EntryData,
    ) -> Result<FlowResult, PlugHubError> {
        self.owner_of(entry_id)
            .await?
            .start_reauth_flow(entry_id, input)
            .await
    }

    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry.
    pub async fn update_options(
        &self,
        entry_id: EntryId,
        options: EntryData,
    ) -> Result<ConfigEntry, PlugHubError> {
        self.owner_of(entry_id)
            .await?
            .update_options(entry_id, options)
            .await
    }

    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry.
    pub async fn reload_entry(&self, entry_id: EntryId) -> Result<ConfigEntry, PlugHubError> {
        self.owner_of(entry_id).await?.reload(entry_id).await
    }

    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entry.
    pub async fn remove_entry(&self, entry_id: EntryId) -> Result<(), PlugHubError> {
        self.owner_of(entry_id).await?.remove(entry_id).await
    }

    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list_entities(&self) -> Result<Vec<Entity>, PlugHubError> {
        let mut entities = self.entity_service.list_entities().await?;
        entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(entities)
    }

    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entity.
    pub async fn get_entity(&self, entity_id: &str) -> Result<Entity, PlugHubError> {
        self.entity_service.get_entity(entity_id).await
    }

    /// Route a service call: entity → config entry → integration.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] for an unknown entity, or the
    /// integration's own error.
    #[tracing::instrument(skip(self, call), fields(entity_id = %call.entity_id, service = %call.service))]
    pub async fn call_service(&self, call: ServiceCall) -> Result<(), PlugHubError> {
        let entity = self.entity_service.get_entity(&call.entity_id).await?;
        let owner = self.owner_of(entity.entry_id).await?;
        owner.call_service(&entity, &call).await
    }

    /// Set up the stored entries of every enabled integration.
    ///
    /// Entries whose domain is not enabled stay `not_loaded`.
    pub async fn setup_all(&self) {
        for (domain, handle) in &self.integrations {
            if let Err(err) = handle.setup_all().await {
                tracing::error!(domain, error = %err, "failed to set up integration entries");
            }
        }
    }

    pub async fn unload_all(&self) {
        for handle in self.integrations.values() {
            handle.unload_all().await;
        }
    }

    async fn owner_of(&self, entry_id: EntryId) -> Result<&Arc<dyn IntegrationHandle>, PlugHubError> {
        let entry = self.get_entry(entry_id).await?;
        self.integration(&entry.domain)
    }
}
