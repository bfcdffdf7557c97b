//! Storage port: repository traits for persistence.

use std::future::Future;
use std::sync::Arc;

use plughub_domain::config_entry::ConfigEntry;
use plughub_domain::entity::Entity;
use plughub_domain::error::PlugHubError;
use plughub_domain::id::EntryId;

/// Persistence of [`ConfigEntry`] records.
///
/// Implementations must reject a second entry with the same
/// `(domain, unique_id)` pair.
pub trait ConfigEntryRepository {
    fn create(
        &self,
        entry: ConfigEntry,
    ) -> impl Future<Output = Result<ConfigEntry, PlugHubError>> + Send;

    fn get_by_id(
        &self,
        id: EntryId,
    ) -> impl Future<Output = Result<Option<ConfigEntry>, PlugHubError>> + Send;

    fn get_all(&self) -> impl Future<Output = Result<Vec<ConfigEntry>, PlugHubError>> + Send;

    fn find_by_domain(
        &self,
        domain: &str,
    ) -> impl Future<Output = Result<Vec<ConfigEntry>, PlugHubError>> + Send;

    fn find_by_unique_id(
        &self,
        domain: &str,
        unique_id: &str,
    ) -> impl Future<Output = Result<Option<ConfigEntry>, PlugHubError>> + Send;

    fn update(
        &self,
        entry: ConfigEntry,
    ) -> impl Future<Output = Result<ConfigEntry, PlugHubError>> + Send;

    fn delete(&self, id: EntryId) -> impl Future<Output = Result<(), PlugHubError>> + Send;
}

/// The entity registry, keyed by `unique_id`.
pub trait EntityRepository {
    /// Insert or replace the entity with the same `unique_id`.
    fn save(&self, entity: Entity) -> impl Future<Output = Result<Entity, PlugHubError>> + Send;

    fn get_by_unique_id(
        &self,
        unique_id: &str,
    ) -> impl Future<Output = Result<Option<Entity>, PlugHubError>> + Send;

    fn get_by_entity_id(
        &self,
        entity_id: &str,
    ) -> impl Future<Output = Result<Option<Entity>, PlugHubError>> + Send;

    fn get_all(&self) -> impl Future<Output = Result<Vec<Entity>, PlugHubError>> + Send;

    fn find_by_entry(
        &self,
        entry_id: EntryId,
    ) -> impl Future<Output = Result<Vec<Entity>, PlugHubError>> + Send;

    fn delete(&self, unique_id: &str) -> impl Future<Output = Result<(), PlugHubError>> + Send;
}

impl<T: ConfigEntryRepository + Send + Sync> ConfigEntryRepository for Arc<T> {
    fn create(
        &self,
        entry: ConfigEntry,
    ) -> impl Future<Output = Result<ConfigEntry, PlugHubError>> + Send {
        (**self).create(entry)
    }

    fn get_by_id(
        &self,
        id: EntryId,
    ) -> impl Future<Output = Result<Option<ConfigEntry>, PlugHubError>> + Send {
        (**self).get_by_id(id)
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<ConfigEntry>, PlugHubError>> + Send {
        (**self).get_all()
    }

    fn find_by_domain(
        &self,
        domain: &str,
    ) -> impl Future<Output = Result<Vec<ConfigEntry>, PlugHubError>> + Send {
        (**self).find_by_domain(domain)
    }

    fn find_by_unique_id(
        &self,
        domain: &str,
        unique_id: &str,
    ) -> impl Future<Output = Result<Option<ConfigEntry>, PlugHubError>> + Send {
        (**self).find_by_unique_id(domain, unique_id)
    }

    fn update(
        &self,
        entry: ConfigEntry,
    ) -> impl Future<Output = Result<ConfigEntry, PlugHubError>> + Send {
        (**self).update(entry)
    }

    fn delete(&self, id: EntryId) -> impl Future<Output = Result<(), PlugHubError>> + Send {
        (**self).delete(id)
    }
}
