//! Concrete [`EntityContext`] backed by application services.

use std::sync::Arc;

use plughub_domain::entity::Entity;
use plughub_domain::error::{PlugHubError, ValidationError};
use plughub_domain::event::Event;
use plughub_domain::id::EntryId;

use crate::ports::{EntityContext, EntityRepository, EventPublisher};
use crate::services::entity_service::EntityService;

/// [`EntityContext`] implementation scoped to one config entry, delegating
/// to `EntityService` and an `EventPublisher`.
///
/// Wraps `Arc`-ed services so it is cheaply cloneable and `Send + Sync`.
/// The generic parameters are confined to this struct; integrations see
/// only the [`EntityContext`] trait.
pub struct ServiceContext<ER, EP> {
    entry_id: EntryId,
    entity_service: Arc<EntityService<ER, EP>>,
    event_publisher: EP,
}

impl<ER, EP> ServiceContext<ER, EP> {
    /// Create a context for `entry_id`.
    pub fn new(
        entry_id: EntryId,
        entity_service: Arc<EntityService<ER, EP>>,
        event_publisher: EP,
    ) -> Self {
        Self {
            entry_id,
            entity_service,
            event_publisher,
        }
    }
}

impl<ER, EP: Clone> Clone for ServiceContext<ER, EP> {
    fn clone(&self) -> Self {
        Self {
            entry_id: self.entry_id,
            entity_service: Arc::clone(&self.entity_service),
            event_publisher: self.event_publisher.clone(),
        }
    }
}

impl<ER, EP> EntityContext for ServiceContext<ER, EP>
where
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<Entity, PlugHubError> {
        if entity.entry_id != self.entry_id {
            return Err(ValidationError::invalid_field(
                "entry_id",
                format!("entity belongs to {}, not {}", entity.entry_id, self.entry_id),
            )
            .into());
        }
        self.entity_service.upsert_entity(entity).await
    }

    async fn remove_entity(&self, unique_id: &str) -> Result<(), PlugHubError> {
        self.entity_service.remove_entity(unique_id).await
    }

    async fn publish(&self, event: Event) -> Result<(), PlugHubError> {
        self.event_publisher
            .publish(event.with_entry(self.entry_id))
            .await
    }

    async fn registered_entities(&self) -> Result<Vec<Entity>, PlugHubError> {
        self.entity_service.list_for_entry(self.entry_id).await
    }
}
