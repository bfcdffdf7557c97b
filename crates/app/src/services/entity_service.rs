//! Entity service: the entity registry use-cases.

use plughub_domain::entity::{Entity, EntityState};
use plughub_domain::error::{NotFoundError, PlugHubError};
use plughub_domain::event::{Event, EventType};
use plughub_domain::id::EntryId;
use plughub_domain::time::now;

use crate::ports::{EntityRepository, EventPublisher};

/// Application service for the entity registry.
///
/// Entities are keyed by `unique_id`; the `entity_id` assigned on first
/// registration is kept for the entity's whole life.
pub struct EntityService<R, P> {
    repo: R,
    publisher: P,
}

impl<R, P> EntityService<R, P>
where
    R: EntityRepository + Send + Sync,
    P: EventPublisher + Send + Sync,
{
    /// Create a new service backed by the given repository and publisher.
    pub fn new(repo: R, publisher: P) -> Self {
        Self { repo, publisher }
    }

    /// Register a new entity or update the one with the same `unique_id`.
    ///
    /// Publishes `EntityAdded` for new entities and `StateChanged` when the
    /// state or attributes of an existing entity changed.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::Validation`] if invariants fail, or a
    /// storage error propagated from the repository.
    #[tracing::instrument(skip(self, entity), fields(unique_id = %entity.unique_id))]
    pub async fn upsert_entity(&self, mut entity: Entity) -> Result<Entity, PlugHubError> {
        entity.validate()?;
        let ts = now();
        match self.repo.get_by_unique_id(&entity.unique_id).await? {
            Some(existing) => {
                entity.entity_id.clone_from(&existing.entity_id);
                let changed =
                    existing.state != entity.state || existing.attributes != entity.attributes;
                entity.last_changed = if existing.state == entity.state {
                    existing.last_changed
                } else {
                    ts
                };
                entity.last_updated = ts;
                let saved = self.repo.save(entity).await?;
                if changed {
                    self.publish_state_changed(&existing, &saved).await?;
                }
                Ok(saved)
            }
            None => {
                entity.entity_id = self.free_entity_id(&entity.entity_id).await?;
                entity.last_changed = ts;
                entity.last_updated = ts;
                let saved = self.repo.save(entity).await?;
                tracing::debug!(entity_id = %saved.entity_id, "entity added");
                self.publisher
                    .publish(
                        Event::new(
                            EventType::EntityAdded,
                            serde_json::json!({"state": saved.state}),
                        )
                        .with_entry(saved.entry_id)
                        .with_entity(saved.entity_id.clone()),
                    )
                    .await?;
                Ok(saved)
            }
        }
    }

    /// Look up an entity by its `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PlugHubError::NotFound`] when no entity has this id,
    /// or a storage error from the repository.
    pub async fn get_entity(&self, entity_id: &str) -> Result<Entity, PlugHubError> {
        self.repo
            .get_by_entity_id(entity_id)
            .await?
            .ok_or_else(|| {
                NotFoundError {
                    entity: "Entity",
                    id: entity_id.to_string(),
                }
                .into()
            })
    }

    /// List all entities.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list_entities(&self) -> Result<Vec<Entity>, PlugHubError> {
        self.repo.get_all().await
    }

    /// List the entities owned by one config entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list_for_entry(&self, entry_id: EntryId) -> Result<Vec<Entity>, PlugHubError> {
        self.repo.find_by_entry(entry_id).await
    }

    /// Mark every entity of an unloaded entry as unavailable.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn mark_entry_unavailable(&self, entry_id: EntryId) -> Result<usize, PlugHubError> {
        let mut count = 0;
        for existing in self.repo.find_by_entry(entry_id).await? {
            if !existing.is_available() {
                continue;
            }
            let mut entity = existing.clone();
            entity.update_state(EntityState::Unavailable, now());
            let saved = self.repo.save(entity).await?;
            self.publish_state_changed(&existing, &saved).await?;
            count += 1;
        }
        tracing::debug!(%entry_id, count, "entities marked unavailable");
        Ok(count)
    }

    /// Remove one entity by `unique_id`. Removing an unknown entity is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn remove_entity(&self, unique_id: &str) -> Result<(), PlugHubError> {
        let Some(existing) = self.repo.get_by_unique_id(unique_id).await? else {
            return Ok(());
        };
        self.repo.delete(unique_id).await?;
        tracing::debug!(entity_id = %existing.entity_id, "entity removed");
        self.publisher
            .publish(
                Event::new(EventType::EntityRemoved, serde_json::Value::Null)
                    .with_entry(existing.entry_id)
                    .with_entity(existing.entity_id),
            )
            .await
    }

    /// Remove every entity of a config entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn remove_entry_entities(&self, entry_id: EntryId) -> Result<(), PlugHubError> {
        for entity in self.repo.find_by_entry(entry_id).await? {
            self.remove_entity(&entity.unique_id).await?;
        }
        Ok(())
    }

    async fn free_entity_id(&self, wanted: &str) -> Result<String, PlugHubError> {
        if self.repo.get_by_entity_id(wanted).await?.is_none() {
            return Ok(wanted.to_string());
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{wanted}_{suffix}");
            if self.repo.get_by_entity_id(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    async fn publish_state_changed(&self, old: &Entity, new: &Entity) -> Result<(), PlugHubError> {
        self.publisher
            .publish(
                Event::new(
                    EventType::StateChanged,
                    serde_json::json!({"old_state": old.state, "new_state": new.state}),
                )
                .with_entry(new.entry_id)
                .with_entity(new.entity_id.clone()),
            )
            .await
    }
}
