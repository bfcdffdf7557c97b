//! `SQLite` implementation of [`EntityRepository`].

use std::collections::HashMap;
use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use plughub_app::ports::EntityRepository;
use plughub_domain::entity::{AttributeValue, Entity, EntityState, Platform};
use plughub_domain::error::PlugHubError;
use plughub_domain::id::EntryId;

use crate::error::StorageError;

/// Wrapper for converting database rows into domain types without polluting
/// domain structs with database concerns.
struct Wrapper(Entity);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Entity> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let unique_id: String = row.try_get("unique_id")?;
        let entity_id: String = row.try_get("entity_id")?;
        let entry_id: String = row.try_get("entry_id")?;
        let platform: String = row.try_get("platform")?;
        let name: String = row.try_get("name")?;
        let state_str: String = row.try_get("state")?;
        let attributes_json: String = row.try_get("attributes")?;
        let last_changed_str: String = row.try_get("last_changed")?;
        let last_updated_str: String = row.try_get("last_updated")?;

        let entry_id =
            EntryId::from_str(&entry_id).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let platform =
            Platform::from_str(&platform).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let Ok(state) = state_str.parse::<EntityState>();
        let attributes: HashMap<String, AttributeValue> = serde_json::from_str(&attributes_json)
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let last_changed = chrono::DateTime::parse_from_rfc3339(&last_changed_str)
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?
            .to_utc();
        let last_updated = chrono::DateTime::parse_from_rfc3339(&last_updated_str)
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?
            .to_utc();

        Ok(Self(Entity {
            entity_id,
            unique_id,
            entry_id,
            platform,
            name,
            state,
            attributes,
            last_changed,
            last_updated,
        }))
    }
}

const UPSERT: &str = r"
    INSERT INTO entities (unique_id, entity_id, entry_id, platform, name, state, attributes, last_changed, last_updated)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (unique_id) DO UPDATE SET
        entity_id = excluded.entity_id,
        entry_id = excluded.entry_id,
        platform = excluded.platform,
        name = excluded.name,
        state = excluded.state,
        attributes = excluded.attributes,
        last_changed = excluded.last_changed,
        last_updated = excluded.last_updated
";

const SELECT_BY_UNIQUE_ID: &str = "SELECT * FROM entities WHERE unique_id = ?";
const SELECT_BY_ENTITY_ID: &str = "SELECT * FROM entities WHERE entity_id = ?";
const SELECT_ALL: &str = "SELECT * FROM entities ORDER BY entity_id";
const SELECT_BY_ENTRY: &str = "SELECT * FROM entities WHERE entry_id = ? ORDER BY entity_id";

const DELETE_BY_UNIQUE_ID: &str = "DELETE FROM entities WHERE unique_id = ?";

/// `SQLite`-backed entity registry.
pub struct SqliteEntityRepository {
    pool: SqlitePool,
}

impl SqliteEntityRepository {
    /// Create a new repository using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl EntityRepository for SqliteEntityRepository {
    async fn save(&self, entity: Entity) -> Result<Entity, PlugHubError> {
        let attributes_json =
            serde_json::to_string(&entity.attributes).map_err(StorageError::from)?;

        sqlx::query(UPSERT)
            .bind(&entity.unique_id)
            .bind(&entity.entity_id)
            .bind(entity.entry_id.to_string())
            .bind(entity.platform.as_str())
            .bind(&entity.name)
            .bind(entity.state.to_string())
            .bind(&attributes_json)
            .bind(entity.last_changed.to_rfc3339())
            .bind(entity.last_updated.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(entity)
    }

    async fn get_by_unique_id(&self, unique_id: &str) -> Result<Option<Entity>, PlugHubError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_UNIQUE_ID)
            .bind(unique_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::maybe(row))
    }

    async fn get_by_entity_id(&self, entity_id: &str) -> Result<Option<Entity>, PlugHubError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ENTITY_ID)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::maybe(row))
    }

    async fn get_all(&self) -> Result<Vec<Entity>, PlugHubError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn find_by_entry(&self, entry_id: EntryId) -> Result<Vec<Entity>, PlugHubError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_ENTRY)
            .bind(entry_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn delete(&self, unique_id: &str) -> Result<(), PlugHubError> {
        sqlx::query(DELETE_BY_UNIQUE_ID)
            .bind(unique_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(())
    }
}
