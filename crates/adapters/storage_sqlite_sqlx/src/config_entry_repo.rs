//! `SQLite` implementation of [`ConfigEntryRepository`].

use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use plughub_app::ports::ConfigEntryRepository;
use plughub_domain::config_entry::{ConfigEntry, EntryData, EntryState};
use plughub_domain::error::PlugHubError;
use plughub_domain::id::EntryId;

use crate::error::StorageError;

struct Wrapper(ConfigEntry);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<ConfigEntry> {
        value.map(|w| w.0)
    }
}

fn decode<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let entry_id: String = row.try_get("entry_id")?;
        let domain: String = row.try_get("domain")?;
        let unique_id: Option<String> = row.try_get("unique_id")?;
        let title: String = row.try_get("title")?;
        let data_json: String = row.try_get("data")?;
        let options_json: String = row.try_get("options")?;
        let state_str: String = row.try_get("state")?;
        let reason: Option<String> = row.try_get("reason")?;
        let created_at_str: String = row.try_get("created_at")?;
        let modified_at_str: String = row.try_get("modified_at")?;

        let data: EntryData = serde_json::from_str(&data_json).map_err(decode)?;
        let options: EntryData = serde_json::from_str(&options_json).map_err(decode)?;

        Ok(Self(ConfigEntry {
            entry_id: EntryId::from_str(&entry_id).map_err(decode)?,
            domain,
            unique_id,
            title,
            data,
            options,
            state: EntryState::from_str(&state_str).map_err(decode)?,
            reason,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
                .map_err(decode)?
                .to_utc(),
            modified_at: chrono::DateTime::parse_from_rfc3339(&modified_at_str)
                .map_err(decode)?
                .to_utc(),
        }))
    }
}

const INSERT: &str = r"
    INSERT INTO config_entries (entry_id, domain, unique_id, title, data, options, state, reason, created_at, modified_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_BY_ID: &str = "SELECT * FROM config_entries WHERE entry_id = ?";
const SELECT_ALL: &str = "SELECT * FROM config_entries ORDER BY created_at";
const SELECT_BY_DOMAIN: &str =
    "SELECT * FROM config_entries WHERE domain = ? ORDER BY created_at";
const SELECT_BY_UNIQUE_ID: &str =
    "SELECT * FROM config_entries WHERE domain = ? AND unique_id = ?";

const UPDATE: &str = r"
    UPDATE config_entries
    SET unique_id = ?, title = ?, data = ?, options = ?, state = ?, reason = ?, modified_at = ?
    WHERE entry_id = ?
";

const DELETE_BY_ID: &str = "DELETE FROM config_entries WHERE entry_id = ?";

/// `SQLite`-backed config entry repository.
pub struct SqliteConfigEntryRepository {
    pool: SqlitePool,
}

impl SqliteConfigEntryRepository {
    /// Create a new repository using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl ConfigEntryRepository for SqliteConfigEntryRepository {
    async fn create(&self, entry: ConfigEntry) -> Result<ConfigEntry, PlugHubError> {
        let data_json = serde_json::to_string(&entry.data).map_err(StorageError::from)?;
        let options_json = serde_json::to_string(&entry.options).map_err(StorageError::from)?;

        sqlx::query(INSERT)
            .bind(entry.entry_id.to_string())
            .bind(&entry.domain)
            .bind(&entry.unique_id)
            .bind(&entry.title)
            .bind(&data_json)
            .bind(&options_json)
            .bind(entry.state.as_str())
            .bind(&entry.reason)
            .bind(entry.created_at.to_rfc3339())
            .bind(entry.modified_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(entry)
    }

    async fn get_by_id(&self, id: EntryId) -> Result<Option<ConfigEntry>, PlugHubError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::maybe(row))
    }

    async fn get_all(&self) -> Result<Vec<ConfigEntry>, PlugHubError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Vec<ConfigEntry>, PlugHubError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_DOMAIN)
            .bind(domain)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn find_by_unique_id(
        &self,
        domain: &str,
        unique_id: &str,
    ) -> Result<Option<ConfigEntry>, PlugHubError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_UNIQUE_ID)
            .bind(domain)
            .bind(unique_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::maybe(row))
    }

    async fn update(&self, entry: ConfigEntry) -> Result<ConfigEntry, PlugHubError> {
        let data_json = serde_json::to_string(&entry.data).map_err(StorageError::from)?;
        let options_json = serde_json::to_string(&entry.options).map_err(StorageError::from)?;

        sqlx::query(UPDATE)
            .bind(&entry.unique_id)
            .bind(&entry.title)
            .bind(&data_json)
            .bind(&options_json)
            .bind(entry.state.as_str())
            .bind(&entry.reason)
            .bind(entry.modified_at.to_rfc3339())
            .bind(entry.entry_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(entry)
    }

    async fn delete(&self, id: EntryId) -> Result<(), PlugHubError> {
        sqlx::query(DELETE_BY_ID)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(())
    }
}
