//! JSON REST API handler modules.

#[allow(clippy::missing_errors_doc)]
pub mod backups;
#[allow(clippy::missing_errors_doc)]
pub mod entities;
#[allow(clippy::missing_errors_doc)]
pub mod entries;
#[allow(clippy::missing_errors_doc)]
pub mod services;
pub mod sse;

use std::str::FromStr;

use axum::Router;
use axum::routing::{get, post, put};

use plughub_app::ports::{ConfigEntryRepository, EntityRepository, EventPublisher};
use plughub_domain::error::ValidationError;
use plughub_domain::id::EntryId;

use crate::state::AppState;

/// Build the `/api` sub-router.
pub fn routes<CR, ER, EP>() -> Router<AppState<CR, ER, EP>>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    Router::new()
        // Config entries and flows
        .route("/config_entries", get(entries::list::<CR, ER, EP>))
        .route(
            "/config_entries/flow/{domain}",
            post(entries::start_flow::<CR, ER, EP>),
        )
        .route(
            "/config_entries/{entry_id}",
            get(entries::get::<CR, ER, EP>).delete(entries::remove::<CR, ER, EP>),
        )
        .route(
            "/config_entries/{entry_id}/reauth",
            post(entries::reauth::<CR, ER, EP>),
        )
        .route(
            "/config_entries/{entry_id}/options",
            put(entries::update_options::<CR, ER, EP>),
        )
        .route(
            "/config_entries/{entry_id}/reload",
            post(entries::reload::<CR, ER, EP>),
        )
        // Entities and services
        .route("/entities", get(entities::list::<CR, ER, EP>))
        .route("/entities/{entity_id}", get(entities::get::<CR, ER, EP>))
        .route("/services/{service}", post(services::call::<CR, ER, EP>))
        // Backups
        .route("/backup/agents", get(backups::agents::<CR, ER, EP>))
        .route("/backup/info", get(backups::info::<CR, ER, EP>))
        .route("/backup/upload", post(backups::upload::<CR, ER, EP>))
        .route(
            "/backup/download/{backup_id}",
            get(backups::download::<CR, ER, EP>),
        )
        .route(
            "/backup/{backup_id}",
            get(backups::get::<CR, ER, EP>).delete(backups::remove::<CR, ER, EP>),
        )
        // Events
        .route("/events/stream", get(sse::stream::<CR, ER, EP>))
}

fn parse_entry_id(raw: &str) -> Result<EntryId, ValidationError> {
    EntryId::from_str(raw).map_err(|err| ValidationError::invalid_field("entry_id", err.to_string()))
}
