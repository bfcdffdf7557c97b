//! JSON REST handlers for the entity registry.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};

use plughub_app::ports::{ConfigEntryRepository, EntityRepository, EventPublisher};
use plughub_domain::entity::Entity;

use crate::error::ApiError;
use crate::state::AppState;

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<Vec<Entity>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the get endpoint.
pub enum GetResponse {
    Ok(Json<Entity>),
}

impl IntoResponse for GetResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `GET /api/entities`
pub async fn list<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
) -> Result<ListResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let entities = state.hub.list_entities().await?;
    Ok(ListResponse::Ok(Json(entities)))
}

/// `GET /api/entities/{entity_id}`
pub async fn get<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(entity_id): Path<String>,
) -> Result<GetResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let entity = state.hub.get_entity(&entity_id).await?;
    Ok(GetResponse::Ok(Json(entity)))
}
