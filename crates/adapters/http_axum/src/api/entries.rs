//! JSON REST handlers for config entries and their flows.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use plughub_app::ports::{ConfigEntryRepository, EntityRepository, EventPublisher};
use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::flow::FlowResult;

use super::parse_entry_id;
use crate::error::ApiError;
use crate::state::AppState;

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<Vec<ConfigEntry>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from endpoints returning one entry.
pub enum EntryResponse {
    Ok(Json<ConfigEntry>),
}

impl IntoResponse for EntryResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from a flow step.
pub enum FlowResponse {
    /// The step created an entry.
    Created(Json<FlowResult>),
    /// The form is shown again, or the flow aborted.
    Ok(Json<FlowResult>),
}

impl From<FlowResult> for FlowResponse {
    fn from(result: FlowResult) -> Self {
        match result {
            FlowResult::CreateEntry { .. } => Self::Created(Json(result)),
            FlowResult::Form { .. } | FlowResult::Abort { .. } => Self::Ok(Json(result)),
        }
    }
}

impl IntoResponse for FlowResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the delete endpoint.
pub enum DeleteResponse {
    NoContent,
}

impl IntoResponse for DeleteResponse {
    fn into_response(self) -> Response {
        match self {
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// `GET /api/config_entries`
pub async fn list<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
) -> Result<ListResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let entries = state.hub.list_entries().await?;
    Ok(ListResponse::Ok(Json(entries)))
}

/// `GET /api/config_entries/{entry_id}`
pub async fn get<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(entry_id): Path<String>,
) -> Result<EntryResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let entry = state.hub.get_entry(parse_entry_id(&entry_id)?).await?;
    Ok(EntryResponse::Ok(Json(entry)))
}

/// `POST /api/config_entries/flow/{domain}`: run the `user` step.
pub async fn start_flow<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(domain): Path<String>,
    Json(input): Json<EntryData>,
) -> Result<FlowResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let result = state.hub.start_flow(&domain, input).await?;
    Ok(result.into())
}

/// `POST /api/config_entries/{entry_id}/reauth`
pub async fn reauth<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(entry_id): Path<String>,
    Json(input): Json<EntryData>,
) -> Result<FlowResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let result = state
        .hub
        .start_reauth(parse_entry_id(&entry_id)?, input)
        .await?;
    Ok(result.into())
}

/// `PUT /api/config_entries/{entry_id}/options`
pub async fn update_options<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(entry_id): Path<String>,
    Json(options): Json<EntryData>,
) -> Result<EntryResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let entry = state
        .hub
        .update_options(parse_entry_id(&entry_id)?, options)
        .await?;
    Ok(EntryResponse::Ok(Json(entry)))
}

/// `POST /api/config_entries/{entry_id}/reload`
pub async fn reload<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(entry_id): Path<String>,
) -> Result<EntryResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let entry = state.hub.reload_entry(parse_entry_id(&entry_id)?).await?;
    Ok(EntryResponse::Ok(Json(entry)))
}

/// `DELETE /api/config_entries/{entry_id}`
pub async fn remove<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(entry_id): Path<String>,
) -> Result<DeleteResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    state.hub.remove_entry(parse_entry_id(&entry_id)?).await?;
    Ok(DeleteResponse::NoContent)
}
