//! JSON REST handlers over the backup agents of loaded entries.

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use plughub_app::ports::{
    BackupAgentError, ByteStream, ConfigEntryRepository, EntityRepository, EventPublisher,
};
use plughub_app::services::backup_manager::{BackupInfo, ManagerBackup};
use plughub_domain::backup::AgentBackup;
use plughub_domain::error::ValidationError;
use plughub_domain::time::now;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteSummary {
    /// Agents that failed, by id.
    pub agent_errors: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub agent_id: String,
}

/// Metadata of an uploaded archive. The size is the request's
/// `Content-Length`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub agent_id: String,
    pub backup_id: String,
    pub name: String,
    /// RFC 3339, defaults to the time of the upload.
    pub date: Option<String>,
    pub homeassistant_version: Option<String>,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub backup_id: String,
}

/// Possible responses from the upload endpoint.
pub enum UploadResponse {
    Created(Json<UploadSummary>),
}

impl IntoResponse for UploadResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
        }
    }
}

/// Possible responses from the agents endpoint.
pub enum AgentsResponse {
    Ok(Json<Vec<AgentSummary>>),
}

impl IntoResponse for AgentsResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the info endpoint.
pub enum InfoResponse {
    Ok(Json<BackupInfo>),
}

impl IntoResponse for InfoResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the get endpoint.
pub enum GetResponse {
    Ok(Json<ManagerBackup>),
}

impl IntoResponse for GetResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the delete endpoint.
pub enum DeleteResponse {
    Ok(Json<DeleteSummary>),
}

impl IntoResponse for DeleteResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `GET /api/backup/agents`
pub async fn agents<CR, ER, EP>(State(state): State<AppState<CR, ER, EP>>) -> AgentsResponse
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let agents = state
        .hub
        .backups()
        .agents()
        .into_iter()
        .map(|(agent_id, name)| AgentSummary { agent_id, name })
        .collect();
    AgentsResponse::Ok(Json(agents))
}

/// `GET /api/backup/info`: backups merged across agents.
pub async fn info<CR, ER, EP>(State(state): State<AppState<CR, ER, EP>>) -> InfoResponse
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    InfoResponse::Ok(Json(state.hub.backups().list_backups().await))
}

/// `GET /api/backup/{backup_id}`
pub async fn get<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(backup_id): Path<String>,
) -> Result<GetResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let backup = state.hub.backups().get_backup(&backup_id).await?;
    Ok(GetResponse::Ok(Json(backup)))
}

/// `DELETE /api/backup/{backup_id}`: delete from every agent holding it.
pub async fn remove<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(backup_id): Path<String>,
) -> DeleteResponse
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let agent_errors = state.hub.backups().delete_backup(&backup_id).await;
    DeleteResponse::Ok(Json(DeleteSummary { agent_errors }))
}

/// `GET /api/backup/download/{backup_id}?agent_id=`: stream the archive.
pub async fn download<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(backup_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let (backup, stream) = state
        .hub
        .backups()
        .download_backup(&query.agent_id, &backup_id)
        .await?;
    let filename = backup
        .suggested_filename()
        .unwrap_or_else(|_| format!("{backup_id}.tar"));
    tracing::debug!(agent_id = %query.agent_id, backup_id = %backup_id, "streaming backup");
    let headers = [
        (header::CONTENT_TYPE, "application/x-tar".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}

/// `POST /api/backup/upload?agent_id=&backup_id=&name=`: stream the
/// request body into one agent.
pub async fn upload<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<UploadResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| ValidationError::MissingField("content-length".into()))?;
    let backup = AgentBackup {
        backup_id: query.backup_id,
        name: query.name,
        date: query.date.unwrap_or_else(|| now().to_rfc3339()),
        size,
        addons: Vec::new(),
        folders: Vec::new(),
        database_included: true,
        homeassistant_included: true,
        homeassistant_version: query.homeassistant_version,
        extra_metadata: serde_json::Map::new(),
        protected: query.protected,
    };
    let backup_id = backup.backup_id.clone();
    let stream: ByteStream = Box::pin(body.into_data_stream().map(|chunk| {
        chunk.map_err(|err| BackupAgentError::with_source("failed to read upload body", err))
    }));
    tracing::debug!(agent_id = %query.agent_id, %backup_id, size, "receiving backup");
    state
        .hub
        .backups()
        .upload_to_agent(&query.agent_id, backup, stream)
        .await?;
    Ok(UploadResponse::Created(Json(UploadSummary { backup_id })))
}
