//! Test doubles: an in-memory [`ObjectStore`] and a local fake B2 server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::{StreamExt, TryStreamExt};
use serde_json::{Value, json};

use plughub_app::ports::ByteStream;
use plughub_domain::backup::AgentBackup;

use crate::error::B2Error;
use crate::store::{FileInfo, ObjectStore};

pub fn backup(backup_id: &str) -> AgentBackup {
    AgentBackup {
        backup_id: backup_id.to_string(),
        name: "Nightly".to_string(),
        date: "2024-11-22T11:48:48.727189+01:00".to_string(),
        size: 4,
        addons: vec![],
        folders: vec![],
        database_included: true,
        homeassistant_included: true,
        homeassistant_version: Some("2024.12.0".to_string()),
        extra_metadata: serde_json::Map::new(),
        protected: false,
    }
}

fn api_error(status: u16, code: &str) -> B2Error {
    B2Error::Api {
        status,
        code: code.to_string(),
        message: code.to_string(),
    }
}

/// Bucket kept in a map. Failing uploads still leave the partial object.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    list_calls: AtomicUsize,
    uploads: AtomicUsize,
    fail_uploads_after: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn put(&self, name: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Let `count` uploads succeed, fail every later one.
    pub fn fail_uploads_after(&self, count: usize) {
        *self.fail_uploads_after.lock().unwrap() = Some(count);
    }

    fn info(name: &str, bytes: &[u8]) -> FileInfo {
        FileInfo {
            file_id: format!("id-{name}"),
            file_name: name.to_string(),
            content_length: bytes.len() as u64,
        }
    }
}

impl ObjectStore for MemoryStore {
    fn bucket_name(&self) -> &str {
        "my-bucket"
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<FileInfo>, B2Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, bytes)| Self::info(name, bytes))
            .collect())
    }

    async fn upload(
        &self,
        name: &str,
        _content_length: u64,
        body: ByteStream,
    ) -> Result<FileInfo, B2Error> {
        let index = self.uploads.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<bytes::Bytes> = body
            .try_collect()
            .await
            .map_err(|_| api_error(400, "bad_request"))?;
        let bytes = chunks.concat();
        let failing = self
            .fail_uploads_after
            .lock()
            .unwrap()
            .is_some_and(|after| index >= after);
        if failing {
            self.put(name, &bytes[..bytes.len() / 2]);
            return Err(api_error(503, "service_unavailable"));
        }
        self.put(name, &bytes);
        Ok(Self::info(name, &bytes))
    }

    async fn download(&self, name: &str) -> Result<ByteStream, B2Error> {
        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| api_error(404, "not_found"))?;
        Ok(futures::stream::once(async move { Ok(bytes::Bytes::from(bytes)) }).boxed())
    }

    async fn delete(&self, file: &FileInfo) -> Result<(), B2Error> {
        self.files
            .lock()
            .unwrap()
            .remove(&file.file_name)
            .map(|_| ())
            .ok_or_else(|| api_error(400, "file_not_present"))
    }
}

/// `keyid:secret`, base64 encoded.
const VALID_BASIC_AUTH: &str = "Basic a2V5aWQ6c2VjcmV0";
const PAGE_SIZE: usize = 2;

#[derive(Default)]
struct FakeState {
    base_url: Mutex<String>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    capabilities: Mutex<Vec<String>>,
    generation: AtomicUsize,
    authorize_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeState {
    fn token(&self) -> String {
        format!("token-{}", self.generation.load(Ordering::SeqCst))
    }

    fn check_token(&self, headers: &HeaderMap) -> Result<(), Response> {
        let given = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if given == Some(self.token().as_str()) {
            Ok(())
        } else {
            Err(error_response(StatusCode::UNAUTHORIZED, "expired_auth_token"))
        }
    }
}

fn error_response(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(json!({"status": status.as_u16(), "code": code, "message": code})),
    )
        .into_response()
}

fn file_json(name: &str, bytes: &[u8]) -> Value {
    json!({
        "fileId": format!("id-{name}"),
        "fileName": name,
        "contentLength": bytes.len(),
        "action": "upload",
    })
}

/// A B2 look-alike on `127.0.0.1` exposing one bucket, `my-bucket`.
pub struct FakeB2 {
    state: Arc<FakeState>,
}

impl FakeB2 {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        *state.capabilities.lock().unwrap() = ["listBuckets", "listFiles", "readFiles", "writeFiles", "deleteFiles"]
            .iter()
            .map(ToString::to_string)
            .collect();

        let app = Router::new()
            .route("/b2api/v2/b2_authorize_account", get(authorize))
            .route("/b2api/v2/b2_list_buckets", post(list_buckets))
            .route("/b2api/v2/b2_list_file_names", post(list_file_names))
            .route("/b2api/v2/b2_get_upload_url", post(get_upload_url))
            .route("/b2api/v2/b2_delete_file_version", post(delete_file_version))
            .route("/upload", post(upload))
            .route("/file/{bucket}/{*name}", get(download))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        *state.base_url.lock().unwrap() = format!("http://{addr}");
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { state }
    }

    pub fn url(&self) -> String {
        self.state.base_url.lock().unwrap().clone()
    }

    pub fn put(&self, name: &str, bytes: &[u8]) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.state.files.lock().unwrap().get(name).cloned()
    }

    pub fn set_capabilities(&self, capabilities: &[&str]) {
        *self.state.capabilities.lock().unwrap() =
            capabilities.iter().map(ToString::to_string).collect();
    }

    /// Invalidate every token handed out so far.
    pub fn expire_tokens(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn authorize_calls(&self) -> usize {
        self.state.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }
}

async fn authorize(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    let given = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if given != Some(VALID_BASIC_AUTH) {
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    state.authorize_calls.fetch_add(1, Ordering::SeqCst);
    let base_url = state.base_url.lock().unwrap().clone();
    let capabilities = state.capabilities.lock().unwrap().clone();
    Json(json!({
        "accountId": "account",
        "authorizationToken": state.token(),
        "apiUrl": base_url,
        "downloadUrl": base_url,
        "allowed": {"capabilities": capabilities, "bucketId": null, "bucketName": null, "namePrefix": null},
    }))
    .into_response()
}

async fn list_buckets(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = state.check_token(&headers) {
        return response;
    }
    let buckets: Vec<Value> = if body["bucketName"] == "my-bucket" {
        vec![json!({"bucketId": "bucket-1", "bucketName": "my-bucket"})]
    } else {
        vec![]
    };
    Json(json!({"buckets": buckets})).into_response()
}

async fn list_file_names(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = state.check_token(&headers) {
        return response;
    }
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    let prefix = body["prefix"].as_str().unwrap_or_default().to_string();
    let start = body["startFileName"].as_str().unwrap_or_default().to_string();
    let files = state.files.lock().unwrap();
    let mut matching = files
        .iter()
        .filter(|(name, _)| name.starts_with(&prefix) && name.as_str() >= start.as_str());
    let page: Vec<Value> = matching
        .by_ref()
        .take(PAGE_SIZE)
        .map(|(name, bytes)| file_json(name, bytes))
        .collect();
    let next = matching.next().map(|(name, _)| name.clone());
    Json(json!({"files": page, "nextFileName": next})).into_response()
}

async fn get_upload_url(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if let Err(response) = state.check_token(&headers) {
        return response;
    }
    let base_url = state.base_url.lock().unwrap().clone();
    Json(json!({
        "bucketId": "bucket-1",
        "uploadUrl": format!("{base_url}/upload"),
        "authorizationToken": "upload-token",
    }))
    .into_response()
}

async fn upload(State(state): State<Arc<FakeState>>, headers: HeaderMap, body: Bytes) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .is_some_and(|value| value == "upload-token");
    if !authorized {
        return error_response(StatusCode::UNAUTHORIZED, "bad_auth_token");
    }
    let Some(name) = headers
        .get("X-Bz-File-Name")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| urlencoding::decode(value).ok())
    else {
        return error_response(StatusCode::BAD_REQUEST, "bad_request");
    };
    let name = name.into_owned();
    state
        .files
        .lock()
        .unwrap()
        .insert(name.clone(), body.to_vec());
    Json(file_json(&name, &body)).into_response()
}

async fn download(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Path((_bucket, name)): Path<(String, String)>,
) -> Response {
    if let Err(response) = state.check_token(&headers) {
        return response;
    }
    match state.files.lock().unwrap().get(&name) {
        Some(bytes) => bytes.clone().into_response(),
        None => error_response(StatusCode::NOT_FOUND, "not_found"),
    }
}

async fn delete_file_version(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = state.check_token(&headers) {
        return response;
    }
    let name = body["fileName"].as_str().unwrap_or_default();
    match state.files.lock().unwrap().remove(name) {
        Some(_) => Json(json!({"fileName": name, "fileId": body["fileId"]})).into_response(),
        None => error_response(StatusCode::BAD_REQUEST, "file_not_present"),
    }
}

/// Entity context for an integration that publishes no entities.
#[derive(Clone, Default)]
pub struct NullContext;

impl plughub_app::ports::EntityContext for NullContext {
    fn entry_id(&self) -> plughub_domain::id::EntryId {
        plughub_domain::id::EntryId::default()
    }

    async fn upsert_entity(
        &self,
        entity: plughub_domain::entity::Entity,
    ) -> Result<plughub_domain::entity::Entity, plughub_domain::error::PlugHubError> {
        Ok(entity)
    }

    async fn remove_entity(&self, _unique_id: &str) -> Result<(), plughub_domain::error::PlugHubError> {
        Ok(())
    }

    async fn publish(
        &self,
        _event: plughub_domain::event::Event,
    ) -> Result<(), plughub_domain::error::PlugHubError> {
        Ok(())
    }
}
