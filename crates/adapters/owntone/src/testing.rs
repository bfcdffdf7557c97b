//! Test doubles: a fake OwnTone server and a recording entity context.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::http::HeaderValue;

use plughub_app::ports::EntityContext;
use plughub_domain::entity::Entity;
use plughub_domain::error::PlugHubError;
use plughub_domain::event::Event;
use plughub_domain::id::EntryId;

use crate::api::OwnToneClient;
use crate::state::{Options, Shared};

#[derive(Debug, Clone)]
enum WsCommand {
    Notify(Vec<String>),
    Close,
}

#[derive(Default)]
struct FakeState {
    documents: Mutex<HashMap<String, Value>>,
    /// Expected `Authorization` header.
    password: Mutex<Option<String>>,
    commands: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
    subscriptions: Mutex<Vec<Value>>,
    connections: Mutex<usize>,
    /// Paths accepted without any effect on the player.
    ignored: Mutex<Vec<String>>,
    ws: Mutex<Option<broadcast::Sender<WsCommand>>>,
}

impl FakeState {
    fn notify(&self, topics: &[&str]) {
        if let Some(ws) = self.ws.lock().unwrap().as_ref() {
            let _ = ws.send(WsCommand::Notify(
                topics.iter().map(ToString::to_string).collect(),
            ));
        }
    }

    fn update(&self, path: &str, f: impl FnOnce(&mut Value)) {
        let mut documents = self.documents.lock().unwrap();
        if let Some(document) = documents.get_mut(path) {
            f(document);
        }
    }

    /// Apply the player side effects of a command, like the real server.
    fn react(&self, method: &Method, path: &str, query: &str) {
        if self.ignored.lock().unwrap().iter().any(|ignored| ignored == path) {
            return;
        }
        if path == "queue/items/add" && query.contains("clear=true") {
            self.replace_queue(query);
        }
        let state = match (method.as_str(), path) {
            ("PUT", "player/play") => Some("play"),
            ("PUT", "player/pause") => Some("pause"),
            ("PUT", "player/stop") => Some("stop"),
            ("POST", "queue/items/add") if query.contains("playback=start") => Some("play"),
            _ => None,
        };
        if let Some(state) = state {
            self.update("player", |player| {
                player["state"] = json!(state);
                if path == "queue/items/add" {
                    player["item_length_ms"] = json!(0);
                }
            });
            self.notify(&["player"]);
        }
    }
}

impl FakeState {
    /// Make the queue hold exactly the `uris` of an add command.
    fn replace_queue(&self, query: &str) {
        let uris = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("uris="))
            .map(|uris| urlencoding::decode(uris).map(|uris| uris.into_owned()).unwrap_or_default())
            .unwrap_or_default();
        let items: Vec<Value> = uris
            .split(',')
            .enumerate()
            .map(|(position, uri)| {
                json!({"id": 100 + position, "position": position, "uri": uri, "data_kind": "url", "length_ms": 0})
            })
            .collect();
        self.update("queue", |queue| {
            queue["count"] = json!(items.len());
            queue["items"] = json!(items);
        });
    }
}

async fn handle(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let expected = state.password.lock().unwrap().clone();
    if let Some(expected) = expected {
        let given = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if given != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let path = uri.path().trim_start_matches("/api/").to_string();
    if method == Method::GET {
        let document = state.documents.lock().unwrap().get(&path).cloned();
        return match document {
            Some(document) => axum::Json(document).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let query = uri.query().unwrap_or_default().to_string();
    let line = match uri.query() {
        Some(query) => format!("{method} {}?{query}", uri.path()),
        None => format!("{method} {}", uri.path()),
    };
    state.commands.lock().unwrap().push(line);
    if !body.is_empty()
        && let Ok(value) = serde_json::from_slice(&body)
    {
        state.bodies.lock().unwrap().push(value);
    }
    state.react(&method, &path, &query);
    StatusCode::NO_CONTENT.into_response()
}

async fn serve_websocket(stream: tokio::net::TcpStream, state: Arc<FakeState>) {
    let callback = |_request: &Request, mut response: WsResponse| {
        response
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("notify"));
        Ok::<_, ErrorResponse>(response)
    };
    let Ok(socket) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let Some(commands) = state
        .ws
        .lock()
        .unwrap()
        .as_ref()
        .map(broadcast::Sender::subscribe)
    else {
        return;
    };
    *state.connections.lock().unwrap() += 1;
    let (mut write, mut read) = socket.split();
    if let Some(Ok(Message::Text(text))) = read.next().await
        && let Ok(value) = serde_json::from_str(text.as_str())
    {
        state.subscriptions.lock().unwrap().push(value);
    }

    let mut commands = commands;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(WsCommand::Notify(topics)) => {
                    let text = json!({ "notify": topics }).to_string();
                    if write.send(Message::text(text)).await.is_err() {
                        return;
                    }
                }
                Ok(WsCommand::Close) | Err(_) => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            message = read.next() => if message.is_none() {
                return;
            },
        }
    }
}

/// OwnTone look-alike: JSON API on one port, notification websocket on another.
pub struct FakeOwnTone {
    state: Arc<FakeState>,
    port: u16,
    websocket_port: u16,
}

impl FakeOwnTone {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let (ws, _) = broadcast::channel(64);
        *state.ws.lock().unwrap() = Some(ws);

        let ws_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let websocket_port = ws_listener.local_addr().unwrap().port();
        let ws_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = ws_listener.accept().await {
                tokio::spawn(serve_websocket(stream, Arc::clone(&ws_state)));
            }
        });

        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fake = Self {
            state,
            port,
            websocket_port,
        };
        fake.set("config", json!({"websocket_port": websocket_port, "version": "28.9", "library_name": "My Music"}));
        fake.set(
            "player",
            json!({"state": "pause", "volume": 50, "item_id": 2, "item_length_ms": 180_000, "item_progress_ms": 1000}),
        );
        fake.set(
            "queue",
            json!({"version": 1, "count": 2, "items": [
                {"id": 1, "position": 0, "title": "One", "artist": "Artist", "album": "First", "uri": "library:track:1", "data_kind": "file", "length_ms": 1000},
                {"id": 2, "position": 1, "title": "Two", "artist": "Artist", "album": "Second", "uri": "library:track:2", "data_kind": "file", "length_ms": 180_000},
            ]}),
        );
        fake.set(
            "outputs",
            json!({"outputs": [
                {"id": "o1", "name": "Kitchen", "type": "AirPlay", "selected": true, "volume": 50},
                {"id": "o2", "name": "Living Room", "type": "Chromecast", "selected": false, "volume": 30},
            ]}),
        );
        fake.set(
            "library/playlists",
            json!({"items": [{"id": 1, "name": "Chill", "uri": "library:playlist:1"}]}),
        );
        fake.set(
            "search",
            json!({"tracks": {"items": [{"id": 7, "title": "librespot-java", "uri": "library:track:7"}]}}),
        );
        fake
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn websocket_port(&self) -> u16 {
        self.websocket_port
    }

    /// Reject requests without this `Authorization` header.
    pub fn require_authorization(&self, authorization: &str) {
        *self.state.password.lock().unwrap() = Some(authorization.to_string());
    }

    /// Accept commands to `/api/{path}` without reacting to them.
    pub fn ignore(&self, path: &str) {
        self.state.ignored.lock().unwrap().push(path.to_string());
    }

    /// Replace the document served at `/api/{path}`.
    pub fn set(&self, path: &str, document: Value) {
        self.state
            .documents
            .lock()
            .unwrap()
            .insert(path.to_string(), document);
    }

    pub fn update(&self, path: &str, f: impl FnOnce(&mut Value)) {
        self.state.update(path, f);
    }

    /// Push a notification to every connected websocket.
    pub fn notify(&self, topics: &[&str]) {
        self.state.notify(topics);
    }

    /// Close every websocket connection.
    pub fn drop_connections(&self) {
        if let Some(ws) = self.state.ws.lock().unwrap().as_ref() {
            let _ = ws.send(WsCommand::Close);
        }
    }

    /// `METHOD /path?query` of every non-GET request.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.state.bodies.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<Value> {
        self.state.subscriptions.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        *self.state.connections.lock().unwrap()
    }
}

/// Entity context keeping the last version of each entity.
#[derive(Clone)]
pub struct RecordingContext {
    entry_id: EntryId,
    entities: Arc<Mutex<BTreeMap<String, Entity>>>,
}

impl RecordingContext {
    pub fn new(entry_id: EntryId) -> Self {
        Self {
            entry_id,
            entities: Arc::default(),
        }
    }

    pub fn entity(&self, unique_id: &str) -> Option<Entity> {
        self.entities.lock().unwrap().get(unique_id).cloned()
    }

    pub fn unique_ids(&self) -> Vec<String> {
        self.entities.lock().unwrap().keys().cloned().collect()
    }
}

impl EntityContext for RecordingContext {
    fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<Entity, PlugHubError> {
        self.entities
            .lock()
            .unwrap()
            .insert(entity.unique_id.clone(), entity.clone());
        Ok(entity)
    }

    async fn remove_entity(&self, unique_id: &str) -> Result<(), PlugHubError> {
        self.entities.lock().unwrap().remove(unique_id);
        Ok(())
    }

    async fn publish(&self, _event: Event) -> Result<(), PlugHubError> {
        Ok(())
    }
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Client for `fake` and a connected snapshot loaded from it.
pub async fn loaded(fake: &FakeOwnTone) -> (OwnToneClient, Arc<Shared>) {
    let client = OwnToneClient::new(reqwest::Client::new(), "127.0.0.1", fake.port(), None);
    let shared = Arc::new(Shared::new(Options {
        tts_pause_time: Duration::from_millis(5),
        ..Options::default()
    }));
    let queue = client.queue().await.unwrap();
    let outputs = client.outputs().await.unwrap();
    let pipes = client.pipes().await.unwrap();
    let playlists = client.playlists().await.unwrap();
    {
        let mut snapshot = shared.snapshot();
        snapshot.queue = queue;
        snapshot.outputs = outputs;
        snapshot.pipes = pipes;
        snapshot.playlists = playlists;
        snapshot.available = true;
    }
    shared.set_player(client.player().await.unwrap());
    (client, shared)
}
