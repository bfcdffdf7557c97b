//! OwnTone JSON API client.
//!
//! Only the endpoints the media players use. Reads return typed documents;
//! commands return `()` and rely on the websocket to report the new state.

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::OwnToneError;

pub const DEFAULT_PORT: u16 = 3689;

/// User OwnTone expects with basic authentication.
const USERNAME: &str = "admin";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub websocket_port: Option<u16>,
    pub version: String,
    pub library_name: String,
}

impl ServerConfig {
    /// Port of the notification websocket, `None` when it is disabled.
    #[must_use]
    pub fn websocket_port(&self) -> Option<u16> {
        self.websocket_port.filter(|port| *port > 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Play,
    Pause,
    #[default]
    Stop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Player {
    pub state: PlayState,
    pub repeat: String,
    pub consume: bool,
    pub shuffle: bool,
    pub volume: u8,
    pub item_id: Option<u64>,
    pub item_length_ms: u64,
    pub item_progress_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueItem {
    pub id: u64,
    pub position: u32,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub length_ms: u64,
    pub data_kind: String,
    pub media_kind: String,
    pub uri: String,
    pub artwork_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Queue {
    pub version: u64,
    pub count: u32,
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Output {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub selected: bool,
    pub volume: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Playlist {
    pub id: u64,
    pub name: String,
    pub uri: String,
}

/// A library track backed by a named pipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Pipe {
    pub id: u64,
    pub title: String,
    pub uri: String,
}

#[derive(Deserialize)]
struct Outputs {
    outputs: Vec<Output>,
}

#[derive(Deserialize)]
struct Items<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct TrackSearch {
    tracks: Items<Pipe>,
}

/// How `queue/items/add` inserts new items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Empty the queue first.
    pub clear: bool,
    /// Start playing the first added item.
    pub play: bool,
    /// Insert at this queue position instead of appending.
    pub position: Option<u32>,
    /// Start playback from this queue position rather than the first added item.
    pub playback_from_position: Option<u32>,
}

impl AddOptions {
    /// Empty the queue and play what is added.
    #[must_use]
    pub fn replace() -> Self {
        Self {
            clear: true,
            play: true,
            ..Self::default()
        }
    }
}

/// Client for one OwnTone server.
#[derive(Debug, Clone)]
pub struct OwnToneClient {
    http: reqwest::Client,
    host: String,
    base_url: String,
    password: Option<String>,
}

impl OwnToneClient {
    #[must_use]
    pub fn new(http: reqwest::Client, host: &str, port: u16, password: Option<String>) -> Self {
        Self {
            http,
            host: host.to_string(),
            base_url: format!("http://{host}:{port}/api"),
            password: password.filter(|password| !password.is_empty()),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}/{path}", self.base_url));
        match &self.password {
            Some(password) => builder.basic_auth(USERNAME, Some(password)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<reqwest::Response, OwnToneError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            tracing::debug!(path, status = status.as_u16(), "owntone request rejected");
            Err(OwnToneError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            })
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, OwnToneError> {
        let response = self.send(self.request(Method::GET, path), path).await?;
        Ok(response.json().await?)
    }

    async fn put(&self, path: &str, query: &[(&str, String)]) -> Result<(), OwnToneError> {
        self.send(self.request(Method::PUT, path).query(query), path)
            .await
            .map(drop)
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn config(&self) -> Result<ServerConfig, OwnToneError> {
        self.get("config").await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn player(&self) -> Result<Player, OwnToneError> {
        self.get("player").await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn queue(&self) -> Result<Queue, OwnToneError> {
        self.get("queue").await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn outputs(&self) -> Result<Vec<Output>, OwnToneError> {
        Ok(self.get::<Outputs>("outputs").await?.outputs)
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn playlists(&self) -> Result<Vec<Playlist>, OwnToneError> {
        Ok(self.get::<Items<Playlist>>("library/playlists").await?.items)
    }

    /// Library tracks whose data kind is `pipe`.
    ///
    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn pipes(&self) -> Result<Vec<Pipe>, OwnToneError> {
        let path = "search";
        let builder = self
            .request(Method::GET, path)
            .query(&[("type", "tracks"), ("expression", "data_kind is pipe")]);
        let response = self.send(builder, path).await?;
        Ok(response.json::<TrackSearch>().await?.tracks.items)
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn play(&self) -> Result<(), OwnToneError> {
        self.put("player/play", &[]).await
    }

    /// Start playing the queue item at `position`.
    ///
    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn play_position(&self, position: u32) -> Result<(), OwnToneError> {
        self.put("player/play", &[("position", position.to_string())])
            .await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn pause(&self) -> Result<(), OwnToneError> {
        self.put("player/pause", &[]).await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn stop(&self) -> Result<(), OwnToneError> {
        self.put("player/stop", &[]).await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn next(&self) -> Result<(), OwnToneError> {
        self.put("player/next", &[]).await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn previous(&self) -> Result<(), OwnToneError> {
        self.put("player/previous", &[]).await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn seek(&self, position_ms: u64) -> Result<(), OwnToneError> {
        self.put("player/seek", &[("position_ms", position_ms.to_string())])
            .await
    }

    /// Master volume, or one output's volume when `output_id` is set.
    ///
    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn set_volume(&self, volume: u8, output_id: Option<&str>) -> Result<(), OwnToneError> {
        let mut query = vec![("volume", volume.min(100).to_string())];
        if let Some(output_id) = output_id {
            query.push(("output_id", output_id.to_string()));
        }
        self.put("player/volume", &query).await
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn shuffle(&self, shuffle: bool) -> Result<(), OwnToneError> {
        self.put("player/shuffle", &[("state", shuffle.to_string())])
            .await
    }

    /// Select exactly `output_ids`, deselecting every other output.
    ///
    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn set_enabled_outputs(&self, output_ids: &[String]) -> Result<(), OwnToneError> {
        let path = "outputs/set";
        let builder = self
            .request(Method::PUT, path)
            .json(&json!({ "outputs": output_ids }));
        self.send(builder, path).await.map(drop)
    }

    /// Change selection and/or volume of one output.
    ///
    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn change_output(
        &self,
        output_id: &str,
        selected: Option<bool>,
        volume: Option<u8>,
    ) -> Result<(), OwnToneError> {
        let path = format!("outputs/{}", urlencoding::encode(output_id));
        let mut body = serde_json::Map::new();
        if let Some(selected) = selected {
            body.insert("selected".into(), selected.into());
        }
        if let Some(volume) = volume {
            body.insert("volume".into(), volume.min(100).into());
        }
        let builder = self.request(Method::PUT, &path).json(&body);
        self.send(builder, &path).await.map(drop)
    }

    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn clear_queue(&self) -> Result<(), OwnToneError> {
        self.put("queue/clear", &[]).await
    }

    /// Add comma separated `uris` to the queue.
    ///
    /// # Errors
    ///
    /// Any transport or status error.
    pub async fn add_to_queue(&self, uris: &str, options: AddOptions) -> Result<(), OwnToneError> {
        let path = "queue/items/add";
        let mut query = vec![("uris", uris.to_string())];
        if options.clear {
            query.push(("clear", "true".to_string()));
        }
        if options.play {
            query.push(("playback", "start".to_string()));
        }
        if let Some(position) = options.position {
            query.push(("position", position.to_string()));
        }
        if let Some(position) = options.playback_from_position {
            query.push(("playback_from_position", position.to_string()));
        }
        let builder = self.request(Method::POST, path).query(&query);
        self.send(builder, path).await.map(drop)
    }
}
