//! # plughub-adapter-owntone
//!
//! OwnTone (formerly forked-daapd) media server.
//!
//! Each entry exposes a master media player for the server and one zone
//! per output. State is pushed: the server's `notify` websocket tells which
//! documents changed, the updater refetches them and republishes the
//! entities. Service calls only send commands and wait for the push.
//!
//! ## Config flow
//!
//! | field | meaning |
//! |-------|---------|
//! | `host` | server host name or address |
//! | `port` | API port, defaults to 3689 |
//! | `password` | optional, sent as basic auth for user `admin` |
//!
//! ## Options
//!
//! `tts_pause_time` (seconds), `tts_volume` (0..=1), `max_playlists` and
//! `librespot_java_port` (enables pipe transport control).

mod announce;
mod api;
mod error;
mod master;
mod media_content;
mod pipe;
mod state;
mod updater;
mod websocket;
mod zone;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use plughub_app::ports::{EntityContext, Integration, ValidatedEntry};
use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::Entity;
use plughub_domain::error::{PlugHubError, SetupError};
use plughub_domain::flow::{FlowError, FlowErrorCode};
use plughub_domain::id::EntryId;
use plughub_domain::service::ServiceCall;

pub use api::{DEFAULT_PORT, OwnToneClient};
pub use error::OwnToneError;
pub use media_content::{MediaContent, is_owntone_content_id};
pub use state::Options;

use crate::master::Master;
use crate::pipe::LibrespotJava;
use crate::state::Shared;
use crate::updater::{Signal, Updater};
use crate::websocket::{NotificationListener, RECONNECT_DELAY};
use crate::zone::Zone;

pub const DOMAIN: &str = "owntone";

const WEBSOCKET_NOT_ENABLED: FlowErrorCode = FlowErrorCode::Custom("websocket_not_enabled");

/// Connection parameters of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Connection {
    host: String,
    port: u16,
    password: Option<String>,
}

impl Connection {
    fn from_input(input: &EntryData) -> Result<Self, FlowError> {
        let host = input
            .get("host")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or(FlowError::field("host", FlowErrorCode::Unknown))?;
        let port = match input.get("port") {
            None | Some(serde_json::Value::Null) => DEFAULT_PORT,
            Some(port) => port
                .as_u64()
                .and_then(|port| u16::try_from(port).ok())
                .filter(|port| *port > 0)
                .ok_or(FlowError::field("port", FlowErrorCode::Unknown))?,
        };
        let password = input
            .get("password")
            .and_then(serde_json::Value::as_str)
            .filter(|password| !password.is_empty())
            .map(ToString::to_string);
        Ok(Self {
            host: host.to_string(),
            port,
            password,
        })
    }

    fn from_entry(entry: &ConfigEntry) -> Result<Self, SetupError> {
        let fatal = |err: plughub_domain::error::ValidationError| SetupError::Fatal(err.to_string());
        Ok(Self {
            host: entry.data_field("host").map_err(fatal)?,
            port: entry
                .data_field_opt("port")
                .map_err(fatal)?
                .unwrap_or(DEFAULT_PORT),
            password: entry.data_field_opt("password").map_err(fatal)?,
        })
    }

    fn into_data(self) -> EntryData {
        let mut data = EntryData::new();
        data.insert("host".into(), self.host.into());
        data.insert("port".into(), self.port.into());
        if let Some(password) = self.password {
            data.insert("password".into(), password.into());
        }
        data
    }
}

fn flow_error(err: &OwnToneError) -> FlowError {
    let code = match err {
        err if err.is_unauthorized() => FlowErrorCode::InvalidAuth,
        OwnToneError::Http(err) if err.is_timeout() => FlowErrorCode::Timeout,
        OwnToneError::Http(_) => FlowErrorCode::CannotConnect,
        OwnToneError::WebSocketDisabled => WEBSOCKET_NOT_ENABLED,
        OwnToneError::Status { .. } | OwnToneError::WebSocket(_) => FlowErrorCode::Unknown,
    };
    FlowError::base(code)
}

fn setup_error(err: OwnToneError) -> SetupError {
    if err.is_unauthorized() {
        SetupError::AuthFailed(err.to_string())
    } else {
        SetupError::NotReady(err.to_string())
    }
}

/// Live state of a loaded entry.
pub struct OwnToneRuntime {
    entry_id: EntryId,
    client: OwnToneClient,
    shared: Arc<Shared>,
    signals: mpsc::Sender<Signal>,
    tasks: Vec<JoinHandle<()>>,
}

impl OwnToneRuntime {
    fn pipe(&self, http: &reqwest::Client) -> Option<LibrespotJava> {
        let port = self.shared.options().librespot_java_port?;
        Some(LibrespotJava::new(http.clone(), self.client.host(), port))
    }
}

/// The OwnTone integration.
pub struct OwnToneIntegration {
    http: reqwest::Client,
    reconnect_delay: Duration,
}

impl Default for OwnToneIntegration {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl OwnToneIntegration {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Delay between two websocket connection attempts.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn client(&self, connection: &Connection) -> OwnToneClient {
        OwnToneClient::new(
            self.http.clone(),
            &connection.host,
            connection.port,
            connection.password.clone(),
        )
    }
}

impl Integration for OwnToneIntegration {
    type Runtime = OwnToneRuntime;

    fn domain(&self) -> &'static str {
        DOMAIN
    }

    #[tracing::instrument(skip_all, fields(domain = DOMAIN))]
    async fn validate_input(&self, input: &EntryData) -> Result<ValidatedEntry, FlowError> {
        let connection = Connection::from_input(input)?;
        let config = self.client(&connection).config().await.map_err(|err| {
            tracing::warn!(host = %connection.host, error = %err, "OwnTone config request failed");
            flow_error(&err)
        })?;
        if config.websocket_port().is_none() {
            tracing::warn!(host = %connection.host, "OwnTone websocket is disabled");
            return Err(flow_error(&OwnToneError::WebSocketDisabled));
        }

        let title = if config.library_name.is_empty() {
            connection.host.clone()
        } else {
            config.library_name.clone()
        };
        Ok(ValidatedEntry {
            title,
            unique_id: Some(connection.host.clone()),
            data: connection.into_data(),
        })
    }

    #[tracing::instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn setup_entry<C>(&self, entry: &ConfigEntry, ctx: C) -> Result<OwnToneRuntime, SetupError>
    where
        C: EntityContext + Clone + 'static,
    {
        let connection = Connection::from_entry(entry)?;
        let options = Options::from_entry(entry).map_err(|err| SetupError::Fatal(err.to_string()))?;
        let client = self.client(&connection);
        let config = client.config().await.map_err(setup_error)?;
        let websocket_port = config
            .websocket_port()
            .ok_or_else(|| setup_error(OwnToneError::WebSocketDisabled))?;
        tracing::info!(host = %connection.host, version = %config.version, "OwnTone server reachable");

        let shared = Arc::new(Shared::new(options));
        let (signals, receiver) = mpsc::channel(16);
        let tasks = vec![
            Updater::start(client.clone(), Arc::clone(&shared), ctx, receiver),
            NotificationListener::start(
                &connection.host,
                websocket_port,
                signals.clone(),
                self.reconnect_delay,
            ),
        ];
        Ok(OwnToneRuntime {
            entry_id: entry.entry_id,
            client,
            shared,
            signals,
            tasks,
        })
    }

    async fn unload_entry(&self, runtime: Arc<OwnToneRuntime>) -> Result<(), PlugHubError> {
        for task in &runtime.tasks {
            task.abort();
        }
        tracing::debug!(entry_id = %runtime.entry_id, "OwnTone tasks stopped");
        Ok(())
    }

    async fn handle_service_call(
        &self,
        runtime: &OwnToneRuntime,
        entity: &Entity,
        call: &ServiceCall,
    ) -> Result<(), PlugHubError> {
        let master_id = runtime.entry_id.to_string();
        if entity.unique_id == master_id {
            let master = Master {
                client: &runtime.client,
                shared: &runtime.shared,
                pipe: runtime.pipe(&self.http),
            };
            return master.handle(call).await;
        }
        match entity
            .unique_id
            .strip_prefix(&master_id)
            .and_then(|rest| rest.strip_prefix('-'))
        {
            Some(output_id) => {
                Zone {
                    client: &runtime.client,
                    shared: &runtime.shared,
                    output_id,
                }
                .handle(call)
                .await
            }
            None => Err(call.unsupported().into()),
        }
    }

    async fn options_updated(&self, runtime: &OwnToneRuntime, entry: &ConfigEntry) {
        match Options::from_entry(entry) {
            Ok(options) => {
                runtime.shared.set_options(options);
                if runtime.signals.send(Signal::Republish).await.is_err() {
                    tracing::debug!("OwnTone updater already stopped");
                }
            }
            Err(err) => tracing::warn!(error = %err, "ignoring invalid OwnTone options"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeOwnTone, RecordingContext, eventually};
    use plughub_domain::entity::{AttributeValue, EntityState};
    use serde_json::json;

    fn input(fake: &FakeOwnTone) -> EntryData {
        json!({"host": "127.0.0.1", "port": fake.port()})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn entry(data: EntryData) -> ConfigEntry {
        ConfigEntry::builder()
            .domain(DOMAIN)
            .title("My Music")
            .data(data)
            .build()
            .unwrap()
    }

    async fn loaded(fake: &FakeOwnTone) -> (ConfigEntry, RecordingContext, Arc<OwnToneRuntime>) {
        let entry = entry(input(fake));
        let ctx = RecordingContext::new(entry.entry_id);
        let runtime = OwnToneIntegration::default()
            .setup_entry(&entry, ctx.clone())
            .await
            .unwrap();
        let master = entry.entry_id.to_string();
        eventually(|| ctx.entity(&master).is_some_and(|entity| entity.state == EntityState::Paused)).await;
        (entry, ctx, Arc::new(runtime))
    }

    #[tokio::test]
    async fn should_validate_server_and_use_library_name() {
        let fake = FakeOwnTone::start().await;

        let validated = OwnToneIntegration::default()
            .validate_input(&input(&fake))
            .await
            .unwrap();

        assert_eq!(validated.title, "My Music");
        assert_eq!(validated.unique_id.as_deref(), Some("127.0.0.1"));
        assert_eq!(validated.data.get("port"), Some(&json!(fake.port())));
    }

    #[tokio::test]
    async fn should_report_invalid_auth_when_password_rejected() {
        let fake = FakeOwnTone::start().await;
        fake.require_authorization("Basic YWRtaW46cHc=");

        let err = OwnToneIntegration::default()
            .validate_input(&input(&fake))
            .await
            .unwrap_err();

        assert_eq!(err, FlowError::base(FlowErrorCode::InvalidAuth));
    }

    #[tokio::test]
    async fn should_require_websocket_notifications() {
        let fake = FakeOwnTone::start().await;
        fake.set("config", json!({"websocket_port": 0, "library_name": "My Music"}));

        let err = OwnToneIntegration::default()
            .validate_input(&input(&fake))
            .await
            .unwrap_err();

        assert_eq!(err, FlowError::base(WEBSOCKET_NOT_ENABLED));
    }

    #[tokio::test]
    async fn should_report_cannot_connect_when_unreachable() {
        let data = json!({"host": "127.0.0.1", "port": 9}).as_object().cloned().unwrap();

        let err = OwnToneIntegration::default()
            .validate_input(&data)
            .await
            .unwrap_err();

        assert_eq!(err, FlowError::base(FlowErrorCode::CannotConnect));
    }

    #[tokio::test]
    async fn should_reject_missing_host() {
        let err = OwnToneIntegration::default()
            .validate_input(&EntryData::new())
            .await
            .unwrap_err();

        assert_eq!(err, FlowError::field("host", FlowErrorCode::Unknown));
    }

    #[tokio::test]
    async fn should_retry_setup_when_websocket_disabled() {
        let fake = FakeOwnTone::start().await;
        fake.set("config", json!({"websocket_port": 0}));
        let entry = entry(input(&fake));

        let result = OwnToneIntegration::default()
            .setup_entry(&entry, RecordingContext::new(entry.entry_id))
            .await;

        assert!(matches!(result, Err(SetupError::NotReady(_))));
    }

    #[tokio::test]
    async fn should_fail_setup_with_auth_error_when_password_rejected() {
        let fake = FakeOwnTone::start().await;
        fake.require_authorization("Basic YWRtaW46cHc=");
        let entry = entry(input(&fake));

        let result = OwnToneIntegration::default()
            .setup_entry(&entry, RecordingContext::new(entry.entry_id))
            .await;

        assert!(matches!(result, Err(SetupError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn should_publish_master_and_zones_after_setup() {
        let fake = FakeOwnTone::start().await;

        let (entry, ctx, _runtime) = loaded(&fake).await;

        eventually(|| ctx.unique_ids().len() == 3).await;
        let zone = ctx.entity(&format!("{}-o1", entry.entry_id)).unwrap();
        assert_eq!(zone.entity_id, "media_player.kitchen");
        assert_eq!(zone.state, EntityState::On);
    }

    #[tokio::test]
    async fn should_follow_pushed_player_changes() {
        let fake = FakeOwnTone::start().await;
        let (entry, ctx, _runtime) = loaded(&fake).await;

        fake.update("player", |player| player["state"] = json!("play"));
        fake.notify(&["player"]);

        let master = entry.entry_id.to_string();
        eventually(|| ctx.entity(&master).is_some_and(|entity| entity.state == EntityState::Playing)).await;
    }

    #[tokio::test]
    async fn should_route_calls_to_master_and_zone() {
        let fake = FakeOwnTone::start().await;
        let (entry, ctx, runtime) = loaded(&fake).await;
        eventually(|| ctx.unique_ids().len() == 3).await;
        let integration = OwnToneIntegration::default();
        let master = ctx.entity(&entry.entry_id.to_string()).unwrap();
        let zone = ctx.entity(&format!("{}-o1", entry.entry_id)).unwrap();

        integration
            .handle_service_call(&runtime, &master, &ServiceCall::new(&master.entity_id, "media_play"))
            .await
            .unwrap();
        integration
            .handle_service_call(
                &runtime,
                &zone,
                &ServiceCall::new(&zone.entity_id, "volume_set").with_data(json!({"volume_level": 0.1})),
            )
            .await
            .unwrap();

        assert_eq!(
            fake.commands(),
            vec!["PUT /api/player/play", "PUT /api/player/volume?volume=10&output_id=o1"]
        );
    }

    #[tokio::test]
    async fn should_republish_source_list_when_options_change() {
        let fake = FakeOwnTone::start().await;
        let (entry, ctx, runtime) = loaded(&fake).await;
        let mut updated = entry.clone();
        updated.options = json!({"max_playlists": 0}).as_object().cloned().unwrap();

        OwnToneIntegration::default()
            .options_updated(&runtime, &updated)
            .await;

        let master = entry.entry_id.to_string();
        let expected = AttributeValue::from(vec![
            "Clear queue".to_string(),
            "Default (no pipe)".to_string(),
            "librespot-java (pipe)".to_string(),
        ]);
        eventually(|| {
            ctx.entity(&master)
                .is_some_and(|entity| entity.get_attribute("source_list") == Some(&expected))
        })
        .await;
    }

    #[tokio::test]
    async fn should_stop_tasks_on_unload() {
        let fake = FakeOwnTone::start().await;
        let (_entry, _ctx, runtime) = loaded(&fake).await;

        OwnToneIntegration::default()
            .unload_entry(Arc::clone(&runtime))
            .await
            .unwrap();

        eventually(|| runtime.tasks.iter().all(JoinHandle::is_finished)).await;
    }
}
