//! # plughub-adapter-tonewinner
//!
//! Tonewinner amplifiers speak a line protocol over RS-232, usually bridged
//! to TCP. Commands and reports are framed as `#...*`.
//!
//! ## Config flow
//!
//! | field | meaning |
//! |-------|---------|
//! | `host` | serial bridge host |
//! | `port` | serial bridge TCP port |
//!
//! Validation connects and waits for the answer to `POWER ?`.
//! Unique id: `"{host}:{port}"`.

mod codec;
mod connection;
mod device;
mod error;
mod protocol;
mod state;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use plughub_app::ports::{EntityContext, Integration, ValidatedEntry};
use plughub_domain::config_entry::{ConfigEntry, EntryData};
use plughub_domain::entity::Entity;
use plughub_domain::error::{PlugHubError, SetupError, ValidationError};
use plughub_domain::flow::{FlowError, FlowErrorCode};
use plughub_domain::service::ServiceCall;

pub use codec::{FrameCodec, MAX_FRAME_LEN};
pub use connection::{Connector, PROBE_TIMEOUT, TcpConnector, probe};
pub use device::RECONNECT_DELAY;
pub use error::TonewinnerError;
pub use protocol::{Command, MAX_VOLUME, Response};

use crate::device::{Device, SharedState};
use crate::state::{PlayerInfo, volume_from_level};

pub const DOMAIN: &str = "tonewinner";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bridge {
    host: String,
    port: u16,
}

impl Bridge {
    fn from_input(input: &EntryData) -> Result<Self, FlowError> {
        let host = input
            .get("host")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or(FlowError::field("host", FlowErrorCode::Unknown))?;
        let port = input
            .get("port")
            .and_then(serde_json::Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port > 0)
            .ok_or(FlowError::field("port", FlowErrorCode::Unknown))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    fn from_entry(entry: &ConfigEntry) -> Result<Self, SetupError> {
        let fatal = |err: ValidationError| SetupError::Fatal(err.to_string());
        Ok(Self {
            host: entry.data_field("host").map_err(fatal)?,
            port: entry.data_field("port").map_err(fatal)?,
        })
    }

    fn unique_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.host.as_str(), self.port)
    }
}

fn flow_error(err: &TonewinnerError) -> FlowError {
    let code = match err {
        TonewinnerError::Timeout => FlowErrorCode::Timeout,
        TonewinnerError::Io(_) | TonewinnerError::Closed => FlowErrorCode::CannotConnect,
        TonewinnerError::NotConnected => FlowErrorCode::Unknown,
    };
    FlowError::base(code)
}

/// Live state of a loaded entry.
pub struct TonewinnerRuntime {
    state: Arc<SharedState>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl TonewinnerRuntime {
    async fn send(&self, command: Command) -> Result<(), TonewinnerError> {
        if !self.state.lock().connected {
            return Err(TonewinnerError::NotConnected);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| TonewinnerError::NotConnected)
    }
}

/// The Tonewinner integration.
pub struct TonewinnerIntegration {
    timeout: Duration,
    reconnect_delay: Duration,
}

impl Default for TonewinnerIntegration {
    fn default() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

impl TonewinnerIntegration {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

fn source_param(call: &ServiceCall) -> Result<String, ValidationError> {
    let source: String = call.param("source")?;
    let source = source.trim();
    if source.is_empty() || source.contains(['#', '*', '\n', '\r']) {
        return Err(ValidationError::invalid_field("source", "not a valid input name"));
    }
    Ok(source.to_string())
}

impl Integration for TonewinnerIntegration {
    type Runtime = TonewinnerRuntime;

    fn domain(&self) -> &'static str {
        DOMAIN
    }

    #[tracing::instrument(skip_all, fields(domain = DOMAIN))]
    async fn validate_input(&self, input: &EntryData) -> Result<ValidatedEntry, FlowError> {
        let bridge = Bridge::from_input(input)?;
        probe(&bridge.connector(), self.timeout).await.map_err(|err| {
            tracing::warn!(host = %bridge.host, port = bridge.port, error = %err, "amplifier probe failed");
            flow_error(&err)
        })?;

        let mut data = EntryData::new();
        data.insert("host".into(), bridge.host.clone().into());
        data.insert("port".into(), bridge.port.into());
        Ok(ValidatedEntry {
            title: format!("Tonewinner {}", bridge.host),
            unique_id: Some(bridge.unique_id()),
            data,
        })
    }

    #[tracing::instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn setup_entry<C>(&self, entry: &ConfigEntry, ctx: C) -> Result<TonewinnerRuntime, SetupError>
    where
        C: EntityContext + Clone + 'static,
    {
        let bridge = Bridge::from_entry(entry)?;
        let connector = bridge.connector();
        let (connection, _) = probe(&connector, self.timeout)
            .await
            .map_err(|err| SetupError::NotReady(err.to_string()))?;

        let info = PlayerInfo {
            entry_id: entry.entry_id,
            unique_id: entry.unique_id.clone().unwrap_or_else(|| bridge.unique_id()),
            name: entry.title.clone(),
        };
        let state = Arc::new(SharedState::default());
        let (commands, receiver) = mpsc::channel(16);
        let task = Device::new(connector, ctx, info, Arc::clone(&state), receiver)
            .with_reconnect_delay(self.reconnect_delay)
            .start(Some(connection));
        Ok(TonewinnerRuntime {
            state,
            commands,
            task,
        })
    }

    async fn unload_entry(&self, runtime: Arc<TonewinnerRuntime>) -> Result<(), PlugHubError> {
        runtime.task.abort();
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(entity_id = %entity.entity_id, service = %call.service))]
    async fn handle_service_call(
        &self,
        runtime: &TonewinnerRuntime,
        entity: &Entity,
        call: &ServiceCall,
    ) -> Result<(), PlugHubError> {
        let (power, volume) = {
            let state = runtime.state.lock();
            (state.power, state.volume)
        };
        let command = match call.service.as_str() {
            "turn_on" => Command::Power(Some(true)),
            "turn_off" => Command::Power(Some(false)),
            "toggle" => Command::Power(Some(power != Some(true))),
            "volume_set" => Command::Volume(Some(volume_from_level(call.param("volume_level")?))),
            "volume_up" => Command::Volume(Some(volume.unwrap_or_default().saturating_add(1).min(MAX_VOLUME))),
            "volume_down" => Command::Volume(Some(volume.unwrap_or_default().saturating_sub(1))),
            "volume_mute" => Command::Mute(Some(call.param("is_volume_muted")?)),
            "select_source" => Command::Source(Some(source_param(call)?)),
            _ => return Err(call.unsupported().into()),
        };
        runtime.send(command).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingContext, TcpAmp, eventually};
    use plughub_domain::entity::EntityState;
    use serde_json::json;

    fn input(port: u16) -> EntryData {
        json!({"host": "127.0.0.1", "port": port})
            .as_object()
            .cloned()
            .unwrap()
    }

    async fn loaded(amp: &TcpAmp) -> (ConfigEntry, RecordingContext, TonewinnerRuntime) {
        let entry = ConfigEntry::builder()
            .domain(DOMAIN)
            .title("Living room amp")
            .unique_id(format!("127.0.0.1:{}", amp.port()))
            .data(input(amp.port()))
            .build()
            .unwrap();
        let ctx = RecordingContext::new(entry.entry_id);
        let runtime = TonewinnerIntegration::default()
            .setup_entry(&entry, ctx.clone())
            .await
            .unwrap();
        let unique_id = entry.unique_id.clone().unwrap();
        eventually(|| ctx.entity(&unique_id).is_some_and(|entity| entity.state == EntityState::On)).await;
        (entry, ctx, runtime)
    }

    #[tokio::test]
    async fn should_validate_bridge_and_build_unique_id() {
        let amp = TcpAmp::start(false).await;

        let validated = TonewinnerIntegration::default()
            .validate_input(&input(amp.port()))
            .await
            .unwrap();

        assert_eq!(validated.unique_id, Some(format!("127.0.0.1:{}", amp.port())));
        assert_eq!(validated.title, "Tonewinner 127.0.0.1");
        assert_eq!(amp.commands(), vec!["POWER ?"]);
    }

    #[tokio::test]
    async fn should_report_timeout_when_amplifier_silent() {
        let amp = TcpAmp::start(true).await;

        let err = TonewinnerIntegration::default()
            .with_timeout(Duration::from_millis(100))
            .validate_input(&input(amp.port()))
            .await
            .unwrap_err();

        assert_eq!(err, FlowError::base(FlowErrorCode::Timeout));
    }

    #[tokio::test]
    async fn should_report_cannot_connect_when_bridge_unreachable() {
        let err = TonewinnerIntegration::default()
            .validate_input(&input(9))
            .await
            .unwrap_err();

        assert_eq!(err, FlowError::base(FlowErrorCode::CannotConnect));
    }

    #[tokio::test]
    async fn should_require_port() {
        let err = TonewinnerIntegration::default()
            .validate_input(&json!({"host": "amp.local"}).as_object().cloned().unwrap())
            .await
            .unwrap_err();

        assert_eq!(err, FlowError::field("port", FlowErrorCode::Unknown));
    }

    #[tokio::test]
    async fn should_retry_setup_when_bridge_unreachable() {
        let entry = ConfigEntry::builder()
            .domain(DOMAIN)
            .title("amp")
            .data(input(9))
            .build()
            .unwrap();

        let result = TonewinnerIntegration::default()
            .setup_entry(&entry, RecordingContext::new(entry.entry_id))
            .await;

        assert!(matches!(result, Err(SetupError::NotReady(_))));
    }

    #[tokio::test]
    async fn should_publish_media_player_after_setup() {
        let amp = TcpAmp::start(false).await;

        let (entry, ctx, runtime) = loaded(&amp).await;

        let unique_id = entry.unique_id.clone().unwrap();
        eventually(|| {
            ctx.entity(&unique_id)
                .is_some_and(|entity| entity.get_attribute("source").is_some())
        })
        .await;
        let player = ctx.entity(&unique_id).unwrap();
        assert_eq!(player.entity_id, "media_player.living_room_amp");
        assert_eq!(
            player.get_attribute("volume_level"),
            Some(&plughub_domain::entity::AttributeValue::from(0.5))
        );
        runtime.task.abort();
    }

    #[tokio::test]
    async fn should_send_scaled_volume_and_source() {
        let amp = TcpAmp::start(false).await;
        let (entry, ctx, runtime) = loaded(&amp).await;
        let player = ctx.entity(&entry.unique_id.clone().unwrap()).unwrap();
        let integration = TonewinnerIntegration::default();

        integration
            .handle_service_call(
                &runtime,
                &player,
                &ServiceCall::new(&player.entity_id, "volume_set").with_data(json!({"volume_level": 0.75})),
            )
            .await
            .unwrap();
        integration
            .handle_service_call(
                &runtime,
                &player,
                &ServiceCall::new(&player.entity_id, "select_source").with_data(json!({"source": "HDMI2"})),
            )
            .await
            .unwrap();

        eventually(|| amp.commands().contains(&"SI HDMI2".to_string())).await;
        assert!(amp.commands().contains(&"VOL 60".to_string()));
        runtime.task.abort();
    }

    #[tokio::test]
    async fn should_reject_source_breaking_framing() {
        let amp = TcpAmp::start(false).await;
        let (entry, ctx, runtime) = loaded(&amp).await;
        let player = ctx.entity(&entry.unique_id.clone().unwrap()).unwrap();

        let err = TonewinnerIntegration::default()
            .handle_service_call(
                &runtime,
                &player,
                &ServiceCall::new(&player.entity_id, "select_source").with_data(json!({"source": "HDMI*#POWER OFF"})),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PlugHubError::Validation(_)));
        runtime.task.abort();
    }

    #[tokio::test]
    async fn should_refuse_commands_while_disconnected() {
        let (commands, _receiver) = mpsc::channel(1);
        let runtime = TonewinnerRuntime {
            state: Arc::new(SharedState::default()),
            commands,
            task: tokio::spawn(async {}),
        };

        let err = runtime.send(Command::Power(Some(true))).await.unwrap_err();

        assert!(matches!(err, TonewinnerError::NotConnected));
    }
}
