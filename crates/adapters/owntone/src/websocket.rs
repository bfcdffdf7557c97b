//! Notification websocket (`notify` subprotocol) with a fixed reconnect delay.

use std::collections::BTreeSet;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::error::OwnToneError;
use crate::updater::{Signal, Topic};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);

const SUBPROTOCOL: &str = "notify";

#[derive(Deserialize)]
struct Notification {
    notify: BTreeSet<Topic>,
}

/// Topics of a `{"notify": [...]}` message, `None` for anything else.
#[must_use]
pub fn parse_notification(text: &str) -> Option<BTreeSet<Topic>> {
    serde_json::from_str::<Notification>(text)
        .ok()
        .map(|notification| notification.notify)
        .filter(|topics| !topics.is_empty())
}

/// Forwards websocket notifications to the updater, reconnecting forever.
pub struct NotificationListener {
    url: String,
    signals: mpsc::Sender<Signal>,
    reconnect_delay: Duration,
}

impl NotificationListener {
    pub fn start(
        host: &str,
        port: u16,
        signals: mpsc::Sender<Signal>,
        reconnect_delay: Duration,
    ) -> JoinHandle<()> {
        let listener = Self {
            url: format!("ws://{host}:{port}/"),
            signals,
            reconnect_delay,
        };
        tokio::spawn(listener.run())
    }

    async fn run(self) {
        loop {
            match self.listen().await {
                Ok(()) => tracing::info!(url = %self.url, "OwnTone websocket closed"),
                Err(err) => tracing::warn!(url = %self.url, error = %err, "OwnTone websocket failed"),
            }
            if self.signals.send(Signal::Disconnected).await.is_err() {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn listen(&self) -> Result<(), OwnToneError> {
        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = socket.split();

        let topics: Vec<&str> = Topic::SUBSCRIBED.iter().map(|topic| topic.as_str()).collect();
        let subscribe = serde_json::json!({ "notify": topics }).to_string();
        write.send(Message::text(subscribe)).await?;
        tracing::debug!(url = %self.url, "subscribed to OwnTone notifications");
        if self.signals.send(Signal::Connected).await.is_err() {
            return Ok(());
        }

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => {
                    let Some(topics) = parse_notification(text.as_str()) else {
                        tracing::debug!(message = %text.as_str(), "ignoring OwnTone message");
                        continue;
                    };
                    if self.signals.send(Signal::Changed(topics)).await.is_err() {
                        return Ok(());
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeOwnTone, eventually};
    use serde_json::json;

    async fn next(rx: &mut mpsc::Receiver<Signal>) -> Signal {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn should_parse_notify_message() {
        let topics = parse_notification(r#"{"notify": ["player", "volume"]}"#).unwrap();
        assert_eq!(topics, [Topic::Player, Topic::Volume].into_iter().collect());
        assert_eq!(parse_notification(r#"{"notify": []}"#), None);
        assert_eq!(parse_notification("not json"), None);
    }

    #[tokio::test]
    async fn should_subscribe_and_forward_notifications() {
        let fake = FakeOwnTone::start().await;
        let (tx, mut rx) = mpsc::channel(16);
        let handle = NotificationListener::start("127.0.0.1", fake.websocket_port(), tx, RECONNECT_DELAY);

        assert_eq!(next(&mut rx).await, Signal::Connected);
        eventually(|| !fake.subscriptions().is_empty()).await;
        fake.notify(&["queue", "player"]);

        assert_eq!(
            next(&mut rx).await,
            Signal::Changed([Topic::Queue, Topic::Player].into_iter().collect())
        );
        assert_eq!(
            fake.subscriptions(),
            vec![json!({"notify": ["player", "outputs", "volume", "options", "queue", "database"]})]
        );
        handle.abort();
    }

    #[tokio::test]
    async fn should_report_disconnect_and_reconnect() {
        let fake = FakeOwnTone::start().await;
        let (tx, mut rx) = mpsc::channel(16);
        let handle = NotificationListener::start(
            "127.0.0.1",
            fake.websocket_port(),
            tx,
            Duration::from_millis(20),
        );
        assert_eq!(next(&mut rx).await, Signal::Connected);
        eventually(|| fake.connections() == 1).await;

        fake.drop_connections();

        assert_eq!(next(&mut rx).await, Signal::Disconnected);
        assert_eq!(next(&mut rx).await, Signal::Connected);
        eventually(|| fake.connections() == 2).await;
        handle.abort();
    }

    #[tokio::test]
    async fn should_signal_disconnected_when_server_unreachable() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = NotificationListener::start("127.0.0.1", 9, tx, RECONNECT_DELAY);

        assert_eq!(next(&mut rx).await, Signal::Disconnected);
        handle.abort();
    }
}
