//! Server-Sent Events (SSE) stream for real-time updates.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use plughub_app::ports::{ConfigEntryRepository, EntityRepository, EventPublisher};

use crate::state::AppState;

/// `GET /api/events/stream`: SSE stream of domain events.
///
/// Each event is sent as a JSON `data:` frame named after its type. The
/// stream runs until the client disconnects.
pub async fn stream<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let events = BroadcastStream::new(state.event_bus.subscribe()).filter_map(|result| match result {
        Ok(event) => match Event::default().event(event.event_type.as_str()).json_data(&event) {
            Ok(frame) => Some(Ok(frame)),
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize event for SSE stream");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "SSE subscriber lagged, some events were dropped");
            None
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
