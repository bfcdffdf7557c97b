//! Shared application state for axum handlers.

use std::sync::Arc;

use plughub_app::event_bus::InProcessEventBus;
use plughub_app::ports::{ConfigEntryRepository, EntityRepository, EventPublisher};
use plughub_app::services::hub::Hub;

/// Application state shared across all axum handlers.
///
/// Generic over the repositories and the event publisher to avoid dynamic
/// dispatch. `Clone` is implemented manually so the underlying types do not
/// need to be `Clone`; only the `Arc` wrappers are cloned.
pub struct AppState<CR, ER, EP> {
    /// Routes every request to the integration that owns it.
    pub hub: Arc<Hub<CR, ER, EP>>,
    /// Source of the server-sent event stream.
    pub event_bus: Arc<InProcessEventBus>,
}

impl<CR, ER, EP> Clone for AppState<CR, ER, EP> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            event_bus: Arc::clone(&self.event_bus),
        }
    }
}

impl<CR, ER, EP> AppState<CR, ER, EP>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    /// Create the state from a hub shared with the daemon's lifecycle code.
    pub fn new(hub: Arc<Hub<CR, ER, EP>>, event_bus: Arc<InProcessEventBus>) -> Self {
        Self { hub, event_bus }
    }
}
