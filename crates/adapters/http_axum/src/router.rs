//! Axum router assembly.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use plughub_app::ports::{ConfigEntryRepository, EntityRepository, EventPublisher};

use crate::state::AppState;

/// Build the top-level axum [`Router`].
///
/// Nests the JSON API under `/api` next to a plain `/health` probe.
/// Includes a [`TraceLayer`] that logs each HTTP request/response at the
/// `DEBUG` level using the `tracing` ecosystem.
pub fn build<CR, ER, EP>(state: AppState<CR, ER, EP>) -> Router
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", crate::api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use crate::testing::TestApp;
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn should_return_ok_when_health_check_called() {
        let app = TestApp::start().await;

        let (status, body) = app.raw(Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn should_return_not_found_when_route_unknown() {
        let app = TestApp::start().await;

        let (status, _) = app.raw(Method::GET, "/api/automations", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
