//! Service call handler.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};

use plughub_app::ports::{ConfigEntryRepository, EntityRepository, EventPublisher};
use plughub_domain::config_entry::EntryData;
use plughub_domain::entity::Entity;
use plughub_domain::error::ValidationError;
use plughub_domain::service::ServiceCall;

use crate::error::ApiError;
use crate::state::AppState;

/// Possible responses from the call endpoint.
pub enum CallResponse {
    /// The target entity as stored after the call.
    Ok(Json<Entity>),
}

impl IntoResponse for CallResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Split `{"entity_id": ..., <data>}` into a [`ServiceCall`].
fn service_call(service: String, mut body: EntryData) -> Result<ServiceCall, ValidationError> {
    let entity_id = match body.remove("entity_id") {
        Some(serde_json::Value::String(entity_id)) if !entity_id.is_empty() => entity_id,
        Some(_) => return Err(ValidationError::invalid_field("entity_id", "expected a string")),
        None => return Err(ValidationError::MissingField("entity_id".into())),
    };
    Ok(ServiceCall::new(entity_id, service).with_data(serde_json::Value::Object(body)))
}

/// `POST /api/services/{service}`: call `service` on the entity named by
/// `entity_id` in the body; the remaining fields are the service data.
pub async fn call<CR, ER, EP>(
    State(state): State<AppState<CR, ER, EP>>,
    Path(service): Path<String>,
    Json(body): Json<EntryData>,
) -> Result<CallResponse, ApiError>
where
    CR: ConfigEntryRepository + Send + Sync + 'static,
    ER: EntityRepository + Send + Sync + 'static,
    EP: EventPublisher + Send + Sync + 'static,
{
    let call = service_call(service, body)?;
    let entity_id = call.entity_id.clone();
    state.hub.call_service(call).await?;
    let entity = state.hub.get_entity(&entity_id).await?;
    Ok(CallResponse::Ok(Json(entity)))
}
