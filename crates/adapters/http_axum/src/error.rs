//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use plughub_domain::error::{PlugHubError, ValidationError};

/// JSON error body returned by API endpoints.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps [`PlugHubError`] to an HTTP response with appropriate status code.
#[derive(Debug)]
pub struct ApiError(PlugHubError);

impl From<PlugHubError> for ApiError {
    fn from(err: PlugHubError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PlugHubError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            PlugHubError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string()),
            PlugHubError::Setup(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            PlugHubError::Integration(err) => {
                tracing::warn!(error = %err, "integration error");
                (StatusCode::BAD_GATEWAY, format!("integration error: {err}"))
            }
            PlugHubError::Storage(err) => {
                tracing::error!(error = %err, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plughub_domain::error::{NotFoundError, SetupError};

    fn status(err: PlugHubError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn should_map_each_error_kind_to_its_status() {
        assert_eq!(
            status(ValidationError::MissingField("host".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(
                NotFoundError {
                    entity: "ConfigEntry",
                    id: "x".into()
                }
                .into()
            ),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(SetupError::NotReady("offline".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(PlugHubError::integration(std::io::Error::other("refused"))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(PlugHubError::Storage(Box::new(std::io::Error::other("disk")))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
