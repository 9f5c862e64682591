//! HTTP mapping of authorization failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use latchkey_core::Error;
use serde_json::json;
use tracing::error;

/// Response mapping for [`Error`]: denials are 401 with the message on the
/// wire, store failures are 503, wiring faults are 500 with detail kept to
/// the log.
#[derive(Debug)]
pub struct AuthFailure(pub Error);

impl From<Error> for AuthFailure {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::NotAuthorized
            | Error::GrantNotPermitted(_)
            | Error::UnauthenticatedPrincipal
            | Error::MalformedIdentity(_) => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            Error::StoreUnavailable(detail) => {
                error!(%detail, "role store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Authorization store unavailable".to_string(),
                )
            }
            Error::Configuration(detail) => {
                error!(%detail, "authorization misconfiguration");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Error::Operation(err) => {
                error!(error = %err, "guarded operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
