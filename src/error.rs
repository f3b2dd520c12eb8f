use std::error::Error;
use std::fmt::Display;

use actix_web::{HttpResponseBuilder, ResponseError, http::StatusCode};
use serde_json::json;

#[derive(Debug)]
pub enum EdgeError {
    AuthorizationDenied,
    InvalidBody(String),
    NotFound(String),
    PairingRejected(String),
    FrameProcessing(String),
    SnapshotUnavailable(String),
    PersistenceError(String),
    JsonParseError(String),
    Internal(String),
}

impl EdgeError {
    pub fn camera_unavailable(entity_id: &str) -> EdgeError {
        EdgeError::SnapshotUnavailable(entity_id.to_string())
    }
}

impl Error for EdgeError {}

impl Display for EdgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeError::AuthorizationDenied => write!(f, "Not allowed to access"),
            EdgeError::InvalidBody(msg) => write!(f, "{msg}"),
            EdgeError::NotFound(what) => write!(f, "{what} not found"),
            EdgeError::PairingRejected(msg) => write!(f, "{msg}"),
            EdgeError::FrameProcessing(msg) => write!(f, "Could not process frame: {msg}"),
            EdgeError::SnapshotUnavailable(entity_id) => {
                write!(f, "No snapshot available for {entity_id}")
            }
            EdgeError::PersistenceError(msg) => write!(f, "{msg}"),
            EdgeError::JsonParseError(msg) => write!(f, "{msg}"),
            EdgeError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl ResponseError for EdgeError {
    fn status_code(&self) -> StatusCode {
        match self {
            EdgeError::AuthorizationDenied => StatusCode::UNAUTHORIZED,
            EdgeError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            EdgeError::NotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::PairingRejected(_) => StatusCode::BAD_REQUEST,
            EdgeError::FrameProcessing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EdgeError::SnapshotUnavailable(_) => StatusCode::BAD_GATEWAY,
            EdgeError::PersistenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EdgeError::JsonParseError(_) => StatusCode::BAD_REQUEST,
            EdgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse<actix_web::body::BoxBody> {
        HttpResponseBuilder::new(self.status_code()).json(json!({ "message": self.to_string() }))
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(value: serde_json::Error) -> Self {
        EdgeError::JsonParseError(value.to_string())
    }
}

/// Turns actix's JSON extractor failures into the same 400 shape the
/// handlers produce. Wire with `JsonConfig::error_handler`.
pub fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    EdgeError::InvalidBody(format!("Invalid JSON body: {err}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_body_maps_to_bad_request() {
        let err = EdgeError::InvalidBody("watch_id is required".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "watch_id is required");
    }

    #[test]
    fn auth_denied_maps_to_unauthorized() {
        assert_eq!(
            EdgeError::AuthorizationDenied.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
