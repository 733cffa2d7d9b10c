use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failure taxonomy for per-camera operations.
///
/// `Remote` and `LocalIo` are surfaced to the caller as error payloads with
/// a 200 status: they are expected operational outcomes, not transport
/// faults. Only `Internal` reaches the generic 500 path.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("not found")]
    NotFound,

    #[error("not implemented")]
    Unsupported,

    #[error("{message} ({peer})")]
    Remote { peer: String, message: String },

    #[error("{0}")]
    LocalIo(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OpError {
    pub fn remote(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            peer: peer.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for OpError {
    fn into_response(self) -> Response {
        match self {
            OpError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not found" })),
            )
                .into_response(),
            OpError::Unsupported => (
                StatusCode::NOT_IMPLEMENTED,
                Json(json!({ "error": "not implemented" })),
            )
                .into_response(),
            OpError::Remote { .. } | OpError::LocalIo(_) => {
                let message = self.to_string();
                (StatusCode::OK, Json(json!({ "error": message }))).into_response()
            }
            OpError::MalformedInput(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("malformed input: {}", message) })),
            )
                .into_response(),
            OpError::Internal(err) => {
                error!(error = %format!("{:#}", err), "unexpected failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn remote_errors_are_data_not_faults() {
        let err = OpError::remote("peer.lan:8765/camera/1", "connection refused");
        assert_eq!(
            err.to_string(),
            "connection refused (peer.lan:8765/camera/1)"
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn unsupported_is_distinct_from_not_found() {
        assert_eq!(
            OpError::Unsupported.into_response().status(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            OpError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
