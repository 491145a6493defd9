//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;

/// Errors that end a request before or outside script reconciliation
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Instance not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    /// Unexpected store failure; `context` is the user-facing message.
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: vboxdash_common::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Adapter for `map_err` on store calls.
    pub fn store(context: &'static str) -> impl FnOnce(vboxdash_common::Error) -> Self {
        move |source| Self::Store { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Store { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Store { context, source } => {
                error!("{}: {}", context, source);
                json!({ "error": context, "details": source.to_string() })
            }
            Self::Internal(message) => {
                error!("{}", message);
                json!({ "error": message })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
