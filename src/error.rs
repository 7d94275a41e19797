//! Application error types
//!
//! Each subsystem owns its error enum; `AppError` gathers them at the HTTP
//! edge and maps them onto status codes.

use crate::doc_processor::DocumentError;
use crate::llm::LlmError;
use crate::rag::RagError;
use crate::vector_store::VectorStoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Missing or invalid configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Chat not found: {0}")]
    ChatNotFound(i64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),
}

impl From<RagError> for AppError {
    fn from(error: RagError) -> Self {
        match error {
            RagError::Document(e) => AppError::Document(e),
            RagError::Llm(e) => AppError::Llm(e),
            RagError::VectorStore(e) => AppError::VectorStore(e),
        }
    }
}

/// JSON error payload returned to HTTP clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

fn upstream_status(status: u16) -> (StatusCode, &'static str) {
    match status {
        429 => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        401 | 403 => (StatusCode::BAD_GATEWAY, "UPSTREAM_AUTH"),
        408 | 504 => (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT"),
        _ => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
    }
}

fn transport_status(error: &reqwest::Error) -> (StatusCode, &'static str) {
    if error.is_timeout() {
        (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT")
    } else {
        (StatusCode::BAD_GATEWAY, "UPSTREAM_UNREACHABLE")
    }
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR"),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            AppError::Llm(e) => match e {
                LlmError::Http(inner) => transport_status(inner),
                LlmError::Api { status, .. } => upstream_status(*status),
                LlmError::Parse(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
                LlmError::Dimension { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            },
            AppError::VectorStore(e) => match e {
                VectorStoreError::Http(inner) => transport_status(inner),
                VectorStoreError::Api { status, .. } => upstream_status(*status),
                VectorStoreError::IndexNotFound(_) | VectorStoreError::DimensionMismatch { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR")
                }
                VectorStoreError::NotReady(_) => (StatusCode::SERVICE_UNAVAILABLE, "INDEX_NOT_READY"),
                VectorStoreError::Parse(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            },
            AppError::Document(e) => match e {
                DocumentError::UnsupportedFileType(_) => {
                    (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_FILE_TYPE")
                }
                DocumentError::Empty(_) => (StatusCode::BAD_REQUEST, "EMPTY_DOCUMENT"),
                DocumentError::Parse(_) => (StatusCode::UNPROCESSABLE_ENTITY, "PARSE_ERROR"),
                DocumentError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            },
            AppError::ChatNotFound(_) => (StatusCode::NOT_FOUND, "CHAT_NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            log::error!("{} ({}): {}", status.as_u16(), code, self);
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            log::warn!("upstream rate limit: {}", self);
        }
        let body = ErrorEnvelope {
            error: ErrorBody {
                code,
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_lists_every_variable() {
        let err = ConfigError::Missing(vec!["GROQ_API_KEY".into(), "PINECONE_API_KEY".into()]);
        assert_eq!(
            err.to_string(),
            "missing required environment variables: GROQ_API_KEY, PINECONE_API_KEY"
        );
    }

    #[test]
    fn test_upstream_rate_limit_is_passed_through() {
        let err = AppError::Llm(LlmError::Api {
            status: 429,
            message: "slow down".into(),
        });
        assert_eq!(err.status_and_code(), (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"));
    }

    #[test]
    fn test_upstream_auth_failure_is_bad_gateway() {
        let err = AppError::VectorStore(VectorStoreError::Api {
            status: 401,
            message: "invalid api key".into(),
        });
        assert_eq!(err.status_and_code(), (StatusCode::BAD_GATEWAY, "UPSTREAM_AUTH"));
    }

    #[test]
    fn test_dimension_mismatch_is_configuration() {
        let err = AppError::VectorStore(VectorStoreError::DimensionMismatch {
            expected: 1536,
            actual: 768,
        });
        assert_eq!(err.status_and_code().1, "CONFIG_ERROR");
    }

    #[test]
    fn test_user_input_errors_are_client_errors() {
        let unsupported = AppError::Document(DocumentError::UnsupportedFileType("exe".into()));
        assert_eq!(unsupported.status_and_code().0, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let too_large = AppError::PayloadTooLarge("big.pdf".into());
        assert_eq!(too_large.status_and_code().0, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AppError::ChatNotFound(7).status_and_code().0, StatusCode::NOT_FOUND);
    }
}
