//! 领域错误与 HTTP 边界错误类型。

use axum::Json;
use axum::extract::rejection::{
    FormRejection, JsonRejection, PathRejection, QueryRejection,
};
use axum::extract::multipart::MultipartRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::io;
use thiserror::Error;

/// Failures raised by the staging, merge, and shared-directory components.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("chunk {index} is missing")]
    MissingChunk { index: u64 },
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    /// Extractor rejection; keeps axum's status (400, 413, 415, ...).
    Rejected(StatusCode, String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Rejected(status, _) => *status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Internal(msg)
            | ApiError::Rejected(_, msg) => msg,
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

impl From<ShareError> for ApiError {
    fn from(error: ShareError) -> Self {
        match error {
            ShareError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ShareError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            err @ ShareError::MissingChunk { .. } => ApiError::Internal(err.to_string()),
            ShareError::Io(err) => match err.kind() {
                io::ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

macro_rules! impl_from_rejection {
    ($($rejection:ty),* $(,)?) => {
        $(
            impl From<$rejection> for ApiError {
                fn from(rejection: $rejection) -> Self {
                    ApiError::Rejected(rejection.status(), rejection.body_text())
                }
            }
        )*
    };
}

impl_from_rejection!(
    JsonRejection,
    FormRejection,
    QueryRejection,
    PathRejection,
    MultipartRejection,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_chunk_maps_to_internal_error() {
        let api: ApiError = ShareError::MissingChunk { index: 2 }.into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(api, ApiError::Internal(msg) if msg == "chunk 2 is missing"));
    }

    #[test]
    fn invalid_input_maps_to_bad_request() {
        let api: ApiError = ShareError::InvalidInput("uploadId is invalid".into()).into();
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let api: ApiError = ShareError::Io(err).into();
        assert_eq!(api.status(), StatusCode::NOT_FOUND);
    }
}
