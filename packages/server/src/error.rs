use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::service::{FileError, Resource};

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `NOT_FOUND`,
    /// `PAYLOAD_TOO_LARGE`, `BLOB_MISSING`, `STORAGE_ERROR`, `METADATA_ERROR`,
    /// `INTERNAL_ERROR`.
    #[schema(example = "NOT_FOUND")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "File 67e55044-10b1-426f-9247-bb680e5fe0c8 not found")]
    pub message: String,
    /// Backing store that failed: `filesystem` or `metadata`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "metadata")]
    pub resource: Option<&'static str>,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound {
        message: String,
        resource: Option<Resource>,
    },
    PayloadTooLarge(String),
    /// A record exists but its blob is gone.
    BlobMissing(String),
    Storage(String),
    Metadata(String),
    Internal(String),
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound {
            message: message.into(),
            resource: None,
        }
    }

    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                    resource: None,
                },
            ),
            AppError::NotFound { message, resource } => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message,
                    resource: resource.map(|r| r.as_str()),
                },
            ),
            AppError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorBody {
                    code: "PAYLOAD_TOO_LARGE",
                    message: msg,
                    resource: None,
                },
            ),
            AppError::BlobMissing(msg) => {
                tracing::error!("Blob missing: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "BLOB_MISSING",
                        message: msg,
                        resource: Some(Resource::Filesystem.as_str()),
                    },
                )
            }
            AppError::Storage(detail) => {
                tracing::error!("Storage error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "STORAGE_ERROR",
                        message: "File storage failed".into(),
                        resource: Some(Resource::Filesystem.as_str()),
                    },
                )
            }
            AppError::Metadata(detail) => {
                tracing::error!("Metadata error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "METADATA_ERROR",
                        message: "Metadata index failed".into(),
                        resource: Some(Resource::Metadata.as_str()),
                    },
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                        resource: None,
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::InvalidId(detail) => {
                tracing::debug!("Rejected file id: {detail}");
                AppError::not_found("File not found")
            }
            FileError::InvalidUpload(msg) => AppError::Validation(msg),
            FileError::NotFound(id) => AppError::NotFound {
                message: format!("File {id} not found"),
                resource: Some(Resource::Metadata),
            },
            FileError::BlobMissing(id) => {
                AppError::BlobMissing(format!("Content of file {id} is missing"))
            }
            FileError::TooLarge { limit, .. } => {
                AppError::PayloadTooLarge(format!("File exceeds maximum size of {limit} bytes"))
            }
            FileError::UploadStream(e) => upload_stream_error(e),
            FileError::Storage(e) => AppError::Storage(e.to_string()),
            FileError::Index(e) => AppError::Metadata(e.to_string()),
        }
    }
}

/// A client-side read failure. Multipart errors arrive wrapped in the `io::Error`.
fn upload_stream_error(err: std::io::Error) -> AppError {
    let too_large = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<MultipartError>())
        .is_some_and(|e| e.status() == StatusCode::PAYLOAD_TOO_LARGE);

    if too_large {
        AppError::PayloadTooLarge("Request body exceeds the upload limit".into())
    } else {
        AppError::Validation(format!("Upload body could not be read: {err}"))
    }
}
