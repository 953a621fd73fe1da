use axum::Json;
use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{Span, info, instrument};

use crate::error::{AppError, ErrorBody};
use crate::extractors::multipart::AppMultipart;
use crate::models::file::{AuditReport, FileListQuery, FileRecord};
use crate::service::{FileError, Resource};
use crate::state::AppState;
use crate::utils::filename::validate_flat_filename;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Request body limit for uploads of at most `max_blob_size` bytes.
///
/// Slightly larger than the blob limit so that an oversized file is caught
/// by the blob store and reported as 413 with a clear message.
pub fn upload_body_limit(max_blob_size: u64) -> DefaultBodyLimit {
    let limit = max_blob_size.saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::Validation(format!("Multipart error: {}", e.body_text()))
    }
}

#[utoipa::path(
    post,
    path = "/files",
    tag = "Files",
    operation_id = "uploadFile",
    summary = "Upload a file",
    description = "Stores the `file` multipart field under a new id and records its metadata. \
        Other fields are ignored. Uploading the same filename twice yields two independent files.",
    request_body(content_type = "multipart/form-data", description = "File upload"),
    responses(
        (status = 200, description = "File stored", body = FileRecord),
        (status = 400, description = "Malformed upload (VALIDATION_ERROR)", body = ErrorBody),
        (status = 413, description = "File too large (PAYLOAD_TOO_LARGE)", body = ErrorBody),
        (status = 500, description = "Store failure (STORAGE_ERROR, METADATA_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart), fields(id))]
pub async fn upload_file(
    State(state): State<AppState>,
    AppMultipart(mut multipart): AppMultipart,
) -> Result<Json<FileRecord>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .ok_or_else(|| AppError::Validation("File field must have a filename".into()))?;
        let filename = validate_flat_filename(filename)
            .map_err(|e| AppError::Validation(e.message().into()))?
            .to_string();

        // Field errors stay recoverable as the io::Error source, see `AppError::from`.
        let reader = StreamReader::new(field.map_err(std::io::Error::other));
        tokio::pin!(reader);

        let record = state.files.upload(&filename, &mut reader).await?;
        Span::current().record("id", tracing::field::display(record.id));
        info!(name = %record.name, size = record.size, "File uploaded");

        return Ok(Json(record));
    }

    Err(AppError::Validation("Missing 'file' field".into()))
}

#[utoipa::path(
    get,
    path = "/files",
    tag = "Files",
    operation_id = "listFiles",
    summary = "List files",
    description = "Returns every file record, optionally filtered by exact name and ordered by creation time.",
    params(FileListQuery),
    responses(
        (status = 200, description = "File records", body = Vec<FileRecord>),
        (status = 400, description = "Invalid query (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "Listing unavailable (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, query))]
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let filter = query.into_filter()?;

    let records = state.files.list(&filter).await.map_err(|e| match e {
        FileError::Index(err) => {
            tracing::error!(error = %err, "Listing files failed");
            AppError::NotFound {
                message: "No file records available".into(),
                resource: Some(Resource::Metadata),
            }
        }
        other => other.into(),
    })?;

    Ok(Json(records))
}

#[utoipa::path(
    get,
    path = "/files/{id}",
    tag = "Files",
    operation_id = "getFile",
    summary = "Get file metadata",
    params(("id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "File record", body = FileRecord),
        (status = 404, description = "Invalid id or file not found (NOT_FOUND)", body = ErrorBody),
        (status = 500, description = "Index failure (METADATA_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(state.files.get(&id).await?))
}

#[utoipa::path(
    get,
    path = "/files/{id}/download",
    tag = "Files",
    operation_id = "downloadFile",
    summary = "Download file content",
    description = "Streams the stored bytes as an attachment. The content type is sniffed from the \
        first 512 bytes.",
    params(("id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 404, description = "Invalid id or file not found (NOT_FOUND)", body = ErrorBody),
        (status = 500, description = "Blob missing or unreadable (BLOB_MISSING, STORAGE_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let download = state.files.download(&id).await?;
    let body = Body::from_stream(ReaderStream::new(download.body));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.content_type)
        .header(header::CONTENT_LENGTH, download.size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_value(&download.record.name),
        )
        .header("Content-Description", "File Transfer")
        .header("Content-Transfer-Encoding", "binary")
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

#[utoipa::path(
    delete,
    path = "/files/{id}",
    tag = "Files",
    operation_id = "deleteFile",
    summary = "Delete a file",
    description = "Removes the stored bytes, then the record. Returns the deleted record.",
    params(("id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "File deleted", body = FileRecord),
        (status = 404, description = "Invalid id or file not found (NOT_FOUND)", body = ErrorBody),
        (status = 500, description = "Store failure (STORAGE_ERROR, METADATA_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileRecord>, AppError> {
    let record = state.files.delete(&id).await?;
    info!(name = %record.name, "File deleted");
    Ok(Json(record))
}

#[utoipa::path(
    get,
    path = "/audit",
    tag = "Files",
    operation_id = "auditFiles",
    summary = "Check volume and index consistency",
    description = "Lists blob directories without a record (orphans) and records without a blob \
        (dangling). Read-only. The volume and the index are not read as one snapshot, so an \
        upload or delete in flight may briefly show up as a divergence.",
    responses(
        (status = 200, description = "Audit report", body = AuditReport),
        (status = 500, description = "Store failure (STORAGE_ERROR, METADATA_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn audit(State(state): State<AppState>) -> Result<Json<AuditReport>, AppError> {
    Ok(Json(state.files.audit().await?))
}

/// Build a safe `Content-Disposition` header value.
fn content_disposition_value(filename: &str) -> String {
    let ascii_safe: String = filename
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && !matches!(c, '"' | ';' | '\\'))
        .collect();
    let ascii_name = if ascii_safe.trim().is_empty() {
        "download".to_string()
    } else {
        ascii_safe
    };

    // RFC 5987 percent-encoding for filename*.
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => String::from(b as char),
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("attachment; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
}
