//! Sequencing of blob and metadata operations.
//!
//! Both stores are touched in a fixed order and never inside a shared
//! transaction. Upload writes the blob before inserting the record. Delete
//! removes the blob before deleting the record. A failure between the two
//! steps leaves one of two known divergences:
//!
//! * orphaned blob: blob directory present, no record (failed insert)
//! * dangling record: record present, blob gone (failed record delete)
//!
//! Both are logged where they happen and reported by [`FileService::audit`].

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use common::storage::{BlobId, BlobStore, BoxReader, StorageError, sniff_content_type};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use crate::index::{IndexError, MetadataIndex};
use crate::models::file::{AuditReport, FileRecord, ListFilter};

/// Which backing store a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Filesystem,
    Metadata,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Filesystem => "filesystem",
            Resource::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("invalid file id: {0}")]
    InvalidId(String),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("file not found: {0}")]
    NotFound(BlobId),

    /// The record exists but its blob does not.
    #[error("blob missing for file {0}")]
    BlobMissing(BlobId),

    #[error("upload exceeds maximum size of {limit} bytes")]
    TooLarge { actual: u64, limit: u64 },

    /// The uploaded content could not be read to the end.
    #[error("upload stream failed: {0}")]
    UploadStream(#[source] std::io::Error),

    #[error("filesystem failure: {0}")]
    Storage(#[source] StorageError),

    #[error("metadata failure: {0}")]
    Index(#[source] IndexError),
}

impl FileError {
    /// The store that failed, if the failure came from one.
    pub fn resource(&self) -> Option<Resource> {
        match self {
            FileError::InvalidId(_)
            | FileError::InvalidUpload(_)
            | FileError::TooLarge { .. }
            | FileError::UploadStream(_) => None,
            FileError::NotFound(_) | FileError::Index(_) => Some(Resource::Metadata),
            FileError::BlobMissing(_) | FileError::Storage(_) => Some(Resource::Filesystem),
        }
    }
}

impl From<IndexError> for FileError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound(id) => FileError::NotFound(id),
            other => FileError::Index(other),
        }
    }
}

/// Map a blob write failure. Name, size and unreadable content are the uploader's fault.
fn put_error(err: StorageError) -> FileError {
    match err {
        StorageError::InvalidName(msg) => FileError::InvalidUpload(msg),
        StorageError::SizeLimitExceeded { actual, limit } => FileError::TooLarge { actual, limit },
        StorageError::Source(e) => FileError::UploadStream(e),
        other => FileError::Storage(other),
    }
}

/// A blob ready to stream back to a client.
pub struct Download {
    pub record: FileRecord,
    /// Sniffed from the first bytes of the blob.
    pub content_type: String,
    /// Exact on-disk length.
    pub size: u64,
    pub body: BoxReader,
}

/// Upload, read and delete files across the blob store and metadata index.
pub struct FileService {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn MetadataIndex>,
    compensate_orphans: bool,
}

impl FileService {
    pub fn new(blobs: Arc<dyn BlobStore>, index: Arc<dyn MetadataIndex>) -> Self {
        Self {
            blobs,
            index,
            compensate_orphans: true,
        }
    }

    /// Whether a failed record insert removes the just-written blob again.
    pub fn with_orphan_compensation(mut self, enabled: bool) -> Self {
        self.compensate_orphans = enabled;
        self
    }

    /// Store `content` as `name` and record it.
    pub async fn upload(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<FileRecord, FileError> {
        let id = BlobId::generate();

        let size = self
            .blobs
            .put_stream(id, name, content)
            .await
            .map_err(put_error)?;
        debug!(%id, name, size, "blob written");

        let record = FileRecord {
            id,
            name: name.to_string(),
            size,
            created_at: Utc::now(),
        };

        if let Err(e) = self.index.insert(&record).await {
            self.handle_orphan(id, name, &e).await;
            return Err(FileError::Index(e));
        }
        debug!(%id, "record inserted");

        Ok(record)
    }

    async fn handle_orphan(&self, id: BlobId, name: &str, cause: &IndexError) {
        if !self.compensate_orphans {
            warn!(%id, name, error = %cause, "Record insert failed, orphaned blob left in place");
            return;
        }

        match self.blobs.remove(id).await {
            Ok(_) => {
                warn!(%id, name, error = %cause, "Record insert failed, orphaned blob removed")
            }
            Err(e) => error!(
                %id,
                name,
                error = %cause,
                cleanup_error = %e,
                "Record insert failed and orphaned blob could not be removed"
            ),
        }
    }

    /// Look up the record for a user-supplied id.
    pub async fn get(&self, id: &str) -> Result<FileRecord, FileError> {
        let id = BlobId::parse(id).map_err(|e| FileError::InvalidId(e.to_string()))?;
        Ok(self.index.find_by_id(id).await?)
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<FileRecord>, FileError> {
        self.index.list_all(filter).await.map_err(FileError::Index)
    }

    /// Open a file for transfer, sniffing its content type.
    pub async fn download(&self, id: &str) -> Result<Download, FileError> {
        let record = self.get(id).await?;

        let opened = match self.blobs.open(record.id, &record.name).await {
            Ok(opened) => opened,
            Err(StorageError::NotFound { .. }) => {
                error!(id = %record.id, name = %record.name, "Dangling record: blob missing");
                return Err(FileError::BlobMissing(record.id));
            }
            Err(e) => return Err(FileError::Storage(e)),
        };

        let mut reader = opened.reader;
        let sniffed = sniff_content_type(&mut reader)
            .await
            .map_err(FileError::Storage)?;
        let body: BoxReader = Box::new(Cursor::new(sniffed.prefix).chain(reader));

        Ok(Download {
            record,
            content_type: sniffed.content_type,
            size: opened.size,
            body,
        })
    }

    /// Remove a file's blob, then its record. Returns the removed record.
    pub async fn delete(&self, id: &str) -> Result<FileRecord, FileError> {
        let record = self.get(id).await?;
        let id = record.id;

        match self.blobs.remove(id).await {
            Ok(true) => debug!(%id, "blob removed"),
            Ok(false) => warn!(%id, name = %record.name, "Blob already absent, deleting record"),
            Err(e) => {
                warn!(%id, error = %e, "Blob removal failed, record kept for retry");
                return Err(FileError::Storage(e));
            }
        }

        match self.index.delete(id).await {
            Ok(()) => debug!(%id, "record deleted"),
            Err(IndexError::NotFound(_)) => {
                info!(%id, "Record already deleted by a concurrent request");
            }
            Err(e) => {
                error!(%id, name = %record.name, error = %e, "Dangling record: blob removed, record delete failed");
                return Err(FileError::Index(e));
            }
        }

        Ok(record)
    }

    /// Cross-check blob directories against records. Read-only.
    ///
    /// The volume and the index are read one after the other, not as one
    /// snapshot. An upload or delete running at the same time can show up as
    /// an orphan or a dangling record that resolves once it completes.
    pub async fn audit(&self) -> Result<AuditReport, FileError> {
        let blob_ids = self.blobs.list_ids().await.map_err(FileError::Storage)?;
        let records = self
            .index
            .list_all(&ListFilter::default())
            .await
            .map_err(FileError::Index)?;

        let recorded: HashSet<BlobId> = records.iter().map(|r| r.id).collect();
        let orphaned_blobs: Vec<BlobId> = blob_ids
            .iter()
            .copied()
            .filter(|id| !recorded.contains(id))
            .collect();

        let mut dangling_records = Vec::new();
        for record in &records {
            match self.blobs.open(record.id, &record.name).await {
                Ok(_) => {}
                Err(StorageError::NotFound { .. }) => dangling_records.push(record.clone()),
                Err(e) => return Err(FileError::Storage(e)),
            }
        }

        let report = AuditReport {
            records: records.len() as u64,
            blobs: blob_ids.len() as u64,
            orphaned_blobs,
            dangling_records,
        };

        if report.is_consistent() {
            info!(records = report.records, blobs = report.blobs, "Audit clean");
        } else {
            warn!(
                orphaned = report.orphaned_blobs.len(),
                dangling = report.dangling_records.len(),
                "Audit found divergence between volume and index"
            );
        }

        Ok(report)
    }
}
