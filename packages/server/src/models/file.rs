use chrono::{DateTime, Utc};
use common::storage::BlobId;
use serde::{Deserialize, Serialize};

use crate::entity::file_record;
use crate::error::AppError;
use crate::index::IndexError;

/// Metadata describing one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FileRecord {
    /// File ID (UUIDv4), also the blob directory name.
    #[schema(value_type = String, example = "67e55044-10b1-426f-9247-bb680e5fe0c8")]
    pub id: BlobId,
    /// Original upload filename.
    #[schema(example = "a.txt")]
    pub name: String,
    /// Blob size in bytes at upload time.
    #[schema(example = 10)]
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<file_record::Model> for FileRecord {
    type Error = IndexError;

    fn try_from(model: file_record::Model) -> Result<Self, Self::Error> {
        let size = u64::try_from(model.size).map_err(|_| {
            IndexError::Backend(format!("record {} has negative size {}", model.id, model.size))
        })?;

        Ok(Self {
            id: BlobId::from(model.id),
            name: model.name,
            size,
            created_at: model.created_at,
        })
    }
}

impl TryFrom<&FileRecord> for file_record::ActiveModel {
    type Error = IndexError;

    fn try_from(record: &FileRecord) -> Result<Self, Self::Error> {
        use sea_orm::Set;

        let size = i64::try_from(record.size).map_err(|_| {
            IndexError::Backend(format!("size {} of {} does not fit a bigint", record.size, record.id))
        })?;

        Ok(Self {
            id: Set(record.id.as_uuid()),
            name: Set(record.name.clone()),
            size: Set(size),
            created_at: Set(record.created_at),
        })
    }
}

/// Ordering of a record listing by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    Asc,
    Desc,
}

/// Optional narrowing of [`MetadataIndex::list_all`](crate::index::MetadataIndex::list_all).
///
/// With no order set, records come back in whatever order the backend yields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Exact filename match.
    pub name: Option<String>,
    pub order: Option<ListOrder>,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FileListQuery {
    /// Only return files with exactly this name.
    pub name: Option<String>,
    /// Sort by creation time: `asc` or `desc`. Unordered when absent.
    pub order: Option<String>,
}

impl FileListQuery {
    pub fn into_filter(self) -> Result<ListFilter, AppError> {
        let order = match self.order.as_deref() {
            None => None,
            Some("asc") => Some(ListOrder::Asc),
            Some("desc") => Some(ListOrder::Desc),
            Some(_) => {
                return Err(AppError::Validation(
                    "order must be one of: asc, desc".into(),
                ));
            }
        };
        Ok(ListFilter {
            name: self.name,
            order,
        })
    }
}

/// Result of cross-checking the blob volume against the metadata index.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AuditReport {
    /// Number of records in the index.
    pub records: u64,
    /// Number of blob directories on the volume.
    pub blobs: u64,
    /// Blob directories with no record.
    #[schema(value_type = Vec<String>)]
    pub orphaned_blobs: Vec<BlobId>,
    /// Records whose blob is missing.
    pub dangling_records: Vec<FileRecord>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.orphaned_blobs.is_empty() && self.dangling_records.is_empty()
    }
}
