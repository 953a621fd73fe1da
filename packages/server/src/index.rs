use async_trait::async_trait;
use common::storage::BlobId;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, SqlErr,
};
use thiserror::Error;

use crate::entity::file_record;
use crate::models::file::{FileRecord, ListFilter, ListOrder};

/// Errors surfaced by a [`MetadataIndex`].
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("file record not found: {0}")]
    NotFound(BlobId),

    #[error("file record already exists: {0}")]
    Conflict(BlobId),

    #[error("metadata backend unavailable: {0}")]
    Connection(String),

    #[error("metadata backend error: {0}")]
    Backend(String),
}

impl From<DbErr> for IndexError {
    fn from(err: DbErr) -> Self {
        match &err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => IndexError::Connection(err.to_string()),
            _ => IndexError::Backend(err.to_string()),
        }
    }
}

/// CRUD over file records keyed by [`BlobId`].
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the id is taken.
    async fn insert(&self, record: &FileRecord) -> Result<(), IndexError>;

    async fn find_by_id(&self, id: BlobId) -> Result<FileRecord, IndexError>;

    /// All records matching `filter`. Each call runs a fresh query.
    async fn list_all(&self, filter: &ListFilter) -> Result<Vec<FileRecord>, IndexError>;

    /// Delete a record. Fails with `NotFound` if nothing was deleted.
    async fn delete(&self, id: BlobId) -> Result<(), IndexError>;
}

/// [`MetadataIndex`] backed by the `file_record` table.
#[derive(Clone)]
pub struct SeaOrmIndex {
    db: DatabaseConnection,
}

impl SeaOrmIndex {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataIndex for SeaOrmIndex {
    async fn insert(&self, record: &FileRecord) -> Result<(), IndexError> {
        let existing = file_record::Entity::find_by_id(record.id.as_uuid())
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(IndexError::Conflict(record.id));
        }

        file_record::Entity::insert(file_record::ActiveModel::try_from(record)?)
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| match e.sql_err() {
                // Lost a race with an insert of the same id.
                Some(SqlErr::UniqueConstraintViolation(_)) => IndexError::Conflict(record.id),
                _ => IndexError::from(e),
            })?;

        Ok(())
    }

    async fn find_by_id(&self, id: BlobId) -> Result<FileRecord, IndexError> {
        file_record::Entity::find_by_id(id.as_uuid())
            .one(&self.db)
            .await?
            .map(FileRecord::try_from)
            .transpose()?
            .ok_or(IndexError::NotFound(id))
    }

    async fn list_all(&self, filter: &ListFilter) -> Result<Vec<FileRecord>, IndexError> {
        let mut select = file_record::Entity::find();

        if let Some(name) = &filter.name {
            select = select.filter(file_record::Column::Name.eq(name.as_str()));
        }

        select = match filter.order {
            Some(ListOrder::Asc) => select.order_by_asc(file_record::Column::CreatedAt),
            Some(ListOrder::Desc) => select.order_by_desc(file_record::Column::CreatedAt),
            None => select,
        };

        let models = select.all(&self.db).await?;
        models.into_iter().map(FileRecord::try_from).collect()
    }

    async fn delete(&self, id: BlobId) -> Result<(), IndexError> {
        let result = file_record::Entity::delete_by_id(id.as_uuid())
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(IndexError::NotFound(id));
        }
        Ok(())
    }
}
