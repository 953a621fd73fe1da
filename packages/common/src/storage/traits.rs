use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use super::id::BlobId;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// A blob opened for reading.
pub struct OpenedBlob {
    pub reader: BoxReader,
    /// On-disk length at the time the blob was opened.
    pub size: u64,
}

/// Blob storage addressed by `(id, name)`, one blob per identifier.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `(id, name)` and return the number of bytes written.
    async fn put(&self, id: BlobId, name: &str, data: &[u8]) -> Result<u64, StorageError> {
        let mut reader = Cursor::new(data);
        self.put_stream(id, name, &mut reader).await
    }

    /// Store data from an async reader under `(id, name)`.
    ///
    /// On failure nothing is left behind for `id`.
    async fn put_stream(
        &self,
        id: BlobId,
        name: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, StorageError>;

    /// Location of the blob. Pure computation, no I/O.
    fn blob_path(&self, id: BlobId, name: &str) -> PathBuf;

    /// Open a blob as a streaming async reader.
    async fn open(&self, id: BlobId, name: &str) -> Result<OpenedBlob, StorageError>;

    /// Retrieve all bytes of a blob.
    async fn get(&self, id: BlobId, name: &str) -> Result<Vec<u8>, StorageError> {
        let mut opened = self.open(id, name).await?;
        let mut buf = Vec::with_capacity(opened.size as usize);
        opened.reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Remove everything stored for `id`.
    ///
    /// Returns `true` if something was removed, `false` if nothing existed.
    async fn remove(&self, id: BlobId) -> Result<bool, StorageError>;

    /// Identifiers that currently have a blob directory.
    async fn list_ids(&self) -> Result<Vec<BlobId>, StorageError>;
}
