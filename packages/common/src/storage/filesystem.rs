use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::error::StorageError;
use super::id::BlobId;
use super::traits::{BlobStore, OpenedBlob};

/// Scratch directory under the root for in-flight writes.
const TMP_DIR: &str = ".tmp";

/// Filesystem-backed blob store.
///
/// Each blob lives alone in a directory named after its identifier:
/// `{root}/{id}/{name}`. Writes land in `{root}/.tmp` first and are renamed
/// into place, so a blob directory only ever appears fully written.
pub struct FilesystemBlobStore {
    root: PathBuf,
    max_size: u64,
}

impl FilesystemBlobStore {
    /// Create a new filesystem blob store rooted at `root`.
    pub async fn new(root: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        Ok(Self { root, max_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn id_dir(&self, id: BlobId) -> PathBuf {
        self.root.join(id.dir_name())
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.root
            .join(TMP_DIR)
            .join(uuid::Uuid::new_v4().to_string())
    }

    /// Copy `reader` into `temp_path`, enforcing the size limit.
    async fn write_temp(
        &self,
        temp_path: &Path,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, StorageError> {
        let mut buf = vec![0u8; 64 * 1024]; // 64KB read buffer
        let mut temp_file = fs::File::create(temp_path).await?;
        let mut total_bytes: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await.map_err(StorageError::Source)?;
            if n == 0 {
                break;
            }

            total_bytes += n as u64;
            if total_bytes > self.max_size {
                return Err(StorageError::SizeLimitExceeded {
                    actual: total_bytes,
                    limit: self.max_size,
                });
            }

            temp_file.write_all(&buf[..n]).await?;
        }

        temp_file.flush().await?;
        temp_file.sync_all().await?;
        Ok(total_bytes)
    }
}

/// Best-effort removal of an abandoned temp file.
async fn discard_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove temp file");
    }
}

/// Reject names that would escape or alias the identifier directory.
fn check_name(name: &str) -> Result<(), StorageError> {
    let reason = if name.is_empty() {
        "empty"
    } else if name == "." || name == ".." {
        "relative path component"
    } else if name.contains('/') || name.contains('\\') {
        "contains a path separator"
    } else if name.contains('\0') {
        "contains a null byte"
    } else {
        return Ok(());
    };
    Err(StorageError::InvalidName(format!("{name:?} {reason}")))
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put_stream(
        &self,
        id: BlobId,
        name: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, StorageError> {
        check_name(name)?;

        let temp_path = self.temp_path();
        let size = match self.write_temp(&temp_path, reader).await {
            Ok(size) => size,
            Err(e) => {
                discard_temp(&temp_path).await;
                return Err(e);
            }
        };

        let dir = self.id_dir(id);
        let placed = async {
            fs::create_dir_all(&dir).await?;
            fs::rename(&temp_path, dir.join(name)).await
        }
        .await;

        if let Err(e) = placed {
            discard_temp(&temp_path).await;
            if let Err(cleanup) = fs::remove_dir_all(&dir).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!(%id, error = %cleanup, "Failed to remove partial blob directory");
            }
            return Err(e.into());
        }

        Ok(size)
    }

    fn blob_path(&self, id: BlobId, name: &str) -> PathBuf {
        self.id_dir(id).join(name)
    }

    async fn open(&self, id: BlobId, name: &str) -> Result<OpenedBlob, StorageError> {
        check_name(name)?;

        let path = self.blob_path(id, name);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    id: id.to_string(),
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata().await?.len();
        Ok(OpenedBlob {
            reader: Box::new(BufReader::new(file)),
            size,
        })
    }

    async fn remove(&self, id: BlobId) -> Result<bool, StorageError> {
        match fs::remove_dir_all(self.id_dir(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_ids(&self) -> Result<Vec<BlobId>, StorageError> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().to_str().and_then(BlobId::from_dir_name) {
                Some(id) => ids.push(id),
                None => debug!(entry = ?entry.file_name(), "Skipping non-blob directory"),
            }
        }

        ids.sort();
        Ok(ids)
    }
}
