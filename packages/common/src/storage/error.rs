use std::fmt;

/// Errors that can occur during blob storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// No blob exists at `<root>/<id>/<name>`.
    NotFound { id: String, name: String },
    /// An I/O error occurred.
    Io(std::io::Error),
    /// Reading the incoming content failed before it reached the store.
    Source(std::io::Error),
    /// The string is not a valid blob identifier.
    InvalidId(String),
    /// The filename cannot be used as a single path component.
    InvalidName(String),
    /// The blob exceeds the configured size limit.
    SizeLimitExceeded { actual: u64, limit: u64 },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id, name } => write!(f, "blob not found: {id}/{name}"),
            Self::Io(err) => write!(f, "storage IO error: {err}"),
            Self::Source(err) => write!(f, "failed to read blob content: {err}"),
            Self::InvalidId(msg) => write!(f, "invalid blob id: {msg}"),
            Self::InvalidName(msg) => write!(f, "invalid blob name: {msg}"),
            Self::SizeLimitExceeded { actual, limit } => {
                write!(f, "blob exceeds size limit ({actual} > {limit} bytes)")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) | Self::Source(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
