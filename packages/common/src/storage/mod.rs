mod error;
mod id;
mod sniff;
mod traits;

pub mod filesystem;

pub use error::StorageError;
pub use id::BlobId;
pub use sniff::{OCTET_STREAM, SNIFF_LEN, Sniffed, TEXT_PLAIN_UTF8, classify, sniff_content_type};
pub use traits::{BlobStore, BoxReader, OpenedBlob};
