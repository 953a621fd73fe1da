use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;

/// Number of leading bytes inspected when classifying a blob.
pub const SNIFF_LEN: usize = 512;

pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Outcome of sniffing a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sniffed {
    pub content_type: String,
    /// Bytes consumed from the reader. Callers streaming the blob must send
    /// these before the rest of the reader.
    pub prefix: Vec<u8>,
}

/// Read up to [`SNIFF_LEN`] bytes from `reader` and classify them.
///
/// Shorter blobs are classified from whatever is available.
pub async fn sniff_content_type<R>(reader: &mut R) -> Result<Sniffed, StorageError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    AsyncReadExt::take(&mut *reader, SNIFF_LEN as u64)
        .read_to_end(&mut prefix)
        .await?;

    Ok(Sniffed {
        content_type: classify(&prefix).to_string(),
        prefix,
    })
}

/// Classify a byte prefix by magic bytes, falling back to a text/binary check.
pub fn classify(prefix: &[u8]) -> &'static str {
    let prefix = &prefix[..prefix.len().min(SNIFF_LEN)];

    if prefix.starts_with(&[0xFE, 0xFF]) {
        return "text/plain; charset=utf-16be";
    }
    if prefix.starts_with(&[0xFF, 0xFE]) {
        return "text/plain; charset=utf-16le";
    }
    if prefix.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return TEXT_PLAIN_UTF8;
    }

    if let Some(kind) = infer::get(prefix) {
        return kind.mime_type();
    }

    if prefix.iter().any(|&b| is_binary_byte(b)) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN_UTF8
    }
}

/// Control bytes that never appear in text (WHATWG "binary data byte").
fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
