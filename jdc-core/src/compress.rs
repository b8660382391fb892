//! Per-chunk deflate codec and the extension-based compression policy.
//!
//! Chunks are compressed independently with raw deflate, so a retried
//! chunk never depends on compressor state from an earlier one. The policy
//! is decided once per file from its extension: text-like extensions
//! compress, already-compressed containers and unknown extensions do not.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::TransferError;

/// Extensions whose content is worth deflating.
const COMPRESSIBLE: &[&str] = &[
    "txt", "log", "csv", "json", "xml", "html", "htm", "css", "js", "sql", "md", "yaml", "yml",
    "ini", "conf", "cfg",
];

/// Extensions that are already entropy-coded; deflating them wastes CPU.
const ALREADY_COMPRESSED: &[&str] = &[
    "zip", "gz", "bz2", "xz", "rar", "7z", "tar", "mp3", "mp4", "avi", "mkv", "jpg", "jpeg",
    "png", "gif", "webp", "pdf", "docx", "xlsx", "pptx", "odt", "ods", "odp",
];

fn extension_of(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Whether chunks of the named file should be compressed at all.
/// Unknown extensions default to uncompressed.
pub fn should_compress(name: &str) -> bool {
    match extension_of(name) {
        Some(ext) => {
            !ALREADY_COMPRESSED.contains(&ext.as_str()) && COMPRESSIBLE.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Deflate level for the named file: the default balance for text-like
/// extensions, best-speed for anything else that opts in.
pub fn level_for(name: &str) -> Compression {
    match extension_of(name) {
        Some(ext) if COMPRESSIBLE.contains(&ext.as_str()) => Compression::default(),
        _ => Compression::fast(),
    }
}

/// Per-file compression plan for the sender: `None` means every chunk
/// travels raw.
pub fn plan(name: &str, enabled: bool) -> Option<Compression> {
    if enabled && should_compress(name) { Some(level_for(name)) } else { None }
}

/// Deflate one chunk body.
pub fn compress_chunk(data: &[u8], level: Compression) -> Result<Vec<u8>, TransferError> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level);
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| TransferError::Compression(e.to_string()))
}

/// Inflate one chunk body. The output must match the size announced
/// before transmission; anything else rejects the chunk.
pub fn decompress_chunk(data: &[u8], expected_len: usize) -> Result<Bytes, TransferError> {
    let mut out = Vec::with_capacity(expected_len);
    let mut decoder = DeflateDecoder::new(data).take(expected_len as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TransferError::Compression(e.to_string()))?;
    if out.len() != expected_len {
        return Err(TransferError::DecompressedSizeMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(Bytes::from(out))
}
