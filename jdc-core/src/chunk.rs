//! Chunk grid math and positional file I/O.
//!
//! The file is partitioned into fixed-size chunks; every read and write
//! names an absolute byte offset derived from the chunk index, never the
//! file cursor. Blocking positional syscalls run on the blocking pool so
//! the transfer task stays responsive.

use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::TransferError;

// ── Grid math ────────────────────────────────────────────────────

/// Number of chunks needed to cover `file_size` bytes.
pub fn num_chunks(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size)
}

/// Absolute byte range `[offset, offset + len)` covered by chunk `index`.
/// The final chunk carries the remainder.
pub fn chunk_span(index: u64, file_size: u64, chunk_size: u64) -> (u64, usize) {
    let offset = index * chunk_size;
    let end = (offset + chunk_size).min(file_size);
    (offset, (end - offset) as usize)
}

// ── Positional primitives ────────────────────────────────────────

#[cfg(unix)]
fn read_full_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_full_at(file: &std::fs::File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_full_at(file: &std::fs::File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_full_at(file: &std::fs::File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ── Source file (sender side) ────────────────────────────────────

/// Read-only handle to the file being sent.
#[derive(Clone)]
pub struct SourceFile {
    file: Arc<std::fs::File>,
    len: u64,
}

impl SourceFile {
    /// Open the source read-only and record its length.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || std::fs::File::open(path))
            .await
            .map_err(|e| TransferError::fs("open source", io::Error::other(e)))?
            .map_err(|e| TransferError::fs("open source", e))?;
        let len = file
            .metadata()
            .map_err(|e| TransferError::fs("stat source", e))?
            .len();
        Ok(Self { file: Arc::new(file), len })
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read exactly `len` bytes at `offset`. A short read mid-file means
    /// the source changed underneath the transfer and fails the chunk.
    pub async fn read_chunk(&self, offset: u64, len: usize) -> Result<Bytes, TransferError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            read_full_at(&file, &mut buf, offset)?;
            Ok::<_, io::Error>(Bytes::from(buf))
        })
        .await
        .map_err(|e| TransferError::fs("read chunk", io::Error::other(e)))?
        .map_err(|e| TransferError::fs("read chunk", e))
    }
}

// ── Target file (receiver side) ──────────────────────────────────

/// Read-write handle to the file being assembled.
#[derive(Clone)]
pub struct TargetFile {
    file: Arc<std::fs::File>,
}

impl TargetFile {
    /// Create or open the output read-write. Existing contents are kept so
    /// a resumed transfer continues in place.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new().read(true).write(true).create(true).open(path)
        })
        .await
        .map_err(|e| TransferError::fs("open target", io::Error::other(e)))?
        .map_err(|e| TransferError::fs("open target", e))?;
        Ok(Self { file: Arc::new(file) })
    }

    /// Size the file to its final length before any chunk arrives.
    pub async fn preallocate(&self, size: u64) -> Result<(), TransferError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.set_len(size))
            .await
            .map_err(|e| TransferError::fs("preallocate", io::Error::other(e)))?
            .map_err(|e| TransferError::fs("preallocate", e))
    }

    /// Write a chunk body at its absolute offset.
    pub async fn write_chunk(&self, data: Bytes, offset: u64) -> Result<(), TransferError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_full_at(&file, &data, offset))
            .await
            .map_err(|e| TransferError::fs("write chunk", io::Error::other(e)))?
            .map_err(|e| TransferError::fs("write chunk", e))
    }

    /// Flush file data to stable storage.
    pub async fn sync(&self) -> Result<(), TransferError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(|e| TransferError::fs("sync target", io::Error::other(e)))?
            .map_err(|e| TransferError::fs("sync target", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_counts() {
        assert_eq!(num_chunks(0, 1024), 0);
        assert_eq!(num_chunks(1, 1024), 1);
        assert_eq!(num_chunks(1024, 1024), 1);
        assert_eq!(num_chunks(1025, 1024), 2);
        // S2: 3 MiB + 1 byte at 1 MiB chunks.
        let mib = 1024 * 1024;
        assert_eq!(num_chunks(3 * mib + 1, mib), 4);
    }

    #[test]
    fn spans_tile_the_file_exactly() {
        // P3: span concatenation equals [0, file_size) with no overlap.
        for (file_size, chunk_size) in
            [(1u64, 1u64), (56, 1024 * 1024), (1000, 1), (1000, 333), (4096, 4096), (4097, 4096)]
        {
            let n = num_chunks(file_size, chunk_size);
            let mut cursor = 0u64;
            for i in 0..n {
                let (offset, len) = chunk_span(i, file_size, chunk_size);
                assert_eq!(offset, cursor, "gap before chunk {i}");
                assert!(len > 0);
                assert!(len as u64 <= chunk_size);
                cursor = offset + len as u64;
            }
            assert_eq!(cursor, file_size);
        }
    }

    #[test]
    fn final_chunk_carries_remainder() {
        let mib = 1024 * 1024;
        let (offset, len) = chunk_span(3, 3 * mib + 1, mib);
        assert_eq!(offset, 3 * mib);
        assert_eq!(len, 1);
    }

    #[tokio::test]
    async fn positional_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src.bin");
        let dst_path = dir.path().join("dst.bin");
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src_path, &payload).unwrap();

        let source = SourceFile::open(&src_path).await.unwrap();
        assert_eq!(source.len(), payload.len() as u64);

        let target = TargetFile::open(&dst_path).await.unwrap();
        target.preallocate(source.len()).await.unwrap();

        // Copy out of order to prove offsets are absolute.
        let chunk_size = 997u64;
        let n = num_chunks(source.len(), chunk_size);
        for i in (0..n).rev() {
            let (offset, len) = chunk_span(i, source.len(), chunk_size);
            let data = source.read_chunk(offset, len).await.unwrap();
            target.write_chunk(data, offset).await.unwrap();
        }
        target.sync().await.unwrap();

        assert_eq!(std::fs::read(&dst_path).unwrap(), payload);
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"tiny").unwrap();

        let source = SourceFile::open(&path).await.unwrap();
        let res = source.read_chunk(0, 64).await;
        assert!(matches!(res, Err(TransferError::Filesystem { .. })));
    }
}
