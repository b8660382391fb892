//! Streaming hash engine — algorithm selection and hex digests.
//!
//! Digests are computed by streaming the file from offset zero with a
//! bounded buffer, so memory stays flat regardless of file size. The
//! algorithm is picked from the file size: md5 below the 50 GiB threshold,
//! blake2b (256-bit) at or above it. sha256 is recognized on the wire but
//! never auto-selected.

use std::path::Path;

use blake2::Blake2b;
use digest::Digest;
use digest::consts::U32;
use md5::Md5;
use sha2::Sha256;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

/// File-size threshold above which md5 is abandoned for blake2b.
pub const BLAKE2B_THRESHOLD: u64 = 50 * 1024 * 1024 * 1024;

/// Default streaming buffer size (4 MiB).
pub const DEFAULT_HASH_BUFFER: usize = 4 * 1024 * 1024;

/// Hash algorithms understood by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Blake2b,
}

impl HashAlgorithm {
    /// The token used on the wire for this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Blake2b => "blake2b",
        }
    }

    /// Parse a wire token. Unknown tokens are a protocol error.
    pub fn parse(token: &str) -> Result<Self, TransferError> {
        match token {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake2b" => Ok(Self::Blake2b),
            other => Err(TransferError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// Length of the hex-encoded digest this algorithm produces.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 | Self::Blake2b => 64,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the digest algorithm for a file of the given size.
pub fn select_algorithm(file_size: u64) -> HashAlgorithm {
    if file_size < BLAKE2B_THRESHOLD {
        HashAlgorithm::Md5
    } else {
        HashAlgorithm::Blake2b
    }
}

// ── Streaming hasher ─────────────────────────────────────────────

/// Enum dispatch over the three digest implementations. The `digest`
/// crate's trait objects are not object-safe across finalize, so a small
/// enum keeps the loop monomorphic.
enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
    Blake2b(Blake2b<U32>),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Blake2b => Self::Blake2b(Blake2b::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Blake2b(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Blake2b(h) => hex::encode(h.finalize()),
        }
    }
}

/// Stream a file from offset zero to EOF and return the lowercase hex
/// digest. The loop observes `token` between reads so a shutdown does not
/// hang on a multi-terabyte hash pass.
pub async fn hash_file(
    path: &Path,
    algorithm: HashAlgorithm,
    buffer_size: usize,
    token: &CancellationToken,
) -> Result<String, TransferError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| TransferError::fs("open for hashing", e))?;

    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; buffer_size.max(4096)];

    loop {
        if token.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| TransferError::fs("read for hashing", e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn threshold_selection() {
        assert_eq!(select_algorithm(0), HashAlgorithm::Md5);
        assert_eq!(select_algorithm(56), HashAlgorithm::Md5);
        assert_eq!(select_algorithm(49 * 1024 * 1024 * 1024), HashAlgorithm::Md5);
        assert_eq!(select_algorithm(BLAKE2B_THRESHOLD - 1), HashAlgorithm::Md5);
        assert_eq!(select_algorithm(BLAKE2B_THRESHOLD), HashAlgorithm::Blake2b);
        assert_eq!(select_algorithm(51 * 1024 * 1024 * 1024), HashAlgorithm::Blake2b);
    }

    #[test]
    fn token_roundtrip() {
        for algo in [HashAlgorithm::Md5, HashAlgorithm::Sha256, HashAlgorithm::Blake2b] {
            assert_eq!(HashAlgorithm::parse(algo.as_str()).unwrap(), algo);
        }
        assert!(matches!(
            HashAlgorithm::parse("crc32"),
            Err(TransferError::UnsupportedAlgorithm(_))
        ));
    }

    #[tokio::test]
    async fn digest_lengths_and_stability() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"the quick brown fox jumps over the lazy dog").unwrap();
        tmp.flush().unwrap();
        let token = CancellationToken::new();

        for algo in [HashAlgorithm::Md5, HashAlgorithm::Sha256, HashAlgorithm::Blake2b] {
            let a = hash_file(tmp.path(), algo, 8, &token).await.unwrap();
            // Same content, different buffer size, same digest.
            let b = hash_file(tmp.path(), algo, 1024 * 1024, &token).await.unwrap();
            assert_eq!(a, b);
            assert_eq!(a.len(), algo.hex_len());
            assert_eq!(a, a.to_lowercase());
        }
    }

    #[tokio::test]
    async fn md5_known_vector() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        tmp.flush().unwrap();
        let token = CancellationToken::new();

        let hex = hash_file(tmp.path(), HashAlgorithm::Md5, 4096, &token).await.unwrap();
        assert_eq!(hex, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn cancelled_token_aborts() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; 64 * 1024]).unwrap();
        tmp.flush().unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let res = hash_file(tmp.path(), HashAlgorithm::Md5, 4096, &token).await;
        assert!(matches!(res, Err(TransferError::Cancelled)));
    }
}
