//! Typed error hierarchy for the transfer engine.
//!
//! All fallible operations return `Result<T, TransferError>`. Variants are
//! grouped by kind; [`TransferError::is_retryable`] is the single place the
//! retry envelope consults to decide whether a failed chunk operation may be
//! attempted again.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::hash::HashAlgorithm;

/// The canonical error type for the transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    // ── Network ──────────────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection mid-conversation.
    #[error("connection closed by peer")]
    ConnectionClosed,

    // ── Filesystem ───────────────────────────────────────────────
    /// A file operation failed. `op` names the operation, not the path.
    #[error("filesystem error during {op}: {source}")]
    Filesystem {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The announced filename reduced to no usable basename.
    #[error("invalid filename in transfer request")]
    InvalidFilename,

    // ── Protocol ─────────────────────────────────────────────────
    /// A byte that does not map to any known command.
    #[error("unknown command byte: {0:#x}")]
    UnknownCommand(u8),

    /// A frame arrived that the current state does not accept.
    #[error("unexpected command {got} while waiting for {expected}")]
    UnexpectedCommand { expected: &'static str, got: &'static str },

    /// A size field fell outside its permitted range.
    #[error("size field out of range: {value} (max {max})")]
    SizeOutOfRange { value: i64, max: u64 },

    /// A payload line could not be parsed as its declared type.
    #[error("malformed frame field: {0}")]
    MalformedField(&'static str),

    /// The peer named a hash algorithm this side does not implement.
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The peer reported a failure through an Error frame.
    #[error("remote error: {0}")]
    Remote(String),

    // ── Compression ──────────────────────────────────────────────
    /// Deflate or inflate failed on a chunk body.
    #[error("compression error: {0}")]
    Compression(String),

    /// Inflated output did not match the pre-transmitted chunk size.
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    DecompressedSizeMismatch { expected: usize, actual: usize },

    // ── Validation ───────────────────────────────────────────────
    /// Configuration rejected before any socket was opened.
    #[error("invalid configuration: {0}")]
    Validation(String),

    // ── Integrity ────────────────────────────────────────────────
    /// End-to-end digests disagreed. Never retried.
    #[error("integrity check failed ({algorithm})")]
    HashMismatch {
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },

    // ── Cancellation ─────────────────────────────────────────────
    /// Cooperative shutdown observed at a suspension point.
    #[error("transfer cancelled")]
    Cancelled,

    // ── Retry envelope ───────────────────────────────────────────
    /// All attempts for one chunk operation failed.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },
}

impl TransferError {
    /// Shorthand for filesystem failures that keeps the operation name
    /// out of the `?` call sites.
    pub fn fs(op: &'static str, source: io::Error) -> Self {
        Self::Filesystem { op, source }
    }

    /// Whether the per-chunk retry envelope may re-attempt after this error.
    ///
    /// Transport, framing, and compression failures are treated as possibly
    /// transient. Integrity, validation, filesystem, and cancellation
    /// failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Timeout(_)
                | Self::UnknownCommand(_)
                | Self::UnexpectedCommand { .. }
                | Self::SizeOutOfRange { .. }
                | Self::MalformedField(_)
                | Self::Compression(_)
                | Self::DecompressedSizeMismatch { .. }
        )
    }

    /// Short kind label for categorized event-sink reporting. Must never
    /// contain paths, digests, or host identifiers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::ConnectionClosed => "network",
            Self::Filesystem { .. } | Self::InvalidFilename => "filesystem",
            Self::UnknownCommand(_)
            | Self::UnexpectedCommand { .. }
            | Self::SizeOutOfRange { .. }
            | Self::MalformedField(_)
            | Self::UnsupportedAlgorithm(_)
            | Self::Remote(_) => "protocol",
            Self::Compression(_) | Self::DecompressedSizeMismatch { .. } => "compression",
            Self::Validation(_) => "validation",
            Self::HashMismatch { .. } => "integrity",
            Self::Cancelled => "cancelled",
            Self::RetriesExhausted { last, .. } => last.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransferError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransferError::UnknownCommand(0xFF).is_retryable());
        assert!(
            TransferError::DecompressedSizeMismatch { expected: 10, actual: 7 }.is_retryable()
        );

        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::Validation("bad".into()).is_retryable());
        assert!(
            !TransferError::HashMismatch {
                algorithm: HashAlgorithm::Md5,
                expected: "aa".into(),
                actual: "bb".into(),
            }
            .is_retryable()
        );
        assert!(!TransferError::fs("write", io::Error::other("disk full")).is_retryable());
    }

    #[test]
    fn kind_labels() {
        assert_eq!(TransferError::ConnectionClosed.kind(), "network");
        assert_eq!(TransferError::InvalidFilename.kind(), "filesystem");
        assert_eq!(TransferError::Remote("x".into()).kind(), "protocol");
        assert_eq!(TransferError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn retries_exhausted_reports_inner_kind() {
        let inner = TransferError::Timeout(Duration::from_secs(2));
        let e = TransferError::RetriesExhausted { attempts: 5, last: Box::new(inner) };
        assert_eq!(e.kind(), "network");
        assert!(e.to_string().contains("5 attempts"));
    }

    #[test]
    fn display_omits_sensitive_detail() {
        let e = TransferError::HashMismatch {
            algorithm: HashAlgorithm::Blake2b,
            expected: "deadbeef".into(),
            actual: "cafebabe".into(),
        };
        let s = e.to_string();
        assert!(!s.contains("deadbeef"));
        assert!(!s.contains("cafebabe"));
    }
}
