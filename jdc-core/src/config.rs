//! Validated engine configuration.
//!
//! The engine never parses flags or files itself; the binary assembles a
//! [`Config`] and calls [`Config::validate`] before any socket is opened.
//! Validation failures never reach the transfer drivers.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::TransferError;

/// Default chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default socket / file I/O buffer size (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Hard ceiling on the chunk size. Chunk bodies are held in memory and
/// indexed by `usize`, and sizes travel as decimal int64 lines on the wire;
/// 2 GiB minus one keeps every chunk addressable by an `i32`-indexed buffer
/// on all supported targets.
pub const MAX_CHUNK_SIZE: u64 = i32::MAX as u64;

/// Which end of the transfer this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Receiver: listens, pulls chunks, writes the output file.
    Server,
    /// Sender: connects, announces the file, services chunk requests.
    Client,
}

/// Complete configuration consumed by the transfer drivers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Receiver or sender role.
    pub role: Role,
    /// TCP endpoint: listened on (server) or connected to (client).
    pub address: String,
    /// Destination directory for received files (server role).
    pub output_dir: PathBuf,
    /// Source file to send (client role).
    pub file_path: PathBuf,
    /// Bytes per chunk. Part of the resume identity.
    pub chunk_size: u64,
    /// Socket send/receive and stream buffer size in bytes.
    pub buffer_size: usize,
    /// Scheduler parallelism hint for the runtime worker pool.
    pub workers: usize,
    /// Enable the per-file compression policy on the sender.
    pub compression: bool,
    /// This side's opt-in to the end-to-end hash handshake.
    pub verify_hash: bool,
    /// Show the progress renderer (collaborator; engine only emits events).
    pub show_progress: bool,
    /// Deadline for each chunk-class network operation.
    pub timeout: Duration,
    /// Maximum attempts per chunk operation.
    pub retries: u32,
    /// Base inter-chunk pacing delay.
    pub chunk_delay: Duration,
    /// Enable the adaptive delay multiplier.
    pub adaptive_delay: bool,
    /// Lower bound for the adaptive delay.
    pub min_delay: Duration,
    /// Upper bound for the adaptive delay.
    pub max_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Client,
            address: "127.0.0.1:9876".to_string(),
            output_dir: PathBuf::from("."),
            file_path: PathBuf::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: 4,
            compression: false,
            verify_hash: true,
            show_progress: false,
            timeout: Duration::from_secs(120),
            retries: 5,
            chunk_delay: Duration::ZERO,
            adaptive_delay: false,
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Check ranges and role-specific requirements, clamping the chunk size
    /// to [`MAX_CHUNK_SIZE`]. Returns the first violation found.
    pub fn validate(&mut self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::Validation("chunk size must be positive".into()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            tracing::warn!(
                requested = self.chunk_size,
                clamped = MAX_CHUNK_SIZE,
                "chunk size clamped to buffer-addressable ceiling"
            );
            self.chunk_size = MAX_CHUNK_SIZE;
        }
        if self.buffer_size == 0 {
            return Err(TransferError::Validation("buffer size must be positive".into()));
        }
        if self.workers == 0 {
            return Err(TransferError::Validation("worker count must be positive".into()));
        }
        if self.retries == 0 {
            return Err(TransferError::Validation("retry count must be positive".into()));
        }
        if self.min_delay > self.max_delay {
            return Err(TransferError::Validation(
                "adaptive delay bounds inverted: min exceeds max".into(),
            ));
        }
        match self.role {
            Role::Client => {
                if self.file_path.as_os_str().is_empty() {
                    return Err(TransferError::Validation("no source file given".into()));
                }
                if !self.file_path.is_file() {
                    return Err(TransferError::Validation("source file does not exist".into()));
                }
            }
            Role::Server => {
                if !self.output_dir.is_dir() {
                    return Err(TransferError::Validation(
                        "output directory does not exist".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Deadline for the hash handshake: 2.5× the chunk-class timeout,
    /// never below five minutes, because the receiver re-reads the whole
    /// output file.
    pub fn hash_timeout(&self) -> Duration {
        (self.timeout.saturating_mul(5) / 2).max(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_config(dir: &tempfile::TempDir) -> Config {
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"payload").unwrap();
        Config { role: Role::Client, file_path: file, ..Config::default() }
    }

    #[test]
    fn default_config_is_valid_for_server() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config {
            role: Role::Server,
            output_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = client_config(&dir);
        cfg.chunk_size = 0;
        assert!(matches!(cfg.validate(), Err(TransferError::Validation(_))));
    }

    #[test]
    fn oversized_chunk_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = client_config(&dir);
        cfg.chunk_size = 4 * 1024 * 1024 * 1024;
        cfg.validate().unwrap();
        assert_eq!(cfg.chunk_size, MAX_CHUNK_SIZE);
    }

    #[test]
    fn inverted_delay_bounds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = client_config(&dir);
        cfg.min_delay = Duration::from_millis(100);
        cfg.max_delay = Duration::from_millis(10);
        assert!(matches!(cfg.validate(), Err(TransferError::Validation(_))));
    }

    #[test]
    fn missing_source_rejected() {
        let mut cfg = Config {
            role: Role::Client,
            file_path: PathBuf::from("/no/such/file"),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(TransferError::Validation(_))));
    }

    #[test]
    fn missing_output_dir_rejected() {
        let mut cfg = Config {
            role: Role::Server,
            output_dir: PathBuf::from("/no/such/dir"),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(TransferError::Validation(_))));
    }

    #[test]
    fn hash_timeout_floor() {
        // Default 120 s timeout × 2.5 lands exactly on the 5-minute floor.
        let cfg = Config::default();
        assert_eq!(cfg.hash_timeout(), Duration::from_secs(300));

        // Short timeouts clamp up to the floor.
        let cfg = Config { timeout: Duration::from_secs(10), ..Config::default() };
        assert_eq!(cfg.hash_timeout(), Duration::from_secs(300));

        // Long timeouts scale at 2.5×.
        let cfg = Config { timeout: Duration::from_secs(600), ..Config::default() };
        assert_eq!(cfg.hash_timeout(), Duration::from_secs(1500));
    }
}
