//! Persistent transfer state — the receiver's resume store.
//!
//! A JSON snapshot lives next to the output file and records which chunks
//! are durably on disk. It is rewritten after every successful chunk write
//! and removed once the transfer completes, so a crashed or cancelled
//! session can be continued by re-running both sides.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Suffix appended to the output basename to name the state file.
pub const STATE_SUFFIX: &str = ".justdatacopier.state";

/// Current state-document version.
pub const STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    STATE_VERSION
}

/// On-disk record of a partially received file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferState {
    pub filename: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub num_chunks: u64,
    pub chunks_received: Vec<bool>,
    pub last_modified: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: u32,
}

impl TransferState {
    /// Fresh state for a transfer with nothing received yet.
    pub fn new(filename: &str, file_size: u64, chunk_size: u64, num_chunks: u64) -> Self {
        Self {
            filename: filename.to_string(),
            file_size,
            chunk_size,
            num_chunks,
            chunks_received: vec![false; num_chunks as usize],
            last_modified: Utc::now(),
            version: STATE_VERSION,
        }
    }

    /// Whether this snapshot describes the same chunk grid as the current
    /// request. A mismatch means the state must be discarded.
    pub fn compatible(&self, file_size: u64, chunk_size: u64, num_chunks: u64) -> bool {
        self.file_size == file_size
            && self.chunk_size == chunk_size
            && self.num_chunks == num_chunks
            && self.chunks_received.len() as u64 == num_chunks
    }

    /// Count of chunks already received.
    pub fn completed(&self) -> u64 {
        self.chunks_received.iter().filter(|done| **done).count() as u64
    }
}

/// Load/save/remove handle bound to one output basename.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store location for `basename` inside `output_dir`.
    pub fn for_output(output_dir: &Path, basename: &str) -> Self {
        Self { path: output_dir.join(format!("{basename}{STATE_SUFFIX}")) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot if one exists. Missing or unreadable state means
    /// starting fresh; only genuine I/O errors surface.
    pub async fn load(&self) -> Result<Option<TransferState>, TransferError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TransferError::fs("read state", e)),
        };
        match serde_json::from_slice::<TransferState>(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unparseable transfer state");
                Ok(None)
            }
        }
    }

    /// Persist the snapshot. Written to a sibling temp file and renamed so
    /// a crash mid-save never leaves a torn document.
    pub async fn save(&self, state: &mut TransferState) -> Result<(), TransferError> {
        state.last_modified = Utc::now();
        let raw = serde_json::to_vec_pretty(state)
            .map_err(|e| TransferError::fs("encode state", std::io::Error::other(e)))?;
        let tmp = self.path.with_extension("state.tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .map_err(|e| TransferError::fs("write state", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| TransferError::fs("commit state", e))
    }

    /// Delete the snapshot. Absence is not an error.
    pub async fn remove(&self) -> Result<(), TransferError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransferError::fs("remove state", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::for_output(dir.path(), "file.bin");
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::for_output(dir.path(), "file.bin");

        let mut state = TransferState::new("file.bin", 10 * 1024, 1024, 10);
        state.chunks_received[0] = true;
        state.chunks_received[3] = true;
        store.save(&mut state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.completed(), 2);
        assert_eq!(loaded.chunks_received, state.chunks_received);
        assert_eq!(loaded.version, STATE_VERSION);
        assert!(store.path().to_string_lossy().ends_with(STATE_SUFFIX));
    }

    #[tokio::test]
    async fn corrupt_state_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::for_output(dir.path(), "file.bin");
        tokio::fs::write(store.path(), b"{not json").await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn version_defaults_on_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::for_output(dir.path(), "file.bin");
        // A document written before the version field existed.
        let legacy = serde_json::json!({
            "filename": "file.bin",
            "file_size": 100,
            "chunk_size": 10,
            "num_chunks": 10,
            "chunks_received": vec![false; 10],
            "last_modified": Utc::now(),
        });
        tokio::fs::write(store.path(), serde_json::to_vec(&legacy).unwrap()).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn compatibility_check() {
        let state = TransferState::new("file.bin", 1000, 100, 10);
        assert!(state.compatible(1000, 100, 10));
        assert!(!state.compatible(1001, 100, 10));
        assert!(!state.compatible(1000, 200, 10));
        assert!(!state.compatible(1000, 100, 11));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::for_output(dir.path(), "file.bin");
        let mut state = TransferState::new("file.bin", 100, 10, 10);
        store.save(&mut state).await.unwrap();
        store.remove().await.unwrap();
        store.remove().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
