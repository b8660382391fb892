//! Injected event-sink capability.
//!
//! The engine never logs through module-global state; it reports lifecycle
//! and progress through an `Arc<dyn EventSink>` handed in by the caller.
//! [`TracingSink`] is the standard implementation; [`NullSink`] keeps tests
//! quiet.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Facts announced when a transfer session begins.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Basename of the file being transferred.
    pub filename: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub num_chunks: u64,
    /// Chunks already on disk when the session began (resume).
    pub completed_chunks: u64,
    /// Whether this session continues a prior partial transfer.
    pub resuming: bool,
}

/// Per-chunk progress sample.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProgress {
    pub chunk_index: u64,
    pub num_chunks: u64,
    pub bytes_done: u64,
    pub file_size: u64,
    /// Smoothed throughput estimate in bytes/second, zero if unknown.
    pub rate_bps: u64,
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub success: bool,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
}

/// Capability the engine uses to surface events to its host.
///
/// `chunk_progress` fires for every chunk; implementations are expected to
/// rate-limit their own output.
pub trait EventSink: Send + Sync {
    fn session_started(&self, info: &SessionInfo);
    fn chunk_progress(&self, progress: &ChunkProgress);
    fn session_ended(&self, summary: &SessionSummary);
    /// Categorized error report. `kind` is a stable label from
    /// [`crate::error::TransferError::kind`]; `message` must already be safe
    /// for shared logs.
    fn error(&self, kind: &str, message: &str);
}

// ── NullSink ─────────────────────────────────────────────────────

/// Sink that discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn session_started(&self, _info: &SessionInfo) {}
    fn chunk_progress(&self, _progress: &ChunkProgress) {}
    fn session_ended(&self, _summary: &SessionSummary) {}
    fn error(&self, _kind: &str, _message: &str) {}
}

// ── TracingSink ──────────────────────────────────────────────────

/// Sink that forwards events to `tracing`, throttling progress lines.
///
/// Filenames appear only at debug level; info-level lines carry counts and
/// rates so they are safe for shared log aggregation.
pub struct TracingSink {
    last_progress: Mutex<Option<Instant>>,
    progress_interval: Duration,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(2))
    }

    pub fn with_interval(progress_interval: Duration) -> Self {
        Self { last_progress: Mutex::new(None), progress_interval }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for TracingSink {
    fn session_started(&self, info: &SessionInfo) {
        tracing::debug!(filename = %info.filename, "transfer session starting");
        tracing::info!(
            file_size = info.file_size,
            chunk_size = info.chunk_size,
            num_chunks = info.num_chunks,
            resuming = info.resuming,
            "transfer session started"
        );
    }

    fn chunk_progress(&self, progress: &ChunkProgress) {
        let mut last = self.last_progress.lock().unwrap();
        let due = match *last {
            Some(at) => at.elapsed() >= self.progress_interval,
            None => true,
        };
        let final_chunk = progress.chunk_index + 1 == progress.num_chunks;
        if due || final_chunk {
            *last = Some(Instant::now());
            tracing::info!(
                chunk = progress.chunk_index + 1,
                of = progress.num_chunks,
                bytes = progress.bytes_done,
                rate_bps = progress.rate_bps,
                "progress"
            );
        }
    }

    fn session_ended(&self, summary: &SessionSummary) {
        if summary.success {
            tracing::info!(
                bytes = summary.bytes_transferred,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "transfer complete"
            );
        } else {
            tracing::warn!(
                bytes = summary.bytes_transferred,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "transfer ended without completing"
            );
        }
    }

    fn error(&self, kind: &str, message: &str) {
        tracing::error!(kind, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_sink_throttles_progress() {
        let sink = TracingSink::with_interval(Duration::from_secs(3600));
        let progress = ChunkProgress {
            chunk_index: 0,
            num_chunks: 10,
            bytes_done: 1,
            file_size: 10,
            rate_bps: 0,
        };
        // First call records a timestamp; the immediate second call is
        // within the interval and must not update it.
        sink.chunk_progress(&progress);
        let first = sink.last_progress.lock().unwrap().unwrap();
        sink.chunk_progress(&progress);
        assert_eq!(*sink.last_progress.lock().unwrap(), Some(first));
    }

    #[test]
    fn final_chunk_always_reported() {
        let sink = TracingSink::with_interval(Duration::from_secs(3600));
        sink.chunk_progress(&ChunkProgress {
            chunk_index: 0,
            num_chunks: 10,
            bytes_done: 1,
            file_size: 10,
            rate_bps: 0,
        });
        let first = sink.last_progress.lock().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        // Final chunk bypasses the throttle and refreshes the timestamp.
        sink.chunk_progress(&ChunkProgress {
            chunk_index: 9,
            num_chunks: 10,
            bytes_done: 10,
            file_size: 10,
            rate_bps: 0,
        });
        assert_ne!(*sink.last_progress.lock().unwrap(), Some(first));
    }
}
