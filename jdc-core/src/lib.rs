//! # jdc-core
//!
//! Core transfer engine for JustDataCopier: a point-to-point large-file
//! copier over one persistent TCP connection.
//!
//! This crate contains:
//! - **Protocol**: command vocabulary and the line/block framing codec
//! - **Server driver**: resume negotiation, ordered chunk pulls, durable
//!   `TransferState`, hash handshake
//! - **Client driver**: file announcement and the reactive send loop
//! - **Chunk I/O**: positional reads/writes and preallocation
//! - **Compression**: per-chunk deflate with an extension-based policy
//! - **Hashing**: size-thresholded algorithm selection, streaming digests
//! - **Rate control**: exponentially-smoothed adaptive pacing
//! - **Profiler**: RTT sampling and chunk-size recommendation
//! - **Error**: `TransferError` — typed, `thiserror`-based hierarchy

pub mod chunk;
pub mod client;
pub mod compress;
pub mod config;
pub mod error;
pub mod events;
pub mod hash;
pub mod net;
pub mod profiler;
pub mod protocol;
pub mod rate;
pub mod retry;
pub mod server;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::{Config, Role};
pub use error::TransferError;
pub use events::{ChunkProgress, EventSink, NullSink, SessionInfo, SessionSummary, TracingSink};
pub use hash::{HashAlgorithm, select_algorithm};
pub use protocol::Command;
pub use state::{STATE_SUFFIX, TransferState};
