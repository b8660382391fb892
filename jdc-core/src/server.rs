//! Server transfer driver — the receiving state machine.
//!
//! One connection carries exactly one transfer. The server reads the
//! announcement, negotiates resume against its persisted state, then pulls
//! chunks in strictly ascending index order with a single outstanding
//! request, persisting the bitmap after every write. Verification and
//! completion close the session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunk::{self, TargetFile};
use crate::compress;
use crate::config::Config;
use crate::error::TransferError;
use crate::events::{ChunkProgress, EventSink, SessionInfo, SessionSummary};
use crate::hash;
use crate::net::{self, with_deadline};
use crate::protocol::resume::ResumeInfo;
use crate::protocol::wire::{FrameReader, FrameWriter};
use crate::protocol::{Command, HASH_VERIFIED};
use crate::rate::RateController;
use crate::retry::{RetryPolicy, cancellable_sleep};
use crate::state::{StateStore, TransferState};

type TcpFrameReader = FrameReader<OwnedReadHalf>;
type TcpFrameWriter = FrameWriter<OwnedWriteHalf>;

/// Listen on the configured address and serve transfers until cancelled.
///
/// Each connection runs in its own task; a failed transfer is reported and
/// does not stop the accept loop. On shutdown the loop stops accepting and
/// waits for in-flight sessions to persist their state and exit.
pub async fn run(
    cfg: Arc<Config>,
    sink: Arc<dyn EventSink>,
    token: CancellationToken,
) -> Result<(), TransferError> {
    let listener = TcpListener::bind(cfg.address.as_str()).await?;
    tracing::info!(address = %cfg.address, "listening");

    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tracing::debug!(%peer, "connection accepted");
                let cfg = Arc::clone(&cfg);
                let sink = Arc::clone(&sink);
                let token = token.child_token();
                sessions.spawn(async move {
                    if let Err(e) = handle_connection(stream, cfg, &*sink, token).await {
                        sink.error(e.kind(), &format!("session failed: {e}"));
                    }
                });
            }
            // Reap finished sessions so the set does not grow unbounded.
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    tracing::info!("shutting down; waiting for active sessions");
    while sessions.join_next().await.is_some() {}
    Ok(())
}

/// Drive a single accepted connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    cfg: Arc<Config>,
    sink: &dyn EventSink,
    token: CancellationToken,
) -> Result<(), TransferError> {
    net::configure_stream(&stream, cfg.buffer_size)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, cfg.buffer_size);
    let mut writer = FrameWriter::new(write_half, cfg.buffer_size);

    let first = match with_deadline(&token, cfg.timeout, reader.read_command()).await {
        Ok(cmd) => cmd,
        // A probe connection that opens and closes without a frame.
        Err(TransferError::ConnectionClosed) => return Ok(()),
        Err(e) => return Err(e),
    };

    match first {
        Command::Ping => serve_pings(&mut reader, &mut writer).await,
        Command::Init => {
            let mut session = ServerSession::new(reader, writer, cfg, sink, token);
            let result = session.run().await;
            if let Err(e) = &result {
                session.fail(e).await;
            }
            result
        }
        other => {
            let e = TransferError::UnexpectedCommand { expected: "Init", got: other.name() };
            send_error_frame(&mut writer, "unexpected opening command").await;
            Err(e)
        }
    }
}

/// Answer RTT probes until the profiler hangs up.
async fn serve_pings(
    reader: &mut TcpFrameReader,
    writer: &mut TcpFrameWriter,
) -> Result<(), TransferError> {
    loop {
        writer.write_command(Command::Pong).await?;
        writer.flush().await?;
        match reader.read_command().await {
            Ok(Command::Ping) => {}
            Ok(other) => {
                return Err(TransferError::UnexpectedCommand {
                    expected: "Ping",
                    got: other.name(),
                });
            }
            Err(TransferError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Best-effort terminal Error frame; the connection may already be gone.
async fn send_error_frame(writer: &mut TcpFrameWriter, message: &str) {
    let _ = writer.write_command(Command::Error).await;
    let _ = writer.write_line(message).await;
    let _ = writer.flush().await;
}

/// Reduce an announced filename to a bare basename, rejecting traversal.
fn sanitize_basename(raw: &str) -> Result<String, TransferError> {
    let candidate = raw.rsplit(['/', '\\']).next().unwrap_or("");
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(TransferError::InvalidFilename);
    }
    Ok(candidate.to_string())
}

// ── Session ──────────────────────────────────────────────────────

/// State for one receiving session, alive from `Init` to `Complete`.
struct ServerSession<'a> {
    reader: TcpFrameReader,
    writer: TcpFrameWriter,
    cfg: Arc<Config>,
    sink: &'a dyn EventSink,
    token: CancellationToken,
    policy: RetryPolicy,
    rate: RateController,
    /// Set once metadata is read; used by the failure path.
    store: Option<StateStore>,
    state: Option<TransferState>,
    output_path: Option<PathBuf>,
    started: Instant,
    bytes_written: u64,
}

impl<'a> ServerSession<'a> {
    fn new(
        reader: TcpFrameReader,
        writer: TcpFrameWriter,
        cfg: Arc<Config>,
        sink: &'a dyn EventSink,
        token: CancellationToken,
    ) -> Self {
        let policy = RetryPolicy::new(cfg.retries);
        let rate = RateController::new(cfg.adaptive_delay, cfg.min_delay, cfg.max_delay);
        Self {
            reader,
            writer,
            cfg,
            sink,
            token,
            policy,
            rate,
            store: None,
            state: None,
            output_path: None,
            started: Instant::now(),
            bytes_written: 0,
        }
    }

    /// Drive the session from metadata to completion. The `Init` command
    /// byte has already been read.
    async fn run(&mut self) -> Result<(), TransferError> {
        let token = self.token.clone();
        let timeout = self.cfg.timeout;

        // 1. Metadata.
        let (filename, file_size, client_wants_verify) =
            with_deadline(&token, timeout, async {
                let filename = self.reader.read_line().await?;
                let file_size = self.reader.read_i64().await?;
                let verify = self.reader.read_bool().await?;
                Ok((filename, file_size, verify))
            })
            .await?;
        if file_size <= 0 {
            return Err(TransferError::SizeOutOfRange { value: file_size, max: u64::MAX });
        }
        let file_size = file_size as u64;
        let basename = sanitize_basename(&filename)?;

        // 2. Grid + prior state.
        let chunk_size = self.cfg.chunk_size;
        let num_chunks = chunk::num_chunks(file_size, chunk_size);
        let store = StateStore::for_output(&self.cfg.output_dir, &basename);
        let mut resuming = false;
        let mut state = match store.load().await? {
            Some(prior) if prior.compatible(file_size, chunk_size, num_chunks) => {
                resuming = prior.completed() > 0;
                prior
            }
            Some(_) => {
                tracing::info!("prior state incompatible with this request; starting fresh");
                TransferState::new(&basename, file_size, chunk_size, num_chunks)
            }
            None => TransferState::new(&basename, file_size, chunk_size, num_chunks),
        };
        let output_path = self.cfg.output_dir.join(&basename);
        self.output_path = Some(output_path.clone());

        // 3. Offer resume.
        let offer = if resuming {
            ResumeInfo::from_bitmap(&state.chunks_received, chunk_size)
        } else {
            ResumeInfo::fresh()
        };
        offer.write_to(&mut self.writer).await?;
        self.writer.flush().await?;

        // 4. Acknowledgement.
        let accept = with_deadline(&token, timeout, async {
            match self.reader.read_command().await? {
                Command::ResumeAck => Ok(self.reader.read_byte().await? == 1),
                other => Err(TransferError::UnexpectedCommand {
                    expected: "ResumeAck",
                    got: other.name(),
                }),
            }
        })
        .await?;
        if resuming && !accept {
            tracing::info!("client rejected resume; discarding partial file");
            match tokio::fs::remove_file(&output_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(TransferError::fs("discard partial file", e)),
            }
            store.remove().await?;
            state = TransferState::new(&basename, file_size, chunk_size, num_chunks);
            resuming = false;
        }

        // 5. Output file.
        let target = TargetFile::open(&output_path).await?;
        if !resuming {
            if let Err(e) = target.preallocate(file_size).await {
                tracing::warn!(error = %e, "preallocation failed; continuing");
            }
        }

        self.sink.session_started(&SessionInfo {
            filename: basename.clone(),
            file_size,
            chunk_size,
            num_chunks,
            completed_chunks: state.completed(),
            resuming,
        });
        self.store = Some(store);
        self.state = Some(state);

        // 6. Chunk pull loop.
        for index in 0..num_chunks {
            if self.state.as_ref().is_some_and(|s| s.chunks_received[index as usize]) {
                continue;
            }
            let pacing = self.rate.delay(self.cfg.chunk_delay);
            cancellable_sleep(&token, pacing).await?;

            let (offset, span_len) = chunk::chunk_span(index, file_size, chunk_size);
            let data = self.pull_chunk(offset, span_len).await?;
            target.write_chunk(data, offset).await?;
            self.bytes_written += span_len as u64;

            // Save happens-before the next Request goes out.
            let state = self.state.as_mut().expect("state set before chunk loop");
            state.chunks_received[index as usize] = true;
            self.store.as_ref().expect("store set before chunk loop").save(state).await?;

            self.sink.chunk_progress(&ChunkProgress {
                chunk_index: index,
                num_chunks,
                bytes_done: self.bytes_written,
                file_size,
                rate_bps: self.rate.average_rate(),
            });
        }
        target.sync().await?;

        // 7. Optional integrity handshake.
        if self.cfg.verify_hash && client_wants_verify {
            self.verify(&output_path, file_size).await?;
        }

        // 8. Finish.
        self.store.as_ref().expect("store set before completion").remove().await?;
        self.writer.write_command(Command::Complete).await?;
        self.writer.flush().await?;

        self.sink.session_ended(&SessionSummary {
            success: true,
            bytes_transferred: self.bytes_written,
            elapsed: self.started.elapsed(),
        });
        Ok(())
    }

    /// Request one chunk and read its `Data` frame, retrying per policy.
    /// A retry re-sends the same request for the same offset.
    async fn pull_chunk(&mut self, offset: u64, span_len: usize) -> Result<Bytes, TransferError> {
        let token = self.token.clone();
        let mut attempt = 1u32;
        loop {
            let started = Instant::now();
            let result = self.request_once(&token, offset, span_len).await;
            match result {
                Ok(data) => {
                    self.rate.observe(span_len as u64, started.elapsed());
                    return Ok(data);
                }
                Err(e) if self.policy.should_retry(attempt, &e) => {
                    tracing::warn!(attempt, error = %e, "chunk attempt failed; retrying");
                    attempt += 1;
                    cancellable_sleep(&token, self.policy.backoff(attempt)).await?;
                }
                Err(e) if e.is_retryable() => return Err(self.policy.exhausted(e)),
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(
        &mut self,
        token: &CancellationToken,
        offset: u64,
        span_len: usize,
    ) -> Result<Bytes, TransferError> {
        self.writer.write_command(Command::Request).await?;
        self.writer.write_i64(offset as i64).await?;
        self.writer.flush().await?;

        let chunk_size = self.cfg.chunk_size;
        with_deadline(token, self.cfg.timeout, async {
            match self.reader.read_command().await? {
                Command::Data => {}
                Command::Error => {
                    let message = self.reader.read_line().await?;
                    return Err(TransferError::Remote(message));
                }
                other => {
                    return Err(TransferError::UnexpectedCommand {
                        expected: "Data",
                        got: other.name(),
                    });
                }
            }

            let size = self.reader.read_i64().await?;
            if size <= 0 || size as u64 > chunk_size {
                return Err(TransferError::SizeOutOfRange { value: size, max: chunk_size });
            }
            // Anything other than the requested span would tear the grid.
            if size as usize != span_len {
                return Err(TransferError::SizeOutOfRange { value: size, max: span_len as u64 });
            }
            let size = size as usize;

            match self.reader.read_byte().await? {
                1 => {
                    let compressed_size = self.reader.read_i64().await?;
                    if compressed_size <= 0 || compressed_size as u64 > 2 * chunk_size {
                        return Err(TransferError::SizeOutOfRange {
                            value: compressed_size,
                            max: 2 * chunk_size,
                        });
                    }
                    let compressed = self.reader.read_block(compressed_size as usize).await?;
                    compress::decompress_chunk(&compressed, size)
                }
                0 => self.reader.read_block(size).await,
                _ => Err(TransferError::MalformedField("compression flag")),
            }
        })
        .await
    }

    /// Three-frame hash handshake. On mismatch the output file and state
    /// are destroyed before the error surfaces.
    async fn verify(&mut self, output_path: &std::path::Path, file_size: u64) -> Result<(), TransferError> {
        let token = self.token.clone();
        let algorithm = hash::select_algorithm(file_size);
        tracing::debug!(algorithm = %algorithm, "starting hash handshake");

        self.writer.write_command(Command::HashAlgo).await?;
        self.writer.write_line(algorithm.as_str()).await?;
        self.writer.write_command(Command::Hash).await?;
        self.writer.write_line("").await?;
        self.writer.flush().await?;

        let client_hex = with_deadline(&token, self.cfg.hash_timeout(), async {
            match self.reader.read_command().await? {
                Command::Hash => self.reader.read_line().await,
                Command::Error => {
                    let message = self.reader.read_line().await?;
                    Err(TransferError::Remote(message))
                }
                other => Err(TransferError::UnexpectedCommand {
                    expected: "Hash",
                    got: other.name(),
                }),
            }
        })
        .await?;

        let local_hex =
            hash::hash_file(output_path, algorithm, hash::DEFAULT_HASH_BUFFER, &token).await?;

        if client_hex == local_hex {
            self.writer.write_command(Command::Hash).await?;
            self.writer.write_line(HASH_VERIFIED).await?;
            self.writer.flush().await?;
            tracing::info!(algorithm = %algorithm, "integrity verified");
            return Ok(());
        }

        let message = format!(
            "Hash mismatch ({algorithm}): source={client_hex}, received={local_hex}"
        );
        send_error_frame(&mut self.writer, &message).await;
        if let Err(e) = tokio::fs::remove_file(output_path).await {
            tracing::warn!(error = %e, "could not delete corrupt output");
        }
        if let Some(store) = &self.store {
            let _ = store.remove().await;
        }
        Err(TransferError::HashMismatch {
            algorithm,
            expected: client_hex,
            actual: local_hex,
        })
    }

    /// Failure path: persist what we have, tell the peer, and report.
    async fn fail(&mut self, error: &TransferError) {
        if !matches!(error, TransferError::HashMismatch { .. }) {
            if let (Some(store), Some(state)) = (&self.store, &mut self.state) {
                if let Err(e) = store.save(state).await {
                    tracing::warn!(error = %e, "could not persist state on failure");
                }
            }
            send_error_frame(&mut self.writer, &format!("transfer failed: {}", error.kind()))
                .await;
        }
        self.sink.session_ended(&SessionSummary {
            success: false,
            bytes_transferred: self.bytes_written,
            elapsed: self.started.elapsed(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_sanitization() {
        assert_eq!(sanitize_basename("report.csv").unwrap(), "report.csv");
        assert_eq!(sanitize_basename("/var/data/report.csv").unwrap(), "report.csv");
        assert_eq!(sanitize_basename("C:\\data\\report.csv").unwrap(), "report.csv");
        assert_eq!(sanitize_basename("../../etc/passwd").unwrap(), "passwd");

        assert!(sanitize_basename("").is_err());
        assert!(sanitize_basename("..").is_err());
        assert!(sanitize_basename(".").is_err());
        assert!(sanitize_basename("dir/").is_err());
        assert!(sanitize_basename("/").is_err());
    }
}
