//! JustDataCopier — entry point.
//!
//! ```text
//! jdc --server --output-dir /data              Receive files into /data
//! jdc --file big.iso --connect host:9876       Send a file
//! jdc --gen-config                             Print default config TOML
//! jdc --config jdc.toml --file big.iso         Config file + overrides
//! ```
//!
//! Exit codes: 0 success, 1 fatal error, 130 cancelled by signal.

mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jdc_core::config::{Config, DEFAULT_BUFFER_SIZE, DEFAULT_CHUNK_SIZE, Role};
use jdc_core::error::TransferError;
use jdc_core::events::{EventSink, TracingSink};
use jdc_core::{client, server};

use crate::progress::ProgressSink;

const EXIT_CANCELLED: u8 = 130;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "jdc", about = "Point-to-point large-file copier over TCP")]
struct Cli {
    /// Run as the receiving server.
    #[arg(long)]
    server: bool,

    /// Address to listen on (server role).
    #[arg(long)]
    listen: Option<String>,

    /// Server address to connect to (client role).
    #[arg(long)]
    connect: Option<String>,

    /// Destination directory for received files (server role).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// File to send (client role).
    #[arg(long)]
    file: Option<PathBuf>,

    /// Bytes per chunk. Must match on both endpoints.
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Socket and I/O buffer size in bytes.
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Worker threads for the runtime.
    #[arg(long)]
    workers: Option<usize>,

    /// Compress text-like files per chunk.
    #[arg(long)]
    compress: bool,

    /// Opt out of the end-to-end hash verification.
    #[arg(long)]
    no_verify: bool,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// Per-operation timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum attempts per chunk.
    #[arg(long)]
    retries: Option<u32>,

    /// Base inter-chunk delay in milliseconds.
    #[arg(long)]
    chunk_delay_ms: Option<u64>,

    /// Enable adaptive delay pacing.
    #[arg(long)]
    adaptive: bool,

    /// Adaptive delay lower bound in milliseconds.
    #[arg(long)]
    min_delay_ms: Option<u64>,

    /// Adaptive delay upper bound in milliseconds.
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Path to a configuration TOML file.
    #[arg(long, default_value = "jdc.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Config file ──────────────────────────────────────────────────

/// TOML-facing configuration. Durations are plain integers so the file
/// stays hand-editable; the CLI overrides any field it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct FileConfig {
    server: bool,
    listen: String,
    connect: String,
    output_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<PathBuf>,
    chunk_size: u64,
    buffer_size: usize,
    workers: usize,
    compress: bool,
    verify: bool,
    progress: bool,
    timeout_secs: u64,
    retries: u32,
    chunk_delay_ms: u64,
    adaptive_delay: bool,
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            server: false,
            listen: "0.0.0.0:9876".into(),
            connect: "127.0.0.1:9876".into(),
            output_dir: PathBuf::from("."),
            file: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: 4,
            compress: false,
            verify: true,
            progress: false,
            timeout_secs: 120,
            retries: 5,
            chunk_delay_ms: 0,
            adaptive_delay: false,
            min_delay_ms: 0,
            max_delay_ms: 1000,
        }
    }
}

impl FileConfig {
    /// Load from a TOML file, falling back to defaults.
    fn load(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Fold the command line on top and produce the engine config.
    fn merge(mut self, cli: &Cli) -> Config {
        self.server |= cli.server;
        if let Some(listen) = &cli.listen {
            self.listen = listen.clone();
        }
        if let Some(connect) = &cli.connect {
            self.connect = connect.clone();
        }
        if let Some(dir) = &cli.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(file) = &cli.file {
            self.file = Some(file.clone());
        }
        if let Some(v) = cli.chunk_size {
            self.chunk_size = v;
        }
        if let Some(v) = cli.buffer_size {
            self.buffer_size = v;
        }
        if let Some(v) = cli.workers {
            self.workers = v;
        }
        self.compress |= cli.compress;
        if cli.no_verify {
            self.verify = false;
        }
        self.progress |= cli.progress;
        if let Some(v) = cli.timeout {
            self.timeout_secs = v;
        }
        if let Some(v) = cli.retries {
            self.retries = v;
        }
        if let Some(v) = cli.chunk_delay_ms {
            self.chunk_delay_ms = v;
        }
        self.adaptive_delay |= cli.adaptive;
        if let Some(v) = cli.min_delay_ms {
            self.min_delay_ms = v;
        }
        if let Some(v) = cli.max_delay_ms {
            self.max_delay_ms = v;
        }

        let role = if self.server { Role::Server } else { Role::Client };
        Config {
            role,
            address: if self.server { self.listen } else { self.connect },
            output_dir: self.output_dir,
            file_path: self.file.unwrap_or_default(),
            chunk_size: self.chunk_size,
            buffer_size: self.buffer_size,
            workers: self.workers,
            compression: self.compress,
            verify_hash: self.verify,
            show_progress: self.progress,
            timeout: Duration::from_secs(self.timeout_secs),
            retries: self.retries,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            adaptive_delay: self.adaptive_delay,
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    if cli.gen_config {
        match toml::to_string_pretty(&FileConfig::default()) {
            Ok(text) => {
                println!("{text}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                tracing::error!("could not render default config: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let mut cfg = FileConfig::load(&cli.config).merge(&cli);
    if let Err(e) = cfg.validate() {
        tracing::error!(kind = e.kind(), "{e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.workers)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("could not start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(cfg))
}

async fn run(cfg: Config) -> ExitCode {
    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    let sink: Arc<dyn EventSink> = if cfg.show_progress {
        Arc::new(ProgressSink::new())
    } else {
        Arc::new(TracingSink::new())
    };

    let role = cfg.role;
    let cfg = Arc::new(cfg);
    let result = match role {
        Role::Server => server::run(cfg, Arc::clone(&sink), token.clone()).await,
        Role::Client => client::run(cfg, Arc::clone(&sink), token.clone()).await,
    };

    match result {
        Ok(()) if token.is_cancelled() => ExitCode::from(EXIT_CANCELLED),
        Ok(()) => ExitCode::SUCCESS,
        Err(TransferError::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Err(e) => {
            sink.error(e.kind(), &format!("fatal: {e}"));
            ExitCode::FAILURE
        }
    }
}

/// Cancel the root token on SIGINT (all platforms) or SIGTERM (unix).
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    tracing::warn!("could not install SIGTERM handler: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                    token.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("shutdown signal received; finishing current chunk");
        token.cancel();
    });
}
