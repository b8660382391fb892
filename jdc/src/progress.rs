//! Progress renderer — an `EventSink` backed by an indicatif bar.
//!
//! Purely a collaborator: the engine emits per-chunk events and this sink
//! turns them into a byte-accurate bar with throughput and ETA.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use jdc_core::events::{ChunkProgress, EventSink, SessionInfo, SessionSummary};

pub struct ProgressSink {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self { bar: Mutex::new(None) }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
        )
        .expect("static template")
        .progress_chars("=> ")
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ProgressSink {
    fn session_started(&self, info: &SessionInfo) {
        let bar = ProgressBar::new(info.file_size);
        bar.set_style(Self::style());
        if info.resuming {
            bar.println(format!(
                "resuming: {} of {} chunks already present",
                info.completed_chunks, info.num_chunks
            ));
            let completed_bytes = (info.completed_chunks * info.chunk_size).min(info.file_size);
            bar.set_length(info.file_size - completed_bytes);
        }
        *self.bar.lock().unwrap() = Some(bar);
    }

    fn chunk_progress(&self, progress: &ChunkProgress) {
        if let Some(bar) = &*self.bar.lock().unwrap() {
            bar.set_position(progress.bytes_done.min(bar.length().unwrap_or(progress.file_size)));
        }
    }

    fn session_ended(&self, summary: &SessionSummary) {
        if let Some(bar) = self.bar.lock().unwrap().take() {
            if summary.success {
                bar.finish_with_message("done");
            } else {
                bar.abandon_with_message("interrupted");
            }
        }
    }

    fn error(&self, kind: &str, message: &str) {
        let guard = self.bar.lock().unwrap();
        match &*guard {
            Some(bar) => bar.println(format!("error [{kind}]: {message}")),
            None => eprintln!("error [{kind}]: {message}"),
        }
    }
}
