//! Download progress reporting.

use tracing::{debug, info};

/// Receives progress for one file transfer at a time.
pub trait ProgressSink {
    /// A transfer of `label` is starting; `total` is known for HTTP with a
    /// Content-Length and for local copies.
    fn start(&mut self, label: &str, total: Option<u64>);

    /// `done` bytes have been transferred so far.
    fn update(&mut self, done: u64);

    fn finish(&mut self);
}

/// Discards all progress.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&mut self, _label: &str, _total: Option<u64>) {}
    fn update(&mut self, _done: u64) {}
    fn finish(&mut self) {}
}

/// Reports progress through `tracing`, at most once per decile of the total.
#[derive(Debug, Default)]
pub struct LogProgress {
    label: String,
    total: Option<u64>,
    done: u64,
    last_decile: u64,
}

impl ProgressSink for LogProgress {
    fn start(&mut self, label: &str, total: Option<u64>) {
        self.label = label.to_string();
        self.total = total;
        self.done = 0;
        self.last_decile = 0;
        info!(file = %label, bytes = ?total, "retrieving");
    }

    fn update(&mut self, done: u64) {
        self.done = done;
        if let Some(total) = self.total.filter(|t| *t > 0) {
            let decile = done.saturating_mul(10) / total;
            if decile > self.last_decile {
                self.last_decile = decile;
                debug!(file = %self.label, percent = decile * 10, "progress");
            }
        }
    }

    fn finish(&mut self) {
        info!(file = %self.label, bytes = self.done, "retrieved");
    }
}
