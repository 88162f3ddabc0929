//! Per-backend progress adapters
//!
//! Every adapter ends in the same cumulative `on_progress(transferred, total)`
//! call, whatever the backend natively reports.

use crate::backend::ProgressSink;

/// Accumulates streamed chunk deltas into cumulative progress.
pub struct StreamProgress<'a> {
    sink: Option<&'a dyn ProgressSink>,
    total: u64,
    transferred: u64,
}

impl<'a> StreamProgress<'a> {
    pub fn new(sink: Option<&'a dyn ProgressSink>, total: u64) -> Self {
        Self {
            sink,
            total,
            transferred: 0,
        }
    }

    pub fn start(&self) {
        if let Some(sink) = self.sink {
            sink.on_progress(0, self.total);
        }
    }

    pub fn advance(&mut self, delta: usize) {
        self.transferred += delta as u64;
        if let Some(sink) = self.sink {
            sink.on_progress(self.transferred, self.total);
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

/// Start/finish reporting for calls that expose no intermediate progress.
pub fn report_opaque(sink: Option<&dyn ProgressSink>, total: u64, done: bool) {
    if let Some(sink) = sink {
        sink.on_progress(if done { total } else { 0 }, total);
    }
}
