//! Progress aggregation across part workers

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::backend::ProgressSink;

use super::types::{ProgressSnapshot, RATE_SAMPLE_INTERVAL_MS};

struct AggregatorState {
    total_bytes: u64,
    raw_transferred: u64,
    reported: u64,
    last_sample_at: Instant,
    last_sample_bytes: u64,
    rate: f64,
}

/// Folds per-part byte deltas into one monotonic total and a throughput
/// estimate, forwarding each update to the caller's sink.
///
/// Updates are serialized by a single lock and the sink is invoked while
/// it is held, so the sink observes non-decreasing values. Sinks must not
/// call back into the aggregator.
pub struct ProgressAggregator {
    state: Mutex<AggregatorState>,
    sink: Option<Arc<dyn ProgressSink>>,
    sample_interval: Duration,
}

impl ProgressAggregator {
    pub fn new(total_bytes: u64, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                total_bytes,
                raw_transferred: 0,
                reported: 0,
                last_sample_at: Instant::now(),
                last_sample_bytes: 0,
                rate: 0.0,
            }),
            sink,
            sample_interval: Duration::from_millis(RATE_SAMPLE_INTERVAL_MS),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `delta` bytes reported by `part_number`.
    pub fn on_part_progress(&self, part_number: u32, delta: u64) {
        let mut state = self.lock();
        state.raw_transferred = state.raw_transferred.saturating_add(delta);
        log::trace!(
            "progress_part: part={} delta={} raw={}",
            part_number,
            delta,
            state.raw_transferred
        );
        self.publish(&mut state);
    }

    /// Record a cumulative value from a backend that reports totals rather
    /// than deltas. A changed non-zero `total` replaces the known total; an
    /// unknown total (0) grows with `transferred`.
    pub fn record_absolute(&self, transferred: u64, total: u64) {
        let mut state = self.lock();
        if total > 0 {
            state.total_bytes = total;
        } else if transferred > state.total_bytes {
            state.total_bytes = transferred;
        }
        state.raw_transferred = std::cmp::max(state.raw_transferred, transferred);
        self.publish(&mut state);
    }

    /// Report the transfer as fully done. The rate is left alone unless a
    /// full sample window has passed.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.raw_transferred = state.total_bytes;
        self.publish(&mut state);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        ProgressSnapshot {
            bytes_transferred: state.reported,
            total_bytes: state.total_bytes,
            rate_bytes_per_sec: state.rate,
        }
    }

    fn publish(&self, state: &mut AggregatorState) {
        // Clamp against double-counted retries and never move backwards.
        let clamped = std::cmp::max(
            std::cmp::min(state.raw_transferred, state.total_bytes),
            state.reported,
        );
        state.reported = clamped;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_sample_at);
        if elapsed >= self.sample_interval {
            let sampled = clamped.saturating_sub(state.last_sample_bytes);
            state.rate = sampled as f64 / elapsed.as_secs_f64();
            state.last_sample_at = now;
            state.last_sample_bytes = clamped;
        }

        if let Some(sink) = &self.sink {
            sink.on_snapshot(&ProgressSnapshot {
                bytes_transferred: clamped,
                total_bytes: state.total_bytes,
                rate_bytes_per_sec: state.rate,
            });
        }
    }
}

impl ProgressSink for ProgressAggregator {
    fn on_progress(&self, transferred: u64, total: u64) {
        self.record_absolute(transferred, total);
    }
}
