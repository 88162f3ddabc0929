//! Bounded concurrent part execution
//!
//! One task per plan entry, at most `max_workers` in flight. On the first
//! failure (or cancellation) no further parts are dispatched; parts already
//! running are awaited rather than killed, and their results are returned
//! alongside the first error.

use log::{debug, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{TransferError, TransferResult};

use super::types::{ChunkPart, ChunkPlan, PartResult};

/// Why a run stopped early.
#[derive(Debug)]
pub struct PartFailure {
    /// Part whose error stopped the run; `None` when cancelled.
    pub failed_part: Option<u32>,
    /// First error observed, or `TransferError::Cancelled`.
    pub error: TransferError,
    /// Parts that finished successfully before the run drained.
    pub completed: Vec<PartResult>,
}

pub struct PartExecutor {
    max_workers: usize,
    cancel: CancellationToken,
}

impl PartExecutor {
    pub fn new(max_workers: usize, cancel: CancellationToken) -> Self {
        Self {
            max_workers: max_workers.max(1),
            cancel,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `part_fn` for every part of `plan`. Completion order is
    /// unconstrained; results carry their part numbers.
    pub async fn run<F, Fut>(
        &self,
        plan: &ChunkPlan,
        part_fn: F,
    ) -> Result<Vec<PartResult>, PartFailure>
    where
        F: Fn(ChunkPart) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransferResult<PartResult>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let failed = Arc::new(AtomicBool::new(false));
        let first_error: Arc<Mutex<Option<(u32, TransferError)>>> = Arc::new(Mutex::new(None));
        let part_fn = Arc::new(part_fn);
        let mut handles = Vec::with_capacity(plan.part_count());

        for part in plan.parts.iter().copied() {
            if failed.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.cancel.cancelled() => break,
            };

            // A worker may have failed while we waited for the permit.
            if failed.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                break;
            }

            let part_fn = part_fn.clone();
            let failed = failed.clone();
            let first_error = first_error.clone();

            debug!(
                "part_dispatch: part={} offset={} length={}",
                part.part_number, part.offset, part.length
            );
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let result = (*part_fn)(part).await;
                if let Err(ref e) = result {
                    record_first_error(&first_error, part.part_number, e.clone());
                    failed.store(true, Ordering::SeqCst);
                }
                result
            });
            handles.push((part.part_number, handle));
        }

        let dispatched = handles.len();
        let mut completed = Vec::with_capacity(dispatched);
        for (part_number, handle) in handles {
            match handle.await {
                Ok(Ok(result)) => completed.push(result),
                Ok(Err(_)) => {}
                Err(e) => {
                    record_first_error(
                        &first_error,
                        part_number,
                        TransferError::protocol(format!("part {} worker failed: {}", part_number, e)),
                    );
                }
            }
        }

        let first = first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some((part_number, error)) = first {
            warn!(
                "part_run_failed: part={} dispatched={} completed={} error={}",
                part_number,
                dispatched,
                completed.len(),
                error
            );
            return Err(PartFailure {
                failed_part: Some(part_number),
                error,
                completed,
            });
        }

        if self.cancel.is_cancelled() {
            debug!(
                "part_run_cancelled: dispatched={} completed={}",
                dispatched,
                completed.len()
            );
            return Err(PartFailure {
                failed_part: None,
                error: TransferError::Cancelled,
                completed,
            });
        }

        Ok(completed)
    }
}

fn record_first_error(
    slot: &Mutex<Option<(u32, TransferError)>>,
    part_number: u32,
    error: TransferError,
) {
    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_none() {
        *slot = Some((part_number, error));
    }
}
