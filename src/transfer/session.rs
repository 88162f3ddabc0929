//! Multipart session state machine

use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{CompletedPart, MultipartHandle, StorageBackend};
use crate::error::{TransferError, TransferResult};

use super::types::{ChunkPlan, PartResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initialized,
    PartsInFlight,
    Completed,
    Aborted,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Aborted | SessionStatus::Failed
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Initialized => write!(f, "initialized"),
            SessionStatus::PartsInFlight => write!(f, "parts_in_flight"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Aborted => write!(f, "aborted"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

struct SessionState {
    status: SessionStatus,
    parts: BTreeMap<u32, String>,
}

/// State for one in-flight multipart upload.
///
/// Owned by a single orchestrator call. Part results arrive from concurrent
/// workers, so status and the part map sit behind one lock.
pub struct MultipartSession {
    backend: Arc<dyn StorageBackend>,
    handle: MultipartHandle,
    expected_parts: Vec<u32>,
    state: Mutex<SessionState>,
}

impl MultipartSession {
    /// Open a backend upload for `plan`. Nothing is retained on failure.
    pub async fn init(
        backend: Arc<dyn StorageBackend>,
        key: &str,
        content_type: Option<&str>,
        plan: &ChunkPlan,
    ) -> TransferResult<Self> {
        if plan.is_empty() {
            return Err(TransferError::protocol(
                "multipart session requires at least one part",
            ));
        }
        let handle = backend.init_multipart(key, content_type).await?;
        info!(
            "multipart_init: {} upload_id={} backend={} parts={}",
            handle.key,
            handle.upload_id,
            backend.name(),
            plan.part_count()
        );
        Ok(Self::from_handle(backend, handle, plan))
    }

    pub(crate) fn from_handle(
        backend: Arc<dyn StorageBackend>,
        handle: MultipartHandle,
        plan: &ChunkPlan,
    ) -> Self {
        Self {
            backend,
            handle,
            expected_parts: plan.part_numbers().collect(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Initialized,
                parts: BTreeMap::new(),
            }),
        }
    }

    pub fn handle(&self) -> &MultipartHandle {
        &self.handle
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn recorded_parts(&self) -> usize {
        self.lock().parts.len()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A poisoned lock only means a worker panicked mid-update; the map
        // itself is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Accept one part result. Rejects duplicates, unknown part numbers and
    /// anything after the session went terminal.
    pub fn record_part(&self, result: PartResult) -> TransferResult<()> {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return Err(TransferError::protocol(format!(
                "part {} submitted to {} session {}",
                result.part_number, state.status, self.handle.upload_id
            )));
        }
        if !self.expected_parts.contains(&result.part_number) {
            return Err(TransferError::protocol(format!(
                "part {} is not in the plan of {} parts",
                result.part_number,
                self.expected_parts.len()
            )));
        }
        if state.parts.contains_key(&result.part_number) {
            return Err(TransferError::protocol(format!(
                "duplicate result for part {}",
                result.part_number
            )));
        }
        state.parts.insert(result.part_number, result.etag);
        state.status = SessionStatus::PartsInFlight;
        Ok(())
    }

    /// Submit the sorted part list and finalize. On backend failure the
    /// session stays non-terminal so it can still be aborted.
    pub async fn complete(&self) -> TransferResult<String> {
        let parts: Vec<CompletedPart> = {
            let state = self.lock();
            if state.status.is_terminal() {
                return Err(TransferError::protocol(format!(
                    "complete called on {} session {}",
                    state.status, self.handle.upload_id
                )));
            }
            let missing: Vec<u32> = self
                .expected_parts
                .iter()
                .copied()
                .filter(|n| !state.parts.contains_key(n))
                .collect();
            if !missing.is_empty() {
                return Err(TransferError::protocol(format!(
                    "cannot complete upload {}: missing parts {:?}",
                    self.handle.upload_id, missing
                )));
            }
            // BTreeMap iterates in ascending part order.
            state
                .parts
                .iter()
                .map(|(part_number, etag)| CompletedPart {
                    part_number: *part_number,
                    etag: etag.clone(),
                })
                .collect()
        };

        let reference = self.backend.complete_multipart(&self.handle, &parts).await?;

        let mut state = self.lock();
        state.status = SessionStatus::Completed;
        info!(
            "multipart_complete: {} upload_id={} parts={}",
            self.handle.key,
            self.handle.upload_id,
            parts.len()
        );
        Ok(reference)
    }

    /// Best-effort cleanup. Backend failures are logged, never returned; the
    /// session ends `Aborted` on success and `Failed` otherwise. Calling it
    /// on a terminal session is a no-op.
    pub async fn abort(&self) -> SessionStatus {
        {
            let state = self.lock();
            if state.status.is_terminal() {
                return state.status;
            }
        }

        let outcome = self.backend.abort_multipart(&self.handle).await;

        let mut state = self.lock();
        state.status = match outcome {
            Ok(()) => {
                info!(
                    "multipart_abort: {} upload_id={} recorded_parts={}",
                    self.handle.key,
                    self.handle.upload_id,
                    state.parts.len()
                );
                SessionStatus::Aborted
            }
            Err(e) => {
                warn!(
                    "multipart_abort_failed: {} upload_id={} error={}",
                    self.handle.key, self.handle.upload_id, e
                );
                SessionStatus::Failed
            }
        };
        state.status
    }
}
