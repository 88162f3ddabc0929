//! Chunked transfer engine
//!
//! Decides between single-shot and multipart uploads, plans part ranges,
//! drives parts through a bounded worker pool and aggregates progress:
//! - `plan`: decision gate and chunk planner
//! - `session`: multipart session state machine
//! - `executor`: bounded concurrent part execution
//! - `progress`: monotonic progress and throughput
//! - `orchestrator`: upload/download entry points and failure unwinding

pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::{PartExecutor, PartFailure};
pub use orchestrator::TransferOrchestrator;
pub use plan::{decide, plan};
pub use progress::ProgressAggregator;
pub use session::{MultipartSession, SessionStatus};
pub use types::{
    ChunkPart, ChunkPlan, DownloadRequest, PartResult, ProgressSnapshot, TransferRequest,
    TransferRoute, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_WORKERS, RATE_SAMPLE_INTERVAL_MS,
};
