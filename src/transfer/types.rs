//! Transfer request, plan and progress types

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{ProgressSink, TransferSource};

/// Default part size and single-shot threshold: 5 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of concurrent part uploads
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Minimum interval between throughput samples, in milliseconds
pub const RATE_SAMPLE_INTERVAL_MS: u64 = 500;

/// One upload call.
#[derive(Clone)]
pub struct TransferRequest {
    pub source: TransferSource,
    pub key: String,
    pub content_type: Option<String>,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl TransferRequest {
    pub fn new(source: TransferSource, key: impl Into<String>) -> Self {
        Self {
            source,
            key: key.into(),
            content_type: None,
            progress: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("source", &self.source)
            .field("key", &self.key)
            .field("content_type", &self.content_type)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// One download call.
#[derive(Clone)]
pub struct DownloadRequest {
    pub key: String,
    pub target: PathBuf,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl DownloadRequest {
    pub fn new(key: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            target: target.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Which path an upload takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRoute {
    SingleShot,
    Multipart,
}

impl std::fmt::Display for TransferRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferRoute::SingleShot => write!(f, "single_shot"),
            TransferRoute::Multipart => write!(f, "multipart"),
        }
    }
}

/// One contiguous byte range of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPart {
    /// 1-based
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Ordered, gapless split of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_size: u64,
    pub chunk_size: u64,
    pub parts: Vec<ChunkPart>,
}

impl ChunkPlan {
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn part_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.parts.iter().map(|p| p.part_number)
    }
}

/// Outcome of one successful part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResult {
    pub part_number: u32,
    pub etag: String,
    pub bytes_transferred: u64,
}

/// Progress as forwarded to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub rate_bytes_per_sec: f64,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> u32 {
        if self.total_bytes == 0 {
            return 100;
        }
        std::cmp::min(
            ((self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0) as u32,
            100,
        )
    }
}
