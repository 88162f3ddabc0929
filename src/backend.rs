//! Storage backend capability consumed by the transfer engine.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{TransferError, TransferResult};
use crate::transfer::types::ProgressSnapshot;

/// Receives progress for one transfer.
///
/// Backends call `on_progress` with cumulative values. The orchestrator
/// forwards full snapshots through `on_snapshot`, which by default drops
/// the rate and calls `on_progress`.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, transferred: u64, total: u64);

    fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
        self.on_progress(snapshot.bytes_transferred, snapshot.total_bytes);
    }
}

impl<F> ProgressSink for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, transferred: u64, total: u64) {
        self(transferred, total)
    }
}

/// Where upload bytes come from.
#[derive(Debug, Clone)]
pub enum TransferSource {
    /// Local file, opened once per part.
    File(PathBuf),
    /// In-memory payload.
    Memory(Arc<Vec<u8>>),
}

impl TransferSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        TransferSource::File(path.into())
    }

    pub fn memory(data: Vec<u8>) -> Self {
        TransferSource::Memory(Arc::new(data))
    }

    /// Human-readable label for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            TransferSource::File(path) => path.display().to_string(),
            TransferSource::Memory(data) => format!("<memory:{} bytes>", data.len()),
        }
    }

    /// Content type guessed from a file source's extension. Memory sources
    /// carry no name and yield `None`.
    pub fn guess_content_type(&self) -> Option<String> {
        match self {
            TransferSource::File(path) => mime_guess::from_path(path).first_raw().map(str::to_string),
            TransferSource::Memory(_) => None,
        }
    }

    /// Payload size; fails with `SourceNotFound` if the file is missing.
    pub async fn size(&self) -> TransferResult<u64> {
        match self {
            TransferSource::File(path) => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|_| TransferError::SourceNotFound {
                        path: path.display().to_string(),
                    })?;
                if !metadata.is_file() {
                    return Err(TransferError::SourceNotFound {
                        path: path.display().to_string(),
                    });
                }
                Ok(metadata.len())
            }
            TransferSource::Memory(data) => Ok(data.len() as u64),
        }
    }

    /// Read `length` bytes at `offset`. Files are opened fresh for each call
    /// so no handle is shared between workers.
    pub async fn read_range(&self, offset: u64, length: u64) -> TransferResult<Vec<u8>> {
        match self {
            TransferSource::File(path) => read_file_range(path, offset, length).await,
            TransferSource::Memory(data) => {
                let start = offset as usize;
                let end = start.saturating_add(length as usize);
                data.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
                    TransferError::invalid(format!(
                        "range {}..{} outside payload of {} bytes",
                        start,
                        end,
                        data.len()
                    ))
                })
            }
        }
    }

    /// Whole payload as bytes.
    pub async fn read_all(&self) -> TransferResult<Vec<u8>> {
        match self {
            TransferSource::File(path) => tokio::fs::read(path)
                .await
                .map_err(|e| TransferError::io(path.display().to_string(), &e)),
            TransferSource::Memory(data) => Ok(data.as_ref().clone()),
        }
    }
}

async fn read_file_range(path: &Path, offset: u64, length: u64) -> TransferResult<Vec<u8>> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

    let label = path.display().to_string();
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|_| TransferError::SourceNotFound {
            path: label.clone(),
        })?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| TransferError::io(label.clone(), &e))?;

    let mut buffer = vec![0u8; length as usize];
    file.read_exact(&mut buffer)
        .await
        .map_err(|e| TransferError::io(label, &e))?;
    Ok(buffer)
}

/// Backend-side identity of one multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartHandle {
    pub upload_id: String,
    pub key: String,
    pub bucket: String,
}

/// Part entry submitted at completion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Single-shot and multipart operations of one storage backend.
///
/// Implementations translate vendor errors into [`TransferError`] before
/// returning, and normalize vendor progress callbacks into
/// [`ProgressSink::on_progress`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short provider name for logs ("aws", "aliyun", "gateway").
    fn name(&self) -> &str;

    /// Upload the whole source in one call. Returns the object reference (URL).
    async fn upload_whole(
        &self,
        source: &TransferSource,
        key: &str,
        content_type: Option<&str>,
        progress: Option<&dyn ProgressSink>,
    ) -> TransferResult<String>;

    /// Stream the object at `key` into `target`.
    async fn download_whole(
        &self,
        key: &str,
        target: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> TransferResult<()>;

    async fn init_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> TransferResult<MultipartHandle>;

    /// Upload one part; returns its completion token. Called concurrently
    /// for different part numbers of the same upload.
    async fn upload_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        data: Vec<u8>,
    ) -> TransferResult<String>;

    /// Finalize the upload. `parts` is sorted by ascending part number.
    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: &[CompletedPart],
    ) -> TransferResult<String>;

    /// Discard the upload and its parts. Must succeed if the upload is
    /// already gone.
    async fn abort_multipart(&self, handle: &MultipartHandle) -> TransferResult<()>;
}
