//! Instrumented in-memory backend for engine tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{CompletedPart, MultipartHandle, ProgressSink, StorageBackend, TransferSource};
use crate::error::{TransferError, TransferResult};

#[derive(Default)]
struct Calls {
    init: usize,
    abort: usize,
    whole_uploads: Vec<(String, u64, Option<String>)>,
    downloads: Vec<String>,
    parts: Vec<(u32, usize)>,
    completed: Vec<Vec<CompletedPart>>,
}

pub(crate) struct MockBackend {
    calls: Mutex<Calls>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    part_delay: Duration,
    part_failures: HashMap<u32, (Duration, TransferError)>,
    fail_init: bool,
    fail_abort: bool,
    fail_complete: bool,
    download_body: Vec<u8>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Calls::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            part_delay: Duration::from_millis(0),
            part_failures: HashMap::new(),
            fail_init: false,
            fail_abort: false,
            fail_complete: false,
            download_body: Vec::new(),
        }
    }

    pub(crate) fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = delay;
        self
    }

    /// Fail `part_number` with `error` after `delay`.
    pub(crate) fn fail_part(mut self, part_number: u32, delay: Duration, error: TransferError) -> Self {
        self.part_failures.insert(part_number, (delay, error));
        self
    }

    pub(crate) fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub(crate) fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub(crate) fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub(crate) fn with_download_body(mut self, body: Vec<u8>) -> Self {
        self.download_body = body;
        self
    }

    pub(crate) fn init_count(&self) -> usize {
        self.calls.lock().unwrap().init
    }

    pub(crate) fn abort_count(&self) -> usize {
        self.calls.lock().unwrap().abort
    }

    pub(crate) fn completed_calls(&self) -> Vec<Vec<CompletedPart>> {
        self.calls.lock().unwrap().completed.clone()
    }

    pub(crate) fn whole_uploads(&self) -> Vec<(String, u64, Option<String>)> {
        self.calls.lock().unwrap().whole_uploads.clone()
    }

    pub(crate) fn downloads(&self) -> Vec<String> {
        self.calls.lock().unwrap().downloads.clone()
    }

    /// (part_number, byte length) of every upload_part call, in call order.
    pub(crate) fn part_calls(&self) -> Vec<(u32, usize)> {
        self.calls.lock().unwrap().parts.clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload_whole(
        &self,
        source: &TransferSource,
        key: &str,
        content_type: Option<&str>,
        progress: Option<&dyn ProgressSink>,
    ) -> TransferResult<String> {
        let data = source.read_all().await?;
        let total = data.len() as u64;
        if let Some(sink) = progress {
            sink.on_progress(0, total);
            sink.on_progress(total, total);
        }
        self.calls.lock().unwrap().whole_uploads.push((
            key.to_string(),
            total,
            content_type.map(str::to_string),
        ));
        Ok(format!("mock://bucket/{}", key))
    }

    async fn download_whole(
        &self,
        key: &str,
        target: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> TransferResult<()> {
        let total = self.download_body.len() as u64;
        let mut written = 0u64;
        for chunk in self.download_body.chunks(4) {
            written += chunk.len() as u64;
            if let Some(sink) = progress {
                sink.on_progress(written, total);
            }
        }
        tokio::fs::write(target, &self.download_body)
            .await
            .map_err(|e| TransferError::io(target.display().to_string(), &e))?;
        self.calls.lock().unwrap().downloads.push(key.to_string());
        Ok(())
    }

    async fn init_multipart(
        &self,
        key: &str,
        _content_type: Option<&str>,
    ) -> TransferResult<MultipartHandle> {
        if self.fail_init {
            return Err(TransferError::BackendAuthentication {
                message: "init rejected".to_string(),
            });
        }
        let mut calls = self.calls.lock().unwrap();
        calls.init += 1;
        Ok(MultipartHandle {
            upload_id: format!("upload-{}", calls.init),
            key: key.to_string(),
            bucket: "bucket".to_string(),
        })
    }

    async fn upload_part(
        &self,
        _handle: &MultipartHandle,
        part_number: u32,
        data: Vec<u8>,
    ) -> TransferResult<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .parts
            .push((part_number, data.len()));

        let result = match self.part_failures.get(&part_number) {
            Some((delay, error)) => {
                tokio::time::sleep(*delay).await;
                Err(error.clone())
            }
            None => {
                tokio::time::sleep(self.part_delay).await;
                Ok(format!("\"etag-{}\"", part_number))
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: &[CompletedPart],
    ) -> TransferResult<String> {
        if self.fail_complete {
            return Err(TransferError::backend(
                "Complete multipart upload",
                "InvalidPart",
            ));
        }
        self.calls.lock().unwrap().completed.push(parts.to_vec());
        Ok(format!("mock://{}/{}", handle.bucket, handle.key))
    }

    async fn abort_multipart(&self, _handle: &MultipartHandle) -> TransferResult<()> {
        self.calls.lock().unwrap().abort += 1;
        if self.fail_abort {
            return Err(TransferError::BackendConnection {
                message: "abort timed out".to_string(),
            });
        }
        Ok(())
    }
}
