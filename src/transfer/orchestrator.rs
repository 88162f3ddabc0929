//! Upload and download entry points
//!
//! Composes the decision gate, planner, session, executor and progress
//! aggregator. Owns failure unwinding: once a multipart session is open,
//! every failure path aborts it before the error reaches the caller.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backend::{ProgressSink, StorageBackend};
use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};

use super::executor::{PartExecutor, PartFailure};
use super::plan::{decide, plan};
use super::progress::ProgressAggregator;
use super::session::{MultipartSession, SessionStatus};
use super::types::{ChunkPart, ChunkPlan, DownloadRequest, PartResult, TransferRequest, TransferRoute};

pub struct TransferOrchestrator {
    backend: Arc<dyn StorageBackend>,
    config: TransferConfig,
    cancel: CancellationToken,
}

impl TransferOrchestrator {
    pub fn new(backend: Arc<dyn StorageBackend>, config: TransferConfig) -> TransferResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Token that cancels every transfer started by this orchestrator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Route for a payload of `size` bytes. Empty payloads and a disabled
    /// multipart switch always go single-shot.
    pub fn route_for(&self, size: u64) -> TransferRoute {
        if size == 0 || !self.config.multipart_enabled {
            return TransferRoute::SingleShot;
        }
        decide(size, self.config.chunk_size)
    }

    /// Upload `request.source` to `request.key` and return the backend's
    /// reference to the stored object.
    ///
    /// Without an explicit content type one is guessed from the file name.
    /// Multipart uploads run on their own task: dropping the returned future
    /// cancels that upload only, and the task still aborts the session after
    /// its in-flight parts drain.
    pub async fn upload(&self, mut request: TransferRequest) -> TransferResult<String> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let size = request.source.size().await?;
        if request.content_type.is_none() {
            request.content_type = request.source.guess_content_type();
        }
        let route = self.route_for(size);
        info!(
            "transfer_route: {} source={} size={} route={} backend={}",
            request.key,
            request.source.describe(),
            size,
            route,
            self.backend.name()
        );

        let aggregator = Arc::new(ProgressAggregator::new(size, request.progress.clone()));
        match route {
            TransferRoute::SingleShot => self.upload_single(&request, &aggregator).await,
            TransferRoute::Multipart => self.spawn_multipart(request, size, aggregator).await,
        }
    }

    async fn spawn_multipart(
        &self,
        request: TransferRequest,
        size: u64,
        aggregator: Arc<ProgressAggregator>,
    ) -> TransferResult<String> {
        let call = TransferOrchestrator {
            backend: self.backend.clone(),
            config: self.config.clone(),
            cancel: self.cancel.child_token(),
        };
        let _cancel_on_drop = call.cancel.clone().drop_guard();
        let key = request.key.clone();

        let task = tokio::spawn(async move { call.upload_multipart(&request, size, aggregator).await });
        task.await.map_err(|e| {
            TransferError::protocol(format!("upload task for {} failed: {}", key, e))
        })?
    }

    async fn upload_single(
        &self,
        request: &TransferRequest,
        aggregator: &ProgressAggregator,
    ) -> TransferResult<String> {
        let sink: &dyn ProgressSink = aggregator;
        let reference = self
            .backend
            .upload_whole(
                &request.source,
                &request.key,
                request.content_type.as_deref(),
                Some(sink),
            )
            .await?;
        aggregator.finish();
        info!("upload_complete: {} route=single_shot", request.key);
        Ok(reference)
    }

    async fn upload_multipart(
        &self,
        request: &TransferRequest,
        size: u64,
        aggregator: Arc<ProgressAggregator>,
    ) -> TransferResult<String> {
        let plan = plan(size, self.config.chunk_size)?;
        debug!(
            "multipart_plan: {} parts={} chunk_size={}",
            request.key,
            plan.part_count(),
            plan.chunk_size
        );

        // No session is retained if init fails, so there is nothing to abort.
        let session = Arc::new(
            MultipartSession::init(
                self.backend.clone(),
                &request.key,
                request.content_type.as_deref(),
                &plan,
            )
            .await?,
        );

        match self.run_parts(request, &plan, &session, &aggregator).await {
            Ok(results) => {
                debug!(
                    "multipart_parts_done: {} upload_id={} parts={}",
                    request.key,
                    session.handle().upload_id,
                    results.len()
                );
            }
            Err(failure) => {
                let status = session.abort().await;
                return Err(self.unwind_error(request, failure, status));
            }
        }

        match session.complete().await {
            Ok(reference) => {
                aggregator.finish();
                info!(
                    "upload_complete: {} route=multipart parts={}",
                    request.key,
                    plan.part_count()
                );
                Ok(reference)
            }
            Err(e) => {
                warn!(
                    "multipart_complete_failed: {} upload_id={} error={}",
                    request.key,
                    session.handle().upload_id,
                    e
                );
                session.abort().await;
                Err(e)
            }
        }
    }

    async fn run_parts(
        &self,
        request: &TransferRequest,
        plan: &ChunkPlan,
        session: &Arc<MultipartSession>,
        aggregator: &Arc<ProgressAggregator>,
    ) -> Result<Vec<PartResult>, PartFailure> {
        let executor = PartExecutor::new(self.config.max_workers, self.cancel.clone());

        let backend = self.backend.clone();
        let source = request.source.clone();
        let session = session.clone();
        let aggregator = aggregator.clone();
        let cancel = self.cancel.clone();

        executor
            .run(plan, move |part: ChunkPart| {
                let backend = backend.clone();
                let source = source.clone();
                let session = session.clone();
                let aggregator = aggregator.clone();
                let cancel = cancel.clone();
                async move {
                    // Checked before each new read; parts already reading finish.
                    if cancel.is_cancelled() {
                        return Err(TransferError::Cancelled);
                    }
                    let data = source.read_range(part.offset, part.length).await?;
                    debug!(
                        "part_start: {} upload_id={} part={} bytes={}",
                        session.handle().key,
                        session.handle().upload_id,
                        part.part_number,
                        data.len()
                    );
                    let etag = backend
                        .upload_part(session.handle(), part.part_number, data)
                        .await?;
                    let result = PartResult {
                        part_number: part.part_number,
                        etag,
                        bytes_transferred: part.length,
                    };
                    session.record_part(result.clone())?;
                    aggregator.on_part_progress(part.part_number, part.length);
                    debug!(
                        "part_done: {} upload_id={} part={}",
                        session.handle().key,
                        session.handle().upload_id,
                        part.part_number
                    );
                    Ok(result)
                }
            })
            .await
    }

    fn unwind_error(
        &self,
        request: &TransferRequest,
        failure: PartFailure,
        status: SessionStatus,
    ) -> TransferError {
        if failure.error == TransferError::Cancelled {
            info!(
                "transfer_cancelled: {} completed_parts={} session={}",
                request.key,
                failure.completed.len(),
                status
            );
            return TransferError::Cancelled;
        }

        let part_number = failure.failed_part.unwrap_or(0);
        warn!(
            "upload_failed: {} part={} completed_parts={} session={} error={}",
            request.key,
            part_number,
            failure.completed.len(),
            status,
            failure.error
        );
        TransferError::PartialTransferFailure {
            part_number,
            completed_parts: failure.completed.len(),
            source: Box::new(failure.error),
        }
    }

    /// Download `request.key` into `request.target`, creating the parent
    /// directory if needed. Backend progress is relayed as-is.
    pub async fn download(&self, request: DownloadRequest) -> TransferResult<()> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        if let Some(parent) = request.target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransferError::io(parent.display().to_string(), &e))?;
            }
        }

        info!(
            "download_start: {} target={} backend={}",
            request.key,
            request.target.display(),
            self.backend.name()
        );

        let aggregator = ProgressAggregator::new(0, request.progress.clone());
        let sink: &dyn ProgressSink = &aggregator;
        self.backend
            .download_whole(&request.key, &request.target, Some(sink))
            .await?;
        aggregator.finish();

        info!(
            "download_complete: {} bytes={}",
            request.key,
            aggregator.snapshot().bytes_transferred
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TransferSource;
    use crate::transfer::testing::MockBackend;
    use crate::transfer::types::ProgressSnapshot;
    use std::sync::Mutex;
    use std::time::Duration;

    const MIB: u64 = 1024 * 1024;

    #[derive(Default)]
    struct Recorder {
        snapshots: Mutex<Vec<ProgressSnapshot>>,
    }

    impl ProgressSink for Recorder {
        fn on_progress(&self, _transferred: u64, _total: u64) {}

        fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(*snapshot);
        }
    }

    impl Recorder {
        fn values(&self) -> Vec<u64> {
            self.snapshots
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.bytes_transferred)
                .collect()
        }
    }

    fn orchestrator(backend: &Arc<MockBackend>, config: TransferConfig) -> TransferOrchestrator {
        TransferOrchestrator::new(backend.clone(), config).unwrap()
    }

    fn memory(size: u64) -> TransferSource {
        TransferSource::memory(vec![7u8; size as usize])
    }

    #[tokio::test]
    async fn part_two_failure_aborts_once_and_never_completes() {
        let backend = Arc::new(MockBackend::new().fail_part(
            2,
            Duration::from_millis(0),
            TransferError::BackendConnection {
                message: "connection reset".to_string(),
            },
        ));
        let orchestrator = orchestrator(&backend, TransferConfig::default());

        let err = orchestrator
            .upload(TransferRequest::new(memory(12 * MIB), "big.bin"))
            .await
            .unwrap_err();

        match err {
            TransferError::PartialTransferFailure {
                part_number, source, ..
            } => {
                assert_eq!(part_number, 2);
                assert_eq!(
                    *source,
                    TransferError::BackendConnection {
                        message: "connection reset".to_string()
                    }
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(backend.abort_count(), 1);
        assert!(backend.completed_calls().is_empty());
    }

    #[tokio::test]
    async fn twelve_mib_completes_with_three_sorted_parts() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(&backend, TransferConfig::default());

        let reference = orchestrator
            .upload(TransferRequest::new(memory(12 * MIB), "big.bin"))
            .await
            .unwrap();

        assert_eq!(reference, "mock://bucket/big.bin");
        let mut sizes = backend.part_calls();
        sizes.sort();
        assert_eq!(
            sizes,
            vec![
                (1, 5 * MIB as usize),
                (2, 5 * MIB as usize),
                (3, 2 * MIB as usize)
            ]
        );
        let completed = backend.completed_calls();
        assert_eq!(completed.len(), 1);
        let numbers: Vec<u32> = completed[0].iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(completed[0][1].etag, "\"etag-2\"");
        assert_eq!(backend.abort_count(), 0);
    }

    #[tokio::test]
    async fn small_payload_goes_single_shot() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(&backend, TransferConfig::default());

        let reference = orchestrator
            .upload(TransferRequest::new(memory(3 * MIB), "small.bin").with_content_type("image/png"))
            .await
            .unwrap();

        assert_eq!(reference, "mock://bucket/small.bin");
        assert_eq!(backend.init_count(), 0);
        assert_eq!(
            backend.whole_uploads(),
            vec![("small.bin".to_string(), 3 * MIB, Some("image/png".to_string()))]
        );
    }

    #[tokio::test]
    async fn threshold_sized_payload_goes_single_shot() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(&backend, TransferConfig::default());
        orchestrator
            .upload(TransferRequest::new(memory(5 * MIB), "edge.bin"))
            .await
            .unwrap();
        assert_eq!(backend.init_count(), 0);
        assert_eq!(backend.whole_uploads().len(), 1);
    }

    #[tokio::test]
    async fn empty_payload_goes_single_shot() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(&backend, TransferConfig::default().with_chunk_size(1));

        orchestrator
            .upload(TransferRequest::new(memory(0), "empty"))
            .await
            .unwrap();

        assert_eq!(backend.init_count(), 0);
        assert_eq!(backend.whole_uploads()[0].1, 0);
    }

    #[tokio::test]
    async fn disabled_multipart_forces_single_shot() {
        let backend = Arc::new(MockBackend::new());
        let config = TransferConfig::default()
            .with_chunk_size(10)
            .with_multipart_enabled(false);
        let orchestrator = orchestrator(&backend, config);

        orchestrator
            .upload(TransferRequest::new(memory(100), "k"))
            .await
            .unwrap();

        assert_eq!(backend.init_count(), 0);
        assert_eq!(orchestrator.route_for(100), TransferRoute::SingleShot);
    }

    #[tokio::test]
    async fn concurrent_parts_never_exceed_max_workers() {
        let backend = Arc::new(MockBackend::new().with_part_delay(Duration::from_millis(10)));
        let config = TransferConfig::default()
            .with_chunk_size(1024)
            .with_max_workers(3);
        let orchestrator = orchestrator(&backend, config);

        orchestrator
            .upload(TransferRequest::new(memory(16 * 1024), "many"))
            .await
            .unwrap();

        assert_eq!(backend.part_calls().len(), 16);
        assert!(backend.max_in_flight() <= 3);
        assert!(backend.max_in_flight() >= 2);
    }

    #[tokio::test]
    async fn first_error_is_surfaced_not_a_later_one() {
        let backend = Arc::new(
            MockBackend::new()
                .fail_part(
                    2,
                    Duration::from_millis(5),
                    TransferError::BackendAuthentication {
                        message: "token expired".to_string(),
                    },
                )
                .fail_part(
                    3,
                    Duration::from_millis(50),
                    TransferError::backend("Upload part", "late"),
                ),
        );
        let config = TransferConfig::default().with_chunk_size(10).with_max_workers(3);
        let orchestrator = orchestrator(&backend, config);

        let err = orchestrator
            .upload(TransferRequest::new(memory(60), "k"))
            .await
            .unwrap_err();

        match err {
            TransferError::PartialTransferFailure {
                part_number, source, ..
            } => {
                assert_eq!(part_number, 2);
                assert!(matches!(*source, TransferError::BackendAuthentication { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(backend.abort_count(), 1);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_payload_size() {
        let backend = Arc::new(MockBackend::new().with_part_delay(Duration::from_millis(1)));
        let recorder = Arc::new(Recorder::default());
        let config = TransferConfig::default().with_chunk_size(100).with_max_workers(4);
        let orchestrator = orchestrator(&backend, config);

        orchestrator
            .upload(TransferRequest::new(memory(1_050), "k").with_progress(recorder.clone()))
            .await
            .unwrap();

        let values = recorder.values();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*values.last().unwrap(), 1_050);
    }

    #[tokio::test]
    async fn single_shot_progress_ends_at_payload_size() {
        let backend = Arc::new(MockBackend::new());
        let recorder = Arc::new(Recorder::default());
        let orchestrator = orchestrator(&backend, TransferConfig::default());

        orchestrator
            .upload(TransferRequest::new(memory(42), "k").with_progress(recorder.clone()))
            .await
            .unwrap();

        assert_eq!(*recorder.values().last().unwrap(), 42);
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_and_aborts() {
        let backend = Arc::new(MockBackend::new());
        let config = TransferConfig::default().with_chunk_size(10).with_max_workers(1);
        let orchestrator = orchestrator(&backend, config);

        let token = orchestrator.cancel_token();
        let cancel_on_progress = move |transferred: u64, _total: u64| {
            if transferred > 0 {
                token.cancel();
            }
        };

        let err = orchestrator
            .upload(TransferRequest::new(memory(30), "k").with_progress(Arc::new(cancel_on_progress)))
            .await
            .unwrap_err();

        assert_eq!(err, TransferError::Cancelled);
        assert_eq!(backend.part_calls().len(), 1);
        assert_eq!(backend.abort_count(), 1);
        assert!(backend.completed_calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_orchestrator_rejects_new_transfers() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(&backend, TransferConfig::default());
        orchestrator.cancel_token().cancel();

        let err = orchestrator
            .upload(TransferRequest::new(memory(10), "k"))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::Cancelled);
        assert!(backend.whole_uploads().is_empty());
    }

    #[tokio::test]
    async fn dropped_upload_still_aborts_its_session() {
        let backend = Arc::new(MockBackend::new().with_part_delay(Duration::from_millis(50)));
        let config = TransferConfig::default().with_chunk_size(10).with_max_workers(1);
        let orchestrator = orchestrator(&backend, config);

        let upload = orchestrator.upload(TransferRequest::new(memory(30), "k"));
        assert!(tokio::time::timeout(Duration::from_millis(20), upload).await.is_err());

        // The detached task drains part 1, then aborts.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(backend.part_calls().len(), 1);
        assert_eq!(backend.abort_count(), 1);
        assert!(backend.completed_calls().is_empty());

        // Only the dropped call was cancelled.
        assert!(!orchestrator.cancel_token().is_cancelled());
        orchestrator
            .upload(TransferRequest::new(memory(30), "k"))
            .await
            .unwrap();
        assert_eq!(backend.completed_calls().len(), 1);
    }

    #[tokio::test]
    async fn content_type_is_guessed_from_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.png");
        std::fs::write(&photo, vec![0u8; 16]).unwrap();
        let blob = dir.path().join("blob");
        std::fs::write(&blob, vec![0u8; 16]).unwrap();

        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(&backend, TransferConfig::default());

        orchestrator
            .upload(TransferRequest::new(TransferSource::file(&photo), "img/photo.png"))
            .await
            .unwrap();
        orchestrator
            .upload(TransferRequest::new(TransferSource::file(&photo), "img/raw").with_content_type("text/plain"))
            .await
            .unwrap();
        orchestrator
            .upload(TransferRequest::new(TransferSource::file(&blob), "blob"))
            .await
            .unwrap();

        let types: Vec<Option<String>> = backend
            .whole_uploads()
            .into_iter()
            .map(|(_, _, content_type)| content_type)
            .collect();
        assert_eq!(
            types,
            vec![Some("image/png".to_string()), Some("text/plain".to_string()), None]
        );
    }

    #[tokio::test]
    async fn complete_failure_aborts_and_reraises() {
        let backend = Arc::new(MockBackend::new().fail_complete());
        let config = TransferConfig::default().with_chunk_size(10);
        let orchestrator = orchestrator(&backend, config);

        let err = orchestrator
            .upload(TransferRequest::new(memory(25), "k"))
            .await
            .unwrap_err();

        assert_eq!(err, TransferError::backend("Complete multipart upload", "InvalidPart"));
        assert_eq!(backend.abort_count(), 1);
    }

    #[tokio::test]
    async fn init_failure_attempts_no_parts_and_no_abort() {
        let backend = Arc::new(MockBackend::new().fail_init());
        let config = TransferConfig::default().with_chunk_size(10);
        let orchestrator = orchestrator(&backend, config);

        let err = orchestrator
            .upload(TransferRequest::new(memory(25), "k"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::BackendAuthentication { .. }));
        assert!(backend.part_calls().is_empty());
        assert_eq!(backend.abort_count(), 0);
    }

    #[tokio::test]
    async fn failed_abort_still_surfaces_the_part_error() {
        let backend = Arc::new(
            MockBackend::new()
                .fail_abort()
                .fail_part(1, Duration::from_millis(0), TransferError::backend("Upload part", "boom")),
        );
        let config = TransferConfig::default().with_chunk_size(10).with_max_workers(1);
        let orchestrator = orchestrator(&backend, config);

        let err = orchestrator
            .upload(TransferRequest::new(memory(30), "k"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::PartialTransferFailure { part_number: 1, completed_parts: 0, .. }
        ));
        assert_eq!(backend.abort_count(), 1);
    }

    #[tokio::test]
    async fn missing_source_is_source_not_found() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(&backend, TransferConfig::default());
        let dir = tempfile::tempdir().unwrap();

        let err = orchestrator
            .upload(TransferRequest::new(
                TransferSource::file(dir.path().join("nope.bin")),
                "k",
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::SourceNotFound { .. }));
        assert_eq!(backend.init_count(), 0);
        assert!(backend.whole_uploads().is_empty());
    }

    #[tokio::test]
    async fn file_source_is_read_per_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, vec![1u8; 25]).unwrap();

        let backend = Arc::new(MockBackend::new());
        let config = TransferConfig::default().with_chunk_size(10);
        let orchestrator = orchestrator(&backend, config);

        orchestrator
            .upload(TransferRequest::new(TransferSource::file(&path), "payload.bin"))
            .await
            .unwrap();

        let mut parts = backend.part_calls();
        parts.sort();
        assert_eq!(parts, vec![(1, 10), (2, 10), (3, 5)]);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let backend = Arc::new(MockBackend::new());
        let result = TransferOrchestrator::new(backend, TransferConfig::default().with_max_workers(0));
        assert!(matches!(result, Err(TransferError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn download_creates_parent_and_relays_progress() {
        let body = b"hello, object storage".to_vec();
        let backend = Arc::new(MockBackend::new().with_download_body(body.clone()));
        let recorder = Arc::new(Recorder::default());
        let orchestrator = orchestrator(&backend, TransferConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("deeper").join("out.txt");

        orchestrator
            .download(DownloadRequest::new("docs/out.txt", &target).with_progress(recorder.clone()))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), body);
        assert_eq!(backend.downloads(), vec!["docs/out.txt".to_string()]);
        let values = recorder.values();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*values.last().unwrap(), body.len() as u64);
    }
}
