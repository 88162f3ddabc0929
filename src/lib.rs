//! Chunked transfer engine for object storage.
//!
//! Uploads below the configured chunk size go up in one request; larger
//! payloads are split into parts and sent through a bounded worker pool,
//! with the multipart session aborted on any failure. Backends for S3,
//! Aliyun OSS and self-hosted S3 gateways live in [`providers`].

pub mod backend;
pub mod config;
pub mod error;
pub mod providers;
pub mod transfer;

pub use backend::{CompletedPart, MultipartHandle, ProgressSink, StorageBackend, TransferSource};
pub use config::{ProxySettings, Settings, TransferConfig, TransferSettings};
pub use error::{TransferError, TransferResult};
pub use transfer::{DownloadRequest, ProgressSnapshot, TransferOrchestrator, TransferRequest};
