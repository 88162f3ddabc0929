//! Error taxonomy shared by the transfer engine and the backend adapters.

use thiserror::Error;

/// Errors surfaced by transfers.
///
/// Backend adapters translate their vendor errors into the `Backend*`
/// variants before anything reaches the orchestrator. The orchestrator
/// itself only raises `Protocol`, `PartialTransferFailure` and `Cancelled`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    /// Local source could not be opened.
    #[error("Source not found: {path}")]
    SourceNotFound { path: String },

    /// Caller supplied an unusable value.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Local read/write failed after the file was opened.
    #[error("I/O error for {path}: {message}")]
    Io { path: String, message: String },

    /// Backend unreachable (connect failure, timeout, dispatch failure).
    #[error("Network error: {message}")]
    BackendConnection { message: String },

    /// Credentials rejected or access denied.
    #[error("Authentication failed: {message}")]
    BackendAuthentication { message: String },

    /// Object does not exist.
    #[error("Object not found: {key}")]
    BackendObjectMissing { key: String },

    /// Bucket does not exist.
    #[error("Bucket not found: {bucket}")]
    BackendBucketMissing { bucket: String },

    /// Any other backend failure.
    #[error("{operation} failed: {message}")]
    Backend { operation: String, message: String },

    /// A multipart session invariant was violated locally.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// A part failed during a multipart upload; `source` is the first error
    /// the executor observed.
    #[error("Part {part_number} failed after {completed_parts} part(s) completed: {source}")]
    PartialTransferFailure {
        part_number: u32,
        completed_parts: usize,
        #[source]
        source: Box<TransferError>,
    },

    /// Transfer was cancelled by the caller.
    #[error("Transfer cancelled")]
    Cancelled,

    /// Settings or source registry could not be loaded.
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl TransferError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        TransferError::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        TransferError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// True for errors that originate from the storage backend.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            TransferError::BackendConnection { .. }
                | TransferError::BackendAuthentication { .. }
                | TransferError::BackendObjectMissing { .. }
                | TransferError::BackendBucketMissing { .. }
                | TransferError::Backend { .. }
        )
    }

    /// Whether a backend adapter may retry the failed call.
    /// The orchestrator itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::BackendConnection { .. } => true,
            TransferError::PartialTransferFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
