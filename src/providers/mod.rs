//! Storage backend adapters
//!
//! Provides `StorageBackend` implementations for:
//! - Amazon S3 and S3-compatible endpoints via the AWS SDK (`aws`)
//! - Aliyun OSS via its S3-compatible API (`aliyun`)
//! - Self-hosted gateways via presigned HTTP requests (`gateway`)
//!
//! plus a JSON registry of named sources.

pub mod aliyun;
pub mod aws;
mod errors;
pub mod gateway;
mod presign;
pub mod progress;
mod s3_client;
pub mod sdk;

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::backend::StorageBackend;
use crate::config::ProxySettings;
use crate::error::{TransferError, TransferResult};

pub use aliyun::AliyunConfig;
pub use aws::AwsConfig;
pub use gateway::{GatewayBackend, GatewayConfig};
pub use sdk::SdkBackend;

/// Content type used when a request does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One configured storage source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Aws(AwsConfig),
    Aliyun(AliyunConfig),
    Gateway(GatewayConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Aws(_) => "aws",
            BackendConfig::Aliyun(_) => "aliyun",
            BackendConfig::Gateway(_) => "gateway",
        }
    }

    pub fn bucket(&self) -> &str {
        match self {
            BackendConfig::Aws(c) => &c.bucket,
            BackendConfig::Aliyun(c) => &c.bucket,
            BackendConfig::Gateway(c) => &c.bucket,
        }
    }
}

/// Build the backend for `config`. Only the gateway adapter uses `proxy`.
pub fn connect(config: &BackendConfig, proxy: &ProxySettings) -> TransferResult<Arc<dyn StorageBackend>> {
    info!("backend_connect: {} bucket={}", config.kind(), config.bucket());
    let backend: Arc<dyn StorageBackend> = match config {
        BackendConfig::Aws(c) => Arc::new(aws::connect(c)),
        BackendConfig::Aliyun(c) => Arc::new(aliyun::connect(c)),
        BackendConfig::Gateway(c) => Arc::new(GatewayBackend::new(c.clone(), proxy)?),
    };
    Ok(backend)
}

/// Load named sources from a JSON object of `name -> config`.
pub fn load_sources(path: &Path) -> TransferResult<BTreeMap<String, BackendConfig>> {
    let content = std::fs::read_to_string(path).map_err(|e| TransferError::Config {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&content).map_err(|e| TransferError::Config {
        message: format!("Failed to parse {}: {}", path.display(), e),
    })
}
