//! Transfer tuning, proxy and persisted settings.

use crate::error::{TransferError, TransferResult};
use crate::transfer::types::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_WORKERS};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MIB: u64 = 1024 * 1024;

/// Knobs for one orchestrator instance.
///
/// `chunk_size` is used both as the single-shot threshold and as the part
/// size, so the decision gate and the planner can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    pub chunk_size: u64,
    pub max_workers: usize,
    pub multipart_enabled: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            multipart_enabled: true,
        }
    }
}

impl TransferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_multipart_enabled(mut self, enabled: bool) -> Self {
        self.multipart_enabled = enabled;
        self
    }

    pub fn validate(&self) -> TransferResult<()> {
        if self.chunk_size == 0 {
            return Err(TransferError::invalid("chunk_size must be positive"));
        }
        if self.max_workers == 0 {
            return Err(TransferError::invalid("max_workers must be positive"));
        }
        Ok(())
    }
}

/// Proxy configuration handed to backends at construction time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub http: String,
    pub https: String,
}

impl ProxySettings {
    /// Proxy URL to use for requests, if any. Prefers the https entry.
    pub fn active_proxy(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        [self.https.as_str(), self.http.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|url| !url.is_empty())
            .map(format_proxy_url)
    }
}

/// Prefix `http://` when the proxy URL carries no scheme.
pub fn format_proxy_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// Per-direction settings as stored on disk (chunk size in MiB).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub multipart_enabled: bool,
    pub chunk_size_mb: u64,
    pub workers: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            multipart_enabled: true,
            chunk_size_mb: DEFAULT_CHUNK_SIZE / MIB,
            workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl TransferSettings {
    pub fn to_config(&self) -> TransferConfig {
        TransferConfig {
            chunk_size: self.chunk_size_mb.saturating_mul(MIB),
            max_workers: self.workers,
            multipart_enabled: self.multipart_enabled,
        }
    }
}

/// Application settings file. Unknown keys are ignored and missing keys
/// take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub proxy: ProxySettings,
    pub upload: TransferSettings,
    /// Persisted for the settings file only. Downloads are single-shot
    /// streams, so these values never reach a transfer.
    pub download: TransferSettings,
}

impl Settings {
    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> TransferResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("settings_default: {} not found", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(TransferError::io(path.display().to_string(), &e)),
        };
        serde_json::from_str(&raw).map_err(|e| {
            warn!("settings_invalid: {} error={}", path.display(), e);
            TransferError::Config {
                message: format!("Failed to parse {}: {}", path.display(), e),
            }
        })
    }

    pub fn save(&self, path: &Path) -> TransferResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| TransferError::Config {
            message: format!("Failed to serialize settings: {}", e),
        })?;
        std::fs::write(path, json).map_err(|e| TransferError::io(path.display().to_string(), &e))
    }

    pub fn upload_config(&self) -> TransferConfig {
        self.upload.to_config()
    }
}
