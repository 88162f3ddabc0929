//! Self-hosted S3-compatible gateway over plain HTTP
//!
//! Requests are presigned locally (path style) and sent with `reqwest`,
//! which is the only adapter that routes through the configured proxy.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, info};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::backend::{CompletedPart, MultipartHandle, ProgressSink, StorageBackend, TransferSource};
use crate::config::ProxySettings;
use crate::error::{TransferError, TransferResult};

use super::errors::{classify, from_reqwest, is_already_aborted, parse_error_body, xml_field, ErrorTarget};
use super::presign::{encode_uri_path, presign_url, Credentials, PresignRequest};
use super::progress::{report_opaque, StreamProgress};
use super::DEFAULT_CONTENT_TYPE;

const PRESIGN_EXPIRES_SECS: u64 = 3600;

fn default_scheme() -> String {
    "http".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_scheme")]
    pub endpoint_scheme: String,
    /// `host[:port]`
    pub endpoint_host: String,
    #[serde(default = "default_region")]
    pub region: String,
}

pub struct GatewayBackend {
    client: Client,
    config: GatewayConfig,
}

impl GatewayBackend {
    pub fn new(config: GatewayConfig, proxy: &ProxySettings) -> TransferResult<Self> {
        let mut builder = Client::builder();
        if let Some(proxy_url) = proxy.active_proxy() {
            info!(
                "gateway_proxy: {} proxy={}",
                config.endpoint_host, proxy_url
            );
            let proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| TransferError::Config {
                message: format!("invalid proxy {}: {}", proxy_url, e),
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| TransferError::Config {
            message: format!("Failed to create HTTP client: {}", e),
        })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}://{}/{}/{}",
            self.config.endpoint_scheme,
            self.config.endpoint_host,
            self.config.bucket,
            encode_uri_path(key)
        )
    }

    fn presign(&self, method: &str, key: &str, query: &[(&str, &str)]) -> TransferResult<String> {
        let path = format!("/{}/{}", self.config.bucket, encode_uri_path(key));
        presign_url(
            &Credentials {
                access_key_id: &self.config.access_key_id,
                secret_access_key: &self.config.secret_access_key,
                region: &self.config.region,
            },
            &PresignRequest {
                method,
                scheme: &self.config.endpoint_scheme,
                host: &self.config.endpoint_host,
                path: &path,
                expires_in: PRESIGN_EXPIRES_SECS,
                query,
            },
            Utc::now(),
        )
    }

    fn target<'a>(&'a self, key: &'a str) -> ErrorTarget<'a> {
        ErrorTarget::object(&self.config.bucket, key)
    }

    /// Pass successful responses through; translate everything else.
    async fn check(&self, operation: &str, key: &str, response: Response) -> TransferResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(&body);
        let message = message.unwrap_or_else(|| format!("{} - {}", status, body));
        Err(classify(
            operation,
            self.target(key),
            code.as_deref(),
            Some(status),
            &message,
        ))
    }
}

#[async_trait]
impl StorageBackend for GatewayBackend {
    fn name(&self) -> &str {
        "gateway"
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
        let url = self.presign("PUT", key, &[])?;

        report_opaque(progress, total, false);
        let response = self
            .client
            .put(&url)
            .header("Content-Type", content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
            .body(data)
            .send()
            .await
            .map_err(|e| from_reqwest("Upload", &e))?;
        self.check("Upload", key, response).await?;
        report_opaque(progress, total, true);

        debug!("gateway_put_object: {} bytes={}", key, total);
        Ok(self.public_url(key))
    }

    async fn download_whole(
        &self,
        key: &str,
        target: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> TransferResult<()> {
        let url = self.presign("GET", key, &[])?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| from_reqwest("Download", &e))?;
        let response = self.check("Download", key, response).await?;

        let total = response.content_length().unwrap_or(0);
        let target_name = target.display().to_string();
        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| TransferError::io(target_name.clone(), &e))?;

        let mut tracker = StreamProgress::new(progress, total);
        tracker.start();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| from_reqwest("Download", &e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(target_name.clone(), &e))?;
            tracker.advance(chunk.len());
        }
        file.flush()
            .await
            .map_err(|e| TransferError::io(target_name.clone(), &e))?;

        debug!(
            "gateway_get_object: {} bytes={}",
            key,
            tracker.transferred()
        );
        Ok(())
    }

    async fn init_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> TransferResult<MultipartHandle> {
        const OPERATION: &str = "Initiate multipart upload";
        let url = self.presign("POST", key, &[("uploads", "")])?;
        let response = self
            .client
            .post(&url)
            .header("Content-Type", content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
            .send()
            .await
            .map_err(|e| from_reqwest(OPERATION, &e))?;
        let response = self.check(OPERATION, key, response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(OPERATION, &e))?;
        let upload_id = xml_field(&body, "UploadId")
            .ok_or_else(|| TransferError::backend(OPERATION, "Failed to parse UploadId from response"))?;

        Ok(MultipartHandle {
            upload_id,
            key: key.to_string(),
            bucket: self.config.bucket.clone(),
        })
    }

    async fn upload_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        data: Vec<u8>,
    ) -> TransferResult<String> {
        let part = part_number.to_string();
        let url = self.presign(
            "PUT",
            &handle.key,
            &[("partNumber", part.as_str()), ("uploadId", handle.upload_id.as_str())],
        )?;
        let response = self
            .client
            .put(&url)
            .body(data)
            .send()
            .await
            .map_err(|e| from_reqwest("Upload part", &e))?;
        let response = self.check("Upload part", &handle.key, response).await?;

        response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                TransferError::backend(
                    "Upload part",
                    format!("No ETag returned for part {}", part_number),
                )
            })
    }

    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: &[CompletedPart],
    ) -> TransferResult<String> {
        const OPERATION: &str = "Complete multipart upload";
        let parts_xml = parts
            .iter()
            .map(|p| {
                format!(
                    "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
                    p.part_number, p.etag
                )
            })
            .collect::<Vec<_>>()
            .join("");
        let complete_xml = format!(
            "<CompleteMultipartUpload>{}</CompleteMultipartUpload>",
            parts_xml
        );

        let url = self.presign("POST", &handle.key, &[("uploadId", handle.upload_id.as_str())])?;
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/xml")
            .body(complete_xml)
            .send()
            .await
            .map_err(|e| from_reqwest(OPERATION, &e))?;
        let response = self.check(OPERATION, &handle.key, response).await?;

        // Completion can fail after a 200 with an <Error> body.
        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(OPERATION, &e))?;
        if body.contains("<Error>") {
            let (code, message) = parse_error_body(&body);
            return Err(classify(
                OPERATION,
                self.target(&handle.key),
                code.as_deref(),
                None,
                message.as_deref().unwrap_or(&body),
            ));
        }

        Ok(self.public_url(&handle.key))
    }

    async fn abort_multipart(&self, handle: &MultipartHandle) -> TransferResult<()> {
        const OPERATION: &str = "Abort multipart upload";
        let url = self.presign("DELETE", &handle.key, &[("uploadId", handle.upload_id.as_str())])?;
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| from_reqwest(OPERATION, &e))?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(&body);
        if is_already_aborted(code.as_deref()) {
            info!(
                "gateway_abort_already_gone: {} upload_id={}",
                handle.key, handle.upload_id
            );
            return Ok(());
        }
        Err(classify(
            OPERATION,
            self.target(&handle.key),
            code.as_deref(),
            Some(status),
            &message.unwrap_or_else(|| format!("{} - {}", status, body)),
        ))
    }
}
