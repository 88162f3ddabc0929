//! `StorageBackend` over the AWS SDK S3 client.
//!
//! Shared by the S3 and regional-cloud adapters, which differ only in how
//! the client is built and how public URLs look.

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as SdkCompletedPart};
use aws_sdk_s3::Client;
use log::{debug, info};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::backend::{CompletedPart, MultipartHandle, ProgressSink, StorageBackend, TransferSource};
use crate::error::{TransferError, TransferResult};

use super::errors::{from_sdk, is_already_aborted, ErrorTarget};
use super::presign::encode_uri_path;
use super::progress::{report_opaque, StreamProgress};
use super::DEFAULT_CONTENT_TYPE;

pub struct SdkBackend {
    name: &'static str,
    client: Client,
    bucket: String,
    public_base: String,
}

impl SdkBackend {
    /// `public_base` is prefixed to the encoded key to form object URLs.
    pub(crate) fn new(
        name: &'static str,
        client: Client,
        bucket: impl Into<String>,
        public_base: impl Into<String>,
    ) -> Self {
        Self {
            name,
            client,
            bucket: bucket.into(),
            public_base: public_base.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.public_base.trim_end_matches('/'),
            encode_uri_path(key)
        )
    }

    fn object<'a>(&'a self, key: &'a str) -> ErrorTarget<'a> {
        ErrorTarget::object(&self.bucket, key)
    }
}

fn part_number_i32(part_number: u32) -> TransferResult<i32> {
    i32::try_from(part_number)
        .map_err(|_| TransferError::invalid(format!("part number {} out of range", part_number)))
}

#[async_trait]
impl StorageBackend for SdkBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn upload_whole(
        &self,
        source: &TransferSource,
        key: &str,
        content_type: Option<&str>,
        progress: Option<&dyn ProgressSink>,
    ) -> TransferResult<String> {
        let total = source.size().await?;
        let body = match source {
            TransferSource::File(path) => ByteStream::from_path(path).await.map_err(|e| {
                TransferError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
            })?,
            TransferSource::Memory(data) => ByteStream::from(data.to_vec()),
        };

        report_opaque(progress, total, false);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
            .body(body)
            .send()
            .await
            .map_err(|e| from_sdk("Upload", self.object(key), &e))?;
        report_opaque(progress, total, true);

        debug!("{}_put_object: {} bytes={}", self.name, key, total);
        Ok(self.public_url(key))
    }

    async fn download_whole(
        &self,
        key: &str,
        target: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> TransferResult<()> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| from_sdk("Download", self.object(key), &e))?;

        let total = response
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or(0);
        let target_name = target.display().to_string();
        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| TransferError::io(target_name.clone(), &e))?;

        let mut body = response.body;
        let mut tracker = StreamProgress::new(progress, total);
        tracker.start();
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| TransferError::BackendConnection {
                message: format!("Download {}: {}", key, e),
            })?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(target_name.clone(), &e))?;
            tracker.advance(chunk.len());
        }
        file.flush()
            .await
            .map_err(|e| TransferError::io(target_name.clone(), &e))?;

        debug!(
            "{}_get_object: {} bytes={}",
            self.name,
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
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
            .send()
            .await
            .map_err(|e| from_sdk("Initiate multipart upload", self.object(key), &e))?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| TransferError::backend("Initiate multipart upload", "no upload id returned"))?
            .to_string();

        Ok(MultipartHandle {
            upload_id,
            key: key.to_string(),
            bucket: self.bucket.clone(),
        })
    }

    async fn upload_part(
        &self,
        handle: &MultipartHandle,
        part_number: u32,
        data: Vec<u8>,
    ) -> TransferResult<String> {
        let response = self
            .client
            .upload_part()
            .bucket(&handle.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .part_number(part_number_i32(part_number)?)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| from_sdk("Upload part", self.object(&handle.key), &e))?;

        response
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| {
                TransferError::backend(
                    "Upload part",
                    format!("no ETag returned for part {}", part_number),
                )
            })
    }

    async fn complete_multipart(
        &self,
        handle: &MultipartHandle,
        parts: &[CompletedPart],
    ) -> TransferResult<String> {
        let completed = parts
            .iter()
            .map(|part| {
                Ok(SdkCompletedPart::builder()
                    .part_number(part_number_i32(part.part_number)?)
                    .e_tag(&part.etag)
                    .build())
            })
            .collect::<TransferResult<Vec<_>>>()?;

        self.client
            .complete_multipart_upload()
            .bucket(&handle.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| from_sdk("Complete multipart upload", self.object(&handle.key), &e))?;

        Ok(self.public_url(&handle.key))
    }

    async fn abort_multipart(&self, handle: &MultipartHandle) -> TransferResult<()> {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&handle.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_already_aborted(e.code()) => {
                info!(
                    "{}_abort_already_gone: {} upload_id={}",
                    self.name, handle.key, handle.upload_id
                );
                Ok(())
            }
            Err(e) => Err(from_sdk("Abort multipart upload", self.object(&handle.key), &e)),
        }
    }
}
