//! Aliyun OSS through its S3-compatible API

use serde::{Deserialize, Serialize};

use super::s3_client::{create_s3_client, S3ClientConfig};
use super::sdk::SdkBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliyunConfig {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Region id without the `oss-` prefix, e.g. `cn-hangzhou`.
    pub region: String,
    /// Overrides `oss-{region}.aliyuncs.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl AliyunConfig {
    pub fn endpoint_host(&self) -> String {
        match self.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            _ => format!("oss-{}.aliyuncs.com", self.region),
        }
    }

    pub fn public_base(&self) -> String {
        format!("https://{}.{}", self.bucket, self.endpoint_host())
    }
}

pub fn connect(config: &AliyunConfig) -> SdkBackend {
    let endpoint_url = format!("https://{}", config.endpoint_host());
    let client = create_s3_client(
        &S3ClientConfig {
            access_key_id: &config.access_key_id,
            secret_access_key: &config.secret_access_key,
            region: &config.region,
            endpoint_url: Some(endpoint_url.as_str()),
            // OSS only accepts virtual-hosted addressing.
            force_path_style: false,
        },
        "aliyun-provider",
    );
    SdkBackend::new("aliyun", client, config.bucket.clone(), config.public_base())
}
