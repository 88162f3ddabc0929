//! Amazon S3 (or any S3 endpoint reachable through the AWS SDK)

use serde::{Deserialize, Serialize};

use super::s3_client::{create_s3_client, S3ClientConfig};
use super::sdk::SdkBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsConfig {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    #[serde(default)]
    pub endpoint_scheme: Option<String>,
    #[serde(default)]
    pub endpoint_host: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl AwsConfig {
    fn endpoint_url(&self) -> Option<String> {
        let host = self.endpoint_host.as_ref()?.trim();
        if host.is_empty() {
            return None;
        }
        let scheme = self.endpoint_scheme.as_deref().unwrap_or("https");
        Some(format!("{}://{}", scheme, host))
    }

    /// Base that object keys are appended to for public URLs.
    pub fn public_base(&self) -> String {
        match self.endpoint_url() {
            Some(endpoint) => format!("{}/{}", endpoint, self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

pub fn connect(config: &AwsConfig) -> SdkBackend {
    let endpoint_url = config.endpoint_url();
    let client = create_s3_client(
        &S3ClientConfig {
            access_key_id: &config.access_key_id,
            secret_access_key: &config.secret_access_key,
            region: &config.region,
            endpoint_url: endpoint_url.as_deref(),
            force_path_style: config.force_path_style,
        },
        "aws-provider",
    );
    SdkBackend::new("aws", client, config.bucket.clone(), config.public_base())
}
