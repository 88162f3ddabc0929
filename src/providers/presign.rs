//! AWS Signature V4 query-string presigning

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{TransferError, TransferResult};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";

pub(crate) struct Credentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
}

pub(crate) struct PresignRequest<'a> {
    pub method: &'a str,
    pub scheme: &'a str,
    /// Host header value, including a non-default port.
    pub host: &'a str,
    /// Already-encoded absolute path, e.g. `/bucket/some%20key`.
    pub path: &'a str,
    pub expires_in: u64,
    pub query: &'a [(&'a str, &'a str)],
}

fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> TransferResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TransferError::protocol(format!("HMAC key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn get_signing_key(secret_key: &str, date_stamp: &str, region: &str) -> TransferResult<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Encode each path segment, keeping `/` as the separator.
pub(crate) fn encode_uri_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build a presigned URL valid for `request.expires_in` seconds from `now`.
/// Only `host` is signed; the payload is `UNSIGNED-PAYLOAD`.
pub(crate) fn presign_url(
    credentials: &Credentials<'_>,
    request: &PresignRequest<'_>,
    now: DateTime<Utc>,
) -> TransferResult<String> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, credentials.region, SERVICE
    );

    let mut query_parts: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{}", credentials.access_key_id, credential_scope),
        ),
        ("X-Amz-Date".to_string(), amz_date.clone()),
        ("X-Amz-Expires".to_string(), request.expires_in.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    for (k, v) in request.query {
        query_parts.push((k.to_string(), v.to_string()));
    }

    let mut encoded: Vec<(String, String)> = query_parts
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    encoded.sort();
    let canonical_query_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
        request.method, request.path, canonical_query_string, request.host
    );

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        sha256_hash(canonical_request.as_bytes())
    );

    let signing_key = get_signing_key(credentials.secret_access_key, &date_stamp, credentials.region)?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{}://{}{}?{}&X-Amz-Signature={}",
        request.scheme, request.host, request.path, canonical_query_string, signature
    ))
}
