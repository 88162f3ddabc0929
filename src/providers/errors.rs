//! Translation of vendor failures into `TransferError`

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use crate::error::TransferError;

/// What the failing request was about, for the missing-object/bucket cases.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ErrorTarget<'a> {
    pub bucket: &'a str,
    pub key: Option<&'a str>,
}

impl<'a> ErrorTarget<'a> {
    #[cfg(test)]
    pub(crate) fn bucket(bucket: &'a str) -> Self {
        Self { bucket, key: None }
    }

    pub(crate) fn object(bucket: &'a str, key: &'a str) -> Self {
        Self {
            bucket,
            key: Some(key),
        }
    }
}

const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
];

const CONNECTION_CODES: &[&str] = &["RequestTimeout", "SlowDown", "ServiceUnavailable"];

const AUTH_KEYWORDS: &[&str] = &[
    "access denied",
    "accessdenied",
    "forbidden",
    "invalid credentials",
    "invalidaccesskeyid",
    "signaturedoesnotmatch",
];
const BUCKET_KEYWORDS: &[&str] = &["no such bucket", "nosuchbucket", "bucket not found"];
const OBJECT_KEYWORDS: &[&str] = &["no such key", "nosuchkey", "object not found"];
const CONNECTION_KEYWORDS: &[&str] = &["timeout", "timed out", "connection", "network"];

/// Map an S3-style error code, HTTP status and message onto the taxonomy.
///
/// Codes win over status, status wins over message keywords. Keywords are
/// checked in the order authentication, bucket, object, connection.
pub(crate) fn classify(
    operation: &str,
    target: ErrorTarget<'_>,
    code: Option<&str>,
    status: Option<u16>,
    message: &str,
) -> TransferError {
    let object_missing = || match target.key {
        Some(key) => TransferError::BackendObjectMissing {
            key: key.to_string(),
        },
        None => TransferError::BackendBucketMissing {
            bucket: target.bucket.to_string(),
        },
    };

    if let Some(code) = code {
        if AUTH_CODES.contains(&code) {
            return TransferError::BackendAuthentication {
                message: format!("{}: {}", code, message),
            };
        }
        if CONNECTION_CODES.contains(&code) {
            return TransferError::BackendConnection {
                message: format!("{}: {}", code, message),
            };
        }
        match code {
            "NoSuchBucket" => {
                return TransferError::BackendBucketMissing {
                    bucket: target.bucket.to_string(),
                }
            }
            "NoSuchKey" | "NotFound" => return object_missing(),
            _ => {}
        }
    }

    match status {
        Some(401) | Some(403) => {
            return TransferError::BackendAuthentication {
                message: message.to_string(),
            }
        }
        Some(404) => return object_missing(),
        _ => {}
    }

    let lowered = message.to_lowercase();
    let has = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if has(AUTH_KEYWORDS) {
        TransferError::BackendAuthentication {
            message: message.to_string(),
        }
    } else if has(BUCKET_KEYWORDS) {
        TransferError::BackendBucketMissing {
            bucket: target.bucket.to_string(),
        }
    } else if has(OBJECT_KEYWORDS) {
        object_missing()
    } else if has(CONNECTION_KEYWORDS) {
        TransferError::BackendConnection {
            message: message.to_string(),
        }
    } else {
        TransferError::backend(operation, message)
    }
}

/// `true` when an abort failed only because the upload is already gone.
pub(crate) fn is_already_aborted(code: Option<&str>) -> bool {
    code == Some("NoSuchUpload")
}

pub(crate) fn from_sdk<E>(
    operation: &str,
    target: ErrorTarget<'_>,
    err: &SdkError<E, HttpResponse>,
) -> TransferError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = DisplayErrorContext(err).to_string();
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            TransferError::BackendConnection { message }
        }
        _ => {
            let status = err.raw_response().map(|r| r.status().as_u16());
            classify(
                operation,
                target,
                err.code(),
                status,
                err.message().unwrap_or(&message),
            )
        }
    }
}

pub(crate) fn from_reqwest(operation: &str, err: &reqwest::Error) -> TransferError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        return TransferError::BackendConnection {
            message: format!("{}: {}", operation, err),
        };
    }
    TransferError::backend(operation, err.to_string())
}

/// Pull `<Code>` and `<Message>` out of an S3 XML error body.
pub(crate) fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    (xml_field(body, "Code"), xml_field(body, "Message"))
}

pub(crate) fn xml_field(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    body.split(open.as_str())
        .nth(1)
        .and_then(|s| s.split(close.as_str()).next())
        .map(str::to_string)
}
