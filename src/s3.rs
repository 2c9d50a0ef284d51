//! Object-store backend: explicit client construction and ranged reads.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use bytes::Bytes;

use crate::fetch::RangeFetch;
use crate::{ReadError, ReadResult};

/// Connection settings for an S3-compatible store. Anything left unset falls
/// back to the default AWS environment (profile, env vars, instance role).
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub region: Option<String>,
    /// Endpoint override for S3-compatible services.
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Path-style addressing; most non-AWS endpoints require it.
    pub force_path_style: bool,
}

/// Handle to an S3-compatible store.
///
/// Built explicitly and passed through `ReadOptions::s3_client`; there is no
/// process-wide client cache. A caller needing fresh credentials or listings
/// constructs a new client without affecting other readers.
#[derive(Debug, Clone)]
pub struct S3Client {
    client: aws_sdk_s3::Client,
}

impl S3Client {
    pub async fn connect(config: Option<&S3Config>) -> S3Client {
        let cfg = config.cloned().unwrap_or_default();
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = cfg.region {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = cfg.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key), Some(secret)) = (cfg.access_key_id, cfg.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key,
                secret,
                cfg.session_token,
                None,
                "csv_fetch",
            ));
        }
        let sdk = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk);
        if cfg.force_path_style {
            builder = builder.force_path_style(true);
        }
        S3Client {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }
    }

    pub(crate) fn object_fetch(&self, bucket: &str, key: &str) -> S3ObjectFetch {
        S3ObjectFetch {
            client: self.client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

pub(crate) struct S3ObjectFetch {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

#[async_trait]
impl RangeFetch for S3ObjectFetch {
    async fn fetch(&mut self, offset: u64, len: u64) -> ReadResult<Bytes> {
        let range = format!("bytes={}-{}", offset, offset + len - 1);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            // Requesting at or past the end of the object: end of stream.
            Err(err) if err.code() == Some("InvalidRange") => return Ok(Bytes::new()),
            Err(err) => {
                return Err(match err.code() {
                    Some(_) => classify(err.code(), err.message(), &self.bucket, &self.key),
                    None => ReadError::Fetch(format!(
                        "s3://{}/{}: {}",
                        self.bucket,
                        self.key,
                        DisplayErrorContext(&err)
                    )),
                });
            }
        };
        let data = output
            .body
            .collect()
            .await
            .map_err(|err| ReadError::Fetch(err.to_string()))?;
        let window = data.into_bytes();
        tracing::debug!(
            "fetched {} bytes at offset {} from s3://{}/{}",
            window.len(),
            offset,
            self.bucket,
            self.key
        );
        Ok(window)
    }
}

/// Map S3 error codes onto the crate's error kinds. Bucket-level and
/// object-level not-found stay distinct; callers match on the bucket message.
fn classify(code: Option<&str>, message: Option<&str>, bucket: &str, key: &str) -> ReadError {
    match code {
        Some("NoSuchBucket") => ReadError::BucketNotFound {
            bucket: bucket.to_string(),
        },
        Some("NoSuchKey") | Some("NotFound") => ReadError::NotFound(format!("s3://{bucket}/{key}")),
        Some("AccessDenied") | Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch") => {
            ReadError::PermissionDenied(format!("s3://{bucket}/{key}"))
        }
        Some(other) => ReadError::Fetch(format!(
            "s3://{bucket}/{key}: {other}: {}",
            message.unwrap_or("unknown error")
        )),
        None => ReadError::Fetch(format!(
            "s3://{bucket}/{key}: {}",
            message.unwrap_or("request dispatch failed")
        )),
    }
}
