//! Location resolution: scheme sniffing and backend dispatch.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncRead;

use crate::fetch::RangeReader;
use crate::s3::S3Client;
use crate::{http, ReadError, ReadOptions, ReadResult};

/// A resolved input location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Local filesystem path.
    Local(PathBuf),
    /// HTTP or HTTPS URL.
    Http(String),
    /// Object in an S3-compatible store.
    S3 { bucket: String, key: String },
}

impl Source {
    /// Parse a location string, sniffing the scheme. `s3://`, `s3n://`, and
    /// `s3a://` all address the same object-store backend; anything without
    /// a recognized scheme is a local path.
    pub fn parse(location: &str) -> Source {
        for scheme in ["s3://", "s3n://", "s3a://"] {
            if let Some(rest) = location.strip_prefix(scheme) {
                let (bucket, key) = match rest.split_once('/') {
                    Some((bucket, key)) => (bucket.to_string(), key.to_string()),
                    None => (rest.to_string(), String::new()),
                };
                return Source::S3 { bucket, key };
            }
        }
        if location.starts_with("http://") || location.starts_with("https://") {
            return Source::Http(location.to_string());
        }
        Source::Local(PathBuf::from(location))
    }

    /// File-name component used for compression inference. Query strings and
    /// fragments are stripped from URLs first.
    pub fn name_hint(&self) -> String {
        match self {
            Source::Local(path) => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string(),
            Source::S3 { key, .. } => key.rsplit('/').next().unwrap_or_default().to_string(),
            Source::Http(url) => {
                let path = url.split(&['?', '#'][..]).next().unwrap_or(url);
                path.rsplit('/').next().unwrap_or_default().to_string()
            }
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Source::Local(path) => path.display().to_string(),
            Source::Http(url) => url.clone(),
            Source::S3 { bucket, key } => format!("s3://{bucket}/{key}"),
        }
    }
}

/// Open a source as a raw byte stream. Object-store reads are ranged and
/// lazy; nothing is fetched beyond what the consumer pulls.
pub(crate) async fn open(
    source: &Source,
    options: &ReadOptions,
) -> ReadResult<Box<dyn AsyncRead + Unpin + Send>> {
    match source {
        Source::Local(path) => open_local(path).await,
        Source::Http(url) => http::open(url, options).await,
        Source::S3 { bucket, key } => {
            let client = match &options.s3_client {
                Some(client) => client.clone(),
                None => S3Client::connect(options.s3.as_ref()).await,
            };
            tracing::debug!("opening s3://{bucket}/{key}");
            let fetch = client.object_fetch(bucket, key);
            Ok(Box::new(RangeReader::new(fetch, options.fetch_chunk_size)))
        }
    }
}

async fn open_local(path: &Path) -> ReadResult<Box<dyn AsyncRead + Unpin + Send>> {
    match File::open(path).await {
        Ok(file) => Ok(Box::new(file)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(ReadError::NotFound(path.display().to_string()))
        }
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            Err(ReadError::PermissionDenied(path.display().to_string()))
        }
        Err(err) => Err(ReadError::Io(err)),
    }
}
