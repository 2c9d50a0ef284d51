//! HTTP(S) backend: lazy streaming GET.

use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::{ReadError, ReadOptions, ReadResult};

pub(crate) async fn open(
    url: &str,
    options: &ReadOptions,
) -> ReadResult<Box<dyn AsyncRead + Unpin + Send>> {
    let client = options.http_client.clone().unwrap_or_default();
    let response = client
        .get(url)
        .headers(options.http_headers.clone())
        .send()
        .await
        .map_err(|err| ReadError::Fetch(format!("{url}: {err}")))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ReadError::NotFound(url.to_string()));
    }
    if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ReadError::PermissionDenied(url.to_string()));
    }
    if !status.is_success() {
        return Err(ReadError::Fetch(format!("{url}: status {status}")));
    }
    tracing::debug!("streaming {url} ({:?} bytes)", response.content_length());

    // The body is consumed as it arrives; dropping the reader aborts the
    // transfer without draining it.
    let body = response
        .bytes_stream()
        .map_err(|err| ReadError::Fetch(err.to_string()).into_io())
        .boxed();
    Ok(Box::new(StreamReader::new(body)))
}
