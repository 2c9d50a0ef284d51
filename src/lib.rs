//! Streaming reader for delimited-text tables on local disk, HTTP(S), or
//! S3-compatible object stores.
//!
//! - Remote objects are fetched lazily: S3 reads go through byte-range
//!   requests sized by [`ReadOptions::fetch_chunk_size`], so a bounded read
//!   never downloads the whole object.
//! - Compression (gzip, bz2, xz, zstd, single-entry zip) is decoded on the
//!   fly, either explicitly or inferred from the file name.
//! - Two parsing engines behind one interface: a fast `memchr` tokenizer and
//!   a flexible `csv-async` fallback that tolerates malformed rows.
//!
//! Data shape:
//! - [`Table`]: ordered, named, typed columns aligned by row index.
//! - Chunked reads: [`TableChunks`] yields fixed-size [`Table`] batches with
//!   contiguous global row numbering.
//
mod chunk;
mod decode;
mod encoding;
mod engine;
mod fetch;
mod http;
mod s3;
mod source;
mod table;

pub use crate::chunk::TableChunks;
pub use crate::decode::Compression;
pub use crate::engine::Engine;
pub use crate::fetch::{RangeFetch, RangeReader, DEFAULT_FETCH_CHUNK_SIZE};
pub use crate::s3::{S3Client, S3Config};
pub use crate::source::Source;
pub use crate::table::{Column, ColumnValues, DType, Table};

use std::collections::HashMap;
use std::io;

use thiserror::Error;
use tokio::io::AsyncRead;

/// Error type returned by this crate.
///
/// Kinds are distinct per origin layer so callers can match on them; in
/// particular a missing bucket is not the same as a missing object.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The object-store container itself is missing. Callers pattern-match
    /// on this message, so it keeps the store's phrasing.
    #[error("The specified bucket does not exist: {bucket}")]
    BucketNotFound { bucket: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    PermissionDenied(String),
    /// Compressed input did not match the resolved codec.
    #[error("{codec} decode error: {message}")]
    Decode {
        codec: &'static str,
        message: String,
    },
    /// Input bytes are not valid in the requested character encoding.
    #[error("invalid {encoding} byte sequence at offset {offset}")]
    Encoding { encoding: &'static str, offset: u64 },
    /// Network-level failure; retry is left to the caller.
    #[error("transient fetch failure: {0}")]
    Fetch(String),
    /// A row the fast engine refuses to parse; the flexible engine may
    /// accept the same input.
    #[error("malformed row {row}: {message}")]
    MalformedRow { row: usize, message: String },
    /// A value did not parse under an explicit per-column dtype override.
    #[error("column {column:?}, row {row}: {value:?} is not {dtype}")]
    ColumnType {
        column: String,
        row: usize,
        value: String,
        dtype: DType,
    },
    #[error("column {column:?}: cannot unify {left} with {right}")]
    DTypeMismatch {
        column: String,
        left: DType,
        right: DType,
    },
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ReadResult<T> = std::result::Result<T, ReadError>;

impl ReadError {
    /// Carry a typed error across an `io::Error` boundary (codec streams,
    /// `StreamReader`) without flattening it to a string.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match &self {
            ReadError::NotFound(_) | ReadError::BucketNotFound { .. } => io::ErrorKind::NotFound,
            ReadError::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
            ReadError::Decode { .. } | ReadError::Encoding { .. } => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }

    /// Inverse of [`ReadError::into_io`]; foreign I/O errors keep their kind.
    pub(crate) fn from_io(err: io::Error) -> ReadError {
        match err.downcast::<ReadError>() {
            Ok(inner) => inner,
            Err(err) => match err.kind() {
                io::ErrorKind::NotFound => ReadError::NotFound(err.to_string()),
                io::ErrorKind::PermissionDenied => ReadError::PermissionDenied(err.to_string()),
                _ => ReadError::Io(err),
            },
        }
    }

    /// Unwrap csv-async errors down to the typed kind they carry, if any.
    pub(crate) fn from_csv(err: csv_async::Error) -> ReadError {
        if matches!(err.kind(), csv_async::ErrorKind::Io(_)) {
            match err.into_kind() {
                csv_async::ErrorKind::Io(io_err) => ReadError::from_io(io_err),
                kind => ReadError::Io(io::Error::other(format!("{kind:?}"))),
            }
        } else {
            ReadError::Csv(err)
        }
    }
}

/// How the first row of input is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderMode {
    /// First row names the columns.
    #[default]
    FirstRow,
    /// No header row; columns get positional names `"0"`, `"1"`, ...
    None,
}

/// Read configuration. Plain struct; unspecified fields come from
/// [`Default`].
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub separator: u8,
    pub header: HeaderMode,
    pub compression: Compression,
    pub engine: Engine,
    /// Character encoding of the input bytes; decoded (and validated) to
    /// UTF-8 before tokenization.
    pub encoding: &'static encoding_rs::Encoding,
    /// Stop after this many data rows.
    pub nrows: Option<usize>,
    /// Per-column dtype overrides, keyed by column name.
    pub dtypes: HashMap<String, DType>,
    /// Minimum byte-range size per object-store fetch.
    pub fetch_chunk_size: usize,
    /// Object-store connection settings; ignored when `s3_client` is set.
    pub s3: Option<S3Config>,
    /// Pre-built store client. Build one per credential set instead of
    /// relying on ambient state.
    pub s3_client: Option<S3Client>,
    pub http_client: Option<reqwest::Client>,
    /// Extra headers sent with every HTTP request.
    pub http_headers: reqwest::header::HeaderMap,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            separator: b',',
            header: HeaderMode::FirstRow,
            compression: Compression::Infer,
            engine: Engine::Fast,
            encoding: encoding_rs::UTF_8,
            nrows: None,
            dtypes: HashMap::new(),
            fetch_chunk_size: DEFAULT_FETCH_CHUNK_SIZE,
            s3: None,
            s3_client: None,
            http_client: None,
            http_headers: reqwest::header::HeaderMap::new(),
        }
    }
}

/// Read a whole table (or the first `nrows` rows) from `location`.
///
/// `location` may be a bare path, an `http(s)://` URL, or an
/// `s3://`/`s3n://`/`s3a://` object.
pub async fn read_table(location: &str, options: &ReadOptions) -> ReadResult<Table> {
    let source = Source::parse(location);
    let raw = source::open(&source, options).await?;
    read_table_from(raw, &source.name_hint(), options).await
}

/// Open `location` for chunked reading; each batch has `batch_size` rows
/// except possibly the last.
pub async fn read_table_chunks(
    location: &str,
    options: &ReadOptions,
    batch_size: usize,
) -> ReadResult<TableChunks> {
    let source = Source::parse(location);
    let raw = source::open(&source, options).await?;
    read_table_chunks_from(raw, &source.name_hint(), options, batch_size).await
}

/// Storage-agnostic variant of [`read_table`]: parse any byte stream.
/// `name_hint` is only consulted for compression inference.
pub async fn read_table_from<R>(
    reader: R,
    name_hint: &str,
    options: &ReadOptions,
) -> ReadResult<Table>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let batch = options.nrows.unwrap_or(usize::MAX);
    let mut chunks = read_table_chunks_from(reader, name_hint, options, batch).await?;
    match chunks.next_batch().await? {
        Some(table) => Ok(table),
        None => Ok(Table::empty(chunks.headers())),
    }
}

/// Storage-agnostic variant of [`read_table_chunks`].
pub async fn read_table_chunks_from<R>(
    reader: R,
    name_hint: &str,
    options: &ReadOptions,
    batch_size: usize,
) -> ReadResult<TableChunks>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let decoded = decode::wrap(reader, options.compression, name_hint).await?;
    let text = encoding::utf8_reader(decoded, options.encoding);
    let rows = engine::open(text, options).await?;
    Ok(TableChunks::new(rows, batch_size.max(1), options))
}
