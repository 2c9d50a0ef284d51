//! Row-producing engines: a fast single-pass tokenizer and a flexible
//! csv-async fallback with matching output on valid input.

use async_trait::async_trait;
use bytes::BytesMut;
use csv_async::AsyncReaderBuilder;
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{HeaderMode, ReadError, ReadOptions, ReadResult};

/// Parser implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    /// Single-pass `memchr` tokenizer. Rejects ragged rows and embedded
    /// newlines inside quoted fields.
    #[default]
    Fast,
    /// csv-async based reader; tolerates malformed rows the fast engine
    /// rejects.
    Flexible,
}

/// Incremental row source shared by both engines.
#[async_trait]
pub(crate) trait RowReader: Send {
    fn headers(&self) -> &[String];
    async fn next_row(&mut self) -> ReadResult<Option<Vec<String>>>;
}

pub(crate) type BoxedRows = Box<dyn RowReader>;

pub(crate) async fn open(
    input: Box<dyn AsyncRead + Unpin + Send>,
    options: &ReadOptions,
) -> ReadResult<BoxedRows> {
    match options.engine {
        Engine::Flexible => Ok(Box::new(FlexibleReader::open(input, options).await?)),
        Engine::Fast => Ok(Box::new(FastReader::open(input, options).await?)),
    }
}

fn positional_names(width: usize) -> Vec<String> {
    (0..width).map(|i| i.to_string()).collect()
}

struct FlexibleReader {
    reader: csv_async::AsyncReader<Box<dyn AsyncRead + Unpin + Send>>,
    headers: Vec<String>,
    /// First data row, peeked for width when there is no header.
    pending: Option<Vec<String>>,
    record: csv_async::ByteRecord,
}

impl FlexibleReader {
    async fn open(
        input: Box<dyn AsyncRead + Unpin + Send>,
        options: &ReadOptions,
    ) -> ReadResult<FlexibleReader> {
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(options.header == HeaderMode::FirstRow)
            .flexible(true)
            .delimiter(options.separator)
            // Larger internal buffer reduces syscalls and allocator churn
            .buffer_capacity(1 << 20)
            .create_reader(input);

        let mut pending = None;
        let headers = match options.header {
            HeaderMode::FirstRow => {
                let headers = reader.headers().await.map_err(ReadError::from_csv)?;
                headers.iter().map(str::to_string).collect()
            }
            HeaderMode::None => {
                let mut record = csv_async::ByteRecord::new();
                if reader
                    .read_byte_record(&mut record)
                    .await
                    .map_err(ReadError::from_csv)?
                {
                    let first = record_to_row(&record)?;
                    let names = positional_names(first.len());
                    pending = Some(first);
                    names
                } else {
                    Vec::new()
                }
            }
        };
        Ok(FlexibleReader {
            reader,
            headers,
            pending,
            record: csv_async::ByteRecord::new(),
        })
    }
}

fn record_to_row(record: &csv_async::ByteRecord) -> ReadResult<Vec<String>> {
    record
        .iter()
        .map(|field| {
            std::str::from_utf8(field)
                .map(str::to_string)
                .map_err(|err| ReadError::Encoding {
                    encoding: "UTF-8",
                    offset: err.valid_up_to() as u64,
                })
        })
        .collect()
}

#[async_trait]
impl RowReader for FlexibleReader {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    async fn next_row(&mut self) -> ReadResult<Option<Vec<String>>> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        if self
            .reader
            .read_byte_record(&mut self.record)
            .await
            .map_err(ReadError::from_csv)?
        {
            Ok(Some(record_to_row(&self.record)?))
        } else {
            Ok(None)
        }
    }
}

const READ_CHUNK: usize = 64 * 1024;

/// Streaming single-pass tokenizer: accumulate decoded bytes, split records
/// on newlines and fields on the separator. Strict where the flexible engine
/// is lenient.
struct FastReader {
    input: Box<dyn AsyncRead + Unpin + Send>,
    buf: BytesMut,
    eof: bool,
    headers: Vec<String>,
    pending: Option<Vec<String>>,
    separator: u8,
    /// Expected field count; rows that differ are malformed.
    width: usize,
    /// Index of the next data row, for error positions.
    row: usize,
}

impl FastReader {
    async fn open(
        input: Box<dyn AsyncRead + Unpin + Send>,
        options: &ReadOptions,
    ) -> ReadResult<FastReader> {
        let mut reader = FastReader {
            input,
            buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
            headers: Vec::new(),
            pending: None,
            separator: options.separator,
            width: 0,
            row: 0,
        };
        match options.header {
            HeaderMode::FirstRow => {
                if let Some(first) = reader.next_record().await? {
                    reader.width = first.len();
                    reader.headers = first;
                }
            }
            HeaderMode::None => {
                if let Some(first) = reader.next_record().await? {
                    reader.width = first.len();
                    reader.headers = positional_names(first.len());
                    reader.pending = Some(first);
                }
            }
        }
        Ok(reader)
    }

    /// Pull the next physical record, or `None` at end of input. Blank lines
    /// are skipped, matching the flexible engine.
    async fn next_record(&mut self) -> ReadResult<Option<Vec<String>>> {
        loop {
            if let Some(pos) = memchr(b'\n', &self.buf) {
                let line = self.buf.split_to(pos + 1);
                let mut line = &line[..line.len() - 1];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(self.split_line(line)?));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = self.buf.split_to(self.buf.len());
                let mut line = &line[..];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.split_line(line)?));
            }
            self.buf.reserve(READ_CHUNK);
            let n = self
                .input
                .read_buf(&mut self.buf)
                .await
                .map_err(ReadError::from_io)?;
            if n == 0 {
                self.eof = true;
            }
        }
    }

    /// Split one record into fields. Quoted fields may contain separators
    /// and `""` escapes but not newlines; anything between a closing quote
    /// and the next separator is malformed.
    fn split_line(&self, line: &[u8]) -> ReadResult<Vec<String>> {
        let sep = self.separator;
        let mut fields = Vec::new();
        let mut i = 0usize;
        loop {
            if line.get(i) == Some(&b'"') {
                let mut field = Vec::new();
                i += 1;
                loop {
                    match memchr(b'"', &line[i..]) {
                        Some(off) => {
                            field.extend_from_slice(&line[i..i + off]);
                            i += off + 1;
                            if line.get(i) == Some(&b'"') {
                                field.push(b'"');
                                i += 1;
                            } else {
                                break;
                            }
                        }
                        None => {
                            return Err(self.malformed("unterminated quoted field"));
                        }
                    }
                }
                fields.push(into_utf8(field)?);
                match line.get(i) {
                    None => break,
                    Some(&b) if b == sep => i += 1,
                    Some(_) => return Err(self.malformed("data after closing quote")),
                }
            } else {
                match memchr(sep, &line[i..]) {
                    Some(off) => {
                        fields.push(into_utf8(line[i..i + off].to_vec())?);
                        i += off + 1;
                    }
                    None => {
                        fields.push(into_utf8(line[i..].to_vec())?);
                        break;
                    }
                }
            }
        }
        Ok(fields)
    }

    fn malformed(&self, message: &str) -> ReadError {
        ReadError::MalformedRow {
            row: self.row,
            message: message.to_string(),
        }
    }
}

fn into_utf8(field: Vec<u8>) -> ReadResult<String> {
    String::from_utf8(field).map_err(|err| ReadError::Encoding {
        encoding: "UTF-8",
        offset: err.utf8_error().valid_up_to() as u64,
    })
}

#[async_trait]
impl RowReader for FastReader {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    async fn next_row(&mut self) -> ReadResult<Option<Vec<String>>> {
        let record = match self.pending.take() {
            Some(first) => Some(first),
            None => self.next_record().await?,
        };
        let Some(fields) = record else {
            return Ok(None);
        };
        if fields.len() != self.width {
            return Err(ReadError::MalformedRow {
                row: self.row,
                message: format!("expected {} fields, got {}", self.width, fields.len()),
            });
        }
        self.row += 1;
        Ok(Some(fields))
    }
}
