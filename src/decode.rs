//! Compression detection and lazy decoding.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_compression::tokio::bufread::{
    BzDecoder, DeflateDecoder, GzipDecoder, XzDecoder, ZstdDecoder,
};
use crc32fast::Hasher as Crc32;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};

use crate::{ReadError, ReadResult};

/// Compression applied to the input bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Pass bytes through unmodified.
    None,
    Gzip,
    Bz2,
    /// Single-entry zip archive (stored or deflate).
    Zip,
    Xz,
    Zstd,
    /// Choose by file-name suffix.
    #[default]
    Infer,
}

impl Compression {
    /// Resolve `Infer` against a file name; explicit codecs win unchanged.
    pub fn resolve(self, name_hint: &str) -> Compression {
        if self != Compression::Infer {
            return self;
        }
        if name_hint.ends_with(".gz") {
            Compression::Gzip
        } else if name_hint.ends_with(".bz2") {
            Compression::Bz2
        } else if name_hint.ends_with(".zip") {
            Compression::Zip
        } else if name_hint.ends_with(".xz") {
            Compression::Xz
        } else if name_hint.ends_with(".zst") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Wrap `raw` so the returned reader yields decompressed bytes. Decoding is
/// lazy: no codec pulls more of the underlying stream than its consumer asks
/// for.
pub(crate) async fn wrap<R>(
    raw: R,
    compression: Compression,
    name_hint: &str,
) -> ReadResult<Box<dyn AsyncRead + Unpin + Send>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    // Larger buffer reduces syscalls and, for remote sources, read churn.
    let buf = BufReader::with_capacity(1 << 20, raw);
    Ok(match compression.resolve(name_hint) {
        Compression::None | Compression::Infer => Box::new(buf),
        Compression::Gzip => Box::new(DecodeGuard::new(GzipDecoder::new(buf), "gzip")),
        Compression::Bz2 => Box::new(DecodeGuard::new(BzDecoder::new(buf), "bz2")),
        Compression::Xz => Box::new(DecodeGuard::new(XzDecoder::new(buf), "xz")),
        Compression::Zstd => Box::new(DecodeGuard::new(ZstdDecoder::new(buf), "zstd")),
        Compression::Zip => zip_entry(buf).await?,
    })
}

/// Re-labels decoder corruption so magic-byte mismatches surface as
/// `ReadError::Decode` with the codec name instead of a bare I/O error.
struct DecodeGuard<R> {
    inner: R,
    codec: &'static str,
}

impl<R> DecodeGuard<R> {
    fn new(inner: R, codec: &'static str) -> Self {
        Self { inner, codec }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DecodeGuard<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let codec = self.codec;
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Err(err))
                if err.kind() == io::ErrorKind::InvalidData
                    && err.get_ref().map_or(true, |e| !e.is::<ReadError>()) =>
            {
                Poll::Ready(Err(ReadError::Decode {
                    codec,
                    message: err.to_string(),
                }
                .into_io()))
            }
            other => other,
        }
    }
}

const ZIP_LOCAL_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const ZIP_FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const ZIP_METHOD_STORED: u16 = 0;
const ZIP_METHOD_DEFLATE: u16 = 8;

fn zip_err(message: impl Into<String>) -> ReadError {
    ReadError::Decode {
        codec: "zip",
        message: message.into(),
    }
}

/// Stream the first entry of a zip archive: parse the local file header,
/// then yield the stored or raw-deflate body. The central directory sits
/// after the entry and is never read.
async fn zip_entry<R>(mut input: BufReader<R>) -> ReadResult<Box<dyn AsyncRead + Unpin + Send>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut header = [0u8; 30];
    input
        .read_exact(&mut header)
        .await
        .map_err(|err| zip_err(format!("local header: {err}")))?;
    if header[..4] != ZIP_LOCAL_MAGIC {
        return Err(zip_err("bad local header magic"));
    }
    let flags = u16::from_le_bytes([header[6], header[7]]);
    let method = u16::from_le_bytes([header[8], header[9]]);
    let crc = u32::from_le_bytes([header[14], header[15], header[16], header[17]]);
    let compressed_size = u32::from_le_bytes([header[18], header[19], header[20], header[21]]) as u64;
    let name_len = u16::from_le_bytes([header[26], header[27]]) as usize;
    let extra_len = u16::from_le_bytes([header[28], header[29]]) as usize;

    let mut skip = vec![0u8; name_len + extra_len];
    input
        .read_exact(&mut skip)
        .await
        .map_err(|err| zip_err(format!("entry name: {err}")))?;

    // With the data-descriptor flag set, sizes and CRC in the header are
    // zero and only known after the body; skip verification then.
    let expected_crc = if flags & ZIP_FLAG_DATA_DESCRIPTOR == 0 {
        Some(crc)
    } else {
        None
    };

    match method {
        ZIP_METHOD_STORED => {
            if flags & ZIP_FLAG_DATA_DESCRIPTOR != 0 {
                return Err(zip_err("stored entry without a known size"));
            }
            Ok(Box::new(CrcReader::new(
                input.take(compressed_size),
                expected_crc,
            )))
        }
        ZIP_METHOD_DEFLATE => {
            // Bound the decoder to the entry body so it cannot run into the
            // central directory; without sizes the deflate stream terminates
            // itself.
            let body: Box<dyn AsyncRead + Unpin + Send> =
                if flags & ZIP_FLAG_DATA_DESCRIPTOR == 0 {
                    Box::new(input.take(compressed_size))
                } else {
                    Box::new(input)
                };
            let decoder = DecodeGuard::new(DeflateDecoder::new(BufReader::new(body)), "zip");
            Ok(Box::new(CrcReader::new(decoder, expected_crc)))
        }
        other => Err(zip_err(format!("unsupported compression method {other}"))),
    }
}

/// Verifies the entry CRC32 once the body has been fully read.
struct CrcReader<R> {
    inner: R,
    hasher: Crc32,
    expected: Option<u32>,
    checked: bool,
}

impl<R> CrcReader<R> {
    fn new(inner: R, expected: Option<u32>) -> Self {
        Self {
            inner,
            hasher: Crc32::new(),
            expected,
            checked: false,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CrcReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let filled = &buf.filled()[before..];
                if !filled.is_empty() {
                    this.hasher.update(filled);
                } else if !this.checked {
                    this.checked = true;
                    if let Some(expected) = this.expected {
                        let actual = std::mem::take(&mut this.hasher).finalize();
                        if actual != expected {
                            return Poll::Ready(Err(zip_err(format!(
                                "entry crc mismatch: expected {expected:#010x}, got {actual:#010x}"
                            ))
                            .into_io()));
                        }
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_codec_from_suffix() {
        assert_eq!(
            Compression::Infer.resolve("tips.csv.gz"),
            Compression::Gzip
        );
        assert_eq!(
            Compression::Infer.resolve("tips.csv.bz2"),
            Compression::Bz2
        );
        assert_eq!(
            Compression::Infer.resolve("tips.csv.zip"),
            Compression::Zip
        );
        assert_eq!(Compression::Infer.resolve("tips.csv.xz"), Compression::Xz);
        assert_eq!(
            Compression::Infer.resolve("tips.csv.zst"),
            Compression::Zstd
        );
        assert_eq!(Compression::Infer.resolve("tips.csv"), Compression::None);
        assert_eq!(Compression::Infer.resolve(""), Compression::None);
    }

    #[test]
    fn explicit_codec_overrides_suffix() {
        assert_eq!(Compression::Gzip.resolve("tips.csv.bz2"), Compression::Gzip);
        assert_eq!(Compression::None.resolve("tips.csv.gz"), Compression::None);
    }
}
