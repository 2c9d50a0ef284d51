//! Byte-to-UTF-8 transcoding with strict, position-reporting decoding.

use std::io;

use bytes::{Buf, BytesMut};
use encoding_rs::{DecoderResult, Encoding};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

use crate::ReadError;

/// Wrap `inner` so it yields valid UTF-8 decoded from `encoding`.
///
/// UTF-8 input is validated rather than passed through, so malformed bytes
/// fail with their exact offset regardless of the source encoding.
pub(crate) fn utf8_reader(
    inner: Box<dyn AsyncRead + Unpin + Send>,
    encoding: &'static Encoding,
) -> Box<dyn AsyncRead + Unpin + Send> {
    let framed = FramedRead::new(inner, Transcoder::new(encoding));
    Box::new(StreamReader::new(framed))
}

pub(crate) struct Transcoder {
    decoder: encoding_rs::Decoder,
    name: &'static str,
    /// Input bytes consumed so far, for error offsets.
    consumed: u64,
    finished: bool,
}

impl Transcoder {
    pub(crate) fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
            name: encoding.name(),
            consumed: 0,
            finished: false,
        }
    }

    fn run(&mut self, src: &mut BytesMut, last: bool) -> Result<Option<BytesMut>, io::Error> {
        let worst = self
            .decoder
            .max_utf8_buffer_length_without_replacement(src.len().max(4))
            .unwrap_or((src.len() + 4) * 4);
        let mut out = vec![0u8; worst];
        let (result, bytes_read, bytes_written) = self
            .decoder
            .decode_to_utf8_without_replacement(src, &mut out, last);
        if let DecoderResult::Malformed(bad, extra) = result {
            // The malformed sequence ends `extra` bytes before the read
            // position and is `bad` bytes long.
            let offset =
                self.consumed + bytes_read as u64 - u64::from(extra) - u64::from(bad);
            return Err(ReadError::Encoding {
                encoding: self.name,
                offset,
            }
            .into_io());
        }
        self.consumed += bytes_read as u64;
        src.advance(bytes_read);
        if bytes_written == 0 {
            return Ok(None);
        }
        out.truncate(bytes_written);
        Ok(Some(BytesMut::from(&out[..])))
    }
}

impl Decoder for Transcoder {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        self.run(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // The final flush may only run once; a truncated multi-byte sequence
        // at end of input surfaces here as malformed.
        if self.finished {
            return Ok(None);
        }
        self.finished = true;
        self.run(src, true)
    }
}
