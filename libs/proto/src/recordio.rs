//! RecordIO framing: `<decimal length>\n<payload>`, repeated.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ProtoError;

/// Largest record accepted by default (16 MiB).
pub const DEFAULT_MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Longest header we are willing to scan before giving up on finding `\n`.
const MAX_HEADER_DIGITS: usize = 20;

/// Codec for the event stream body.
///
/// Decoding yields the raw payload of each record; JSON parsing is left to
/// the caller so that one malformed event can be reported with context.
#[derive(Debug, Clone)]
pub struct RecordIoCodec {
    max_record_len: usize,
    /// Payload length of the record currently being read, once its header
    /// has been consumed.
    pending: Option<usize>,
}

impl RecordIoCodec {
    pub fn new(max_record_len: usize) -> Self {
        Self {
            max_record_len,
            pending: None,
        }
    }

    pub fn max_record_len(&self) -> usize {
        self.max_record_len
    }

    fn decode_header(&mut self, src: &mut BytesMut) -> Result<Option<usize>, ProtoError> {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_HEADER_DIGITS {
                return Err(ProtoError::InvalidHeader(
                    String::from_utf8_lossy(&src[..MAX_HEADER_DIGITS]).into_owned(),
                ));
            }
            return Ok(None);
        };

        let header = src.split_to(newline + 1);
        let digits = std::str::from_utf8(&header[..newline])
            .map_err(|_| ProtoError::InvalidHeader(String::from_utf8_lossy(&header).into_owned()))?
            .trim();

        let len: usize = digits
            .parse()
            .map_err(|_| ProtoError::InvalidHeader(digits.to_string()))?;

        if len > self.max_record_len {
            return Err(ProtoError::RecordTooLarge {
                len,
                max: self.max_record_len,
            });
        }

        Ok(Some(len))
    }
}

impl Default for RecordIoCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_LEN)
    }
}

impl Decoder for RecordIoCodec {
    type Item = Bytes;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.pending {
            Some(len) => len,
            None => match self.decode_header(src)? {
                Some(len) => {
                    self.pending = Some(len);
                    len
                }
                None => return Ok(None),
            },
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.pending = None;
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for RecordIoCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_record_len {
            return Err(ProtoError::RecordTooLarge {
                len: item.len(),
                max: self.max_record_len,
            });
        }
        write_record(&item, dst);
        Ok(())
    }
}

/// Frames a single payload as one record.
pub fn encode_record(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + MAX_HEADER_DIGITS + 1);
    write_record(payload, &mut buf);
    buf.freeze()
}

fn write_record(payload: &[u8], dst: &mut BytesMut) {
    dst.put_slice(payload.len().to_string().as_bytes());
    dst.put_u8(b'\n');
    dst.put_slice(payload);
}
