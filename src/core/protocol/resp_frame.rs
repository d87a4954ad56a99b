// src/core/protocol/resp_frame.rs

//! RESP framing. Requests are always arrays of bulk strings; replies may be
//! any frame kind.
//!
//! Decoding is incremental: the codec walks the buffer with a non-consuming
//! reader and reports "not yet" until a whole reply is present, then
//! consumes exactly that reply's bytes. Malformed framing is unrecoverable
//! and surfaces as a decode error.

use crate::core::ClientError;
use bytes::{Buf, Bytes, BytesMut};
use std::fmt::Write as _;
use tokio_util::codec::{Decoder, Encoder};

// Ceilings on what a single reply may claim, so a corrupt or hostile length
// header cannot drive allocation.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_ARRAY_LEN: i64 = 1 << 20;
const MAX_NESTING: usize = 32;

/// A single frame in the RESP protocol, request or reply side.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// The raw wire form of this frame.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        let _ = render(self, &mut out);
        out.to_vec()
    }
}

/// Builds a request frame for `name` with the given arguments.
///
/// The command name is emitted uppercase; arguments are carried verbatim as
/// binary-safe bulk strings with no escaping.
pub fn command<I>(name: &str, args: I) -> RespFrame
where
    I: IntoIterator<Item = Bytes>,
{
    let mut parts = vec![RespFrame::BulkString(Bytes::from(name.to_uppercase()))];
    parts.extend(args.into_iter().map(RespFrame::BulkString));
    RespFrame::Array(parts)
}

/// A `tokio_util::codec` implementation for [`RespFrame`]s.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = ClientError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        render(&item, dst)
            .map_err(|_| ClientError::Decode("frame formatting failed".to_string()))
    }
}

/// Serializes one frame, recursing through arrays. Length headers and
/// integers go through the buffer's `fmt::Write`; payload bytes are appended
/// untouched.
fn render(frame: &RespFrame, out: &mut BytesMut) -> std::fmt::Result {
    match frame {
        RespFrame::SimpleString(text) => write!(out, "+{text}\r\n"),
        RespFrame::Error(text) => write!(out, "-{text}\r\n"),
        RespFrame::Integer(value) => write!(out, ":{value}\r\n"),
        RespFrame::BulkString(data) => {
            write!(out, "${}\r\n", data.len())?;
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
            Ok(())
        }
        RespFrame::Null => {
            out.extend_from_slice(b"$-1\r\n");
            Ok(())
        }
        RespFrame::NullArray => {
            out.extend_from_slice(b"*-1\r\n");
            Ok(())
        }
        RespFrame::Array(items) => {
            write!(out, "*{}\r\n", items.len())?;
            for item in items {
                render(item, out)?;
            }
            Ok(())
        }
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = ClientError;

    /// Decodes exactly one reply from the buffer, or `Ok(None)` while the
    /// buffer ends mid-reply.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut reader = FrameReader::new(src);
        match reader.read_frame(0)? {
            Some(frame) => {
                let span = reader.consumed();
                src.advance(span);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

/// Walks the buffer without consuming it; the codec advances the buffer only
/// after a whole reply came out. `Ok(None)` from any method means the buffer
/// ends mid-reply and the caller should wait for more bytes.
struct FrameReader<'b> {
    rest: &'b [u8],
    taken: usize,
}

impl<'b> FrameReader<'b> {
    fn new(buf: &'b BytesMut) -> Self {
        Self {
            rest: &buf[..],
            taken: 0,
        }
    }

    fn consumed(&self) -> usize {
        self.taken
    }

    /// Splits off exactly `count` bytes, if that many are buffered.
    fn take(&mut self, count: usize) -> Option<&'b [u8]> {
        if self.rest.len() < count {
            return None;
        }
        let (chunk, rest) = self.rest.split_at(count);
        self.rest = rest;
        self.taken += count;
        Some(chunk)
    }

    /// One CRLF-terminated line, without its terminator. A line feed that is
    /// not preceded by a carriage return is malformed framing.
    fn take_line(&mut self) -> Result<Option<&'b [u8]>, ClientError> {
        let Some(feed) = self.rest.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        if feed == 0 || self.rest[feed - 1] != b'\r' {
            return Err(ClientError::Decode(
                "line feed without carriage return".to_string(),
            ));
        }
        let line = &self.rest[..feed - 1];
        self.rest = &self.rest[feed + 1..];
        self.taken += feed + 1;
        Ok(Some(line))
    }

    /// Reads one frame: a marker-prefixed header line, then whatever payload
    /// the marker calls for.
    fn read_frame(&mut self, nesting: usize) -> Result<Option<RespFrame>, ClientError> {
        if nesting > MAX_NESTING {
            return Err(ClientError::Decode("reply nesting exceeds limit".to_string()));
        }
        let Some(header) = self.take_line()? else {
            return Ok(None);
        };
        let Some((&marker, body)) = header.split_first() else {
            return Err(ClientError::Decode("empty reply line".to_string()));
        };
        match marker {
            b'+' => Ok(Some(RespFrame::SimpleString(text_of(body)))),
            b'-' => Ok(Some(RespFrame::Error(text_of(body)))),
            b':' => Ok(Some(RespFrame::Integer(parse_decimal(body)?))),
            b'$' => self.read_bulk(body),
            b'*' => self.read_array(body, nesting),
            other => Err(ClientError::Decode(format!(
                "unknown reply marker 0x{other:02x}"
            ))),
        }
    }

    fn read_bulk(&mut self, header: &[u8]) -> Result<Option<RespFrame>, ClientError> {
        let declared = parse_decimal(header)?;
        if declared == -1 {
            return Ok(Some(RespFrame::Null));
        }
        if declared < 0 || declared > MAX_BULK_LEN {
            return Err(ClientError::Decode(format!(
                "bulk length {declared} out of bounds"
            )));
        }
        // Payload plus its trailing CRLF, in one bite.
        let Some(chunk) = self.take(declared as usize + 2) else {
            return Ok(None);
        };
        let Some(payload) = chunk.strip_suffix(b"\r\n") else {
            return Err(ClientError::Decode(
                "bulk payload not CRLF-terminated".to_string(),
            ));
        };
        Ok(Some(RespFrame::BulkString(Bytes::copy_from_slice(payload))))
    }

    fn read_array(
        &mut self,
        header: &[u8],
        nesting: usize,
    ) -> Result<Option<RespFrame>, ClientError> {
        let declared = parse_decimal(header)?;
        if declared == -1 {
            return Ok(Some(RespFrame::NullArray));
        }
        if declared < 0 || declared > MAX_ARRAY_LEN {
            return Err(ClientError::Decode(format!(
                "array length {declared} out of bounds"
            )));
        }
        // Capacity is a hint, not a promise: a huge declared length only
        // allocates as its elements actually arrive.
        let mut items = Vec::with_capacity((declared as usize).min(64));
        for _ in 0..declared {
            match self.read_frame(nesting + 1)? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(RespFrame::Array(items)))
    }
}

fn text_of(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

/// Signed decimal parser for length headers and integer replies, working
/// directly over the header bytes. Rejects empty input, stray bytes and
/// overflow.
fn parse_decimal(digits: &[u8]) -> Result<i64, ClientError> {
    let (negative, magnitude) = match digits.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, digits),
    };
    if magnitude.is_empty() {
        return Err(bad_number(digits));
    }
    // Accumulate on the negative side so the full i64 range parses.
    let mut value = 0i64;
    for &b in magnitude {
        if !b.is_ascii_digit() {
            return Err(bad_number(digits));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub(i64::from(b - b'0')))
            .ok_or_else(|| bad_number(digits))?;
    }
    if negative {
        Ok(value)
    } else {
        value.checked_neg().ok_or_else(|| bad_number(digits))
    }
}

fn bad_number(digits: &[u8]) -> ClientError {
    ClientError::Decode(format!(
        "invalid number {:?}",
        String::from_utf8_lossy(digits)
    ))
}
