// src/protocol/resp.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder` and `Decoder` for network communication.
//!
//! Monitor traffic is tiny (commands, INFO payloads, hello messages), so the
//! protocol limits are far smaller than a full data-store server would use.

use crate::errors::VigilError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits to reject malformed or hostile frames early.
const MAX_FRAME_ELEMENTS: usize = 1_024;
const MAX_BULK_STRING_SIZE: usize = 4 * 1024 * 1024;

/// An enum representing a single frame in the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds a bulk string frame from any text.
    pub fn bulk(text: impl Into<String>) -> Self {
        RespFrame::BulkString(Bytes::from(text.into()))
    }

    /// Builds a command frame (an array of bulk strings) from its parts.
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RespFrame::Array(parts.into_iter().map(RespFrame::bulk).collect())
    }

    /// Returns the textual content of a simple or bulk string frame.
    pub fn text(&self) -> Option<String> {
        match self {
            RespFrame::SimpleString(s) => Some(s.clone()),
            RespFrame::BulkString(b) => Some(String::from_utf8_lossy(b).to_string()),
            _ => None,
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = VigilError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = VigilError;

    /// Decodes a `RespFrame` from a `BytesMut` buffer.
    ///
    /// Returns `Ok(None)` if the buffer does not contain a full frame yet,
    /// allowing the `Framed` stream to wait for more data from the network.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, len)) => {
                src.advance(len);
                Ok(Some(frame))
            }
            Err(VigilError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The main parsing entry point. Inspects the type prefix byte and dispatches
/// to the appropriate parsing function. Returns the frame and the number of
/// bytes it consumed.
fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), VigilError> {
    if src.is_empty() {
        return Err(VigilError::IncompleteData);
    }
    let body = &src[1..];
    match src[0] {
        b'+' => {
            let (line, consumed) = read_line(body)?;
            Ok((RespFrame::SimpleString(to_string(line)), consumed + 1))
        }
        b'-' => {
            let (line, consumed) = read_line(body)?;
            Ok((RespFrame::Error(to_string(line)), consumed + 1))
        }
        b':' => {
            let (line, consumed) = read_line(body)?;
            let value = parse_integer(line)?;
            Ok((RespFrame::Integer(value), consumed + 1))
        }
        b'$' => parse_bulk_string(body).map(|(f, n)| (f, n + 1)),
        b'*' => parse_array(body).map(|(f, n)| (f, n + 1)),
        other => Err(VigilError::Protocol(format!(
            "invalid frame type prefix: 0x{other:02x}"
        ))),
    }
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), VigilError> {
    let (line, header_len) = read_line(src)?;
    let declared = parse_integer(line)?;
    if declared == -1 {
        return Ok((RespFrame::Null, header_len));
    }
    if declared < 0 || declared as usize > MAX_BULK_STRING_SIZE {
        return Err(VigilError::Protocol(format!(
            "invalid bulk string length: {declared}"
        )));
    }
    let len = declared as usize;
    let total = header_len + len + CRLF_LEN;
    if src.len() < total {
        return Err(VigilError::IncompleteData);
    }
    if &src[header_len + len..total] != CRLF {
        return Err(VigilError::Protocol(
            "bulk string missing CRLF terminator".to_string(),
        ));
    }
    let payload = Bytes::copy_from_slice(&src[header_len..header_len + len]);
    Ok((RespFrame::BulkString(payload), total))
}

fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), VigilError> {
    let (line, header_len) = read_line(src)?;
    let declared = parse_integer(line)?;
    if declared < 0 || declared as usize > MAX_FRAME_ELEMENTS {
        return Err(VigilError::Protocol(format!(
            "invalid array length: {declared}"
        )));
    }
    let mut elements = Vec::with_capacity(declared as usize);
    let mut consumed = header_len;
    for _ in 0..declared {
        let (frame, len) = parse_frame(&src[consumed..])?;
        elements.push(frame);
        consumed += len;
    }
    Ok((RespFrame::Array(elements), consumed))
}

/// Finds the next CRLF-terminated line. Returns the line content and the
/// number of bytes consumed including the terminator.
fn read_line(src: &[u8]) -> Result<(&[u8], usize), VigilError> {
    match src.windows(CRLF_LEN).position(|w| w == CRLF) {
        Some(pos) => Ok((&src[..pos], pos + CRLF_LEN)),
        None => Err(VigilError::IncompleteData),
    }
}

fn parse_integer(line: &[u8]) -> Result<i64, VigilError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            VigilError::Protocol(format!(
                "invalid integer: {}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn to_string(line: &[u8]) -> String {
    String::from_utf8_lossy(line).to_string()
}
