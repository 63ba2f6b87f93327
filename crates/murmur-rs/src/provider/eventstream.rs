//! Decoder for the binary `application/vnd.amazon.eventstream` framing.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! total_len: u32 | headers_len: u32 | prelude_crc: u32
//! headers: headers_len bytes
//! payload: total_len - headers_len - 16 bytes
//! message_crc: u32
//! ```
//!
//! Checksums are not verified; the body already arrives over TLS.

use std::collections::HashMap;

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + TRAILER_LEN;
/// Upper bound on a single frame (the service limit is 16 MiB).
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A decoded frame. Only string headers are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// `:message-type` header: `event`, `exception` or `error`.
    pub fn message_type(&self) -> Option<&str> {
        self.header(":message-type")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header(":event-type")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The declared frame length is impossible.
    BadLength(usize),
    /// A header runs past the end of the header block.
    TruncatedHeader,
    /// Unknown header value type tag.
    UnknownHeaderType(u8),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::BadLength(n) => write!(f, "invalid event-stream frame length {n}"),
            FrameError::TruncatedHeader => write!(f, "truncated event-stream header"),
            FrameError::UnknownHeaderType(t) => {
                write!(f, "unknown event-stream header type {t}")
            }
        }
    }
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame completed by them.
    ///
    /// After an `Err` the decoder is out of sync and should be discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while self.buffer.len() >= PRELUDE_LEN {
            let total_len = read_u32(&self.buffer[0..4]) as usize;
            let headers_len = read_u32(&self.buffer[4..8]) as usize;
            if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len)
                || headers_len > total_len - MIN_FRAME_LEN
            {
                return Err(FrameError::BadLength(total_len));
            }
            if self.buffer.len() < total_len {
                break;
            }

            let frame_bytes: Vec<u8> = self.buffer.drain(..total_len).collect();
            let headers_end = PRELUDE_LEN + headers_len;
            let headers = parse_headers(&frame_bytes[PRELUDE_LEN..headers_end])?;
            let payload = frame_bytes[headers_end..total_len - TRAILER_LEN].to_vec();
            frames.push(Frame { headers, payload });
        }
        Ok(frames)
    }

    /// Bytes buffered but not yet forming a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], FrameError> {
    let end = pos.checked_add(n).ok_or(FrameError::TruncatedHeader)?;
    let slice = bytes.get(*pos..end).ok_or(FrameError::TruncatedHeader)?;
    *pos = end;
    Ok(slice)
}

fn parse_headers(bytes: &[u8]) -> Result<HashMap<String, String>, FrameError> {
    let mut headers = HashMap::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let name_len = take(bytes, &mut pos, 1)?[0] as usize;
        let name = String::from_utf8_lossy(take(bytes, &mut pos, name_len)?).into_owned();
        let value_type = take(bytes, &mut pos, 1)?[0];
        match value_type {
            // bool true / bool false
            0 | 1 => {}
            2 => {
                take(bytes, &mut pos, 1)?;
            }
            3 => {
                take(bytes, &mut pos, 2)?;
            }
            4 => {
                take(bytes, &mut pos, 4)?;
            }
            // int64, timestamp
            5 | 8 => {
                take(bytes, &mut pos, 8)?;
            }
            // byte array / string
            6 | 7 => {
                let len_bytes = take(bytes, &mut pos, 2)?;
                let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let value = take(bytes, &mut pos, len)?;
                if value_type == 7 {
                    headers.insert(name, String::from_utf8_lossy(value).into_owned());
                }
            }
            // uuid
            9 => {
                take(bytes, &mut pos, 16)?;
            }
            other => return Err(FrameError::UnknownHeaderType(other)),
        }
    }
    Ok(headers)
}

/// Encode a frame with string headers. Used by tests and fakes.
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }
    let total_len = MIN_FRAME_LEN + header_bytes.len() + payload.len();

    let mut frame = Vec::with_capacity(total_len);
    frame.extend_from_slice(&(total_len as u32).to_be_bytes());
    frame.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame
}
