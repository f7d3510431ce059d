//! Encoding and decoding of [`Frame`]s.
//!
//! All integers on the wire are 4-byte big-endian two's-complement. Every
//! read is bounds-checked against the remaining buffer; a declared length
//! that overruns the buffer is a [`DecodeError`], never a panic.

use super::frame::{Event, EventLayout, Frame, Header, MessageType, Optional, HEADER_LEN};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty frame")]
    Empty,

    #[error("Frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Invalid length prefix: {0}")]
    InvalidLength(i32),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("Invalid message type: {0:#06b}")]
    UnknownMessageType(u8),

    #[error("Invalid message flags: {0:#06b}")]
    UnknownFlags(u8),

    #[error("Invalid serialization method: {0:#06b}")]
    UnknownSerialization(u8),

    #[error("Invalid compression method: {0:#06b}")]
    UnknownCompression(u8),

    #[error("Unsupported header size: {0} words")]
    UnsupportedHeaderSize(u8),

    #[error("Invalid string encoding")]
    InvalidUtf8,
}

/// Cursor over a received frame.
#[derive(Clone)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Length-prefixed byte block.
    pub fn read_block(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(DecodeError::InvalidLength(len));
        }
        self.take(len as usize)
    }

    /// Length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_block()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}

/// Growable output buffer for an outgoing frame.
#[derive(Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_block(&mut self, bytes: &[u8]) {
        self.write_i32(bytes.len() as i32);
        self.write_bytes(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn optional_len(header: &Header, optional: &Optional) -> usize {
    if header.message_type == MessageType::ErrorInformation {
        return 4;
    }
    let Some(event) = optional.event.filter(|_| header.flags.carries_event()) else {
        return 0;
    };
    let layout = event.layout();
    let mut len = 4;
    if layout.has_connection_id() {
        len += 4 + optional.connection_id.as_deref().map_or(0, str::len);
    }
    if layout.has_session_id() {
        len += 4 + optional.session_id.as_deref().map_or(0, str::len);
    }
    if layout.has_meta() {
        len += 4 + optional.response_meta.as_deref().map_or(0, str::len);
    }
    len
}

/// Serialize a frame: header, optional section, payload length, payload.
///
/// The optional section is written according to the event's layout. Id
/// fields the layout requires but `optional` lacks are written empty.
pub fn encode(header: &Header, optional: &Optional, payload: &[u8]) -> Vec<u8> {
    let capacity = HEADER_LEN + optional_len(header, optional) + 4 + payload.len();
    let mut writer = FrameWriter::with_capacity(capacity);
    writer.write_bytes(&header.to_bytes());

    if header.message_type == MessageType::ErrorInformation {
        writer.write_u32(optional.error_code.unwrap_or_default());
    } else if let Some(event) = optional.event.filter(|_| header.flags.carries_event()) {
        writer.write_i32(event.code());
        let layout = event.layout();
        if layout.has_connection_id() {
            writer.write_block(optional.connection_id.as_deref().unwrap_or_default().as_bytes());
        }
        if layout.has_session_id() {
            writer.write_block(optional.session_id.as_deref().unwrap_or_default().as_bytes());
        }
        if layout.has_meta() {
            writer.write_block(optional.response_meta.as_deref().unwrap_or_default().as_bytes());
        }
    }

    writer.write_block(payload);
    writer.into_bytes()
}

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    encode(&frame.header, &frame.optional, &frame.payload)
}

/// Parse one complete frame from a binary message.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut reader = FrameReader::new(bytes);
    let header = Header::from_bytes(reader.read_array()?)?;
    let mut optional = Optional::default();
    let mut layout = None;

    if header.message_type == MessageType::ErrorInformation {
        optional.error_code = Some(reader.read_u32()?);
    } else if header.flags.carries_event() {
        let event = Event::from(reader.read_i32()?);
        optional.event = Some(event);
        if let Event::Unrecognized(_) = event {
            let (session_id, payload) = read_unrecognized(&mut reader);
            optional.session_id = session_id;
            return Ok(Frame {
                header,
                optional,
                payload,
            });
        }
        let event_layout = event.layout();
        if event_layout.has_connection_id() {
            optional.connection_id = Some(reader.read_string()?);
        }
        if event_layout.has_session_id() {
            optional.session_id = Some(reader.read_string()?);
        }
        if event_layout.has_meta() {
            optional.response_meta = Some(reader.read_string()?);
        }
        layout = Some(event_layout);
    }

    // Event frames may end right after their id fields.
    let payload_optional = layout.is_some_and(|l: EventLayout| !l.requires_payload());
    let payload = if payload_optional && reader.remaining() == 0 {
        Vec::new()
    } else {
        reader.read_block()?.to_vec()
    };

    if reader.remaining() != 0 {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }

    Ok(Frame {
        header,
        optional,
        payload,
    })
}

/// Events this client does not know have no known field layout. Try the
/// session-scoped layout, then a bare payload, and otherwise keep the raw
/// remainder. Never fails, so a new server event cannot abort a call.
fn read_unrecognized(reader: &mut FrameReader<'_>) -> (Option<String>, Vec<u8>) {
    let mut scoped = reader.clone();
    if let Ok((session_id, payload)) = read_session_scoped(&mut scoped) {
        if scoped.remaining() == 0 {
            *reader = scoped;
            return (Some(session_id), payload.to_vec());
        }
    }

    let mut bare = reader.clone();
    if let Ok(payload) = bare.read_block() {
        if bare.remaining() == 0 {
            *reader = bare;
            return (None, payload.to_vec());
        }
    }

    let rest = reader.buf[reader.pos..].to_vec();
    reader.pos = reader.buf.len();
    (None, rest)
}

fn read_session_scoped<'a>(reader: &mut FrameReader<'a>) -> Result<(String, &'a [u8]), DecodeError> {
    let session_id = reader.read_string()?;
    let payload = reader.read_block()?;
    Ok((session_id, payload))
}
