//! Frame model for the bidirectional TTS wire protocol.
//!
//! ```text
//! ┌───────────────┬─────────────────────────┬─────────────┬──────────┐
//! │ Header        │ Optional                │ Payload len │ Payload  │
//! │ 4 bytes       │ event + id / error code │ u32 BE      │ N bytes  │
//! └───────────────┴─────────────────────────┴─────────────┴──────────┘
//! ```
//!
//! Header nibbles: `version|size`, `type|flags`, `serialization|compression`,
//! then one reserved byte.

use super::codec::DecodeError;
use std::fmt;

pub const PROTOCOL_VERSION: u8 = 0b0001;

/// Header size in 4-byte words. Only the base header is supported.
pub const DEFAULT_HEADER_SIZE: u8 = 0b0001;

pub const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    FullClientRequest = 0b0001,
    FullServerResponse = 0b1001,
    AudioOnlyResponse = 0b1011,
    ErrorInformation = 0b1111,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0b0001 => Ok(MessageType::FullClientRequest),
            0b1001 => Ok(MessageType::FullServerResponse),
            0b1011 => Ok(MessageType::AudioOnlyResponse),
            0b1111 => Ok(MessageType::ErrorInformation),
            _ => Err(DecodeError::UnknownMessageType(value)),
        }
    }
}

/// Message-type-specific flags (low nibble of byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageFlags {
    NoSequence = 0b0000,
    PositiveSequence = 0b0001,
    LastNoSequence = 0b0010,
    NegativeSequence = 0b0011,
    WithEvent = 0b0100,
}

impl MessageFlags {
    pub fn carries_event(self) -> bool {
        self == MessageFlags::WithEvent
    }
}

impl TryFrom<u8> for MessageFlags {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0b0000 => Ok(MessageFlags::NoSequence),
            0b0001 => Ok(MessageFlags::PositiveSequence),
            0b0010 => Ok(MessageFlags::LastNoSequence),
            0b0011 => Ok(MessageFlags::NegativeSequence),
            0b0100 => Ok(MessageFlags::WithEvent),
            _ => Err(DecodeError::UnknownFlags(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Serialization {
    None = 0b0000,
    Json = 0b0001,
}

impl TryFrom<u8> for Serialization {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0b0000 => Ok(Serialization::None),
            0b0001 => Ok(Serialization::Json),
            _ => Err(DecodeError::UnknownSerialization(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0b0000,
    Gzip = 0b0001,
}

impl TryFrom<u8> for Compression {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0b0000 => Ok(Compression::None),
            0b0001 => Ok(Compression::Gzip),
            _ => Err(DecodeError::UnknownCompression(value)),
        }
    }
}

/// Protocol events carried in the optional section.
///
/// Codes the client does not know are kept as [`Event::Unrecognized`] so a
/// newer service can add informational events without breaking a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Connection lifecycle
    StartConnection,
    FinishConnection,
    ConnectionStarted,
    ConnectionFailed,
    ConnectionFinished,
    // Session lifecycle
    StartSession,
    FinishSession,
    SessionStarted,
    SessionFinished,
    SessionFailed,
    // Data
    TaskRequest,
    SentenceStart,
    SentenceEnd,
    TtsResponse,
    Unrecognized(i32),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::SentenceStart => f.write_str("TTSSentenceStart"),
            Event::SentenceEnd => f.write_str("TTSSentenceEnd"),
            Event::TtsResponse => f.write_str("TTSResponse"),
            Event::Unrecognized(code) => write!(f, "Event({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

impl Event {
    pub fn code(self) -> i32 {
        match self {
            Event::StartConnection => 1,
            Event::FinishConnection => 2,
            Event::ConnectionStarted => 50,
            Event::ConnectionFailed => 51,
            Event::ConnectionFinished => 52,
            Event::StartSession => 100,
            Event::FinishSession => 102,
            Event::SessionStarted => 150,
            Event::SessionFinished => 152,
            Event::SessionFailed => 153,
            Event::TaskRequest => 200,
            Event::SentenceStart => 350,
            Event::SentenceEnd => 351,
            Event::TtsResponse => 352,
            Event::Unrecognized(code) => code,
        }
    }

    /// Which fields follow the event code on the wire.
    ///
    /// Unrecognized events are written bare; decoding them is lenient (see
    /// [`crate::protocol::codec::decode`]).
    pub fn layout(self) -> EventLayout {
        match self {
            Event::StartConnection
            | Event::FinishConnection
            | Event::ConnectionFinished
            | Event::Unrecognized(_) => EventLayout::Bare,
            Event::ConnectionStarted => EventLayout::ConnectionId,
            Event::ConnectionFailed => EventLayout::ConnectionIdMeta,
            Event::StartSession
            | Event::FinishSession
            | Event::TaskRequest
            | Event::SessionStarted => EventLayout::SessionId,
            Event::SentenceStart | Event::SentenceEnd | Event::TtsResponse => {
                EventLayout::SessionIdPayload
            }
            Event::SessionFinished | Event::SessionFailed => EventLayout::SessionIdMeta,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Event::ConnectionFailed | Event::SessionFailed)
    }
}

impl From<i32> for Event {
    fn from(code: i32) -> Self {
        match code {
            1 => Event::StartConnection,
            2 => Event::FinishConnection,
            50 => Event::ConnectionStarted,
            51 => Event::ConnectionFailed,
            52 => Event::ConnectionFinished,
            100 => Event::StartSession,
            102 => Event::FinishSession,
            150 => Event::SessionStarted,
            152 => Event::SessionFinished,
            153 => Event::SessionFailed,
            200 => Event::TaskRequest,
            350 => Event::SentenceStart,
            351 => Event::SentenceEnd,
            352 => Event::TtsResponse,
            other => Event::Unrecognized(other),
        }
    }
}

/// Field layout following an event code.
///
/// Every layout is followed by the length-prefixed payload. For the `*Meta`
/// layouts the metadata string sits where the service would put its payload,
/// so in practice the trailing payload is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLayout {
    Bare,
    ConnectionId,
    ConnectionIdMeta,
    SessionId,
    SessionIdPayload,
    SessionIdMeta,
}

impl EventLayout {
    pub fn has_connection_id(self) -> bool {
        matches!(self, EventLayout::ConnectionId | EventLayout::ConnectionIdMeta)
    }

    pub fn has_session_id(self) -> bool {
        matches!(
            self,
            EventLayout::SessionId | EventLayout::SessionIdPayload | EventLayout::SessionIdMeta
        )
    }

    pub fn has_meta(self) -> bool {
        matches!(self, EventLayout::ConnectionIdMeta | EventLayout::SessionIdMeta)
    }

    /// Whether the payload length prefix must be present.
    pub fn requires_payload(self) -> bool {
        self == EventLayout::SessionIdPayload
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub protocol_version: u8,
    pub header_size: u8,
    pub message_type: MessageType,
    pub flags: MessageFlags,
    pub serialization: Serialization,
    pub compression: Compression,
    pub reserved: u8,
}

impl Header {
    /// Header used for every frame the client sends.
    pub fn client_request() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            header_size: DEFAULT_HEADER_SIZE,
            message_type: MessageType::FullClientRequest,
            flags: MessageFlags::WithEvent,
            serialization: Serialization::Json,
            compression: Compression::None,
            reserved: 0,
        }
    }

    pub fn new(message_type: MessageType, flags: MessageFlags, serialization: Serialization) -> Self {
        Self {
            message_type,
            flags,
            serialization,
            ..Self::client_request()
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        [
            (self.protocol_version << 4) | (self.header_size & 0x0f),
            ((self.message_type as u8) << 4) | self.flags as u8,
            ((self.serialization as u8) << 4) | self.compression as u8,
            self.reserved,
        ]
    }

    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Result<Self, DecodeError> {
        let header_size = bytes[0] & 0x0f;
        if header_size != DEFAULT_HEADER_SIZE {
            return Err(DecodeError::UnsupportedHeaderSize(header_size));
        }

        Ok(Self {
            protocol_version: bytes[0] >> 4,
            header_size,
            message_type: MessageType::try_from(bytes[1] >> 4)?,
            flags: MessageFlags::try_from(bytes[1] & 0x0f)?,
            serialization: Serialization::try_from(bytes[2] >> 4)?,
            compression: Compression::try_from(bytes[2] & 0x0f)?,
            reserved: bytes[3],
        })
    }
}

/// The event-dependent section between header and payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Optional {
    pub event: Option<Event>,
    pub session_id: Option<String>,
    pub connection_id: Option<String>,
    pub response_meta: Option<String>,
    /// Only present on `ErrorInformation` frames.
    pub error_code: Option<u32>,
}

impl Optional {
    pub fn event(event: Event) -> Self {
        Self {
            event: Some(event),
            ..Self::default()
        }
    }

    pub fn session_event(event: Event, session_id: impl Into<String>) -> Self {
        Self {
            event: Some(event),
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub optional: Optional,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(header: Header, optional: Optional, payload: Vec<u8>) -> Self {
        Self {
            header,
            optional,
            payload,
        }
    }

    pub fn event(&self) -> Option<Event> {
        self.optional.event
    }

    pub fn session_id(&self) -> Option<&str> {
        self.optional.session_id.as_deref()
    }

    /// Payload as text, for JSON bodies and error messages.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
