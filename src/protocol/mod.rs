//! Binary framing and session protocol of the bidirectional TTS service.
//!
//! Everything here is free of I/O: [`codec`] turns bytes into [`frame::Frame`]s
//! and back, [`machine`] decides which frames to send next.

pub mod codec;
pub mod frame;
pub mod machine;
pub mod payload;

pub use codec::{decode, encode, encode_frame, DecodeError};
pub use frame::{Event, Frame, Header, MessageFlags, MessageType, Optional};
pub use machine::{Action, Lifecycle, ProtocolStateMachine, State};
