pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod sink;

pub use client::{StreamHandle, StreamingClient};
pub use config::{AudioFormat, SendFailurePolicy, TtsConfig};
pub use error::{Result, TtsError};
pub use sink::{AudioSink, Base64Sink};
