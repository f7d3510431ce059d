//! Connection/session handshake for one synthesis call.
//!
//! The machine never touches the socket. Each inbound [`Frame`] yields a list
//! of [`Action`]s for the caller to carry out in order.

use super::frame::{Event, Frame, Header, MessageType, Optional};
use super::payload::{ResponseMeta, SessionRequest, EMPTY_PAYLOAD};
use crate::config::{SendFailurePolicy, TtsConfig};
use crate::error::{Result, TtsError};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingConnectionStart,
    ConnectionEstablished,
    AwaitingSessionStart,
    SessionActive,
    /// Reserved for a client that sends FinishSession separately from the
    /// task request; this client sends both at once and stays `SessionActive`.
    AwaitingSessionFinish,
    AwaitingConnectionFinish,
    Closed,
    Failed,
}

/// Coarse connection lifecycle derived from [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Opening,
    Established,
    SessionActive,
    Finishing,
    Closed,
    Failed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Closed | State::Failed)
    }

    pub fn lifecycle(self) -> Lifecycle {
        match self {
            State::Idle | State::AwaitingConnectionStart => Lifecycle::Opening,
            State::ConnectionEstablished | State::AwaitingSessionStart => Lifecycle::Established,
            State::SessionActive | State::AwaitingSessionFinish => Lifecycle::SessionActive,
            State::AwaitingConnectionFinish => Lifecycle::Finishing,
            State::Closed => Lifecycle::Closed,
            State::Failed => Lifecycle::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write this frame to the socket.
    Send(Frame),
    /// Deliver a non-final audio chunk.
    Audio(Vec<u8>),
    /// Connection finished cleanly: deliver the final marker and close.
    Finished,
}

pub struct ProtocolStateMachine {
    config: Arc<TtsConfig>,
    text: String,
    state: State,
    session_id: Option<String>,
    connection_id: Option<String>,
    chunks: usize,
    audio_bytes: usize,
}

impl ProtocolStateMachine {
    pub fn new(config: Arc<TtsConfig>, text: impl Into<String>) -> Self {
        Self {
            config,
            text: text.into(),
            state: State::Idle,
            session_id: None,
            connection_id: None,
            chunks: 0,
            audio_bytes: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Socket is open: begin the handshake with StartConnection.
    pub fn on_connect(&mut self) -> Result<Vec<Action>> {
        if self.state != State::Idle {
            log::warn!("TTS: on_connect called in state {:?}, ignoring", self.state);
            return Ok(Vec::new());
        }
        self.state = State::AwaitingConnectionStart;
        Ok(vec![Action::Send(Self::control_frame(Optional::event(
            Event::StartConnection,
        )))])
    }

    /// Advance on one inbound frame. Any error leaves the machine `Failed`.
    pub fn handle(&mut self, frame: Frame) -> Result<Vec<Action>> {
        if self.state.is_terminal() {
            log::debug!("TTS: dropping frame received in {:?}", self.state);
            return Ok(Vec::new());
        }
        let result = self.step(frame);
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    /// Transport failure or cancellation. Returns false if already terminal.
    pub fn abort(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        log::debug!("TTS: aborting from {:?}", self.state);
        self.state = State::Failed;
        true
    }

    fn step(&mut self, frame: Frame) -> Result<Vec<Action>> {
        if frame.header.message_type == MessageType::ErrorInformation {
            return Err(TtsError::ServerError {
                code: frame.optional.error_code.unwrap_or_default(),
                message: frame.payload_text(),
            });
        }

        let Some(event) = frame.event() else {
            log::debug!(
                "TTS: ignoring {:?} frame without event",
                frame.header.message_type
            );
            return Ok(Vec::new());
        };

        if event.is_failure() {
            let raw = frame
                .optional
                .response_meta
                .clone()
                .unwrap_or_else(|| frame.payload_text());
            log::error!("❌ TTS: {} in state {:?}: {}", event, self.state, raw);
            return Err(TtsError::ProtocolFailure {
                event,
                message: ResponseMeta::describe(&raw),
            });
        }

        if let (Some(ours), Some(theirs)) = (self.session_id.as_deref(), frame.session_id()) {
            if ours != theirs {
                log::warn!("TTS: ignoring {} for foreign session {}", event, theirs);
                return Ok(Vec::new());
            }
        }

        let mut actions = Vec::new();
        match (self.state, event) {
            (State::AwaitingConnectionStart, Event::ConnectionStarted) => {
                self.connection_id = frame.optional.connection_id.clone();
                self.state = State::ConnectionEstablished;
                log::info!(
                    "🔗 TTS: connection started (id: {})",
                    self.connection_id.as_deref().unwrap_or("-")
                );
                self.start_session(&mut actions)?;
            }
            (State::AwaitingSessionStart, Event::SessionStarted) => {
                log::info!("🎙️ TTS: session started, sending {} chars", self.text.chars().count());
                self.state = State::SessionActive;
                self.send_task(&mut actions)?;
                let session_id = self.session_id.clone().unwrap_or_default();
                actions.push(Action::Send(Self::control_frame(Optional::session_event(
                    Event::FinishSession,
                    session_id,
                ))));
            }
            (State::SessionActive, Event::SentenceStart | Event::SentenceEnd) => {
                log::debug!("TTS: {} {}", event, frame.payload_text());
            }
            (State::SessionActive, Event::TtsResponse) => {
                if frame.header.message_type != MessageType::AudioOnlyResponse {
                    log::debug!("TTS: ignoring non-audio TTSResponse");
                } else if frame.payload.is_empty() {
                    log::trace!("TTS: skipping empty audio chunk");
                } else {
                    self.chunks += 1;
                    self.audio_bytes += frame.payload.len();
                    log::trace!(
                        "📥 TTS: audio chunk {} ({} bytes)",
                        self.chunks,
                        frame.payload.len()
                    );
                    actions.push(Action::Audio(frame.payload));
                }
            }
            (State::SessionActive, Event::SessionFinished) => {
                log::info!(
                    "✅ TTS: session finished, {} chunks / {} bytes",
                    self.chunks,
                    self.audio_bytes
                );
                self.session_id = None;
                self.state = State::AwaitingConnectionFinish;
                actions.push(Action::Send(Self::control_frame(Optional::event(
                    Event::FinishConnection,
                ))));
            }
            (State::AwaitingConnectionFinish, Event::ConnectionFinished) => {
                log::info!("🔚 TTS: connection finished");
                self.state = State::Closed;
                actions.push(Action::Finished);
            }
            (state, event) => {
                log::warn!("TTS: unexpected {} in state {:?}, ignoring", event, state);
            }
        }
        Ok(actions)
    }

    fn start_session(&mut self, actions: &mut Vec<Action>) -> Result<()> {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        log::debug!("TTS: starting session {}", session_id);
        self.session_id = Some(session_id.clone());
        self.state = State::AwaitingSessionStart;

        let body = SessionRequest::start_session(&self.config).to_bytes();
        self.push_json_frame(actions, Event::StartSession, session_id, body)
    }

    fn send_task(&mut self, actions: &mut Vec<Action>) -> Result<()> {
        let session_id = self.session_id.clone().unwrap_or_default();
        let body = SessionRequest::task(&self.config, &self.text).to_bytes();
        self.push_json_frame(actions, Event::TaskRequest, session_id, body)
    }

    fn push_json_frame(
        &self,
        actions: &mut Vec<Action>,
        event: Event,
        session_id: String,
        body: std::result::Result<Vec<u8>, serde_json::Error>,
    ) -> Result<()> {
        match body {
            Ok(payload) => {
                actions.push(Action::Send(Frame::new(
                    Header::client_request(),
                    Optional::session_event(event, session_id),
                    payload,
                )));
                Ok(())
            }
            Err(e) => match self.config.send_failure_policy {
                SendFailurePolicy::LogAndContinue => {
                    log::error!("❌ TTS: failed to build {} request, not sent: {}", event, e);
                    Ok(())
                }
                SendFailurePolicy::FailCall => Err(TtsError::EncodingBuild(e)),
            },
        }
    }

    fn control_frame(optional: Optional) -> Frame {
        Frame::new(Header::client_request(), optional, EMPTY_PAYLOAD.to_vec())
    }
}
