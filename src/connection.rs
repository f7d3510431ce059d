//! WebSocket transport for one synthesis call.
//!
//! A spawned reader task decodes every inbound binary message and forwards
//! it over a channel, so the call context consumes frames one at a time.

use crate::config::{ConfigError, TtsConfig};
use crate::error::{Result, TtsError};
use crate::protocol::codec;
use crate::protocol::frame::Frame;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INBOUND_CAPACITY: usize = 64;

pub const APP_KEY_HEADER: &str = "X-Api-App-Key";
pub const ACCESS_KEY_HEADER: &str = "X-Api-Access-Key";
pub const RESOURCE_ID_HEADER: &str = "X-Api-Resource-Id";
pub const CONNECT_ID_HEADER: &str = "X-Api-Connect-Id";
const LOG_ID_HEADER: &str = "X-Tt-Logid";

/// What the reader task reports to the call context.
#[derive(Debug)]
pub enum Inbound {
    Frame(Frame),
    /// Remote closed the socket (close frame or end of stream).
    Closed(Option<String>),
    Error(TtsError),
}

pub struct ConnectionManager {
    writer: SplitSink<WsStream, Message>,
    inbound: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
    write_timeout: Duration,
    cancel: CancellationToken,
    closed: bool,
}

impl ConnectionManager {
    /// Open the socket with the service's handshake headers.
    ///
    /// Writes give up with [`TtsError::Cancelled`] as soon as `cancel` fires.
    pub async fn open(config: &TtsConfig, connect_id: &str, cancel: CancellationToken) -> Result<Self> {
        let mut request = config.endpoint.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(APP_KEY_HEADER, header_value(APP_KEY_HEADER, &config.app_id)?);
        headers.insert(
            ACCESS_KEY_HEADER,
            header_value(ACCESS_KEY_HEADER, config.access_token())?,
        );
        headers.insert(
            RESOURCE_ID_HEADER,
            header_value(RESOURCE_ID_HEADER, &config.resource_id)?,
        );
        headers.insert(CONNECT_ID_HEADER, header_value(CONNECT_ID_HEADER, connect_id)?);

        log::debug!("🔗 TTS: connecting to {} (connect id {})", config.endpoint, connect_id);
        let (ws_stream, response) =
            tokio::time::timeout(config.timeouts.connect, connect_async(request))
                .await
                .map_err(|_| {
                    TtsError::Timeout(format!(
                        "connecting to {} took longer than {:?}",
                        config.endpoint, config.timeouts.connect
                    ))
                })??;

        log::info!(
            "✅ TTS WebSocket connected, status: {}, logid: {}",
            response.status(),
            response
                .headers()
                .get(LOG_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
        );

        let (writer, read) = ws_stream.split();
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(read_loop(read, tx, config.timeouts.read));

        Ok(Self {
            writer,
            inbound,
            reader,
            write_timeout: config.timeouts.write,
            cancel,
            closed: false,
        })
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = codec::encode_frame(frame);
        log::trace!(
            "📤 TTS: sending {:?} ({} bytes)",
            frame.event(),
            bytes.len()
        );
        self.send_message(Message::Binary(bytes.into())).await
    }

    /// Keepalive ping; a dead peer surfaces as a write or read timeout.
    pub async fn ping(&mut self) -> Result<()> {
        log::trace!("🏓 TTS: ping");
        self.send_message(Message::Ping(Vec::<u8>::new().into())).await
    }

    async fn send_message(&mut self, message: Message) -> Result<()> {
        if self.closed {
            return Err(TtsError::Transport("connection already closed".to_string()));
        }
        let write_timeout = self.write_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TtsError::Cancelled),
            written = tokio::time::timeout(write_timeout, self.writer.send(message)) => {
                written.map_err(|_| {
                    TtsError::Timeout(format!("write took longer than {:?}", write_timeout))
                })??;
                Ok(())
            }
        }
    }

    /// Next event from the reader task; `None` once the reader has stopped.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Close the socket and stop the reader. Safe to call more than once.
    ///
    /// A cancelled call skips the close handshake; the socket is dropped with
    /// the manager.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.cancel.is_cancelled() {
            log::debug!("TTS: cancelled, dropping socket without close handshake");
        } else {
            match tokio::time::timeout(Duration::from_secs(5), self.writer.close()).await {
                Ok(Ok(())) => log::debug!("🔚 TTS WebSocket closed cleanly"),
                Ok(Err(e)) => log::debug!("TTS: close handshake failed: {}", e),
                Err(_) => log::debug!("TTS: close handshake timed out"),
            }
        }
        self.reader.abort();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        TtsError::Config(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: e.to_string(),
        })
    })
}

async fn read_loop(mut read: SplitStream<WsStream>, tx: mpsc::Sender<Inbound>, read_timeout: Duration) {
    let mut message_count = 0usize;
    loop {
        let next = match tokio::time::timeout(read_timeout, read.next()).await {
            Ok(next) => next,
            Err(_) => {
                log::warn!("TTS: no data from server for {:?}", read_timeout);
                let _ = tx
                    .send(Inbound::Error(TtsError::Timeout(format!(
                        "no data from server for {:?}",
                        read_timeout
                    ))))
                    .await;
                return;
            }
        };

        let inbound = match next {
            Some(Ok(Message::Binary(data))) => {
                message_count += 1;
                match codec::decode(data.as_slice()) {
                    Ok(frame) => Inbound::Frame(frame),
                    Err(e) => {
                        log::error!(
                            "❌ TTS: undecodable frame {} ({} bytes): {}",
                            message_count,
                            data.len(),
                            e
                        );
                        let _ = tx.send(Inbound::Error(TtsError::Decode(e))).await;
                        return;
                    }
                }
            }
            Some(Ok(Message::Text(text))) => {
                log::debug!("TTS: ignoring text message: {}", text);
                continue;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                log::info!("TTS: server closed connection: {:?}", frame);
                let _ = tx
                    .send(Inbound::Closed(frame.map(|f| f.reason.to_string())))
                    .await;
                return;
            }
            Some(Err(e)) => {
                log::warn!("❌ TTS WebSocket read error: {}", e);
                let _ = tx.send(Inbound::Error(TtsError::WebSocket(e))).await;
                return;
            }
            None => {
                let _ = tx.send(Inbound::Closed(None)).await;
                return;
            }
        };

        if tx.send(inbound).await.is_err() {
            // Call context is gone.
            return;
        }
    }
}
