//! Scripted stand-in for the TTS service, speaking the binary protocol over a
//! local WebSocket.

#![allow(dead_code)]

use bidi_tts::protocol::frame::{MessageFlags, Serialization};
use bidi_tts::protocol::{decode, encode, Event, Frame, Header, MessageType, Optional};
use bidi_tts::TtsConfig;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

pub const CONNECTION_ID: &str = "mock-connection";

/// How the mock answers a call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Full handshake, then these audio chunks between two sentence events.
    Complete { chunks: Vec<Vec<u8>> },
    /// Full handshake, echoing the task text back as a single audio chunk.
    Echo,
    /// Answer StartConnection with ConnectionFailed carrying this metadata.
    RejectConnection { meta: String },
    /// Answer StartSession with an ERROR_INFORMATION frame.
    ErrorInformation { code: u32, message: String },
    /// Answer StartConnection with bytes that are not a frame.
    Garbage,
    /// Close the socket right after StartConnection.
    CloseAfterStart,
    /// Read everything, answer nothing.
    Silent,
    /// Answer StartSession, then stop reading so client writes back up.
    StallAfterSessionStart,
}

/// What the mock observed on one connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionLog {
    pub headers: HashMap<String, String>,
    pub events: Vec<Event>,
    pub session_id: Option<String>,
    pub text: Option<String>,
    pub pings: usize,
}

pub struct MockTtsServer {
    pub addr: SocketAddr,
    connections: Arc<Mutex<Vec<ConnectionLog>>>,
    accept_loop: JoinHandle<()>,
}

impl MockTtsServer {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("No local address");
        let connections = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&connections);
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, script.clone(), Arc::clone(&log)));
            }
        });

        Self {
            addr,
            connections,
            accept_loop,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn config(&self) -> TtsConfig {
        let mut config = TtsConfig::new("test-app", "test-token");
        config.endpoint = self.endpoint();
        config.resource_id = "test-resource".to_string();
        config.timeouts.connect = Duration::from_secs(5);
        config
    }

    pub fn connections(&self) -> Vec<ConnectionLog> {
        self.connections.lock().unwrap().clone()
    }

    /// Poll until `check` holds for the recorded connections, or panic.
    pub async fn wait_until(&self, check: impl Fn(&[ConnectionLog]) -> bool) {
        for _ in 0..200 {
            if check(&self.connections()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mock server never reached expected state: {:?}", self.connections());
    }
}

impl Drop for MockTtsServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

pub type Calls = Arc<Mutex<Vec<(Vec<u8>, bool)>>>;

/// A sink that records every invocation.
pub fn recording_sink() -> (impl FnMut(Vec<u8>, bool) + Send + 'static, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    let sink = move |chunk: Vec<u8>, is_final: bool| {
        recorded.lock().unwrap().push((chunk, is_final));
    };
    (sink, calls)
}

enum Reply {
    Send(Vec<u8>),
    Close,
    Stall,
}

async fn serve(stream: TcpStream, script: Script, log: Arc<Mutex<Vec<ConnectionLog>>>) {
    let headers = Arc::new(Mutex::new(HashMap::new()));
    let captured = Arc::clone(&headers);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let mut captured = captured.lock().unwrap();
        for (name, value) in request.headers() {
            captured.insert(
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            );
        }
        Ok(response)
    };

    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };

    let index = {
        let mut log = log.lock().unwrap();
        log.push(ConnectionLog {
            headers: headers.lock().unwrap().clone(),
            ..ConnectionLog::default()
        });
        log.len() - 1
    };

    while let Some(message) = ws.next().await {
        let data = match message {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Ping(_)) => {
                log.lock().unwrap()[index].pings += 1;
                continue;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let Ok(frame) = decode(data.as_slice()) else {
            break;
        };
        let Some(event) = frame.event() else {
            continue;
        };

        let replies = {
            let mut log = log.lock().unwrap();
            let connection = &mut log[index];
            connection.events.push(event);
            respond(&script, event, &frame, connection)
        };

        for reply in replies {
            match reply {
                Reply::Send(bytes) => {
                    if ws.send(Message::Binary(bytes.into())).await.is_err() {
                        return;
                    }
                }
                Reply::Close => {
                    let _ = ws.close(None).await;
                    return;
                }
                Reply::Stall => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    return;
                }
            }
        }
    }
}

fn respond(script: &Script, event: Event, frame: &Frame, connection: &mut ConnectionLog) -> Vec<Reply> {
    match event {
        Event::StartConnection => match script {
            Script::RejectConnection { meta } => vec![Reply::Send(server_frame(Optional {
                event: Some(Event::ConnectionFailed),
                response_meta: Some(meta.clone()),
                ..Optional::default()
            }))],
            Script::Garbage => vec![Reply::Send(vec![0x11, 0x94])],
            Script::CloseAfterStart => vec![Reply::Close],
            Script::Silent => Vec::new(),
            _ => vec![Reply::Send(server_frame(Optional {
                event: Some(Event::ConnectionStarted),
                connection_id: Some(CONNECTION_ID.to_string()),
                ..Optional::default()
            }))],
        },
        Event::StartSession => {
            let session_id = frame.session_id().unwrap_or_default().to_string();
            connection.session_id = Some(session_id.clone());
            match script {
                Script::ErrorInformation { code, message } => {
                    let header = Header::new(
                        MessageType::ErrorInformation,
                        MessageFlags::NoSequence,
                        Serialization::Json,
                    );
                    let optional = Optional {
                        error_code: Some(*code),
                        ..Optional::default()
                    };
                    vec![Reply::Send(encode(&header, &optional, message.as_bytes()))]
                }
                Script::StallAfterSessionStart => vec![
                    Reply::Send(server_frame(Optional::session_event(
                        Event::SessionStarted,
                        session_id,
                    ))),
                    Reply::Stall,
                ],
                _ => vec![Reply::Send(server_frame(Optional::session_event(
                    Event::SessionStarted,
                    session_id,
                )))],
            }
        }
        Event::TaskRequest => {
            let body: serde_json::Value =
                serde_json::from_slice(&frame.payload).unwrap_or_default();
            connection.text = body["req_params"]["text"].as_str().map(str::to_string);
            Vec::new()
        }
        Event::FinishSession => {
            let session_id = connection.session_id.clone().unwrap_or_default();
            let chunks = match script {
                Script::Complete { chunks } => chunks.clone(),
                Script::Echo => vec![connection.text.clone().unwrap_or_default().into_bytes()],
                _ => Vec::new(),
            };

            let mut replies = vec![Reply::Send(encode(
                &server_header(MessageType::FullServerResponse),
                &Optional::session_event(Event::SentenceStart, session_id.clone()),
                br#"{"res_params":{"text":"sentence"}}"#,
            ))];
            for chunk in chunks {
                replies.push(Reply::Send(encode(
                    &Header {
                        serialization: Serialization::None,
                        ..server_header(MessageType::AudioOnlyResponse)
                    },
                    &Optional::session_event(Event::TtsResponse, session_id.clone()),
                    &chunk,
                )));
            }
            replies.push(Reply::Send(encode(
                &server_header(MessageType::FullServerResponse),
                &Optional::session_event(Event::SentenceEnd, session_id.clone()),
                b"{}",
            )));
            replies.push(Reply::Send(server_frame(Optional {
                event: Some(Event::SessionFinished),
                session_id: Some(session_id),
                response_meta: Some(r#"{"status_code":20000000,"message":"ok"}"#.to_string()),
                ..Optional::default()
            })));
            replies
        }
        Event::FinishConnection => vec![Reply::Send(server_frame(Optional::event(
            Event::ConnectionFinished,
        )))],
        _ => Vec::new(),
    }
}

fn server_header(message_type: MessageType) -> Header {
    Header::new(message_type, MessageFlags::WithEvent, Serialization::Json)
}

fn server_frame(optional: Optional) -> Vec<u8> {
    encode(&server_header(MessageType::FullServerResponse), &optional, &[])
}
