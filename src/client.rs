use crate::config::{SendFailurePolicy, TtsConfig, SENTINEL_TEXT};
use crate::connection::{ConnectionManager, Inbound};
use crate::error::{Result, TtsError};
use crate::protocol::machine::{Action, ProtocolStateMachine};
use crate::sink::{AudioSink, GuardedSink};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Entry point for streaming synthesis. Cheap to clone; calls share only the
/// immutable configuration.
#[derive(Clone)]
pub struct StreamingClient {
    config: Arc<TtsConfig>,
}

impl StreamingClient {
    pub fn new(config: TtsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(TtsConfig::from_env()?)
    }

    pub fn config(&self) -> &TtsConfig {
        &self.config
    }

    /// Synthesize `text`, delivering audio to `sink` as it arrives.
    ///
    /// Must be called from within a tokio runtime. The returned handle
    /// resolves once, after the last sink invocation.
    pub fn stream_text_to_speech<S: AudioSink>(&self, text: impl Into<String>, sink: S) -> StreamHandle {
        let connect_id = uuid::Uuid::new_v4().to_string();
        self.stream_with_connect_id(text, connect_id, sink)
    }

    /// As [`Self::stream_text_to_speech`], with a caller-chosen correlation id.
    pub fn stream_with_connect_id<S: AudioSink>(
        &self,
        text: impl Into<String>,
        connect_id: impl Into<String>,
        sink: S,
    ) -> StreamHandle {
        let text = text.into();
        let connect_id = connect_id.into();
        let cancel = CancellationToken::new();

        if text.eq_ignore_ascii_case(SENTINEL_TEXT) {
            log::debug!("TTS: end-of-turn sentinel, no synthesis");
            let mut sink = sink;
            sink.on_audio(Vec::new(), true);
            return StreamHandle {
                connect_id,
                cancel,
                inner: HandleInner::Ready(Some(Ok(()))),
            };
        }

        let context = CallContext {
            config: Arc::clone(&self.config),
            machine: ProtocolStateMachine::new(Arc::clone(&self.config), text),
            sink: GuardedSink::new(Box::new(sink)),
            connect_id: connect_id.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(context.run());

        StreamHandle {
            connect_id,
            cancel,
            inner: HandleInner::Running(task),
        }
    }

    /// Synthesize `text` and return the concatenated audio.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.stream_text_to_speech(text, move |chunk: Vec<u8>, is_final: bool| {
            if !is_final {
                let _ = tx.send(chunk);
            }
        })
        .await?;

        let mut audio = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            audio.extend_from_slice(&chunk);
        }
        Ok(audio)
    }
}

enum HandleInner {
    Ready(Option<Result<()>>),
    Running(JoinHandle<Result<()>>),
}

/// Completion handle for one call.
///
/// Await it for the outcome. Dropping it does not cancel the call.
pub struct StreamHandle {
    connect_id: String,
    cancel: CancellationToken,
    inner: HandleInner,
}

impl StreamHandle {
    pub fn connect_id(&self) -> &str {
        &self.connect_id
    }

    /// Close the socket and silence the sink. Idempotent; the handle then
    /// resolves with [`TtsError::Cancelled`] unless the call already completed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        match &self.inner {
            HandleInner::Ready(_) => true,
            HandleInner::Running(task) => task.is_finished(),
        }
    }
}

impl Future for StreamHandle {
    type Output = Result<()>;

    /// Resolves once with the call's outcome. Polling again afterwards yields
    /// [`TtsError::TaskFailed`] rather than panicking.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let joined = match &mut this.inner {
            HandleInner::Ready(result) => {
                return Poll::Ready(result.take().unwrap_or_else(|| {
                    Err(TtsError::TaskFailed("handle polled after completion".to_string()))
                }))
            }
            HandleInner::Running(task) => ready!(Pin::new(task).poll(cx)),
        };
        this.inner = HandleInner::Ready(None);
        Poll::Ready(joined.unwrap_or_else(|e| Err(e.into())))
    }
}

/// Everything one call owns: its state machine, the caller's sink, and the
/// cancellation token. Runs on its own task.
struct CallContext {
    config: Arc<TtsConfig>,
    machine: ProtocolStateMachine,
    sink: GuardedSink,
    connect_id: String,
    cancel: CancellationToken,
}

impl CallContext {
    async fn run(mut self) -> Result<()> {
        let mut connection = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.stop();
                return Err(TtsError::Cancelled);
            }
            opened = ConnectionManager::open(&self.config, &self.connect_id, self.cancel.clone()) => match opened {
                Ok(connection) => connection,
                Err(e) => {
                    log::error!("❌ TTS: failed to connect ({}): {}", self.connect_id, e);
                    self.stop();
                    return Err(e);
                }
            },
        };

        let result = self.drive(&mut connection).await;
        if let Err(e) = &result {
            match e {
                TtsError::Cancelled => log::info!("🛑 TTS: call {} cancelled", self.connect_id),
                e => log::error!("❌ TTS: call {} failed: {}", self.connect_id, e),
            }
            self.stop();
        }
        connection.close().await;
        result
    }

    async fn drive(&mut self, connection: &mut ConnectionManager) -> Result<()> {
        let actions = self.machine.on_connect()?;
        if self.apply(connection, actions).await? {
            return Ok(());
        }

        let period = self.config.timeouts.ping_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TtsError::Cancelled),
                inbound = connection.recv() => match inbound {
                    Some(Inbound::Frame(frame)) => {
                        let actions = self.machine.handle(frame)?;
                        if self.apply(connection, actions).await? {
                            return Ok(());
                        }
                    }
                    Some(Inbound::Error(e)) => return Err(e),
                    Some(Inbound::Closed(reason)) => {
                        return Err(TtsError::Transport(format!(
                            "connection closed in state {:?}: {}",
                            self.machine.state(),
                            reason.unwrap_or_else(|| "no reason given".to_string())
                        )));
                    }
                    None => {
                        return Err(TtsError::Transport(
                            "connection reader stopped unexpectedly".to_string(),
                        ));
                    }
                },
                _ = keepalive.tick() => connection.ping().await?,
            }
        }
    }

    /// Carry out the machine's actions in order. Returns true once the call
    /// has completed.
    async fn apply(&mut self, connection: &mut ConnectionManager, actions: Vec<Action>) -> Result<bool> {
        for action in actions {
            if self.cancel.is_cancelled() {
                return Err(TtsError::Cancelled);
            }
            match action {
                Action::Send(frame) => {
                    if let Err(e) = connection.send_frame(&frame).await {
                        match self.config.send_failure_policy {
                            _ if matches!(e, TtsError::Cancelled) => return Err(e),
                            SendFailurePolicy::LogAndContinue => {
                                log::error!("❌ TTS: {:?} frame not sent: {}", frame.event(), e);
                            }
                            SendFailurePolicy::FailCall => return Err(e),
                        }
                    }
                }
                Action::Audio(chunk) => self.sink.chunk(chunk),
                Action::Finished => {
                    log::info!(
                        "✅ TTS: call {} complete, {} chunks delivered",
                        self.connect_id,
                        self.sink.chunks_delivered()
                    );
                    self.sink.finish();
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn stop(&mut self) {
        self.machine.abort();
        self.sink.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(result: Result<()>) -> StreamHandle {
        StreamHandle {
            connect_id: "call".to_string(),
            cancel: CancellationToken::new(),
            inner: HandleInner::Running(tokio::spawn(async move { result })),
        }
    }

    #[tokio::test]
    async fn test_running_handle_is_fused() {
        let mut handle = running(Ok(()));
        (&mut handle).await.unwrap();
        assert!(handle.is_finished());
        assert!(matches!((&mut handle).await, Err(TtsError::TaskFailed(_))));
    }

    #[tokio::test]
    async fn test_ready_handle_is_fused() {
        let mut handle = StreamHandle {
            connect_id: "call".to_string(),
            cancel: CancellationToken::new(),
            inner: HandleInner::Ready(Some(Ok(()))),
        };
        (&mut handle).await.unwrap();
        assert!(matches!((&mut handle).await, Err(TtsError::TaskFailed(_))));
    }

    #[tokio::test]
    async fn test_running_handle_passes_call_error_through() {
        let mut handle = running(Err(TtsError::Cancelled));
        assert!(matches!((&mut handle).await, Err(TtsError::Cancelled)));
    }
}
