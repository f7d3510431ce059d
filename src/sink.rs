//! Consumers of synthesized audio.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Receives audio chunks in emission order, then at most one final marker.
///
/// The final invocation carries an empty chunk and `is_final = true`.
pub trait AudioSink: Send + 'static {
    fn on_audio(&mut self, chunk: Vec<u8>, is_final: bool);
}

impl<F> AudioSink for F
where
    F: FnMut(Vec<u8>, bool) + Send + 'static,
{
    fn on_audio(&mut self, chunk: Vec<u8>, is_final: bool) {
        self(chunk, is_final)
    }
}

/// Adapts a consumer that expects base64 text, e.g. for forwarding over SSE.
pub struct Base64Sink<F> {
    consumer: F,
}

impl<F> Base64Sink<F>
where
    F: FnMut(String, bool) + Send + 'static,
{
    pub fn new(consumer: F) -> Self {
        Self { consumer }
    }
}

impl<F> AudioSink for Base64Sink<F>
where
    F: FnMut(String, bool) + Send + 'static,
{
    fn on_audio(&mut self, chunk: Vec<u8>, is_final: bool) {
        let encoded = if chunk.is_empty() {
            String::new()
        } else {
            STANDARD.encode(&chunk)
        };
        (self.consumer)(encoded, is_final)
    }
}

/// Enforces the delivery contract around a caller's sink: no chunk after the
/// final marker, one final marker at most, nothing at all once closed.
pub struct GuardedSink {
    inner: Box<dyn AudioSink>,
    finished: bool,
    closed: bool,
    chunks: usize,
}

impl GuardedSink {
    pub fn new(inner: Box<dyn AudioSink>) -> Self {
        Self {
            inner,
            finished: false,
            closed: false,
            chunks: 0,
        }
    }

    pub fn chunk(&mut self, data: Vec<u8>) {
        if self.finished || self.closed {
            log::warn!("TTS: dropping {} byte chunk after completion", data.len());
            return;
        }
        self.chunks += 1;
        self.inner.on_audio(data, false);
    }

    /// Deliver the final marker. Returns false if it was already delivered or the sink is closed.
    pub fn finish(&mut self) -> bool {
        if self.finished || self.closed {
            return false;
        }
        self.finished = true;
        self.inner.on_audio(Vec::new(), true);
        true
    }

    /// Silence the sink without a final marker (failure or cancellation).
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn chunks_delivered(&self) -> usize {
        self.chunks
    }
}
