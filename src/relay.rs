//! Streaming relay: upstream bytes in, client frames or raw bytes out.
//!
//! Upstream bodies are cut into SSE events by `eventsource-stream`, so transport chunk
//! boundaries never matter to the translators. Each relay carries a [`StreamTelemetry`]
//! guard that emits the request's telemetry record when the stream ends or is dropped.

use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};

use crate::error::ProxyError;
use crate::providers::Protocol;
use crate::telemetry::Telemetry;
use crate::translate::anthropic_types::Usage;
use crate::translate::streaming::{AnthropicToOpenAi, FrameTranslator, OpenAiToAnthropic, SseFrame};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProxyError>> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = SseFrame> + Send>>;

/// The translator for a client/upstream pairing, or `None` when bytes pass through.
pub fn translator_for(
    client: Protocol,
    upstream: Protocol,
    model: &str,
) -> Option<Box<dyn FrameTranslator>> {
    match (client, upstream) {
        (Protocol::Anthropic, Protocol::OpenAi) => Some(Box::new(OpenAiToAnthropic::new(model))),
        (Protocol::OpenAi, Protocol::Anthropic) => Some(Box::new(AnthropicToOpenAi::new(model))),
        _ => None,
    }
}

/// An upstream response body with an idle timeout between chunks.
pub fn upstream_bytes(response: reqwest::Response, idle: Duration) -> ByteStream {
    with_idle_timeout(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProxyError::transport(&e))),
        idle,
    )
}

/// Fails the stream with [`ProxyError::Timeout`] when no chunk arrives within `idle`.
pub fn with_idle_timeout<S>(stream: S, idle: Duration) -> ByteStream
where
    S: Stream<Item = Result<Bytes, ProxyError>> + Send + 'static,
{
    let timed = tokio_stream::StreamExt::timeout(stream, idle);
    Box::pin(async_stream::stream! {
        tokio::pin!(timed);
        while let Some(item) = timed.next().await {
            match item {
                Ok(Ok(chunk)) => yield Ok(chunk),
                Ok(Err(err)) => {
                    yield Err(err);
                    break;
                }
                Err(_) => {
                    yield Err(ProxyError::timeout(idle));
                    break;
                }
            }
        }
    })
}

/// Re-emit an upstream SSE body through `translator`, in order, then its terminal frames.
pub fn translate(
    upstream: ByteStream,
    mut translator: Box<dyn FrameTranslator>,
    mut guard: StreamTelemetry,
) -> FrameStream {
    Box::pin(async_stream::stream! {
        let mut events = upstream.eventsource();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) if event.data.is_empty() => {}
                Ok(event) => {
                    for frame in translator.on_data(&event.data) {
                        yield frame;
                    }
                    guard.observe(translator.usage());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Upstream stream interrupted");
                    guard.interrupt();
                    break;
                }
            }
        }
        for frame in translator.finish() {
            yield frame;
        }
        guard.complete(translator.usage());
    })
}

/// Relay upstream bytes unmodified.
pub fn passthrough(upstream: ByteStream, mut guard: StreamTelemetry) -> ByteStream {
    Box::pin(async_stream::stream! {
        let mut upstream = upstream;
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => yield Ok(bytes),
                Err(err) => {
                    tracing::warn!(error = %err, "Upstream stream interrupted");
                    guard.interrupt();
                    yield Err(err);
                    break;
                }
            }
        }
        guard.complete(Usage::default());
    })
}

/// Emits exactly one telemetry record for a streamed response: on completion, or with
/// whatever usage was seen when the client goes away first. A stream cut short by the
/// upstream is recorded as a failure.
pub struct StreamTelemetry {
    telemetry: Telemetry,
    provider: String,
    model: String,
    started: Instant,
    usage: Usage,
    interrupted: bool,
    emitted: bool,
}

impl StreamTelemetry {
    pub fn new(telemetry: Telemetry, provider: &str, model: &str, started: Instant) -> Self {
        Self {
            telemetry,
            provider: provider.to_string(),
            model: model.to_string(),
            started,
            usage: Usage::default(),
            interrupted: false,
            emitted: false,
        }
    }

    fn observe(&mut self, usage: Usage) {
        self.usage = usage;
    }

    fn interrupt(&mut self) {
        self.interrupted = true;
    }

    fn complete(&mut self, usage: Usage) {
        self.usage = usage;
        self.emit();
    }

    fn emit(&mut self) {
        if self.emitted {
            return;
        }
        self.emitted = true;
        let latency_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.telemetry.emit(
            &self.provider,
            &self.model,
            self.usage.input_tokens,
            self.usage.output_tokens,
            latency_ms,
            !self.interrupted,
        );
    }
}

impl Drop for StreamTelemetry {
    fn drop(&mut self) {
        self.emit();
    }
}
