//! Streaming delivery of model output to the caller.
//!
//! A [`StreamRelay`] forwards text to a [`StreamSink`] and ends with exactly
//! one terminal signal. [`StreamRelay::end`] and [`StreamRelay::fail`] take
//! the relay by value, so a second terminal signal, or a chunk after one,
//! does not compile.

use async_trait::async_trait;
use sagebot_core::error::{ProviderError, TurnError};
use sagebot_core::provider::StreamChunk;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error};

/// Returned by a sink whose receiver has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Where streamed text goes.
#[async_trait]
pub trait StreamSink: Send {
    /// One non-empty text fragment, in arrival order.
    async fn on_chunk(&mut self, text: &str) -> Result<(), SinkClosed>;

    /// The answer is complete.
    async fn on_end(&mut self) {}

    /// The turn failed. Sinks that do not handle failures get it logged.
    async fn on_error(&mut self, error: &TurnError) {
        error!(category = ?error.category(), error = %error, "Turn failed");
    }
}

pub struct StreamRelay<'s> {
    sink: &'s mut dyn StreamSink,
    text: String,
    chunks: usize,
}

impl<'s> StreamRelay<'s> {
    pub fn new(sink: &'s mut dyn StreamSink) -> Self {
        Self {
            sink,
            text: String::new(),
            chunks: 0,
        }
    }

    /// Text forwarded so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Forward one fragment. Empty fragments are skipped.
    pub async fn forward(&mut self, text: &str) -> Result<(), TurnError> {
        if text.is_empty() {
            return Ok(());
        }
        self.sink
            .on_chunk(text)
            .await
            .map_err(|_| TurnError::StreamInterrupted("caller went away".into()))?;
        self.text.push_str(text);
        self.chunks += 1;
        Ok(())
    }

    /// Forward every chunk of a model stream until it is done.
    ///
    /// Dropping the receiver on an early return stops the producer.
    pub async fn drain(
        &mut self,
        mut rx: Receiver<Result<StreamChunk, ProviderError>>,
    ) -> Result<(), TurnError> {
        while let Some(item) = rx.recv().await {
            let chunk = item.map_err(|e| match e {
                ProviderError::StreamInterrupted(message) => TurnError::StreamInterrupted(message),
                other => TurnError::Upstream(other),
            })?;
            if let Some(text) = chunk.content.as_deref() {
                self.forward(text).await?;
            }
            if chunk.done {
                return Ok(());
            }
        }
        debug!(chunks = self.chunks, "Model stream closed without a done marker");
        Ok(())
    }

    /// Signal completion. Returns the full text.
    pub async fn end(self) -> String {
        self.sink.on_end().await;
        self.text
    }

    /// Signal failure. Returns whatever text was forwarded before it.
    pub async fn fail(self, error: &TurnError) -> String {
        self.sink.on_error(error).await;
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{RecordingSink, SinkEvent};
    use tokio::sync::mpsc;

    async fn feed(items: Vec<Result<StreamChunk, ProviderError>>) -> Receiver<Result<StreamChunk, ProviderError>> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.send(item).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn chunks_then_single_end() {
        let rx = feed(vec![
            Ok(StreamChunk::text("Gold is ")),
            Ok(StreamChunk::text("")),
            Ok(StreamChunk::text("$2401")),
            Ok(StreamChunk::done()),
        ])
        .await;

        let mut sink = RecordingSink::new();
        let mut relay = StreamRelay::new(&mut sink);
        relay.drain(rx).await.unwrap();
        let text = relay.end().await;

        assert_eq!(text, "Gold is $2401");
        assert_eq!(
            sink.events,
            vec![
                SinkEvent::Chunk("Gold is ".into()),
                SinkEvent::Chunk("$2401".into()),
                SinkEvent::End
            ]
        );
    }

    #[tokio::test]
    async fn upstream_error_mid_stream_fails_once() {
        let rx = feed(vec![
            Ok(StreamChunk::text("partial")),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
            Ok(StreamChunk::text("never")),
        ])
        .await;

        let mut sink = RecordingSink::new();
        let mut relay = StreamRelay::new(&mut sink);
        let err = relay.drain(rx).await.unwrap_err();
        assert!(matches!(err, TurnError::StreamInterrupted(_)));
        let partial = relay.fail(&err).await;

        assert_eq!(partial, "partial");
        assert_eq!(sink.terminal_count(), 1);
        assert!(matches!(sink.events.last(), Some(SinkEvent::Error(_))));
        assert!(!sink.text().contains("never"));
    }

    #[tokio::test]
    async fn closed_sink_interrupts() {
        let rx = feed(vec![
            Ok(StreamChunk::text("a")),
            Ok(StreamChunk::text("b")),
            Ok(StreamChunk::done()),
        ])
        .await;

        let mut sink = RecordingSink::closing_after(1);
        let mut relay = StreamRelay::new(&mut sink);
        let err = relay.drain(rx).await.unwrap_err();
        assert_eq!(relay.text(), "a");
        relay.fail(&err).await;
        assert_eq!(sink.terminal_count(), 1);
    }

    #[tokio::test]
    async fn channel_closed_without_done_still_ends() {
        let rx = feed(vec![Ok(StreamChunk::text("only"))]).await;
        let mut sink = RecordingSink::new();
        let mut relay = StreamRelay::new(&mut sink);
        relay.drain(rx).await.unwrap();
        relay.end().await;
        assert_eq!(sink.events.last(), Some(&SinkEvent::End));
    }

    struct SilentSink;

    #[async_trait]
    impl StreamSink for SilentSink {
        async fn on_chunk(&mut self, _text: &str) -> Result<(), SinkClosed> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_error_handler_does_not_panic() {
        let mut sink = SilentSink;
        let relay = StreamRelay::new(&mut sink);
        relay.fail(&TurnError::DeadlineExceeded(60)).await;
    }
}
