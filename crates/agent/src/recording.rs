//! A sink that records what it receives, for tests.

use async_trait::async_trait;
use sagebot_core::error::TurnError;

use crate::relay::{SinkClosed, StreamSink};

/// What a [`RecordingSink`] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Chunk(String),
    End,
    Error(String),
}

/// A sink that records every signal. Optionally stops accepting chunks
/// after `capacity` of them, like a caller that disconnects.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
    capacity: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closing_after(chunks: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity: Some(chunks),
        }
    }

    /// Concatenation of all recorded chunks.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Chunk(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SinkEvent::End | SinkEvent::Error(_)))
            .count()
    }
}

#[async_trait]
impl StreamSink for RecordingSink {
    async fn on_chunk(&mut self, text: &str) -> Result<(), SinkClosed> {
        let received = self
            .events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Chunk(_)))
            .count();
        if self.capacity.is_some_and(|cap| received >= cap) {
            return Err(SinkClosed);
        }
        self.events.push(SinkEvent::Chunk(text.to_string()));
        Ok(())
    }

    async fn on_end(&mut self) {
        self.events.push(SinkEvent::End);
    }

    async fn on_error(&mut self, error: &TurnError) {
        self.events.push(SinkEvent::Error(error.to_string()));
    }
}
