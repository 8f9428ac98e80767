//! Shared test helpers for engine tests.

use async_trait::async_trait;
use sagebot_core::error::ProviderError;
use sagebot_core::provider::{GenerateRequest, Generation, Provider, StreamChunk};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

/// A provider that replays scripted results and records every request.
///
/// Panics if more calls are made than results provided.
#[derive(Default)]
pub struct ScriptedProvider {
    generations: Mutex<VecDeque<Result<Generation, ProviderError>>>,
    streams: Mutex<VecDeque<Result<Vec<String>, ProviderError>>>,
    pub generate_requests: Mutex<Vec<GenerateRequest>>,
    pub stream_requests: Mutex<Vec<GenerateRequest>>,
    hang: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(self, result: Result<Generation, ProviderError>) -> Self {
        self.generations.lock().unwrap().push_back(result);
        self
    }

    pub fn stream(self, chunks: &[&str]) -> Self {
        self.streams
            .lock()
            .unwrap()
            .push_back(Ok(chunks.iter().map(|c| c.to_string()).collect()));
        self
    }

    /// Every call sleeps this long before answering.
    pub fn hanging(mut self, delay: Duration) -> Self {
        self.hang = Some(delay);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_requests.lock().unwrap().len()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError> {
        if let Some(delay) = self.hang {
            tokio::time::sleep(delay).await;
        }
        self.generate_requests.lock().unwrap().push(request);
        self.generations
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more generations")
    }

    async fn stream(
        &self,
        request: GenerateRequest,
    ) -> Result<Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        self.stream_requests.lock().unwrap().push(request);
        let chunks = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more streams")?;

        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len() + 1);
        for chunk in chunks {
            let _ = tx.send(Ok(StreamChunk::text(chunk))).await;
        }
        let _ = tx.send(Ok(StreamChunk::done())).await;
        Ok(rx)
    }
}
