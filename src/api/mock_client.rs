use super::stream::forward_text_deltas;
use super::{GenerateRequest, Generation, ModelProvider};
use crate::flow::ProviderError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Scripted provider for tests and offline runs. Replies are consumed in
/// order; every request is recorded for later inspection.
#[derive(Clone, Default)]
pub struct MockProvider {
    replies: Arc<Mutex<VecDeque<Result<Generation, ProviderError>>>>,
    streams: Arc<Mutex<VecDeque<Vec<String>>>>,
    requests: Arc<Mutex<Vec<GenerateRequest>>>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_structured(self, value: Value) -> Self {
        self.with_reply(Ok(Generation::Structured(value)))
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(Ok(Generation::Text(text.into())))
    }

    pub fn with_error(self, error: ProviderError) -> Self {
        self.with_reply(Err(error))
    }

    pub fn with_reply(self, reply: Result<Generation, ProviderError>) -> Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Queues one streamed reply given as raw SSE frames. A frame that does
    /// not end with a blank line gets one appended.
    pub fn with_sse(self, frames: Vec<String>) -> Self {
        lock(&self.streams).push_back(frames);
        self
    }

    /// Every call waits this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    async fn begin(&self, request: &GenerateRequest) {
        lock(&self.requests).push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_reply(&self) -> Result<Generation, ProviderError> {
        lock(&self.replies).pop_front().unwrap_or_else(|| {
            Err(ProviderError::Rejected(
                "MockProvider: no more replies configured".to_string(),
            ))
        })
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ProviderError> {
        self.begin(request).await;
        self.next_reply()
    }

    async fn stream_text(
        &self,
        request: &GenerateRequest,
        deltas: &mpsc::UnboundedSender<String>,
    ) -> Result<String, ProviderError> {
        self.begin(request).await;

        let script = lock(&self.streams).pop_front();
        let Some(frames) = script else {
            let text = self.next_reply()?.into_text();
            let _ = deltas.send(text.clone());
            return Ok(text);
        };

        let chunks: Vec<Bytes> = frames
            .into_iter()
            .map(|frame| {
                let framed = if frame.ends_with("\n\n") {
                    frame
                } else {
                    format!("{frame}\n\n")
                };
                Bytes::from(framed)
            })
            .collect();
        forward_text_deltas(
            stream::iter(chunks.into_iter().map(Ok::<_, Infallible>)),
            deltas,
            |never| match never {},
        )
        .await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
