pub mod client;
pub mod logging;
pub mod mock_client;
pub mod stream;

pub use client::ApiClient;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::flow::{ProviderError, Schema};
use crate::types::ChatMessage;

/// Everything a provider needs for one generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    /// When present the provider must answer with an object of this shape.
    pub output_schema: Option<Schema>,
    /// Prior turns, oldest first. The provider keeps no state between calls.
    pub history: Vec<ChatMessage>,
}

impl GenerateRequest {
    pub fn structured(prompt: impl Into<String>, output_schema: Schema) -> Self {
        Self {
            prompt: prompt.into(),
            output_schema: Some(output_schema),
            history: Vec::new(),
        }
    }

    pub fn chat(history: &[ChatMessage], message: impl Into<String>) -> Self {
        Self {
            prompt: message.into(),
            output_schema: None,
            history: history.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Text(String),
    Structured(Value),
}

impl Generation {
    pub fn into_text(self) -> String {
        match self {
            Generation::Text(text) => text,
            Generation::Structured(value) => value.to_string(),
        }
    }
}

/// The hosted language model, treated as a black box.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ProviderError>;

    /// Generates free text, forwarding pieces to `deltas` as they arrive.
    /// Returns the complete text.
    async fn stream_text(
        &self,
        request: &GenerateRequest,
        deltas: &mpsc::UnboundedSender<String>,
    ) -> Result<String, ProviderError> {
        let text = self.generate(request).await?.into_text();
        let _ = deltas.send(text.clone());
        Ok(text)
    }
}
