//! Model backend abstraction and Ollama client.
//!
//! The personality server only needs one operation: send the full turn sequence and get
//! the assistant's reply back.

mod ollama;

pub use ollama::{OllamaClient, OllamaError, OllamaModel};

use crate::session::ConversationTurn;
use async_trait::async_trait;

/// Error returned by a model backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Ollama(#[from] OllamaError),
    #[error("model backend error: {0}")]
    Backend(String),
    #[error("model worker stopped")]
    WorkerGone,
}

/// Chat-completion backend: one synchronous request per invocation.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run a chat completion over `turns` and return the assistant turn.
    async fn chat(&self, model: &str, turns: &[ConversationTurn])
        -> Result<ConversationTurn, ModelError>;
}
