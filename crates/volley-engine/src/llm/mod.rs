//! The streaming interface the runtime consumes from a language model.
//!
//! Transport is a collaborator, not part of the core: the turn runner only
//! sees [`LlmChunk`]s — text deltas, tool-argument deltas for display, and
//! finalized tool calls once the stream finishes with `tool_calls`.

mod genai_client;
mod mock;

pub use genai_client::GenaiLlm;
pub use mock::MockLlm;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use volley_contract::{Message, ToolCallRequest, ToolSchema};

/// A request to the model: prompt-assembled messages plus the visible tools.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: Option<u32>,
}

/// One streamed chunk. At most one of the fields is meaningfully set per
/// chunk; a finish reason marks the logical end of generation.
#[derive(Debug, Clone, Default)]
pub struct LlmChunk {
    /// Assistant text increment.
    pub delta: String,
    /// Tool-argument fragment, for streaming display only.
    pub tool_arg_delta: String,
    /// A finalized tool call (emitted when the model finishes with
    /// `tool_calls`).
    pub tool_call: Option<ToolCallRequest>,
    pub finish_reason: Option<String>,
}

impl LlmChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ..Self::default()
        }
    }

    pub fn tool_arg(fragment: impl Into<String>) -> Self {
        Self {
            tool_arg_delta: fragment.into(),
            ..Self::default()
        }
    }

    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("stream error: {0}")]
    Stream(String),
}

/// End-of-stream is the stream yielding `None`.
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmChunk, LlmError>> + Send>>;

#[async_trait]
pub trait Llm: Send + Sync {
    async fn stream(&self, req: LlmRequest) -> Result<LlmStream, LlmError>;
}
