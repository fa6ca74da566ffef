//! The chat-model abstraction.
//!
//! Providers implement [`ChatModel`]; everything above it (agent driver,
//! stage handlers) is provider-agnostic. The contract covers plain
//! generation, tool use and token streaming; streaming exists so slow
//! responses surface as a first-chunk timeout instead of a whole-response
//! timeout.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::messages::Message;
use crate::tools::ToolDefinition;

/// How the model may choose among declared tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    Auto,
    /// The model must call some tool.
    Any,
    /// The model must call the named tool.
    Tool(String),
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    /// Prompt tokens consumed.
    pub input_tokens: u32,
    /// Completion tokens produced.
    pub output_tokens: u32,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone)]
pub struct ChatResult {
    /// The assistant message, possibly carrying tool calls.
    pub message: Message,
    /// Token usage when the provider reports it.
    pub usage: Option<UsageMetadata>,
}

impl ChatResult {
    /// True when the response requests at least one tool invocation.
    pub fn has_tool_calls(&self) -> bool {
        matches!(&self.message, Message::Ai { tool_calls, .. } if !tool_calls.is_empty())
    }
}

/// One streamed increment of a response.
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    /// Text delta carried by this chunk (may be empty for control frames).
    pub delta: String,
}

/// Boxed stream of response chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + std::marker::Send>>;

/// A chat-capable language model.
#[async_trait]
pub trait ChatModel: std::marker::Send + Sync {
    /// Generate a complete response, optionally declaring tools.
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: Option<&ToolChoice>,
    ) -> Result<ChatResult>;

    /// Stream a response as text chunks. Tool use is not available on the
    /// streaming path.
    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream>;

    /// The provider-facing model identifier.
    fn model_id(&self) -> &str;
}
