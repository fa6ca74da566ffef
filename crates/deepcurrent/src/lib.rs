//! Deepcurrent core: the orchestration fabric for multi-stage research
//! workflows.
//!
//! The crate provides the pieces every workflow is assembled from:
//!
//! - [`graph`]: an explicit state-graph engine with conditional routing,
//!   dynamic map-send fan-out and deferred fan-in barriers
//! - [`agent`]: a bounded tool-calling reasoning loop over any
//!   [`ChatModel`](language_models::ChatModel)
//! - [`concurrency`]: a named-semaphore registry for per-stage
//!   parallelism limits
//! - [`cancellation`]: the cooperative cancellation protocol observed by
//!   stages and agent drivers
//! - [`json`]: recovery of JSON values from free-form model output
//!
//! Providers (models, tool planes, stores) live in sibling crates and plug
//! in through the traits defined here.

pub mod agent;
pub mod cancellation;
pub mod concurrency;
pub mod error;
pub mod graph;
pub mod json;
pub mod language_models;
pub mod messages;
pub mod tools;

pub use agent::{
    AgentDriver, AgentOutcome, CachePointHook, CompactToolResultsHook, ComposedHook, MessageHook,
    StopReason, ToolCallRecord,
};
pub use cancellation::{CancellationProbe, NeverCancelled};
pub use concurrency::{Governor, SlotGuard};
pub use error::{Error, Result};
pub use graph::{
    CompiledGraph, ExecutionEvent, FlowOutcome, GraphError, GraphState, MergeConflict,
    NodeContext, Route, Send, StateGraph, END,
};
pub use language_models::{ChatChunk, ChatModel, ChatResult, ChunkStream, ToolChoice, UsageMetadata};
pub use messages::{ContentPart, Message, MessageContent, ToolCall};
pub use tools::{Tool, ToolDefinition, ToolInput};
