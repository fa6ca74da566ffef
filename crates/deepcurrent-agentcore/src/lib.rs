//! Clients for the AgentCore plane.
//!
//! Three concerns live here, all reached as SigV4-signed HTTPS because no
//! typed SDK client exists for these data planes:
//!
//! - [`gateway`]: the external tool plane: MCP-style discovery and
//!   invocation of named tools, with schema adaptation into the core
//!   [`Tool`](deepcurrent::Tool) trait
//! - [`memory`]: the append-only per-session event log
//! - [`tracker`]: the domain event tracker that writes size-bounded,
//!   metadata-sanitized research events through a [`memory::MemoryStore`]
//!
//! [`signer`] carries the shared request-signing machinery.

pub mod code_interpreter;
pub mod gateway;
pub mod memory;
pub mod signer;
pub mod tracker;

pub use code_interpreter::{CodeInterpreterClient, SandboxResult};
pub use gateway::{GatewayClient, GatewayTool, ToolDescriptor};
pub use memory::{
    AgentCoreMemory, CreateEventRequest, EventPage, InMemoryMemoryStore, ListEventsQuery,
    MemoryEvent, MemoryStore, MAX_EVENT_PAYLOAD_BYTES,
};
pub use signer::RequestSigner;
pub use tracker::EventTracker;
