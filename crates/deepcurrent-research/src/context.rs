//! The session-scoped service bundle threaded through every stage.
//!
//! No process globals: the runtime builds one [`ResearchContext`] per
//! session and the workflow assembly captures it in node closures. Tests
//! swap any seam for a scripted double.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepcurrent::cancellation::CancellationProbe;
use deepcurrent::concurrency::Governor;
use deepcurrent::error::Result;
use deepcurrent::language_models::ChatModel;
use deepcurrent::tools::Tool;
use deepcurrent_agentcore::gateway::GatewayClient;
use deepcurrent_agentcore::tracker::EventTracker;
use deepcurrent_outputs::convert::DocumentConverter;
use deepcurrent_outputs::uploader::S3Uploader;
use deepcurrent_outputs::workspace::Workspace;
use deepcurrent_status::StatusPublisher;

use crate::executor::CodeExecutor;

/// Resolves opaque model short names to chat models.
pub trait ModelProvider: Send + Sync {
    /// A model for the given short name (or provider id).
    fn chat_model(&self, short_name: &str) -> Result<Arc<dyn ChatModel>>;
}

/// The tool plane as the workflow sees it.
#[async_trait]
pub trait ToolPlane: Send + Sync {
    /// Short names of every available tool.
    async fn available_tools(&self) -> Result<Vec<String>>;

    /// Load the named tools, bound with the given per-call timeout.
    /// Missing names are an error naming the tool.
    async fn load_tools(&self, names: &[&str], timeout: Duration) -> Result<Vec<Arc<dyn Tool>>>;
}

/// [`ToolPlane`] over the AgentCore Gateway.
pub struct GatewayToolPlane(pub Arc<GatewayClient>);

#[async_trait]
impl ToolPlane for GatewayToolPlane {
    async fn available_tools(&self) -> Result<Vec<String>> {
        Ok(self
            .0
            .discover(false)
            .await?
            .iter()
            .map(|t| t.name.clone())
            .collect())
    }

    async fn load_tools(&self, names: &[&str], timeout: Duration) -> Result<Vec<Arc<dyn Tool>>> {
        self.0.load_tools(names, timeout).await
    }
}

/// Everything a stage handler needs, scoped to one session.
pub struct ResearchContext {
    /// Model resolution.
    pub models: Arc<dyn ModelProvider>,
    /// The external tool plane.
    pub tool_plane: Arc<dyn ToolPlane>,
    /// Research event tracker (absent in offline runs).
    pub tracker: Option<Arc<EventTracker>>,
    /// Status publisher for this session.
    pub status: Arc<StatusPublisher>,
    /// Cancellation probe backed by the status record.
    pub probe: Arc<dyn CancellationProbe>,
    /// Per-stage concurrency governor.
    pub governor: Arc<Governor>,
    /// Local filesystem workspace.
    pub workspace: Workspace,
    /// Blob uploads (absent in offline runs).
    pub uploader: Option<Arc<S3Uploader>>,
    /// Format converter for the conversion stage.
    pub converter: DocumentConverter,
    /// Code sandbox for chart generation (absent in offline runs; the
    /// chart stage then succeeds with zero charts).
    pub code_executor: Option<Arc<dyn CodeExecutor>>,
}
