//! Scripted doubles for every external seam, so the whole workflow runs
//! offline in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepcurrent::error::{Error, Result};
use deepcurrent::language_models::{ChatChunk, ChatModel, ChatResult, ChunkStream, ToolChoice};
use deepcurrent::messages::{Message, MessageContent};
use deepcurrent::tools::{Tool, ToolDefinition, ToolInput};
use deepcurrent_agentcore::memory::InMemoryMemoryStore;
use deepcurrent_agentcore::tracker::EventTracker;
use deepcurrent_outputs::convert::DocumentConverter;
use deepcurrent_outputs::workspace::Workspace;
use deepcurrent_status::{InMemoryStatusStore, StatusProbe, StatusPublisher};
use serde_json::Value;

use crate::context::{ModelProvider, ResearchContext, ToolPlane};

/// A chat model driven by a routing closure over the full message list.
/// The closure returns the assistant message, so scripts can emit tool
/// calls as well as text.
pub struct FnChatModel {
    route: Box<dyn Fn(&[Message]) -> Message + Send + Sync>,
}

impl FnChatModel {
    /// Model whose every response comes from `route`.
    pub fn new(route: impl Fn(&[Message]) -> Message + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            route: Box::new(route),
        })
    }

    /// Model answering every call with the same text.
    pub fn text(route: impl Fn(&[Message]) -> String + Send + Sync + 'static) -> Arc<Self> {
        Self::new(move |messages| Message::ai(route(messages)))
    }
}

#[async_trait]
impl ChatModel for FnChatModel {
    async fn generate(
        &self,
        messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        _tool_choice: Option<&ToolChoice>,
    ) -> Result<ChatResult> {
        Ok(ChatResult {
            message: (self.route)(messages),
            usage: None,
        })
    }

    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream> {
        let text = (self.route)(messages).as_text();
        let chunks: Vec<Result<ChatChunk>> = text
            .split_inclusive(' ')
            .map(|piece| {
                Ok(ChatChunk {
                    delta: piece.to_string(),
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn model_id(&self) -> &str {
        "fn-model"
    }
}

/// A [`ModelProvider`] returning the same model for every short name.
pub struct SingleModelProvider(pub Arc<dyn ChatModel>);

impl ModelProvider for SingleModelProvider {
    fn chat_model(&self, _short_name: &str) -> Result<Arc<dyn ChatModel>> {
        Ok(Arc::clone(&self.0))
    }
}

/// A canned search tool.
pub struct StaticTool {
    name: String,
    response: String,
}

impl StaticTool {
    /// Tool answering every call with `response`.
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            response: response.into(),
        })
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Canned tool for tests"
    }
    fn args_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }
    async fn call(&self, _input: ToolInput) -> Result<MessageContent> {
        Ok(MessageContent::text(self.response.clone()))
    }
}

/// A [`ToolPlane`] serving a fixed tool list.
pub struct StaticToolPlane {
    tools: Vec<Arc<dyn Tool>>,
    available: Vec<String>,
}

impl StaticToolPlane {
    /// Plane serving `tools`; availability is derived from them.
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Arc<Self> {
        let available = tools.iter().map(|t| t.name().to_string()).collect();
        Arc::new(Self { tools, available })
    }

    /// Plane that claims availability of extra names without serving
    /// them (for validation-failure tests use the inverse: restrict).
    pub fn with_available(tools: Vec<Arc<dyn Tool>>, available: Vec<String>) -> Arc<Self> {
        Arc::new(Self { tools, available })
    }
}

#[async_trait]
impl ToolPlane for StaticToolPlane {
    async fn available_tools(&self) -> Result<Vec<String>> {
        Ok(self.available.clone())
    }

    async fn load_tools(&self, names: &[&str], _timeout: Duration) -> Result<Vec<Arc<dyn Tool>>> {
        let mut out = Vec::new();
        for name in names {
            match self.tools.iter().find(|t| t.name() == *name) {
                Some(tool) => out.push(Arc::clone(tool)),
                None => {
                    return Err(Error::config(format!(
                        "required tool `{name}` not available on the tool plane"
                    )))
                }
            }
        }
        Ok(out)
    }
}

/// A converter backed by tiny shell scripts that copy input to output,
/// so conversion succeeds without pandoc/libreoffice installed.
pub fn fake_converter(dir: &std::path::Path) -> DocumentConverter {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let pandoc = dir.join("fake-pandoc");
        let libreoffice = dir.join("fake-libreoffice");
        // pandoc <md> -o <docx> ...
        let _ = std::fs::write(&pandoc, "#!/bin/sh\ncp \"$1\" \"$3\"\n");
        // libreoffice --headless --convert-to pdf --outdir <dir> <docx>
        let _ = std::fs::write(
            &libreoffice,
            "#!/bin/sh\nout=\"$5\"\nsrc=\"$6\"\nbase=$(basename \"$src\" .docx)\ncp \"$src\" \"$out/$base.pdf\"\n",
        );
        for script in [&pandoc, &libreoffice] {
            if let Ok(metadata) = std::fs::metadata(script) {
                let mut perms = metadata.permissions();
                perms.set_mode(0o755);
                let _ = std::fs::set_permissions(script, perms);
            }
        }
        DocumentConverter::new()
            .with_pandoc(pandoc.display().to_string())
            .with_libreoffice(libreoffice.display().to_string())
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        DocumentConverter::new()
    }
}

/// Offline fixture: context plus handles to the in-memory stores.
pub struct TestHarness {
    /// The session context under test.
    pub ctx: Arc<ResearchContext>,
    /// Status store, for cancellation injection and assertions.
    pub status_store: Arc<InMemoryStatusStore>,
    /// Memory store, for event assertions.
    pub memory_store: Arc<InMemoryMemoryStore>,
    /// Workspace root (kept alive for the test duration).
    pub workspace_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Build a harness around a model and tool plane.
    pub fn new(
        session_id: &str,
        model: Arc<dyn ChatModel>,
        tool_plane: Arc<dyn ToolPlane>,
    ) -> Self {
        let status_store = Arc::new(InMemoryStatusStore::new());
        let publisher = Arc::new(StatusPublisher::new(
            Arc::clone(&status_store) as Arc<dyn deepcurrent_status::StatusStore>,
            session_id,
        ));
        let memory_store = Arc::new(InMemoryMemoryStore::new());
        let tracker = Arc::new(EventTracker::new(
            Arc::clone(&memory_store) as Arc<dyn deepcurrent_agentcore::memory::MemoryStore>,
            "mem-test",
            session_id,
            "user-test",
        ));
        let workspace_dir = tempfile::tempdir().unwrap_or_else(|e| {
            // Test-only fixture; no workspace means nothing can run.
            panic!("failed to create workspace tempdir: {e}")
        });
        let workspace = match Workspace::new(workspace_dir.path().join("ws")) {
            Ok(ws) => ws,
            Err(e) => panic!("failed to initialize workspace: {e}"),
        };
        let converter = fake_converter(workspace_dir.path());

        let ctx = Arc::new(ResearchContext {
            models: Arc::new(SingleModelProvider(model)),
            tool_plane,
            tracker: Some(tracker),
            status: Arc::clone(&publisher),
            probe: Arc::new(StatusProbe::new(publisher)),
            governor: Arc::new(deepcurrent::Governor::new(
                crate::config::default_concurrency_limits(),
            )),
            workspace,
            uploader: None,
            converter,
            code_executor: None,
        });

        Self {
            ctx,
            status_store,
            memory_store,
            workspace_dir,
        }
    }
}
