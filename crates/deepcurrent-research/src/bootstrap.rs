//! Production wiring: build a session [`ResearchContext`] from the
//! process environment.

use std::sync::Arc;

use deepcurrent::error::Result;
use deepcurrent::Governor;
use deepcurrent_agentcore::gateway::GatewayClient;
use deepcurrent_agentcore::memory::AgentCoreMemory;
use deepcurrent_agentcore::signer::RequestSigner;
use deepcurrent_agentcore::tracker::EventTracker;
use deepcurrent_bedrock::{ChatBedrock, ModelRegistry};
use deepcurrent_outputs::convert::DocumentConverter;
use deepcurrent_outputs::uploader::S3Uploader;
use deepcurrent_outputs::workspace::Workspace;
use deepcurrent_status::{DynamoStatusStore, StatusProbe, StatusPublisher};
use tracing::info;

use async_trait::async_trait;
use deepcurrent_agentcore::code_interpreter::CodeInterpreterClient;

use crate::config::{default_concurrency_limits, EnvConfig};
use crate::context::{GatewayToolPlane, ModelProvider, ResearchContext};
use crate::executor::{CodeExecutor, ExecutionResult};

/// [`ModelProvider`] over Bedrock with short-name resolution.
pub struct BedrockModelProvider {
    client: aws_sdk_bedrockruntime::Client,
    registry: ModelRegistry,
}

impl BedrockModelProvider {
    /// Provider from the ambient AWS configuration.
    pub async fn from_env(default_model_id: Option<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self {
            client: aws_sdk_bedrockruntime::Client::new(&config),
            registry: ModelRegistry::new(default_model_id),
        }
    }
}

impl ModelProvider for BedrockModelProvider {
    fn chat_model(&self, short_name: &str) -> Result<Arc<dyn deepcurrent::ChatModel>> {
        let model_id = if short_name.is_empty() {
            self.registry.default_model_id().to_string()
        } else {
            self.registry.resolve(short_name)
        };
        Ok(Arc::new(
            ChatBedrock::from_client(self.client.clone())
                .with_model(model_id)
                .with_max_tokens(8192),
        ))
    }
}

/// [`CodeExecutor`] over the code-interpreter sandbox.
pub struct SandboxExecutor(pub CodeInterpreterClient);

#[async_trait]
impl CodeExecutor for SandboxExecutor {
    async fn execute_code(&self, code: &str, language: &str) -> Result<ExecutionResult> {
        let result = self.0.execute_code(code, language).await?;
        Ok(ExecutionResult {
            stdout: result.stdout,
            stderr: result.stderr,
            is_error: result.is_error,
            files: result.files,
        })
    }

    async fn read_files(&self, paths: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
        self.0.read_files(paths).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.0.list_files(path).await
    }
}

/// Build the full production context for one session.
///
/// The workspace's `dimensions/` and `temp/` areas are cleaned so a run
/// never merges a previous run's documents.
pub async fn session_context(
    env: &EnvConfig,
    session_id: &str,
    user_id: &str,
) -> Result<Arc<ResearchContext>> {
    let signer = RequestSigner::from_env(&env.aws_region, "bedrock-agentcore").await?;
    let gateway = Arc::new(GatewayClient::new(&env.gateway_url, signer.clone()));
    let memory = Arc::new(AgentCoreMemory::new(&env.aws_region, signer));
    let tracker = Arc::new(EventTracker::new(
        memory as Arc<dyn deepcurrent_agentcore::memory::MemoryStore>,
        &env.memory_id,
        session_id,
        user_id,
    ));

    let status_store = Arc::new(DynamoStatusStore::from_env(&env.status_table).await);
    let publisher = Arc::new(StatusPublisher::new(
        status_store as Arc<dyn deepcurrent_status::StatusStore>,
        session_id,
    ));

    let workspace = Workspace::new("workspace")?;
    workspace.clean_dimensions()?;
    workspace.clean_temp()?;
    info!(workspace = %workspace.base_path().display(), "workspace initialized");

    let uploader = Arc::new(S3Uploader::from_env(&env.outputs_bucket).await);

    let code_executor: Option<Arc<dyn CodeExecutor>> = match &env.code_interpreter_id {
        Some(interpreter_id) => {
            let sandbox_signer =
                RequestSigner::from_env(&env.aws_region, "bedrock-agentcore").await?;
            Some(Arc::new(SandboxExecutor(CodeInterpreterClient::new(
                &env.aws_region,
                interpreter_id,
                sandbox_signer,
            ))))
        }
        None => None,
    };

    Ok(Arc::new(ResearchContext {
        models: Arc::new(BedrockModelProvider::from_env(env.default_model_id.clone()).await),
        tool_plane: Arc::new(GatewayToolPlane(gateway)),
        tracker: Some(tracker),
        status: Arc::clone(&publisher),
        probe: Arc::new(StatusProbe::new(publisher)),
        governor: Arc::new(Governor::new(default_concurrency_limits())),
        workspace,
        uploader: Some(uploader),
        converter: DocumentConverter::new(),
        code_executor,
    }))
}
