//! Tool-plane client for the AgentCore Gateway.
//!
//! The Gateway speaks MCP JSON-RPC over HTTPS; every operation is a single
//! signed POST. Discovered tool names may carry a `target___tool` prefix:
//! the short form is what callers and models see, the qualified form is
//! what goes on the wire. Input schemas are adapted into strongly-typed
//! argument validators so the agent driver can bind them to model tool-use
//! contracts without runtime schema drift.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepcurrent::error::{Error, Result};
use deepcurrent::messages::MessageContent;
use deepcurrent::tools::{Tool, ToolDefinition, ToolInput};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

const DEFAULT_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection errors are retried this many times with backoff.
const CONNECT_RETRY_ATTEMPTS: usize = 2;

/// Separator between target prefix and tool name.
const TARGET_SEPARATOR: &str = "___";

/// One tool as discovered from the Gateway.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Short name exposed to callers and models.
    pub name: String,
    /// Qualified `target___tool` name preserved for the RPC.
    pub qualified_name: String,
    /// Natural-language description.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// The model-facing declaration. Schema type names derive from the
    /// qualified name with `___` and `-` replaced by `_`.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    /// Synthesized type name for the argument validator.
    pub fn schema_type_name(&self) -> String {
        self.qualified_name.replace(TARGET_SEPARATOR, "_").replace('-', "_")
    }
}

/// Authenticated, pooled client for the Gateway tool plane.
pub struct GatewayClient {
    http: reqwest::Client,
    signer: crate::signer::RequestSigner,
    gateway_url: String,
    rpc_timeout: Duration,
    cache: RwLock<Option<Arc<Vec<ToolDescriptor>>>>,
}

impl GatewayClient {
    /// Build a client for a Gateway endpoint.
    pub fn new(gateway_url: impl Into<String>, signer: crate::signer::RequestSigner) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            signer,
            gateway_url: gateway_url.into(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            cache: RwLock::new(None),
        }
    }

    /// Override the per-RPC timeout (search 15 s, extract 30 s, code 60 s).
    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    async fn rpc(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        }))
        .map_err(|e| Error::other(format!("failed to encode RPC body: {e}")))?;

        let strategy = ExponentialBackoff::from_millis(250)
            .map(jitter)
            .take(CONNECT_RETRY_ATTEMPTS);

        let response_value = RetryIf::spawn(
            strategy,
            || async {
                let signed = self
                    .signer
                    .signed_json_post(&self.gateway_url, body.clone())
                    .await?;
                let request = reqwest::Request::try_from(signed)
                    .map_err(|e| Error::other(format!("failed to convert request: {e}")))?;

                let response = tokio::time::timeout(timeout, self.http.execute(request))
                    .await
                    .map_err(|_| Error::timeout(format!("gateway `{method}` call")))?
                    .map_err(|e| Error::tool(format!("gateway connection error: {e}")))?;

                let status = response.status();
                let text = response
                    .text()
                    .await
                    .map_err(|e| Error::tool(format!("gateway response read failed: {e}")))?;
                if !status.is_success() {
                    // Non-retryable responses are surfaced verbatim.
                    return Err(Error::tool(format!("gateway error ({status}): {text}")));
                }
                serde_json::from_str::<Value>(&text)
                    .map_err(|e| Error::tool(format!("gateway returned invalid JSON: {e}")))
            },
            // Only connection-level failures are retryable; everything else
            // is surfaced verbatim.
            |e: &Error| matches!(e, Error::Tool(msg) if msg.contains("connection error")),
        )
        .await?;

        if let Some(rpc_error) = response_value.get("error") {
            return Err(Error::tool(format!("gateway RPC error: {rpc_error}")));
        }
        Ok(response_value.get("result").cloned().unwrap_or(Value::Null))
    }

    fn parse_descriptor(raw: &Value) -> Option<ToolDescriptor> {
        let qualified = raw.get("name")?.as_str()?.to_string();
        let name = qualified
            .rsplit_once(TARGET_SEPARATOR)
            .map(|(_, short)| short.to_string())
            .unwrap_or_else(|| qualified.clone());
        Some(ToolDescriptor {
            name,
            qualified_name: qualified,
            description: raw
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            input_schema: raw
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"})),
        })
    }

    /// Discover the Gateway's tools. Results are cached; pass
    /// `force_refresh` to bypass the cache.
    pub async fn discover(&self, force_refresh: bool) -> Result<Arc<Vec<ToolDescriptor>>> {
        if !force_refresh {
            if let Some(cached) = self.cache.read().await.as_ref() {
                debug!(tools = cached.len(), "using cached tool list");
                return Ok(Arc::clone(cached));
            }
        }

        let result = self.rpc("tools/list", json!({}), self.rpc_timeout).await?;
        let tools: Vec<ToolDescriptor> = result
            .get("tools")
            .and_then(Value::as_array)
            .map(|raw_tools| {
                raw_tools
                    .iter()
                    .filter_map(Self::parse_descriptor)
                    .collect()
            })
            .unwrap_or_default();
        debug!(tools = tools.len(), "discovered gateway tools");

        let tools = Arc::new(tools);
        *self.cache.write().await = Some(Arc::clone(&tools));
        Ok(tools)
    }

    /// Invoke a tool by its short name. Arguments are validated against the
    /// discovered input schema before anything goes on the wire; a name
    /// that discovery never returned is fatal.
    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        self.invoke_with_timeout(tool_name, arguments, self.rpc_timeout)
            .await
    }

    /// [`GatewayClient::invoke`] with an explicit per-call timeout.
    pub async fn invoke_with_timeout(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let tools = self.discover(false).await?;
        let descriptor = tools
            .iter()
            .find(|t| t.name == tool_name || t.qualified_name == tool_name)
            .ok_or_else(|| Error::tool(format!("tool `{tool_name}` is not known to the gateway")))?;

        validate_arguments(&descriptor.input_schema, &arguments, &descriptor.name)?;

        self.rpc(
            "tools/call",
            json!({
                "name": descriptor.qualified_name,
                "arguments": arguments,
            }),
            timeout,
        )
        .await
    }

    /// Wrap every discovered tool whose short name is in `names` as a core
    /// [`Tool`]. Missing names are an error naming the tool, so a research
    /// type whose toolset is incomplete fails at launch.
    pub async fn load_tools(
        self: &Arc<Self>,
        names: &[&str],
        timeout: Duration,
    ) -> Result<Vec<Arc<dyn Tool>>> {
        let discovered = self.discover(false).await?;
        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(names.len());
        for name in names {
            let descriptor = discovered
                .iter()
                .find(|t| t.name == *name)
                .ok_or_else(|| {
                    Error::config(format!("required tool `{name}` not available on the gateway"))
                })?
                .clone();
            tools.push(Arc::new(GatewayTool {
                client: Arc::clone(self),
                descriptor,
                timeout,
            }));
        }
        Ok(tools)
    }
}

/// Validate arguments against a tool input schema.
fn validate_arguments(schema: &Value, arguments: &Value, tool_name: &str) -> Result<()> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => {
            // A broken schema must not make the tool uncallable.
            warn!(tool = tool_name, error = %e, "unusable input schema; skipping validation");
            return Ok(());
        }
    };
    if let Err(error) = validator.validate(arguments) {
        return Err(Error::tool(format!(
            "arguments for `{tool_name}` do not conform to its input schema: {error}"
        )));
    }
    Ok(())
}

/// A Gateway tool adapted to the core [`Tool`] trait.
pub struct GatewayTool {
    client: Arc<GatewayClient>,
    descriptor: ToolDescriptor,
    timeout: Duration,
}

impl GatewayTool {
    /// The underlying descriptor.
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl Tool for GatewayTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn args_schema(&self) -> Value {
        self.descriptor.input_schema.clone()
    }

    async fn call(&self, input: ToolInput) -> Result<MessageContent> {
        let result = self
            .client
            .invoke_with_timeout(&self.descriptor.name, input.as_args(), self.timeout)
            .await?;

        // MCP results carry a content array; join the text parts.
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let text = match result.get("content").and_then(Value::as_array) {
            Some(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect();
                if texts.is_empty() {
                    result.to_string()
                } else {
                    texts.join("\n")
                }
            }
            None => result.to_string(),
        };

        if is_error {
            return Err(Error::tool(text));
        }
        Ok(MessageContent::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_expose_short_form() {
        let raw = json!({
            "name": "research-target___tavily_search",
            "description": "Search the web",
            "inputSchema": {"type": "object"}
        });
        let descriptor = GatewayClient::parse_descriptor(&raw).unwrap();
        assert_eq!(descriptor.name, "tavily_search");
        assert_eq!(descriptor.qualified_name, "research-target___tavily_search");
        assert_eq!(
            descriptor.schema_type_name(),
            "research_target_tavily_search"
        );
    }

    #[test]
    fn unprefixed_names_pass_through() {
        let raw = json!({"name": "wikipedia_search"});
        let descriptor = GatewayClient::parse_descriptor(&raw).unwrap();
        assert_eq!(descriptor.name, "wikipedia_search");
        assert_eq!(descriptor.qualified_name, "wikipedia_search");
    }

    #[test]
    fn argument_validation_rejects_schema_violations() {
        let schema = json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        });
        assert!(validate_arguments(&schema, &json!({"query": "rust"}), "t").is_ok());
        assert!(validate_arguments(&schema, &json!({"query": 7}), "t").is_err());
        assert!(validate_arguments(&schema, &json!({}), "t").is_err());
    }
}
