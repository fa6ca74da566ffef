//! Code-interpreter sandbox client (chart generation).
//!
//! Sessions are started lazily, code runs in a session-isolated
//! namespace, and produced files must be read out before the session is
//! stopped.

use serde_json::{json, Value};
use tracing::{debug, info};

use deepcurrent::error::{Error, Result};

use crate::signer::RequestSigner;

/// Result of one sandbox invocation.
#[derive(Debug, Clone, Default)]
pub struct SandboxResult {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// True when execution failed.
    pub is_error: bool,
    /// Files the execution produced.
    pub files: Vec<String>,
}

/// Signed-HTTP client for the code-interpreter data plane.
pub struct CodeInterpreterClient {
    http: reqwest::Client,
    signer: RequestSigner,
    endpoint: String,
    interpreter_id: String,
    session: tokio::sync::Mutex<Option<String>>,
}

impl CodeInterpreterClient {
    /// Client for a region's data plane and interpreter id.
    pub fn new(region: &str, interpreter_id: impl Into<String>, signer: RequestSigner) -> Self {
        Self {
            http: reqwest::Client::new(),
            signer,
            endpoint: format!("https://bedrock-agentcore.{region}.amazonaws.com"),
            interpreter_id: interpreter_id.into(),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Override the endpoint (tests).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::other(format!("failed to encode sandbox request: {e}")))?;
        let signed = self.signer.signed_json_post(url, bytes).await?;
        let request = reqwest::Request::try_from(signed)
            .map_err(|e| Error::other(format!("failed to convert request: {e}")))?;
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| Error::tool(format!("sandbox connection error: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::tool(format!("sandbox response read failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::tool(format!("sandbox error ({status}): {text}")));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::tool(format!("sandbox returned invalid JSON: {e}")))
    }

    async fn ensure_session(&self) -> Result<String> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let url = format!(
            "{}/code-interpreters/{}/sessions/start",
            self.endpoint, self.interpreter_id
        );
        let response = self.post(&url, &json!({})).await?;
        let session_id = response
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::tool("sandbox start returned no sessionId"))?
            .to_string();
        info!(session_id, "code-interpreter session started");
        *guard = Some(session_id.clone());
        Ok(session_id)
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value> {
        let session_id = self.ensure_session().await?;
        let url = format!(
            "{}/code-interpreters/{}/sessions/{}/invoke",
            self.endpoint, self.interpreter_id, session_id
        );
        debug!(tool = name, "invoking sandbox");
        self.post(&url, &json!({ "name": name, "arguments": arguments }))
            .await
    }

    /// Execute code and collect its output.
    pub async fn execute_code(&self, code: &str, language: &str) -> Result<SandboxResult> {
        let response = self
            .invoke("executeCode", json!({ "code": code, "language": language }))
            .await?;
        Ok(SandboxResult {
            stdout: response
                .pointer("/structuredContent/stdout")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            stderr: response
                .pointer("/structuredContent/stderr")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            is_error: response
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            files: response
                .pointer("/structuredContent/files")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Download files from the sandbox namespace.
    pub async fn read_files(&self, paths: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        let response = self.invoke("readFiles", json!({ "paths": paths })).await?;
        let mut out = Vec::new();
        if let Some(entries) = response
            .pointer("/structuredContent/files")
            .and_then(Value::as_array)
        {
            for entry in entries {
                let path = entry
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let data = entry
                    .get("content")
                    .and_then(Value::as_str)
                    .map(|encoded| STANDARD.decode(encoded).unwrap_or_default())
                    .unwrap_or_default();
                out.push((path, data));
            }
        }
        Ok(out)
    }

    /// List files under a sandbox path.
    pub async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let response = self.invoke("listFiles", json!({ "path": path })).await?;
        Ok(response
            .pointer("/structuredContent/files")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Stop the session, if one was started.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if let Some(session_id) = guard.take() {
            let url = format!(
                "{}/code-interpreters/{}/sessions/{}/stop",
                self.endpoint, self.interpreter_id, session_id
            );
            self.post(&url, &json!({})).await?;
            info!(session_id, "code-interpreter session stopped");
        }
        Ok(())
    }
}
