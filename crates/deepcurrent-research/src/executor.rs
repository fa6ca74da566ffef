//! The code-execution sandbox interface (chart generation only).
//!
//! The sandbox is an external collaborator: code runs in a
//! session-isolated namespace and produced files must be downloaded
//! before the sandbox is stopped.

use async_trait::async_trait;
use deepcurrent::error::Result;

/// Result of one code execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// True when execution failed.
    pub is_error: bool,
    /// Files the execution produced, as sandbox-relative paths.
    pub files: Vec<String>,
}

/// A remote code-execution sandbox.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Execute code (`language` defaults to python at call sites).
    async fn execute_code(&self, code: &str, language: &str) -> Result<ExecutionResult>;

    /// Download files from the sandbox namespace.
    async fn read_files(&self, paths: &[String]) -> Result<Vec<(String, Vec<u8>)>>;

    /// List files under a sandbox path.
    async fn list_files(&self, path: &str) -> Result<Vec<String>>;
}
