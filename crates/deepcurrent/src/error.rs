//! Error types shared across the orchestration fabric.

use thiserror::Error;

use crate::graph::GraphError;
use crate::json::JsonRecoveryError;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for workflow execution.
///
/// Stage handlers mostly absorb their own failures into documented fallback
/// values; the variants here are what crosses component boundaries. The
/// [`Error::Cancelled`] variant is the distinguished cancellation signal:
/// the graph engine translates it into a graceful stop rather than a
/// failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A language-model request failed.
    #[error("model error: {0}")]
    Model(String),

    /// A tool invocation failed in a way the agent cannot recover from.
    #[error("tool error: {0}")]
    Tool(String),

    /// Graph construction or execution failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A model response could not be recovered into the expected JSON.
    #[error(transparent)]
    Json(#[from] JsonRecoveryError),

    /// Required configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external call exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The agent driver hit its iteration ceiling.
    #[error("agent exceeded {iterations} iterations")]
    IterationLimit {
        /// Number of iterations completed before stopping.
        iterations: usize,
    },

    /// Cooperative cancellation was observed.
    #[error("cancelled")]
    Cancelled,

    /// A store (memory, status, blob) rejected or failed an operation.
    #[error("store error: {0}")]
    Store(String),

    /// I/O failure on the local workspace.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that does not fit the categories above.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::Model`] from any displayable value.
    pub fn model(msg: impl Into<String>) -> Self {
        Error::Model(msg.into())
    }

    /// Build a [`Error::Tool`] from any displayable value.
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Build a [`Error::Config`] from any displayable value.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Build a [`Error::Timeout`] from any displayable value.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// Build a [`Error::Store`] from any displayable value.
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Build a [`Error::Other`] from any displayable value.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// True when this error is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True when this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// True when this error is the agent iteration ceiling.
    pub fn is_iteration_limit(&self) -> bool {
        matches!(self, Error::IterationLimit { .. })
    }
}
