//! Cooperative cancellation.
//!
//! Cancellation is a soft protocol: a probe reads the session's live
//! status, and stages (plus the agent driver) consult it at well-defined
//! points. A positive observation raises [`Error::Cancelled`], which the
//! graph engine converts into a graceful stop.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Reads whether the current session has been asked to stop.
#[async_trait]
pub trait CancellationProbe: std::marker::Send + Sync {
    /// True when the session status is `cancelling` or `cancelled`.
    async fn is_cancelled(&self) -> bool;

    /// Raise [`Error::Cancelled`] on a positive observation.
    async fn check(&self) -> Result<()> {
        if self.is_cancelled().await {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A probe that never cancels; the default for tests and offline runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancelled;

#[async_trait]
impl CancellationProbe for NeverCancelled {
    async fn is_cancelled(&self) -> bool {
        false
    }
}
