//! Stage handlers for every node in the research graph.
//!
//! Handlers take the session's [`ResearchContext`] plus the engine's
//! [`NodeContext`] snapshot and return sparse [`StateUpdate`]s. Parallel
//! workers receive their partition key through the send payload.

pub mod analysis;
pub mod finalize;
pub mod init;
pub mod references;
pub mod report;
pub mod research;

use deepcurrent::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use crate::context::ResearchContext;
use crate::errors::classify;
use crate::state::Aspect;

/// Send payload for one aspect-analysis worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionPayload {
    /// The dimension this worker owns.
    pub dimension: String,
}

/// Send payload for one research worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPayload {
    /// Parent dimension.
    pub dimension: String,
    /// The aspect to research.
    pub aspect: Aspect,
}

/// Record a non-fatal stage failure: classified status entry plus an
/// `error` event. The caller returns its documented fallback value.
pub async fn record_stage_error(
    ctx: &ResearchContext,
    node: &str,
    error: &Error,
    context: Value,
) {
    let (error_type, message) = classify(error);
    error!(node, error_type, error = %error, "stage error");
    ctx.status.add_error(node, &message, Some(context.clone())).await;
    if let Some(tracker) = &ctx.tracker {
        tracker
            .log_error(error_type, &message, Some(node), &context)
            .await;
    }
}

/// Citation count heuristic: bracketed URLs plus reference tags.
pub fn count_citations(content: &str) -> usize {
    content.matches("[http").count() + content.matches("[REF-").count()
}

/// JSON view of an aspect list for events and prompts.
pub fn aspects_to_value(aspects: &std::collections::BTreeMap<String, Vec<Aspect>>) -> Value {
    let map: serde_json::Map<String, Value> = aspects
        .iter()
        .map(|(dim, list)| (dim.clone(), json!(list)))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_counting_sees_urls_and_ref_tags() {
        let content = "Cost rose [https://a.example] and fell [REF-1] [https://b.example]";
        assert_eq!(count_citations(content), 3);
    }
}
