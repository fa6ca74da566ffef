//! The research event tracker.
//!
//! High-level research milestones (not low-level state snapshots) are
//! appended to the memory store with searchable metadata. The tracker owns
//! the two service constraints so stages never think about them:
//!
//! - serialized payloads are capped at 100 KB; content-heavy fields are
//!   replaced with a placeholder noting the original size
//! - metadata values are restricted to `[A-Za-z0-9 ._:/=+@-]` and clipped
//!
//! Tracking failures are logged and swallowed: an unavailable event log
//! must never abort a research run.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::memory::{CreateEventRequest, MemoryStore, MAX_EVENT_PAYLOAD_BYTES};

static METADATA_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"[^a-zA-Z0-9\s._:/=+@-]").unwrap()
});

/// Sanitize a string for the metadata character class.
pub fn sanitize_metadata_value(value: &str) -> String {
    let replaced = value
        .replace('&', "and")
        .replace('(', "[")
        .replace(')', "]")
        .replace(',', "");
    METADATA_DISALLOWED.replace_all(&replaced, "").into_owned()
}

fn clip(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn size_placeholder(bytes: usize) -> String {
    format!("[Content truncated - {:.2} KB]", bytes as f64 / 1024.0)
}

/// Tracks research workflow events in the memory store.
pub struct EventTracker {
    store: Arc<dyn MemoryStore>,
    memory_id: String,
    session_id: String,
    actor_id: String,
}

impl EventTracker {
    /// Tracker scoped to one `(memory, session, actor)` triple.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        memory_id: impl Into<String>,
        session_id: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            memory_id: memory_id.into(),
            session_id: session_id.into(),
            actor_id: actor_id.into(),
        }
    }

    /// Append one event. `truncatable` names the JSON pointers whose string
    /// values get replaced when the serialized payload exceeds the limit.
    async fn create_event(
        &self,
        event_type: &str,
        mut data: Value,
        metadata: HashMap<String, String>,
        truncatable: &[&str],
    ) -> Option<String> {
        data["event_type"] = json!(event_type);
        data["timestamp"] = json!(Utc::now().to_rfc3339());

        let mut blob = data.to_string();
        if blob.len() > MAX_EVENT_PAYLOAD_BYTES {
            let original_size = blob.len();
            warn!(
                event_type,
                bytes = original_size,
                "event payload exceeds limit; truncating content fields"
            );
            for pointer in truncatable {
                if let Some(slot) = data.pointer_mut(pointer) {
                    *slot = json!(size_placeholder(original_size));
                }
                blob = data.to_string();
                if blob.len() <= MAX_EVENT_PAYLOAD_BYTES {
                    break;
                }
            }
        }

        let mut event_metadata = metadata;
        event_metadata.insert("event_type".to_string(), event_type.to_string());

        let request = CreateEventRequest {
            memory_id: self.memory_id.clone(),
            actor_id: self.actor_id.clone(),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            blob,
            metadata: event_metadata,
        };

        match self.store.create_event(request).await {
            Ok(event_id) => {
                info!(event_type, event_id, "logged research event");
                Some(event_id)
            }
            Err(e) => {
                warn!(event_type, error = %e, "failed to log research event");
                None
            }
        }
    }

    /// `research_start`: topic, model, type, depth, reference presence.
    pub async fn log_research_start(
        &self,
        topic: &str,
        model: &str,
        research_type: &str,
        research_depth: &str,
        research_context: &str,
        has_references: bool,
    ) -> Option<String> {
        let data = json!({
            "topic": topic,
            "model": model,
            "research_type": research_type,
            "research_depth": research_depth,
            "research_context": research_context,
            "has_references": has_references,
        });
        let metadata = HashMap::from([
            (
                "topic".to_string(),
                sanitize_metadata_value(&clip(topic, 100)),
            ),
            ("model".to_string(), model.to_string()),
            ("research_depth".to_string(), research_depth.to_string()),
        ]);
        self.create_event("research_start", data, metadata, &[])
            .await
    }

    /// `references_prepared`: the prepared materials with summaries.
    pub async fn log_references_prepared(&self, materials: &[Value]) -> Option<String> {
        let total_key_points: usize = materials
            .iter()
            .filter_map(|m| m.get("key_points").and_then(Value::as_array))
            .map(Vec::len)
            .sum();
        let data = json!({
            "reference_materials": materials,
            "reference_count": materials.len(),
            "total_key_points": total_key_points,
        });
        let metadata = HashMap::from([(
            "reference_count".to_string(),
            materials.len().to_string(),
        )]);
        self.create_event(
            "references_prepared",
            data,
            metadata,
            &["/reference_materials"],
        )
        .await
    }

    /// `dimensions_identified`: the refined research structure.
    pub async fn log_dimensions_identified(
        &self,
        dimensions: &[String],
        aspects_by_dimension: &Value,
    ) -> Option<String> {
        let total_aspects: usize = aspects_by_dimension
            .as_object()
            .map(|m| {
                m.values()
                    .filter_map(Value::as_array)
                    .map(Vec::len)
                    .sum()
            })
            .unwrap_or(0);
        let data = json!({
            "dimensions": dimensions,
            "dimension_count": dimensions.len(),
            "aspects_by_dimension": aspects_by_dimension,
            "total_aspects": total_aspects,
        });
        let metadata = HashMap::from([
            ("dimension_count".to_string(), dimensions.len().to_string()),
            ("total_aspects".to_string(), total_aspects.to_string()),
        ]);
        self.create_event("dimensions_identified", data, metadata, &[])
            .await
    }

    /// `aspect_research_complete`: the full research content for one
    /// aspect. Oversize content is truncated in the event only; callers
    /// keep the full content in workflow state.
    pub async fn log_aspect_research_complete(
        &self,
        dimension: &str,
        aspect: &str,
        research_content: &Value,
        citations_count: usize,
    ) -> Option<String> {
        let word_count = research_content
            .get("word_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let data = json!({
            "dimension": dimension,
            "aspect": aspect,
            "research_content": research_content,
            "citations_count": citations_count,
            "word_count": word_count,
            "content_size_bytes": research_content.to_string().len(),
        });
        let metadata = HashMap::from([
            (
                "dimension".to_string(),
                sanitize_metadata_value(&clip(dimension, 100)),
            ),
            (
                "aspect".to_string(),
                sanitize_metadata_value(&clip(aspect, 100)),
            ),
            ("citations_count".to_string(), citations_count.to_string()),
            ("word_count".to_string(), word_count.to_string()),
        ]);
        self.create_event(
            "aspect_research_complete",
            data,
            metadata,
            &["/research_content/content"],
        )
        .await
    }

    /// `dimension_document_complete`: the full dimension markdown.
    pub async fn log_dimension_document_complete(
        &self,
        dimension: &str,
        markdown_content: &str,
        word_count: usize,
        filename: &str,
    ) -> Option<String> {
        let data = json!({
            "dimension": dimension,
            "markdown_content": markdown_content,
            "word_count": word_count,
            "filename": filename,
            "content_size_bytes": markdown_content.len(),
        });
        let metadata = HashMap::from([
            (
                "dimension".to_string(),
                sanitize_metadata_value(&clip(dimension, 100)),
            ),
            ("word_count".to_string(), word_count.to_string()),
        ]);
        self.create_event(
            "dimension_document_complete",
            data,
            metadata,
            &["/markdown_content"],
        )
        .await
    }

    /// `research_complete`: terminal summary.
    pub async fn log_research_complete(
        &self,
        dimensions: &[String],
        total_aspects: usize,
        elapsed_seconds: f64,
        output_files: &Value,
        uploads: &Value,
    ) -> Option<String> {
        let data = json!({
            "dimensions": dimensions,
            "dimension_count": dimensions.len(),
            "total_aspects": total_aspects,
            "elapsed_time_seconds": elapsed_seconds,
            "output_files": output_files,
            "s3_uploads": uploads,
        });
        let metadata = HashMap::from([
            ("dimension_count".to_string(), dimensions.len().to_string()),
            ("total_aspects".to_string(), total_aspects.to_string()),
            ("elapsed_time".to_string(), format!("{elapsed_seconds:.2}")),
        ]);
        self.create_event("research_complete", data, metadata, &[])
            .await
    }

    /// `error`: a classified stage failure.
    pub async fn log_error(
        &self,
        error_type: &str,
        error_message: &str,
        node_name: Option<&str>,
        context: &Value,
    ) -> Option<String> {
        let data = json!({
            "error_type": error_type,
            "error_message": clip(error_message, 500),
            "node_name": node_name,
            "context": context,
        });
        let metadata = HashMap::from([
            ("error_type".to_string(), clip(error_type, 100)),
            (
                "node_name".to_string(),
                node_name.map_or_else(|| "unknown".to_string(), |n| clip(n, 100)),
            ),
        ]);
        self.create_event("error", data, metadata, &["/context"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMemoryStore;

    fn tracker_with_store() -> (EventTracker, Arc<InMemoryMemoryStore>) {
        let store = Arc::new(InMemoryMemoryStore::new());
        let tracker = EventTracker::new(
            Arc::clone(&store) as Arc<dyn MemoryStore>,
            "mem-1",
            "sess-1",
            "user-1",
        );
        (tracker, store)
    }

    #[test]
    fn sanitization_matches_character_class() {
        let sanitized = sanitize_metadata_value("Rust (async) — ownership & borrows, 10%?");
        let allowed = Regex::new(r"^[a-zA-Z0-9\s._:/=+@-]*$").unwrap();
        assert!(allowed.is_match(&sanitized), "got: {sanitized}");
        assert!(sanitized.contains("and"));
        assert!(sanitized.contains('['));
    }

    #[tokio::test]
    async fn research_start_event_is_recorded() {
        let (tracker, store) = tracker_with_store();
        let event_id = tracker
            .log_research_start(
                "Python async programming basics",
                "nova_pro",
                "basic_web",
                "quick",
                "",
                false,
            )
            .await;
        assert!(event_id.is_some());

        let stored = store.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].metadata["event_type"], "research_start");
        let blob: Value = serde_json::from_str(&stored[0].blob).unwrap();
        assert_eq!(blob["research_depth"], "quick");
    }

    #[tokio::test]
    async fn oversize_aspect_content_is_truncated_with_size_note() {
        let (tracker, store) = tracker_with_store();
        let big = "word ".repeat(35_000); // ~170 KB
        let content = json!({
            "aspect_key": "Dim::Aspect",
            "title": "Aspect",
            "content": big,
            "word_count": 35_000,
        });
        let event_id = tracker
            .log_aspect_research_complete("Dim", "Aspect", &content, 4)
            .await;
        assert!(event_id.is_some(), "store must accept the truncated event");

        let stored = store.stored();
        assert!(stored[0].blob.len() <= MAX_EVENT_PAYLOAD_BYTES);
        let blob: Value = serde_json::from_str(&stored[0].blob).unwrap();
        let replaced = blob["research_content"]["content"].as_str().unwrap();
        assert!(replaced.starts_with("[Content truncated - "));
        assert!(replaced.ends_with("KB]"));
        // The rest of the event survives.
        assert_eq!(blob["word_count"], 35_000);
    }

    #[tokio::test]
    async fn all_metadata_values_respect_the_character_class() {
        let (tracker, store) = tracker_with_store();
        tracker
            .log_aspect_research_complete(
                "Ethics & Law (EU)",
                "Privacy, consent?",
                &json!({"content": "short", "word_count": 1}),
                0,
            )
            .await;
        let allowed = Regex::new(r"^[a-zA-Z0-9\s._:/=+@-]*$").unwrap();
        for (key, value) in &store.stored()[0].metadata {
            assert!(allowed.is_match(value), "metadata {key}={value}");
        }
    }

    #[tokio::test]
    async fn error_message_is_clipped_to_500_chars() {
        let (tracker, store) = tracker_with_store();
        tracker
            .log_error("timeout", &"x".repeat(2000), Some("research"), &json!({}))
            .await;
        let blob: Value = serde_json::from_str(&store.stored()[0].blob).unwrap();
        assert_eq!(blob["error_message"].as_str().unwrap().len(), 500);
    }
}
