//! The session-scoped status publisher.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deepcurrent::cancellation::CancellationProbe;
use deepcurrent::error::Result;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::status;
use crate::store::StatusStore;

#[derive(Default)]
struct Pending {
    dimensions: BTreeSet<String>,
    aspects: BTreeMap<String, Vec<Value>>,
    research: BTreeMap<String, Value>,
    dimension_docs: BTreeMap<String, Value>,
}

/// Thread-safe aggregator over the session's status record.
///
/// Immediate methods (`update*`, `mark_*`) write through; `add_*` methods
/// buffer contributions from parallel workers until the matching `flush_*`
/// writes the whole batch atomically. One async mutex serializes every
/// read-modify-write cycle.
pub struct StatusPublisher {
    store: Arc<dyn StatusStore>,
    session_id: String,
    pending: tokio::sync::Mutex<Pending>,
}

impl StatusPublisher {
    /// Publisher scoped to one session.
    pub fn new(store: Arc<dyn StatusStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            pending: tokio::sync::Mutex::new(Pending::default()),
        }
    }

    /// The session this publisher writes for.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn write(&self, fields: Vec<(String, Value)>) {
        if let Err(e) = self.store.update(&self.session_id, fields).await {
            // Status publication is best-effort; the workflow carries on.
            warn!(session_id = %self.session_id, error = %e, "status update failed");
        }
    }

    /// Immediate write of arbitrary fields.
    pub async fn update(&self, fields: Vec<(String, Value)>) {
        let _guard = self.pending.lock().await;
        self.write(fields).await;
    }

    /// Set the current stage.
    pub async fn update_stage(&self, stage: &str) {
        self.update(vec![("current_stage".to_string(), json!(stage))])
            .await;
    }

    /// Immediate progress-field write.
    pub async fn update_progress(&self, fields: Vec<(String, Value)>) {
        self.update(fields).await;
    }

    // ---- buffered contributions from parallel workers ----

    /// Buffer a dimension (aspect-analysis workers).
    pub async fn add_dimension(&self, dimension: &str) {
        self.pending
            .lock()
            .await
            .dimensions
            .insert(dimension.to_string());
    }

    /// Buffer an aspect under its dimension.
    pub async fn add_aspect(&self, dimension: &str, aspect: Value) {
        let mut pending = self.pending.lock().await;
        pending.dimensions.insert(dimension.to_string());
        pending
            .aspects
            .entry(dimension.to_string())
            .or_default()
            .push(aspect);
    }

    /// Buffer research metadata for one aspect key. Only word and source
    /// counts are published; content stays in the event log.
    pub async fn add_research_result(
        &self,
        dimension: &str,
        aspect_name: &str,
        word_count: usize,
        sources_count: usize,
    ) {
        let aspect_key = format!("{dimension}::{aspect_name}");
        self.pending.lock().await.research.insert(
            aspect_key,
            json!({ "word_count": word_count, "sources_count": sources_count }),
        );
    }

    /// Buffer a dimension document path (`None` marks graceful failure).
    pub async fn add_dimension_document(&self, dimension: &str, path: Option<&str>) {
        let value = match path {
            Some(p) => json!(p),
            None => json!({ "failed": true }),
        };
        self.pending
            .lock()
            .await
            .dimension_docs
            .insert(dimension.to_string(), value);
    }

    /// Atomically publish the buffered dimensions and aspects.
    pub async fn flush_dimensions_and_aspects(&self) {
        let mut pending = self.pending.lock().await;
        if pending.dimensions.is_empty() {
            return;
        }
        let dimensions: Vec<String> = pending.dimensions.iter().cloned().collect();
        let aspects: Map<String, Value> = pending
            .aspects
            .iter()
            .map(|(d, a)| (d.clone(), json!(a)))
            .collect();
        let total_aspects: usize = pending.aspects.values().map(Vec::len).sum();
        debug!(
            dimensions = dimensions.len(),
            total_aspects, "flushing dimensions and aspects"
        );
        self.write(vec![
            ("dimensions".to_string(), json!(dimensions)),
            ("dimension_count".to_string(), json!(dimensions.len())),
            ("aspects_by_dimension".to_string(), Value::Object(aspects)),
            ("total_aspects".to_string(), json!(total_aspects)),
        ])
        .await;
        pending.dimensions.clear();
        pending.aspects.clear();
    }

    /// Atomically publish the buffered research metadata.
    pub async fn flush_research_results(&self) {
        let mut pending = self.pending.lock().await;
        if pending.research.is_empty() {
            return;
        }
        let research: Map<String, Value> = pending
            .research
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let count = research.len();
        self.write(vec![
            ("research_by_aspect".to_string(), Value::Object(research)),
            ("research_completed_count".to_string(), json!(count)),
        ])
        .await;
        pending.research.clear();
    }

    /// Atomically publish the buffered dimension documents.
    pub async fn flush_dimension_documents(&self) {
        let mut pending = self.pending.lock().await;
        if pending.dimension_docs.is_empty() {
            return;
        }
        let docs: Map<String, Value> = pending
            .dimension_docs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let count = docs.len();
        self.write(vec![
            ("dimension_documents".to_string(), Value::Object(docs)),
            ("dimension_documents_count".to_string(), json!(count)),
        ])
        .await;
        pending.dimension_docs.clear();
    }

    // ---- lifecycle ----

    /// Transition to `processing` (workflow start).
    pub async fn mark_processing(&self) {
        self.update(vec![
            ("status".to_string(), json!(status::PROCESSING)),
            ("created_at".to_string(), json!(Utc::now().to_rfc3339())),
        ])
        .await;
    }

    /// Transition to `completed` with the final fields.
    pub async fn mark_completed(&self, mut final_fields: Vec<(String, Value)>) {
        final_fields.push(("status".to_string(), json!(status::COMPLETED)));
        final_fields.push(("completed_at".to_string(), json!(Utc::now().to_rfc3339())));
        self.update(final_fields).await;
    }

    /// Transition to `failed`.
    pub async fn mark_failed(&self, error: &str) {
        self.update(vec![
            ("status".to_string(), json!(status::FAILED)),
            ("error".to_string(), json!(error)),
            ("failed_at".to_string(), json!(Utc::now().to_rfc3339())),
        ])
        .await;
    }

    /// Transition to `cancelled`.
    pub async fn mark_cancelled(&self) {
        self.update(vec![
            ("status".to_string(), json!(status::CANCELLED)),
            ("completed_at".to_string(), json!(Utc::now().to_rfc3339())),
        ])
        .await;
    }

    /// Append a structured entry to `errors[]` (non-fatal stage errors).
    pub async fn add_error(&self, node: &str, message: &str, context: Option<Value>) {
        let _guard = self.pending.lock().await;
        let mut errors = match self.store.get(&self.session_id).await {
            Ok(Some(record)) => record
                .get("errors")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let mut entry = json!({
            "node": node,
            "error": message.chars().take(500).collect::<String>(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(ctx) = context {
            entry["context"] = ctx;
        }
        errors.push(entry);
        self.write(vec![("errors".to_string(), json!(errors))]).await;
    }

    /// Record an immutable artifact version.
    pub async fn create_version(
        &self,
        version_name: &str,
        markdown_s3_key: &str,
        docx_s3_key: Option<&str>,
        pdf_s3_key: Option<&str>,
        created_by: &str,
        edit_type: Option<&str>,
    ) {
        let _guard = self.pending.lock().await;
        let mut versions = match self.store.get(&self.session_id).await {
            Ok(Some(record)) => record
                .get("versions")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            _ => Map::new(),
        };
        let mut entry = json!({
            "markdown_s3_key": markdown_s3_key,
            "created_at": Utc::now().to_rfc3339(),
            "created_by": created_by,
        });
        if let Some(key) = docx_s3_key {
            entry["docx_s3_key"] = json!(key);
        }
        if let Some(key) = pdf_s3_key {
            entry["pdf_s3_key"] = json!(key);
        }
        if let Some(kind) = edit_type {
            entry["edit_type"] = json!(kind);
        }
        versions.insert(version_name.to_string(), entry);
        self.write(vec![("versions".to_string(), Value::Object(versions))])
            .await;
    }

    /// Set the active version. Idempotent.
    pub async fn set_current_version(&self, version: &str) {
        self.update(vec![("current_version".to_string(), json!(version))])
            .await;
    }

    /// Read the current record (used by the cancellation probe).
    pub async fn get_status(&self) -> Result<Option<Value>> {
        self.store.get(&self.session_id).await
    }
}

/// Adapts the status record to the core cancellation protocol.
pub struct StatusProbe {
    publisher: Arc<StatusPublisher>,
}

impl StatusProbe {
    /// Probe over a publisher.
    pub fn new(publisher: Arc<StatusPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl CancellationProbe for StatusProbe {
    async fn is_cancelled(&self) -> bool {
        match self.publisher.get_status().await {
            Ok(Some(record)) => matches!(
                record.get("status").and_then(Value::as_str),
                Some(status::CANCELLING) | Some(status::CANCELLED)
            ),
            // An unreadable status store never cancels a run.
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStatusStore;

    fn publisher() -> (Arc<StatusPublisher>, Arc<InMemoryStatusStore>) {
        let store = Arc::new(InMemoryStatusStore::new());
        let publisher = Arc::new(StatusPublisher::new(
            Arc::clone(&store) as Arc<dyn StatusStore>,
            "sess-1",
        ));
        (publisher, store)
    }

    #[tokio::test]
    async fn buffered_aspects_flush_as_one_write() {
        let (publisher, store) = publisher();
        publisher
            .add_aspect("History", json!({"name": "Origins"}))
            .await;
        publisher
            .add_aspect("History", json!({"name": "Evolution"}))
            .await;
        publisher
            .add_aspect("Applications", json!({"name": "Industry"}))
            .await;

        // Nothing published until the flush.
        assert!(store.get("sess-1").await.unwrap().is_none());

        publisher.flush_dimensions_and_aspects().await;
        let record = store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(record["dimension_count"], 2);
        assert_eq!(record["total_aspects"], 3);
        assert_eq!(record["aspects_by_dimension"]["History"][1]["name"], "Evolution");

        // Flushing again is a no-op.
        publisher.flush_dimensions_and_aspects().await;
    }

    #[tokio::test]
    async fn research_results_publish_metadata_only() {
        let (publisher, store) = publisher();
        publisher
            .add_research_result("History", "Origins", 812, 6)
            .await;
        publisher.flush_research_results().await;

        let record = store.get("sess-1").await.unwrap().unwrap();
        let entry = &record["research_by_aspect"]["History::Origins"];
        assert_eq!(entry["word_count"], 812);
        assert_eq!(entry["sources_count"], 6);
        assert!(entry.get("content").is_none());
        assert_eq!(record["research_completed_count"], 1);
    }

    #[tokio::test]
    async fn failed_dimension_documents_are_marked() {
        let (publisher, store) = publisher();
        publisher
            .add_dimension_document("History", Some("/tmp/history.md"))
            .await;
        publisher.add_dimension_document("Applications", None).await;
        publisher.flush_dimension_documents().await;

        let record = store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(record["dimension_documents"]["History"], "/tmp/history.md");
        assert_eq!(record["dimension_documents"]["Applications"]["failed"], true);
    }

    #[tokio::test]
    async fn errors_accumulate() {
        let (publisher, store) = publisher();
        publisher.add_error("research_planning", "bad JSON", None).await;
        publisher
            .add_error("research", "timeout", Some(json!({"aspect": "Origins"})))
            .await;
        let record = store.get("sess-1").await.unwrap().unwrap();
        let errors = record["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["node"], "research_planning");
        assert_eq!(errors[1]["context"]["aspect"], "Origins");
    }

    #[tokio::test]
    async fn set_current_version_is_idempotent() {
        let (publisher, store) = publisher();
        publisher
            .create_version("draft", "k/md", Some("k/docx"), None, "system", Some("initial"))
            .await;
        publisher.set_current_version("draft").await;
        let first = store.get("sess-1").await.unwrap().unwrap();
        publisher.set_current_version("draft").await;
        let second = store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(first["current_version"], second["current_version"]);
        assert_eq!(first["versions"], second["versions"]);
        assert_eq!(second["versions"]["draft"]["edit_type"], "initial");
    }

    #[tokio::test]
    async fn probe_reads_cancelling_status() {
        let (publisher, store) = publisher();
        let probe = StatusProbe::new(Arc::clone(&publisher));
        publisher.mark_processing().await;
        assert!(!probe.is_cancelled().await);
        store.set_field("sess-1", "status", json!("cancelling"));
        assert!(probe.is_cancelled().await);
    }
}
