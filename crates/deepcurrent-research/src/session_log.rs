//! Structured session lifecycle records, written through `tracing` so
//! they land with the rest of the process logs.

use tracing::info;

use crate::config::ResearchConfig;

/// Record the start of a research session.
pub fn log_session_start(session_id: &str, topic: &str, config: &ResearchConfig) {
    info!(
        target: "session",
        session_id,
        topic,
        research_type = config.research_type.as_str(),
        research_depth = config.research_depth.as_str(),
        model = %config.llm_model,
        references = config.reference_materials.len(),
        "session started"
    );
}

/// Record the completion of a research session.
pub fn log_session_complete(
    session_id: &str,
    dimensions: &[String],
    total_aspects: usize,
    elapsed_seconds: f64,
) {
    info!(
        target: "session",
        session_id,
        dimensions = dimensions.len(),
        total_aspects,
        elapsed_seconds,
        "session complete"
    );
}
