//! `finalize`: uploads, the initial `draft` version, the
//! `research_complete` event and the terminal status transition.

use chrono::Utc;
use deepcurrent::error::Result;
use deepcurrent::graph::NodeContext;
use serde_json::json;
use tracing::{info, warn};

use crate::context::ResearchContext;
use crate::session_log;
use crate::state::{ResearchState, StateUpdate};

/// Run the finalize stage.
pub async fn finalize(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    ctx.status.update_stage("finalize").await;

    let state = &node.state;
    let session_id = state.session_id.clone().unwrap_or_default();
    let dimensions = state.dimensions.clone().unwrap_or_default();
    let total_aspects = state.total_aspects();
    let elapsed_seconds = state
        .started_at
        .map(|start| (Utc::now().timestamp_millis() - start) as f64 / 1000.0)
        .unwrap_or(0.0);

    // Charts were already uploaded by the insert tool; only the report
    // artifacts go up here. Unlike the heavy stages, an upload failure at
    // finalize is fatal: the run cannot be called complete without its
    // artifacts in the blob store.
    let mut upload_failed = false;
    let uploads = match &ctx.uploader {
        Some(uploader) => {
            let uploads = uploader
                .upload_research_outputs(
                    &session_id,
                    state.draft_report_file.as_deref(),
                    state.report_file.as_deref(),
                    state.report_pdf_file.as_deref(),
                    "draft",
                )
                .await;
            match uploads.key("markdown") {
                Some(markdown_key) => {
                    ctx.status
                        .create_version(
                            "draft",
                            markdown_key,
                            uploads.key("docx"),
                            uploads.key("pdf"),
                            "system",
                            Some("initial"),
                        )
                        .await;
                    ctx.status.set_current_version("draft").await;
                }
                None => {
                    upload_failed = state.draft_report_file.is_some();
                }
            }
            uploads.to_value()
        }
        None => json!({}),
    };

    // Fatal-error audit: failed dimensions and a missing report are
    // terminal; chart failures are not.
    let mut errors: Vec<String> = Vec::new();
    let failed_dimensions: Vec<&String> = state
        .dimension_documents
        .iter()
        .filter(|(_, doc)| doc.path().is_none())
        .map(|(dim, _)| dim)
        .collect();
    if !failed_dimensions.is_empty() {
        errors.push(format!(
            "Dimension reduction failed for: {}",
            failed_dimensions
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if state.report_file.is_none() {
        errors.push("Report writing/conversion failed".to_string());
    }
    if upload_failed {
        errors.push("Artifact upload failed".to_string());
    }

    ctx.status.update_stage("workflow_complete").await;
    if errors.is_empty() {
        ctx.status
            .mark_completed(vec![
                (
                    "report_file".to_string(),
                    json!(state.report_file.as_ref().map(|p| p.display().to_string())),
                ),
                (
                    "report_pdf_file".to_string(),
                    json!(state
                        .report_pdf_file
                        .as_ref()
                        .map(|p| p.display().to_string())),
                ),
                ("elapsed_time".to_string(), json!(elapsed_seconds)),
                ("s3_uploads".to_string(), uploads.clone()),
            ])
            .await;
    } else {
        warn!(?errors, "workflow finished with fatal errors");
        ctx.status.mark_failed(&errors.join("; ")).await;
    }

    session_log::log_session_complete(&session_id, &dimensions, total_aspects, elapsed_seconds);

    if let Some(tracker) = &ctx.tracker {
        let output_files = json!({
            "markdown": state.draft_report_file.as_ref().map(|p| p.display().to_string()),
            "docx": state.report_file.as_ref().map(|p| p.display().to_string()),
            "pdf": state.report_pdf_file.as_ref().map(|p| p.display().to_string()),
        });
        tracker
            .log_research_complete(
                &dimensions,
                total_aspects,
                elapsed_seconds,
                &output_files,
                &uploads,
            )
            .await;
    }

    info!(
        session_id,
        dimensions = dimensions.len(),
        total_aspects,
        elapsed_seconds,
        "workflow complete"
    );
    Ok(StateUpdate::default())
}
