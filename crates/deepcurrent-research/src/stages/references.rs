//! `reference_preparation`: summarize caller-supplied URLs and PDFs into
//! structured reference materials. Runs sequentially before topic
//! analysis because references inform the dimensions.
//!
//! Individual failures are logged and the item skipped; this stage never
//! aborts the workflow.

use std::sync::LazyLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use deepcurrent::error::{Error, Result};
use deepcurrent::graph::NodeContext;
use deepcurrent::messages::{ContentPart, Message, MessageContent};
use deepcurrent::tools::ToolInput;
use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use crate::config::RawReferenceMaterial;
use crate::context::ResearchContext;
use crate::prompts;
use crate::state::{ReferenceMaterial, ResearchState, StateUpdate};

/// Provider payload ceiling for PDF input.
const MAX_PDF_BYTES: usize = 4_500_000;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

static PDF_NAME_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"[^a-zA-Z0-9\s\-\(\)\[\]]").unwrap()
});

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\s+").unwrap()
});

/// Sanitize a PDF name to the provider's accepted character set, with
/// collapsed whitespace.
pub fn sanitize_pdf_name(filename: &str) -> String {
    let replaced = filename.replace('_', "-");
    let cleaned = PDF_NAME_DISALLOWED.replace_all(&replaced, "");
    let collapsed = WHITESPACE_RUN.replace_all(&cleaned, " ");
    let trimmed = collapsed.trim().to_string();
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed
    }
}

/// Pull up to 5 bullet points from the `KEY POINTS:` tail of a summary.
pub fn extract_key_points(summary: &str) -> Vec<String> {
    let mut points = Vec::new();
    let mut in_key_points = false;
    for line in summary.lines() {
        let trimmed = line.trim();
        if trimmed.to_uppercase().starts_with("KEY POINTS") {
            in_key_points = true;
            continue;
        }
        if in_key_points {
            if let Some(point) = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
            {
                points.push(point.trim().to_string());
                if points.len() == 5 {
                    break;
                }
            } else if !trimmed.is_empty() && !trimmed.starts_with('-') {
                break;
            }
        }
    }
    points
}

async fn summarize_url(
    ctx: &ResearchContext,
    raw: &RawReferenceMaterial,
    model: &std::sync::Arc<dyn deepcurrent::ChatModel>,
) -> Result<ReferenceMaterial> {
    let tools = ctx
        .tool_plane
        .load_tools(&["tavily_extract"], EXTRACT_TIMEOUT)
        .await?;
    let extract = tools
        .first()
        .ok_or_else(|| Error::tool("tavily_extract unavailable"))?;
    let extracted = extract
        .call(ToolInput::Structured(json!({ "url": raw.source })))
        .await?
        .as_text();

    let messages = vec![
        Message::system(prompts::reference_summary_system_prompt()),
        Message::human(format!(
            "Analyze the following reference material and create a comprehensive summary.\n\nSOURCE: {}\n\nCONTENT:\n{}",
            raw.source,
            extracted.chars().take(60_000).collect::<String>()
        )),
    ];
    let result = model.generate(&messages, None, None).await?;
    let summary = result.message.as_text();
    let key_points = extract_key_points(&summary);

    Ok(ReferenceMaterial {
        kind: "url".to_string(),
        source: raw.source.clone(),
        title: raw.source.clone(),
        summary,
        key_points,
        note: raw.note.clone(),
    })
}

async fn summarize_pdf(
    raw: &RawReferenceMaterial,
    model: &std::sync::Arc<dyn deepcurrent::ChatModel>,
) -> Result<ReferenceMaterial> {
    let data = raw
        .data
        .as_ref()
        .ok_or_else(|| Error::tool("pdf reference carries no data"))?;
    let bytes = BASE64
        .decode(data)
        .map_err(|e| Error::tool(format!("invalid base64 pdf payload: {e}")))?;
    if bytes.len() > MAX_PDF_BYTES {
        return Err(Error::tool(format!(
            "pdf size ({:.2} MB) exceeds the 4.5 MB limit",
            bytes.len() as f64 / (1024.0 * 1024.0)
        )));
    }
    let name = sanitize_pdf_name(&raw.source);

    let mut content = MessageContent::default();
    content.push(ContentPart::Document {
        name: name.clone(),
        data: bytes,
    });
    content.push(ContentPart::Text {
        text: format!(
            "Analyze the attached PDF reference material (\"{name}\") and create a comprehensive summary following the format specified in the system prompt."
        ),
    });
    let messages = vec![
        Message::system(prompts::reference_summary_system_prompt()),
        Message::Human { content },
    ];
    let result = model.generate(&messages, None, None).await?;
    let summary = result.message.as_text();
    let key_points = extract_key_points(&summary);

    Ok(ReferenceMaterial {
        kind: "pdf".to_string(),
        source: raw.source.clone(),
        title: name,
        summary,
        key_points,
        note: raw.note.clone(),
    })
}

/// Run the reference-preparation stage.
pub async fn reference_preparation(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.update_stage("reference_preparation").await;

    let config = node
        .state
        .config
        .clone()
        .ok_or_else(|| Error::config("research config missing"))?;
    let model = ctx.models.chat_model(&config.llm_model)?;

    let mut prepared: Vec<ReferenceMaterial> = Vec::new();
    for raw in &config.reference_materials {
        let outcome = match raw.kind.as_str() {
            "url" => summarize_url(ctx, raw, &model).await,
            "pdf" => summarize_pdf(raw, &model).await,
            other => Err(Error::tool(format!("unknown reference type `{other}`"))),
        };
        match outcome {
            Ok(material) => {
                info!(source = %raw.source, key_points = material.key_points.len(), "reference prepared");
                prepared.push(material);
            }
            Err(e) => {
                warn!(source = %raw.source, error = %e, "reference preparation failed; skipping");
            }
        }
    }

    if let Some(tracker) = &ctx.tracker {
        let materials: Vec<serde_json::Value> =
            prepared.iter().map(|m| json!(m)).collect();
        tracker.log_references_prepared(&materials).await;
    }

    Ok(StateUpdate {
        references: Some(prepared),
        ..StateUpdate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_names_collapse_to_the_allowed_set() {
        assert_eq!(
            sanitize_pdf_name("My_paper  (v2) [final]*.pdf"),
            "My-paper (v2) [final]pdf"
        );
        assert_eq!(sanitize_pdf_name("???"), "document");
    }

    #[test]
    fn key_points_come_from_the_tail_list() {
        let summary = "Long analysis...\n\nKEY POINTS:\n- first point\n- second point\n* third point\n\nEpilogue";
        let points = extract_key_points(summary);
        assert_eq!(points, vec!["first point", "second point", "third point"]);
    }

    #[test]
    fn key_points_cap_at_five() {
        let summary = format!(
            "KEY POINTS:\n{}",
            (1..=8).map(|i| format!("- p{i}\n")).collect::<String>()
        );
        assert_eq!(extract_key_points(&summary).len(), 5);
    }
}
