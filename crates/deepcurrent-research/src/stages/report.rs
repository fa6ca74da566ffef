//! Report assembly, the editor sub-agent, chart generation and format
//! conversion.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use deepcurrent::agent::{AgentDriver, CachePointHook, StopReason};
use deepcurrent::error::{Error, Result};
use deepcurrent::graph::NodeContext;
use deepcurrent::NeverCancelled;
use deepcurrent_outputs::assembler;
use deepcurrent_outputs::workspace::slugify;
use serde_json::json;
use tracing::{info, warn};

use super::record_stage_error;
use crate::context::ResearchContext;
use crate::prompts;
use crate::state::{ResearchState, StateUpdate};
use crate::tools::{ChartToolset, DraftLocks, ReplaceTextTool, WriteSummaryConclusionTool};

/// Upper bound on charts per report.
const MAX_CHARTS: usize = 8;

/// Editor runs are short: citation repairs plus one summary/conclusion
/// call.
const EDITOR_MAX_ITERATIONS: usize = 10;

/// Chart agent budget: ~7 calls per chart over 8 charts plus exploration.
const CHART_MAX_ITERATIONS: usize = 40;

/// `report_writing`: merge dimension documents in declared order, then
/// run the editor sub-agent bound to exactly two tools.
pub async fn report_writing(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.update_stage("report_writing").await;

    let state = &node.state;
    let topic = state.topic.clone().unwrap_or_default();
    let dimensions = state.dimensions.clone().unwrap_or_default();
    let ordered_paths: Vec<Option<PathBuf>> = dimensions
        .iter()
        .map(|dim| {
            state
                .dimension_documents
                .get(dim)
                .and_then(|doc| doc.path().cloned())
        })
        .collect();
    if ordered_paths.iter().all(Option::is_none) {
        return Err(Error::other("no dimension documents available for the report"));
    }

    let draft = assembler::merge_dimension_documents(&ordered_paths, &topic).await?;
    let draft_path = ctx.workspace.final_path(&format!(
        "draft_{}_{}.md",
        slugify(&topic),
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    tokio::fs::write(&draft_path, &draft.content).await?;
    info!(
        draft = %draft_path.display(),
        references = draft.references.len(),
        "draft assembled"
    );

    // The editor is best-effort: a failed edit leaves the placeholders in
    // place but the draft still exists.
    if let Err(e) = run_editor(ctx, node, &draft_path).await {
        if e.is_cancelled() {
            return Err(e);
        }
        record_stage_error(ctx, "report_writing", &e, json!({})).await;
    }

    Ok(StateUpdate {
        draft_report_file: Some(draft_path),
        ..StateUpdate::default()
    })
}

async fn run_editor(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
    draft_path: &std::path::Path,
) -> Result<()> {
    let config = node
        .state
        .config
        .clone()
        .ok_or_else(|| Error::config("research config missing"))?;
    let model = ctx.models.chat_model(&config.llm_model)?;
    let locks = Arc::new(DraftLocks::new());

    let driver = AgentDriver::new(model)
        .with_tools(vec![
            Arc::new(ReplaceTextTool::new(draft_path.to_path_buf(), Arc::clone(&locks))),
            Arc::new(WriteSummaryConclusionTool::new(
                draft_path.to_path_buf(),
                locks,
            )),
        ])
        .with_max_iterations(EDITOR_MAX_ITERATIONS)
        .with_hook(Arc::new(CachePointHook))
        .with_probe(node.probe().unwrap_or_else(|| Arc::new(NeverCancelled)));

    let draft_content = tokio::fs::read_to_string(draft_path).await?;
    let outcome = driver
        .run(
            &prompts::editor_system_prompt(),
            &format!(
                "Finalize this draft. It is {} lines long; the full text follows.\n\n{draft_content}",
                draft_content.lines().count()
            ),
        )
        .await?;
    info!(
        iterations = outcome.iterations,
        edits = outcome.transcript.len(),
        "editor finished"
    );
    Ok(())
}

/// `chart_generation`: the three-tool chart sub-agent. Never fatal: an
/// iteration-limit stop or missing sandbox reports success with whatever
/// charts made it in.
pub async fn chart_generation(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.update_stage("chart_generation").await;

    let state = &node.state;
    let Some(draft_path) = state.draft_report_file.clone() else {
        warn!("no draft available; skipping chart generation");
        return Ok(StateUpdate::default());
    };
    let Some(executor) = ctx.code_executor.clone() else {
        info!("no code executor configured; skipping chart generation");
        return Ok(StateUpdate::default());
    };
    let session_id = state.session_id.clone().unwrap_or_default();
    let config = state
        .config
        .clone()
        .ok_or_else(|| Error::config("research config missing"))?;

    let outcome = async {
        let model = ctx.models.chat_model(&config.llm_model)?;
        let charts_dir = ctx.workspace.charts_dir(&session_id)?;
        let toolset = ChartToolset::new(
            draft_path.clone(),
            Arc::new(DraftLocks::new()),
            charts_dir,
            session_id.clone(),
            executor,
            ctx.uploader.clone(),
        );

        let content = tokio::fs::read_to_string(&draft_path).await?;
        let total_lines = content.lines().count();
        let driver = AgentDriver::new(model)
            .with_tools(toolset.tools())
            .with_max_iterations(CHART_MAX_ITERATIONS)
            .with_hook(Arc::new(CachePointHook))
            .with_probe(node.probe().unwrap_or_else(|| Arc::new(NeverCancelled)));

        let run = driver
            .run(
                &prompts::chart_system_prompt(total_lines, MAX_CHARTS),
                "Begin the chart pass over the draft.",
            )
            .await?;
        if run.stop == StopReason::IterationLimit {
            // Graceful: inserted charts stay in the draft.
            info!(
                inserted = toolset.inserted().len(),
                "chart agent hit the iteration limit; keeping inserted charts"
            );
        }
        Ok::<usize, Error>(toolset.inserted().len())
    }
    .await;

    match outcome {
        Ok(count) => info!(charts = count, "chart generation finished"),
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            record_stage_error(ctx, "chart_generation", &e, json!({})).await;
        }
    }
    Ok(StateUpdate::default())
}

/// `document_conversion`: markdown → docx → pdf, no model involvement.
/// Failures record an error and leave the report paths unset; finalize
/// then marks the run failed.
pub async fn document_conversion(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.update_stage("document_conversion").await;

    let Some(draft_path) = node.state.draft_report_file.clone() else {
        return Ok(StateUpdate::default());
    };
    let final_dir = ctx.workspace.final_dir();
    let docx_path = final_dir.join("report.docx");

    let conversion = async {
        ctx.converter.markdown_to_docx(&draft_path, &docx_path).await?;
        let pdf_path = ctx.converter.docx_to_pdf(&docx_path, &final_dir).await?;
        Ok::<PathBuf, Error>(pdf_path)
    }
    .await;

    match conversion {
        Ok(pdf_path) => Ok(StateUpdate {
            report_file: Some(docx_path),
            report_pdf_file: Some(pdf_path),
            ..StateUpdate::default()
        }),
        Err(e) => {
            record_stage_error(ctx, "document_conversion", &e, json!({})).await;
            Ok(StateUpdate::default())
        }
    }
}
