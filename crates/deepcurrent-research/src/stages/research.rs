//! The heavy stages: per-aspect research agents and per-dimension
//! reduction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use deepcurrent::agent::{
    AgentDriver, CachePointHook, CompactToolResultsHook, ComposedHook, MessageHook, StopReason,
};
use deepcurrent::error::{Error, Result};
use deepcurrent::graph::NodeContext;
use deepcurrent::messages::Message;
use deepcurrent::NeverCancelled;
use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use super::{count_citations, record_stage_error, DimensionPayload, ResearchPayload};
use crate::context::ResearchContext;
use crate::prompts;
use crate::state::{aspect_key, DimensionDoc, ResearchResult, ResearchState, StateUpdate};

const RESEARCH_TOOL_TIMEOUT: Duration = Duration::from_secs(15);

/// First-chunk deadline for the reduction stream; a hung model surfaces
/// here instead of after a whole-response timeout.
const FIRST_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

fn research_hook() -> Arc<dyn MessageHook> {
    Arc::new(ComposedHook(vec![
        Arc::new(CachePointHook),
        Arc::new(CompactToolResultsHook { keep_last: 1 }),
    ]))
}

fn placeholder_result(key: &str, title: &str, note: &str) -> ResearchResult {
    ResearchResult::new(key, title, format!("## {title}\n\n**Note**: {note}\n"))
}

/// `research` worker: one aspect, a semaphore slot, a full agent run.
/// Every outcome, success or documented stub, delivers exactly one
/// entry for this aspect key.
pub async fn research_agent(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    let payload: ResearchPayload = node.payload_as()?;
    let dimension = payload.dimension;
    let aspect = payload.aspect;
    let key = aspect_key(&dimension, &aspect.name);

    let _slot = ctx.governor.acquire("research", &aspect.name).await;

    // Cancellation observed after (possibly long) slot wait: deliver the
    // placeholder and let the barrier's own probe stop the workflow. No
    // events are emitted once cancellation is observed.
    let mut cancelled = false;
    let result = if node.check_cancellation().await.is_err() {
        cancelled = true;
        placeholder_result(&key, &aspect.name, "This research was cancelled by user.")
    } else {
        match execute_research(ctx, node, &dimension, &aspect, &key).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                info!(aspect = %aspect.name, "research cancelled");
                cancelled = true;
                placeholder_result(&key, &aspect.name, "This research was cancelled by user.")
            }
            Err(e) if e.is_iteration_limit() => placeholder_result(
                &key,
                &aspect.name,
                "Research reached the iteration cap before completion; partial findings may be missing.",
            ),
            Err(e) if e.is_timeout() => placeholder_result(
                &key,
                &aspect.name,
                "Research timed out before completion; partial findings may be missing.",
            ),
            Err(e) => {
                record_stage_error(
                    ctx,
                    "research",
                    &e,
                    json!({ "dimension": dimension, "aspect": aspect.name }),
                )
                .await;
                ResearchResult {
                    aspect_key: key.clone(),
                    title: aspect.name.clone(),
                    content: format!("## Error\n\nResearch failed for this aspect: {e}\n"),
                    word_count: 0,
                }
            }
        }
    };

    if !cancelled {
        let citations = count_citations(&result.content);
        ctx.status
            .add_research_result(&dimension, &aspect.name, result.word_count, citations)
            .await;
        if let Some(tracker) = &ctx.tracker {
            tracker
                .log_aspect_research_complete(&dimension, &aspect.name, &json!(result), citations)
                .await;
        }
    }

    Ok(StateUpdate {
        research_by_aspect: BTreeMap::from([(key, result)]),
        ..StateUpdate::default()
    })
}

async fn execute_research(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
    dimension: &str,
    aspect: &crate::state::Aspect,
    key: &str,
) -> Result<ResearchResult> {
    let state = &node.state;
    let topic = state.topic.clone().unwrap_or_default();
    let config = state
        .config
        .clone()
        .ok_or_else(|| Error::config("research config missing"))?;
    let profile = config.depth_profile();
    let model = ctx.models.chat_model(&config.llm_model)?;

    let tools = ctx
        .tool_plane
        .load_tools(config.research_type.toolset(), RESEARCH_TOOL_TIMEOUT)
        .await?;

    let references = state.references.clone().unwrap_or_default();
    let system = prompts::research_system_prompt(
        config.research_type.as_str(),
        profile.search_result_cap,
        &prompts::reference_context_block(&references, false),
        &prompts::research_context_block(state.research_context.as_deref(), "researching"),
    );
    let siblings: Vec<String> = state
        .effective_aspects()
        .iter()
        .flat_map(|(dim, aspects)| {
            aspects
                .iter()
                .filter(|a| !(dim == dimension && a.name == aspect.name))
                .map(|a| format!("{dim} / {}", a.name))
                .collect::<Vec<_>>()
        })
        .collect();
    let user = prompts::research_user_prompt(&topic, dimension, aspect, &siblings);

    let driver = AgentDriver::new(model)
        .with_tools(tools)
        .with_max_iterations(profile.agent_max_iterations)
        .with_hook(research_hook())
        .with_probe(node.probe().unwrap_or_else(|| Arc::new(NeverCancelled)));

    let outcome = driver.run(&system, &user).await?;
    if outcome.stop == StopReason::IterationLimit {
        // Partial results are acceptable; keep whatever the agent wrote
        // and note the cap.
        if outcome.final_text.is_empty() {
            return Err(Error::IterationLimit {
                iterations: outcome.iterations,
            });
        }
        let mut content = outcome.final_text;
        content.push_str("\n\n**Note**: Research reached the iteration cap; coverage may be partial.\n");
        return Ok(ResearchResult::new(key, &aspect.name, content));
    }

    info!(
        aspect = %aspect.name,
        iterations = outcome.iterations,
        tool_calls = outcome.transcript.len(),
        "research complete"
    );
    Ok(ResearchResult::new(key, &aspect.name, outcome.final_text))
}

/// `prepare_dimension_reduction` barrier: all research delivered; flush
/// the buffered per-aspect metadata.
pub async fn prepare_dimension_reduction(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.flush_research_results().await;
    ctx.status.update_stage("prepare_dimension_reduction").await;
    Ok(StateUpdate::default())
}

/// `dimension_reduction` worker: synthesize one dimension's research into
/// a markdown document via the streaming path. Failures record a null
/// document; the report stage skips those dimensions.
pub async fn dimension_reduction(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    let payload: DimensionPayload = node.payload_as()?;
    let dimension = payload.dimension;

    let _slot = ctx.governor.acquire("dimension_reduction", &dimension).await;
    node.check_cancellation().await?;

    match reduce_dimension(ctx, node, &dimension).await {
        Ok(update) => Ok(update),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            record_stage_error(
                ctx,
                "dimension_reduction",
                &e,
                json!({ "dimension": dimension }),
            )
            .await;
            ctx.status.add_dimension_document(&dimension, None).await;
            Ok(StateUpdate {
                dimension_documents: BTreeMap::from([(dimension, DimensionDoc::Failed)]),
                ..StateUpdate::default()
            })
        }
    }
}

async fn reduce_dimension(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
    dimension: &str,
) -> Result<StateUpdate> {
    let state = &node.state;
    let topic = state.topic.clone().unwrap_or_default();
    let config = state
        .config
        .clone()
        .ok_or_else(|| Error::config("research config missing"))?;
    let model = ctx.models.chat_model(&config.llm_model)?;

    let aspects = state
        .effective_aspects()
        .get(dimension)
        .cloned()
        .unwrap_or_default();
    let results: Vec<&ResearchResult> = state
        .research_by_aspect
        .values()
        .filter(|r| {
            crate::state::split_aspect_key(&r.aspect_key)
                .is_some_and(|(dim, _)| dim == dimension)
        })
        .collect();
    if results.is_empty() {
        return Err(Error::model(format!(
            "no research available for dimension `{dimension}`"
        )));
    }

    let summary = prompts::format_research_summary(&aspects, &results);
    let system = prompts::dimension_reducer_prompt(
        &topic,
        dimension,
        aspects.len(),
        &summary,
        &prompts::research_context_block(state.research_context.as_deref(), "synthesizing"),
    );
    let messages = vec![
        Message::system(system),
        Message::human(format!(
            "Create the comprehensive markdown section for \"{dimension}\".\nOutput ONLY the markdown content following the structure specified in the system prompt."
        )),
    ];

    // Streaming read: the first chunk carries the hang risk.
    let mut stream = model.stream(&messages).await?;
    let first = tokio::time::timeout(FIRST_CHUNK_TIMEOUT, stream.next())
        .await
        .map_err(|_| Error::timeout(format!("first chunk for dimension `{dimension}`")))?;
    let mut markdown = match first {
        Some(chunk) => chunk?.delta,
        None => return Err(Error::model("empty stream from reduction model")),
    };
    while let Some(chunk) = stream.next().await {
        markdown.push_str(&chunk?.delta);
    }

    let word_count = markdown.split_whitespace().count();
    let path = ctx.workspace.dimension_document_path(dimension);
    tokio::fs::write(&path, &markdown).await?;
    info!(dimension, words = word_count, path = %path.display(), "dimension document written");

    ctx.status
        .add_dimension_document(dimension, path.to_str())
        .await;
    if let Some(tracker) = &ctx.tracker {
        tracker
            .log_dimension_document_complete(
                dimension,
                &markdown,
                word_count,
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default(),
            )
            .await;
    }

    Ok(StateUpdate {
        dimension_documents: BTreeMap::from([(
            dimension.to_string(),
            DimensionDoc::Written(path),
        )]),
        ..StateUpdate::default()
    })
}

/// `aggregate_dimensions` barrier: all reductions delivered.
pub async fn aggregate_dimensions(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.flush_dimension_documents().await;
    ctx.status.update_stage("aggregate_dimensions").await;
    let written = node
        .state
        .dimension_documents
        .values()
        .filter(|d| d.path().is_some())
        .count();
    if written == 0 {
        warn!("no dimension documents were produced");
    }
    Ok(StateUpdate::default())
}
