//! Topic analysis, per-dimension aspect analysis and research planning.

use std::collections::BTreeMap;
use std::time::Duration;

use deepcurrent::agent::AgentDriver;
use deepcurrent::error::{Error, Result};
use deepcurrent::graph::NodeContext;
use deepcurrent::json::extract_json;
use deepcurrent::messages::Message;
use deepcurrent::tools::ToolInput;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{aspects_to_value, record_stage_error, DimensionPayload};
use crate::context::ResearchContext;
use crate::prompts;
use crate::state::{Aspect, ResearchState, StateUpdate};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Tool-call budget for the exploration sub-agent (it is instructed to
/// stop after ~3 searches; this bounds the misbehaving case).
const EXPLORATION_MAX_ITERATIONS: usize = 5;

/// `topic_analysis`: a small exploration sub-agent followed by a
/// JSON-only dimension identification call.
pub async fn topic_analysis(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.update_stage("topic_analysis").await;

    let state = &node.state;
    let topic = state
        .topic
        .clone()
        .ok_or_else(|| Error::config("no topic provided"))?;
    let config = state
        .config
        .clone()
        .ok_or_else(|| Error::config("research config missing"))?;
    let profile = config.depth_profile();
    let model = ctx.models.chat_model(&config.llm_model)?;

    // Background exploration, limited to wiki/web search. Best effort: a
    // failed exploration leaves the context empty rather than failing the
    // stage.
    let search_context = match ctx
        .tool_plane
        .load_tools(config.research_type.exploration_toolset(), SEARCH_TIMEOUT)
        .await
    {
        Ok(tools) if !tools.is_empty() => {
            let driver = AgentDriver::new(model.clone())
                .with_tools(tools)
                .with_max_iterations(EXPLORATION_MAX_ITERATIONS)
                .with_probe(
                    node.probe()
                        .unwrap_or_else(|| std::sync::Arc::new(deepcurrent::NeverCancelled)),
                );
            let exploration_system =
                "You are a research assistant gathering quick background context with search tools.";
            match driver
                .run(exploration_system, &prompts::exploration_prompt(&topic))
                .await
            {
                Ok(outcome) => {
                    info!(
                        iterations = outcome.iterations,
                        tool_calls = outcome.transcript.len(),
                        "topic exploration finished"
                    );
                    format!("\nBackground context:\n{}\n", outcome.final_text)
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "topic exploration failed; continuing without context");
                    String::new()
                }
            }
        }
        Ok(_) => String::new(),
        Err(e) => {
            warn!(error = %e, "exploration tools unavailable");
            String::new()
        }
    };

    let references = state.references.clone().unwrap_or_default();
    let prompt = prompts::dimensions_prompt(
        &topic,
        profile.target_dimensions,
        &prompts::research_context_block(state.research_context.as_deref(), "identifying dimensions"),
        &prompts::reference_context_block(&references, false),
        &search_context,
    );

    let result = model.generate(&[Message::human(prompt)], None, None).await?;
    let parsed = extract_json(&result.message.as_text(), "topic_analysis", &["dimensions"])?;
    let mut dimensions: Vec<String> = parsed["dimensions"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    if dimensions.len() > profile.target_dimensions {
        warn!(
            returned = dimensions.len(),
            target = profile.target_dimensions,
            "model over-delivered dimensions; truncating"
        );
        dimensions.truncate(profile.target_dimensions);
    } else if dimensions.len() < profile.target_dimensions {
        warn!(
            returned = dimensions.len(),
            target = profile.target_dimensions,
            "model under-delivered dimensions; proceeding"
        );
    }
    if dimensions.is_empty() {
        return Err(Error::model("topic analysis produced no dimensions"));
    }
    info!(?dimensions, "dimensions identified");

    Ok(StateUpdate {
        dimensions: Some(dimensions),
        ..StateUpdate::default()
    })
}

/// Defensive cleanup of one model-produced aspect entry.
fn clean_aspect(raw: &Value, index: usize) -> Option<Aspect> {
    let obj = raw.as_object()?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("Unnamed Aspect {}", index + 1));
    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| "No reasoning provided".to_string());
    let key_questions = match obj.get("key_questions") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect(),
        // Models sometimes emit the list as one string; split it.
        Some(Value::String(s)) => s
            .replace('\n', ",")
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(ToString::to_string)
            .collect(),
        _ => Vec::new(),
    };
    Some(Aspect {
        name,
        reasoning,
        key_questions,
        completed: false,
    })
}

/// Truncate or pad an aspect list to the target count.
fn shape_aspects(mut aspects: Vec<Aspect>, target: usize, dimension: &str) -> Vec<Aspect> {
    if aspects.len() > target {
        warn!(
            dimension,
            returned = aspects.len(),
            target,
            "model over-delivered aspects; truncating"
        );
        aspects.truncate(target);
    }
    while aspects.len() < target {
        aspects.push(Aspect {
            name: format!("{dimension} - Additional Focus {}", aspects.len() + 1),
            reasoning: "Filler aspect added to preserve the research structure.".to_string(),
            key_questions: vec![format!("What else matters about {dimension}?")],
            completed: false,
        });
    }
    aspects
}

/// `aspect_analysis` worker: one dimension, one JSON-only call, defensive
/// cleanup. Failures fall back to an empty contribution for this
/// dimension only.
pub async fn aspect_analysis(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    let payload: DimensionPayload = node.payload_as()?;
    let dimension = payload.dimension;

    match analyze_dimension(ctx, node, &dimension).await {
        Ok(update) => Ok(update),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            record_stage_error(
                ctx,
                "aspect_analysis",
                &e,
                json!({ "dimension": dimension }),
            )
            .await;
            Ok(StateUpdate::default())
        }
    }
}

async fn analyze_dimension(
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
    let profile = config.depth_profile();
    let model = ctx.models.chat_model(&config.llm_model)?;

    // One exploratory search scoped to the dimension; tolerates failure.
    let search_context = match ctx
        .tool_plane
        .load_tools(&["ddg_search"], SEARCH_TIMEOUT)
        .await
    {
        Ok(tools) => match tools.first() {
            Some(search) => {
                let query = format!("{dimension} in {topic}");
                match search
                    .call(ToolInput::Structured(json!({
                        "query": query,
                        "max_results": profile.search_result_cap,
                    })))
                    .await
                {
                    Ok(result) => format!("\nRelevant findings:\n{}\n", result.as_text()),
                    Err(e) => {
                        warn!(dimension, error = %e, "dimension search failed");
                        String::new()
                    }
                }
            }
            None => String::new(),
        },
        Err(_) => String::new(),
    };

    let references = state.references.clone().unwrap_or_default();
    let system = prompts::aspects_system_prompt(
        &topic,
        profile.aspects_per_dimension,
        &prompts::research_context_block(state.research_context.as_deref(), "identifying aspects"),
        &prompts::reference_context_block(&references, false),
    );
    let user = prompts::aspects_user_prompt(dimension, profile.aspects_per_dimension, &search_context);

    let result = model
        .generate(
            &[Message::system(system), Message::human(user)],
            None,
            None,
        )
        .await?;
    let parsed = extract_json(
        &result.message.as_text(),
        &format!("{dimension} aspect analysis"),
        &["aspects"],
    )?;
    let cleaned: Vec<Aspect> = parsed["aspects"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(i, raw)| clean_aspect(raw, i))
                .collect()
        })
        .unwrap_or_default();
    let aspects = shape_aspects(cleaned, profile.aspects_per_dimension, dimension);

    ctx.status.add_dimension(dimension).await;
    for aspect in &aspects {
        ctx.status.add_aspect(dimension, json!(aspect)).await;
    }
    info!(dimension, aspects = aspects.len(), "aspects identified");

    Ok(StateUpdate {
        original_aspects_by_dimension: BTreeMap::from([(dimension.to_string(), aspects)]),
        ..StateUpdate::default()
    })
}

/// `prepare_research` barrier: all aspect-analysis branches delivered.
pub async fn prepare_research(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.update_stage("prepare_research").await;
    Ok(StateUpdate::default())
}

fn parse_refined_structure(
    text: &str,
    profile: &crate::config::DepthProfile,
    original: &BTreeMap<String, Vec<Aspect>>,
) -> Result<(Vec<String>, BTreeMap<String, Vec<Aspect>>)> {
    let parsed = extract_json(text, "research_planning", &["dimensions", "aspects_by_dimension"])?;

    let dimensions: Vec<String> = parsed["dimensions"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let aspects_obj = parsed["aspects_by_dimension"]
        .as_object()
        .ok_or_else(|| Error::model("aspects_by_dimension is not an object"))?;

    if dimensions.len() != original.len() || dimensions.is_empty() {
        return Err(Error::model(format!(
            "planning changed the dimension count ({} != {})",
            dimensions.len(),
            original.len()
        )));
    }

    let mut refined = BTreeMap::new();
    for dimension in &dimensions {
        let raw_aspects = aspects_obj
            .get(dimension)
            .and_then(Value::as_array)
            .ok_or_else(|| Error::model(format!("planning omitted dimension `{dimension}`")))?;
        let mut aspects: Vec<Aspect> = raw_aspects
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                clean_aspect(raw, i).map(|mut aspect| {
                    aspect.completed = raw
                        .get("completed")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    aspect
                })
            })
            .collect();
        aspects = shape_aspects(aspects, profile.aspects_per_dimension, dimension);
        refined.insert(dimension.clone(), aspects);
    }
    Ok((dimensions, refined))
}

/// `research_planning`: reconcile the parallel aspect output with the
/// compressed reference context and enforce the exact
/// `dimensions × aspects_per_dimension` shape. One internal retry; on
/// repeated malformed output the unrefined structure is kept unchanged.
pub async fn research_planning(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    node.check_cancellation().await?;
    ctx.status.update_stage("research_planning").await;

    let state = &node.state;
    let config = state
        .config
        .clone()
        .ok_or_else(|| Error::config("research config missing"))?;
    let profile = config.depth_profile();
    let original = state.original_aspects_by_dimension.clone();
    if original.is_empty() {
        return Err(Error::model("no aspects available for planning"));
    }
    let original_order: Vec<String> = state
        .dimensions
        .clone()
        .unwrap_or_else(|| original.keys().cloned().collect());

    let references = state.references.clone().unwrap_or_default();
    let system = prompts::planning_system_prompt(
        original.len(),
        profile.aspects_per_dimension,
        &prompts::research_context_block(state.research_context.as_deref(), "refining the plan"),
        &prompts::reference_context_block(&references, true),
    );
    let structure_json = serde_json::to_string_pretty(&json!({
        "dimensions": original_order,
        "aspects_by_dimension": aspects_to_value(&original),
    }))
    .unwrap_or_default();
    let user = prompts::planning_user_prompt(&structure_json);
    let model = ctx.models.chat_model(&config.llm_model)?;

    let mut refined: Option<(Vec<String>, BTreeMap<String, Vec<Aspect>>)> = None;
    for attempt in 0..2 {
        let result = model
            .generate(
                &[
                    Message::system(system.clone()),
                    Message::human(user.clone()),
                ],
                None,
                None,
            )
            .await;
        match result {
            Ok(response) => {
                match parse_refined_structure(&response.message.as_text(), &profile, &original) {
                    Ok(structure) => {
                        refined = Some(structure);
                        break;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "planning output malformed");
                        if attempt == 1 {
                            record_stage_error(ctx, "research_planning", &e, json!({})).await;
                        }
                    }
                }
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(attempt, error = %e, "planning model call failed");
                if attempt == 1 {
                    record_stage_error(ctx, "research_planning", &e, json!({})).await;
                }
            }
        }
    }

    // Fallback keeps the unrefined structure unchanged.
    let (dimensions, aspects) =
        refined.unwrap_or_else(|| (original_order.clone(), original.clone()));

    for dimension in &dimensions {
        ctx.status.add_dimension(dimension).await;
        if let Some(list) = aspects.get(dimension) {
            for aspect in list {
                ctx.status.add_aspect(dimension, json!(aspect)).await;
            }
        }
    }
    ctx.status.flush_dimensions_and_aspects().await;

    if let Some(tracker) = &ctx.tracker {
        tracker
            .log_dimensions_identified(&dimensions, &aspects_to_value(&aspects))
            .await;
    }
    info!(
        dimensions = dimensions.len(),
        total_aspects = aspects.values().map(Vec::len).sum::<usize>(),
        "research plan finalized"
    );

    Ok(StateUpdate {
        dimensions: Some(dimensions),
        aspects_by_dimension: Some(aspects),
        ..StateUpdate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_key_questions_are_coerced_to_lists() {
        let raw = json!({
            "name": "Scale",
            "reasoning": "matters",
            "key_questions": "How big?\nHow fast?, Where?"
        });
        let aspect = clean_aspect(&raw, 0).unwrap();
        assert_eq!(aspect.key_questions, vec!["How big?", "How fast?", "Where?"]);
    }

    #[test]
    fn non_object_entries_are_dropped() {
        assert!(clean_aspect(&json!("just a string"), 0).is_none());
    }

    #[test]
    fn missing_fields_get_defaults() {
        let aspect = clean_aspect(&json!({}), 2).unwrap();
        assert_eq!(aspect.name, "Unnamed Aspect 3");
        assert_eq!(aspect.reasoning, "No reasoning provided");
        assert!(aspect.key_questions.is_empty());
        assert!(!aspect.completed);
    }

    #[test]
    fn shaping_truncates_and_pads() {
        let many: Vec<Aspect> = (0..5)
            .filter_map(|i| clean_aspect(&json!({"name": format!("a{i}")}), i))
            .collect();
        assert_eq!(shape_aspects(many, 3, "Dim").len(), 3);

        let few: Vec<Aspect> = Vec::new();
        let padded = shape_aspects(few, 2, "Dim");
        assert_eq!(padded.len(), 2);
        assert!(padded[0].name.starts_with("Dim"));
    }

    #[test]
    fn refined_structure_must_keep_dimension_count() {
        let original = BTreeMap::from([
            ("A".to_string(), vec![]),
            ("B".to_string(), vec![]),
        ]);
        let profile = crate::config::DepthProfile::for_depth(crate::config::ResearchDepth::Quick);
        let text = json!({
            "dimensions": ["A"],
            "aspects_by_dimension": {"A": []}
        })
        .to_string();
        assert!(parse_refined_structure(&text, &profile, &original).is_err());
    }
}
