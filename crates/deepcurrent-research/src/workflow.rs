//! Workflow assembly and the caller-facing record stream.
//!
//! The graph mirrors the dimensional research pipeline:
//!
//! ```text
//! initialize_session → (reference_preparation?) → topic_analysis
//!   → aspect_analysis×N ─(prepare_research)→ research_planning
//!   → research×M ─(prepare_dimension_reduction)→ dimension_reduction×N
//!   ─(aggregate_dimensions)→ report_writing → chart_generation
//!   → document_conversion → finalize
//! ```
//!
//! Fan-outs are conditional-edge routers returning [`Route::Fan`]; the
//! three barrier nodes are deferred so each runs exactly once after its
//! mapper's sends all deliver.

use std::sync::Arc;

use chrono::Utc;
use deepcurrent::error::Result;
use deepcurrent::graph::{
    ExecutionEvent, Route, Send as GraphSend, StateGraph, END,
};
use futures::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::context::ResearchContext;
use crate::stages::{self, DimensionPayload, ResearchPayload};
use crate::state::{ResearchState, StateUpdate};

/// A caller request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    /// The research topic.
    pub topic: String,
    /// Run configuration.
    pub research_config: crate::config::ResearchConfig,
    /// Caller session id (`bff_session_id`).
    pub session_id: String,
    /// Caller user id; becomes the event actor.
    pub user_id: String,
}

/// One record of the caller-facing stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    /// A lifecycle transition.
    Status {
        /// Session id.
        session_id: String,
        /// New status.
        status: String,
        /// Stage the transition happened in.
        current_stage: String,
        /// Human-readable note.
        message: String,
    },
    /// An incremental progress update.
    Progress {
        /// Session id.
        session_id: String,
        /// Stage now running.
        current_stage: String,
    },
    /// Terminal success.
    Complete {
        /// Session id.
        session_id: String,
        /// Wall time in seconds.
        elapsed_time: f64,
        /// Result subset for the caller.
        result: serde_json::Value,
    },
    /// Terminal cancellation.
    Cancelled {
        /// Session id.
        session_id: String,
        /// Human-readable note.
        message: String,
    },
    /// Terminal failure.
    Error {
        /// Session id.
        session_id: String,
        /// Classified error text.
        error: String,
    },
}

/// Build the research graph over a session context.
pub fn build_graph(ctx: Arc<ResearchContext>) -> Result<deepcurrent::graph::CompiledGraph<ResearchState>> {
    let mut graph: StateGraph<ResearchState> = StateGraph::new();

    macro_rules! stage_node {
        ($name:expr, $handler:path) => {{
            let ctx = Arc::clone(&ctx);
            graph.add_node($name, move |node| {
                let ctx = Arc::clone(&ctx);
                async move { $handler(&ctx, &node).await }
            });
        }};
    }
    macro_rules! barrier_node {
        ($name:expr, $handler:path) => {{
            let ctx = Arc::clone(&ctx);
            graph.add_deferred_node($name, move |node| {
                let ctx = Arc::clone(&ctx);
                async move { $handler(&ctx, &node).await }
            });
        }};
    }

    stage_node!("initialize_session", stages::init::initialize_session);
    stage_node!("reference_preparation", stages::references::reference_preparation);
    stage_node!("topic_analysis", stages::analysis::topic_analysis);
    stage_node!("aspect_analysis", stages::analysis::aspect_analysis);
    barrier_node!("prepare_research", stages::analysis::prepare_research);
    stage_node!("research_planning", stages::analysis::research_planning);
    stage_node!("research", stages::research::research_agent);
    barrier_node!(
        "prepare_dimension_reduction",
        stages::research::prepare_dimension_reduction
    );
    stage_node!("dimension_reduction", stages::research::dimension_reduction);
    barrier_node!("aggregate_dimensions", stages::research::aggregate_dimensions);
    stage_node!("report_writing", stages::report::report_writing);
    stage_node!("chart_generation", stages::report::chart_generation);
    stage_node!("document_conversion", stages::report::document_conversion);
    stage_node!("finalize", stages::finalize::finalize);

    graph.set_entry_point("initialize_session");

    // References are sequential before topic analysis because they inform
    // the dimensions; without references the stage is skipped entirely.
    graph.add_conditional_edges(
        "initialize_session",
        |state: &ResearchState| {
            let has_references = state
                .config
                .as_ref()
                .is_some_and(|c| !c.reference_materials.is_empty());
            Ok(if has_references {
                Route::To("reference_preparation".to_string())
            } else {
                Route::To("topic_analysis".to_string())
            })
        },
        ["reference_preparation", "topic_analysis"],
    );
    graph.add_edge("reference_preparation", "topic_analysis");

    // Fan out one aspect-analysis worker per dimension.
    graph.add_conditional_edges(
        "topic_analysis",
        |state: &ResearchState| {
            let dimensions = state.dimensions.clone().unwrap_or_default();
            info!(count = dimensions.len(), "fanning out aspect analysis");
            Ok(Route::Fan(
                dimensions
                    .into_iter()
                    .map(|dimension| {
                        GraphSend::new(
                            "aspect_analysis",
                            json!(DimensionPayload { dimension }),
                        )
                    })
                    .collect(),
            ))
        },
        ["aspect_analysis"],
    );
    graph.add_edge("aspect_analysis", "prepare_research");
    graph.add_edge("prepare_research", "research_planning");

    // Fan out one research worker per incomplete aspect.
    graph.add_conditional_edges(
        "research_planning",
        |state: &ResearchState| {
            let mut sends = Vec::new();
            let aspects = state.effective_aspects();
            let ordered = state
                .dimensions
                .clone()
                .unwrap_or_else(|| aspects.keys().cloned().collect());
            for dimension in ordered {
                let Some(list) = aspects.get(&dimension) else {
                    continue;
                };
                for aspect in list {
                    if aspect.completed {
                        continue;
                    }
                    sends.push(GraphSend::new(
                        "research",
                        json!(ResearchPayload {
                            dimension: dimension.clone(),
                            aspect: aspect.clone(),
                        }),
                    ));
                }
            }
            info!(count = sends.len(), "fanning out research");
            Ok(Route::Fan(sends))
        },
        ["research"],
    );
    graph.add_edge("research", "prepare_dimension_reduction");

    // Fan out one reducer per dimension.
    graph.add_conditional_edges(
        "prepare_dimension_reduction",
        |state: &ResearchState| {
            let dimensions = state.dimensions.clone().unwrap_or_default();
            Ok(Route::Fan(
                dimensions
                    .into_iter()
                    .map(|dimension| {
                        GraphSend::new(
                            "dimension_reduction",
                            json!(DimensionPayload { dimension }),
                        )
                    })
                    .collect(),
            ))
        },
        ["dimension_reduction"],
    );
    graph.add_edge("dimension_reduction", "aggregate_dimensions");
    graph.add_edge("aggregate_dimensions", "report_writing");
    graph.add_edge("report_writing", "chart_generation");
    graph.add_edge("chart_generation", "document_conversion");
    graph.add_edge("document_conversion", "finalize");
    graph.add_edge("finalize", END);

    Ok(graph
        .compile()?
        .with_cancellation_probe(Arc::clone(&ctx.probe)))
}

fn result_subset(state: &ResearchState) -> serde_json::Value {
    json!({
        "topic": state.topic,
        "dimensions": state.dimensions,
        "aspects_by_dimension": state.aspects_by_dimension,
        "research_by_aspect": state
            .research_by_aspect
            .iter()
            .map(|(key, result)| {
                (key.clone(), json!({
                    "title": result.title,
                    "word_count": result.word_count,
                }))
            })
            .collect::<serde_json::Map<String, serde_json::Value>>(),
        "report_file": state.report_file.as_ref().map(|p| p.display().to_string()),
        "report_pdf_file": state.report_pdf_file.as_ref().map(|p| p.display().to_string()),
        "dimension_documents": state
            .dimension_documents
            .iter()
            .map(|(dim, doc)| {
                (dim.clone(), json!(doc.path().map(|p| p.display().to_string())))
            })
            .collect::<serde_json::Map<String, serde_json::Value>>(),
    })
}

/// Run a research session, yielding the caller-facing record stream.
///
/// The stream always terminates with exactly one `complete`, `cancelled`
/// or `error` record.
pub fn run_research(
    ctx: Arc<ResearchContext>,
    request: ResearchRequest,
) -> impl Stream<Item = StreamRecord> {
    async_stream::stream! {
        let session_id = request.session_id.clone();
        let started_at = Utc::now().timestamp_millis();

        if request.topic.trim().is_empty() {
            yield StreamRecord::Error {
                session_id,
                error: "Missing required field: topic".to_string(),
            };
            return;
        }
        if session_id.trim().is_empty() {
            yield StreamRecord::Error {
                session_id,
                error: "Missing required field: session_id".to_string(),
            };
            return;
        }

        yield StreamRecord::Status {
            session_id: session_id.clone(),
            status: "processing".to_string(),
            current_stage: "initialize_session".to_string(),
            message: format!("Starting deep research: {}", request.topic),
        };

        let app = match build_graph(Arc::clone(&ctx)) {
            Ok(app) => Arc::new(app),
            Err(e) => {
                ctx.status.mark_failed(&e.to_string()).await;
                yield StreamRecord::Error {
                    session_id,
                    error: e.to_string(),
                };
                return;
            }
        };

        let initial = ResearchState {
            topic: Some(request.topic.clone()),
            config: Some(request.research_config.clone()),
            session_id: Some(session_id.clone()),
            user_id: Some(request.user_id.clone()),
            started_at: Some(started_at),
            ..ResearchState::default()
        };

        let mut events = app.stream(initial);
        let mut cancelled = false;
        while let Some(event) = events.next().await {
            match event {
                ExecutionEvent::NodeStart { node, .. } => {
                    yield StreamRecord::Progress {
                        session_id: session_id.clone(),
                        current_stage: node,
                    };
                }
                ExecutionEvent::NodeEnd { .. } => {}
                ExecutionEvent::Cancelled => {
                    cancelled = true;
                    ctx.status.mark_cancelled().await;
                    yield StreamRecord::Cancelled {
                        session_id: session_id.clone(),
                        message: "Research cancelled by user".to_string(),
                    };
                }
                ExecutionEvent::GraphEnd { outcome } => {
                    if outcome.cancelled || cancelled {
                        // The cancelled record already went out; nothing
                        // further is emitted.
                        return;
                    }
                    let elapsed_time =
                        (Utc::now().timestamp_millis() - started_at) as f64 / 1000.0;
                    yield StreamRecord::Complete {
                        session_id: session_id.clone(),
                        elapsed_time,
                        result: result_subset(&outcome.state),
                    };
                    return;
                }
                ExecutionEvent::GraphError { error } => {
                    ctx.status.mark_failed(&error).await;
                    if let Some(tracker) = &ctx.tracker {
                        tracker
                            .log_error("workflow", &error, None, &json!({}))
                            .await;
                    }
                    yield StreamRecord::Error {
                        session_id: session_id.clone(),
                        error,
                    };
                    return;
                }
            }
        }
    }
}
