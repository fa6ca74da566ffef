//! `initialize_session`: status bootstrap, toolset validation, session
//! logging and the `research_start` event.

use deepcurrent::error::{Error, Result};
use deepcurrent::graph::NodeContext;
use serde_json::json;
use tracing::info;

use crate::context::ResearchContext;
use crate::session_log;
use crate::state::{ResearchState, StateUpdate};

/// Run the init stage.
pub async fn initialize_session(
    ctx: &ResearchContext,
    node: &NodeContext<ResearchState>,
) -> Result<StateUpdate> {
    let state = &node.state;
    let session_id = state
        .session_id
        .clone()
        .ok_or_else(|| Error::config("session id missing from initial state"))?;
    let topic = state
        .topic
        .clone()
        .ok_or_else(|| Error::config("topic missing from initial state"))?;
    let config = state
        .config
        .clone()
        .ok_or_else(|| Error::config("research config missing from initial state"))?;

    info!(
        session_id,
        topic = %topic.chars().take(100).collect::<String>(),
        research_type = config.research_type.as_str(),
        model = %config.llm_model,
        depth = config.research_depth.as_str(),
        "initializing research session"
    );

    ctx.status.mark_processing().await;
    ctx.status.update_stage("initialize_session").await;
    ctx.status
        .update(vec![
            ("topic".to_string(), json!(topic)),
            (
                "research_type".to_string(),
                json!(config.research_type.as_str()),
            ),
            ("model".to_string(), json!(config.llm_model)),
            (
                "research_depth".to_string(),
                json!(config.research_depth.as_str()),
            ),
            (
                "research_context".to_string(),
                json!(config.research_context),
            ),
        ])
        .await;

    // The research type's toolset must exist on the tool plane before any
    // stage runs; a missing tool names itself and the type.
    let required = config.research_type.toolset();
    if !required.is_empty() {
        let available = ctx.tool_plane.available_tools().await?;
        for tool in required {
            if !available.iter().any(|name| name == tool) {
                return Err(Error::config(format!(
                    "research type `{}` requires tool `{tool}` which the tool plane does not provide",
                    config.research_type.as_str()
                )));
            }
        }
    }

    session_log::log_session_start(&session_id, &topic, &config);

    if let Some(tracker) = &ctx.tracker {
        tracker
            .log_research_start(
                &topic,
                &config.llm_model,
                config.research_type.as_str(),
                config.research_depth.as_str(),
                config.research_context.as_deref().unwrap_or(""),
                !config.reference_materials.is_empty(),
            )
            .await;
    }

    Ok(StateUpdate {
        session_id: Some(session_id),
        research_context: config.research_context.clone(),
        ..StateUpdate::default()
    })
}
