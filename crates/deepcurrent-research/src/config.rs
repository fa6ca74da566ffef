//! Research configuration: research types, depth profiles, toolset
//! mappings, concurrency limits and process environment.

use std::collections::HashMap;

use deepcurrent::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Which toolset a run gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchType {
    /// General web search.
    BasicWeb,
    /// Web search plus extraction.
    AdvancedWeb,
    /// ArXiv and encyclopedic sources.
    Academic,
    /// Market data and financial news.
    Financial,
    /// Everything.
    Comprehensive,
    /// Caller-selected tools.
    Custom,
}

impl ResearchType {
    /// Wire name (matches the caller payload).
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchType::BasicWeb => "basic_web",
            ResearchType::AdvancedWeb => "advanced_web",
            ResearchType::Academic => "academic",
            ResearchType::Financial => "financial",
            ResearchType::Comprehensive => "comprehensive",
            ResearchType::Custom => "custom",
        }
    }

    /// The tool names this research type requires from the tool plane.
    /// The planner validates these are present before launch.
    pub fn toolset(&self) -> &'static [&'static str] {
        match self {
            ResearchType::BasicWeb => &["ddg_search", "ddg_news", "wikipedia_search"],
            ResearchType::AdvancedWeb => &[
                "tavily_search",
                "tavily_extract",
                "google_web_search",
                "ddg_search",
                "wikipedia_search",
            ],
            ResearchType::Academic => &[
                "arxiv_search",
                "arxiv_get_paper",
                "wikipedia_search",
                "wikipedia_get_article",
            ],
            ResearchType::Financial => &[
                "stock_quote",
                "stock_history",
                "financial_news",
                "stock_analysis",
                "ddg_news",
            ],
            ResearchType::Comprehensive => &[
                "tavily_search",
                "tavily_extract",
                "google_web_search",
                "ddg_search",
                "ddg_news",
                "wikipedia_search",
                "wikipedia_get_article",
                "arxiv_search",
                "arxiv_get_paper",
            ],
            ResearchType::Custom => &[],
        }
    }

    /// Tools the exploration sub-agent may use (background search only).
    pub fn exploration_toolset(&self) -> &'static [&'static str] {
        &["wikipedia_search", "ddg_search"]
    }
}

/// How deep a run goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    /// 2×2 structure, few searches.
    Quick,
    /// 3×3 structure.
    #[default]
    Balanced,
    /// 5×3 structure, more agent iterations.
    Deep,
}

impl ResearchDepth {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchDepth::Quick => "quick",
            ResearchDepth::Balanced => "balanced",
            ResearchDepth::Deep => "deep",
        }
    }
}

/// The `(dims, aspects/dim, search cap, iter cap)` tuple derived from a
/// research depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthProfile {
    /// Number of dimensions the topic decomposes into.
    pub target_dimensions: usize,
    /// Aspects per dimension.
    pub aspects_per_dimension: usize,
    /// Search-result cap per tool call.
    pub search_result_cap: usize,
    /// Agent-driver iteration cap.
    pub agent_max_iterations: usize,
}

impl DepthProfile {
    /// The canonical depth table.
    pub fn for_depth(depth: ResearchDepth) -> Self {
        match depth {
            ResearchDepth::Quick => Self {
                target_dimensions: 2,
                aspects_per_dimension: 2,
                search_result_cap: 3,
                agent_max_iterations: 15,
            },
            ResearchDepth::Balanced => Self {
                target_dimensions: 3,
                aspects_per_dimension: 3,
                search_result_cap: 5,
                agent_max_iterations: 25,
            },
            ResearchDepth::Deep => Self {
                target_dimensions: 5,
                aspects_per_dimension: 3,
                search_result_cap: 5,
                agent_max_iterations: 35,
            },
        }
    }
}

/// Full configuration of one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Toolset selector.
    pub research_type: ResearchType,
    /// Depth selector.
    pub research_depth: ResearchDepth,
    /// Opaque model short name resolved via the registry.
    pub llm_model: String,
    /// Free-text caller context woven into prompts.
    #[serde(default)]
    pub research_context: Option<String>,
    /// Raw reference materials (url or base64 pdf payloads).
    #[serde(default)]
    pub reference_materials: Vec<RawReferenceMaterial>,
}

impl ResearchConfig {
    /// New config with defaults for context and references.
    pub fn new(
        research_type: ResearchType,
        research_depth: ResearchDepth,
        llm_model: impl Into<String>,
    ) -> Self {
        Self {
            research_type,
            research_depth,
            llm_model: llm_model.into(),
            research_context: None,
            reference_materials: Vec::new(),
        }
    }

    /// The depth profile for this run.
    pub fn depth_profile(&self) -> DepthProfile {
        DepthProfile::for_depth(self.research_depth)
    }
}

/// A reference material as submitted by the caller, before preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReferenceMaterial {
    /// `url` or `pdf`.
    #[serde(rename = "type")]
    pub kind: String,
    /// URL, or a filename for pdfs.
    pub source: String,
    /// Base64-encoded bytes for pdfs.
    #[serde(default)]
    pub data: Option<String>,
    /// Optional user note, concatenated into the research context.
    #[serde(default)]
    pub note: String,
}

/// Stage names carrying a concurrency cap by default.
pub fn default_concurrency_limits() -> HashMap<String, usize> {
    HashMap::from([
        ("research".to_string(), 3),
        ("dimension_reduction".to_string(), 1),
    ])
}

/// Process environment, validated at startup. A missing required variable
/// is a fatal init error naming the variable.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// AWS region.
    pub aws_region: String,
    /// Memory log id for research events.
    pub memory_id: String,
    /// DynamoDB status table.
    pub status_table: String,
    /// S3 bucket for produced artifacts.
    pub outputs_bucket: String,
    /// Tool-plane endpoint.
    pub gateway_url: String,
    /// Default model short name.
    pub default_model_id: Option<String>,
    /// Code-interpreter id for chart generation; charts are skipped when
    /// absent.
    pub code_interpreter_id: Option<String>,
    /// Log filter (`LOG_LEVEL`), defaults to `info`.
    pub log_level: String,
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::config(format!("required environment variable `{name}` is not set")))
}

impl EnvConfig {
    /// Read and validate the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            aws_region: require_env("AWS_REGION")?,
            memory_id: require_env("AGENTCORE_MEMORY_ID")?,
            status_table: require_env("DYNAMODB_STATUS_TABLE")?,
            outputs_bucket: require_env("S3_OUTPUTS_BUCKET")?,
            gateway_url: require_env("GATEWAY_URL")?,
            default_model_id: std::env::var("DEFAULT_MODEL_ID").ok(),
            code_interpreter_id: std::env::var("AGENTCORE_CODE_INTERPRETER_ID").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Initialize tracing from the configured log level. Safe to call once
/// per process.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_table_matches_the_profile_contract() {
        let quick = DepthProfile::for_depth(ResearchDepth::Quick);
        assert_eq!(
            (quick.target_dimensions, quick.aspects_per_dimension),
            (2, 2)
        );
        assert_eq!((quick.search_result_cap, quick.agent_max_iterations), (3, 15));

        let deep = DepthProfile::for_depth(ResearchDepth::Deep);
        assert_eq!((deep.target_dimensions, deep.aspects_per_dimension), (5, 3));
        assert_eq!(deep.agent_max_iterations, 35);
    }

    #[test]
    fn research_types_deserialize_from_wire_names() {
        let config: ResearchConfig = serde_json::from_value(serde_json::json!({
            "research_type": "basic_web",
            "research_depth": "quick",
            "llm_model": "nova_pro"
        }))
        .unwrap();
        assert_eq!(config.research_type, ResearchType::BasicWeb);
        assert_eq!(config.research_depth, ResearchDepth::Quick);
        assert!(config.reference_materials.is_empty());
    }

    #[test]
    fn financial_toolset_includes_stock_analysis() {
        assert!(ResearchType::Financial.toolset().contains(&"stock_analysis"));
    }

    #[test]
    fn default_limits_cover_the_heavy_stages() {
        let limits = default_concurrency_limits();
        assert_eq!(limits.get("research"), Some(&3));
        assert_eq!(limits.get("dimension_reduction"), Some(&1));
    }
}
