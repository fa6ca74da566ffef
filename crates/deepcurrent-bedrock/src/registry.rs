//! Model registry: opaque short names resolved to Bedrock model ids.
//!
//! Callers configure runs with short names (`nova_pro`, `claude_haiku45`);
//! the registry is the single source of truth for the canonical Bedrock id
//! and the usages a model is recommended for. Unknown names pass through
//! unchanged so fully-qualified Bedrock ids keep working.

use std::collections::HashMap;

/// Fallback model when neither the caller nor `DEFAULT_MODEL_ID` name one.
pub const FALLBACK_MODEL_ID: &str = "anthropic.claude-3-5-haiku-20241022-v1:0";

/// What a model is recommended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelUsage {
    /// Conversational replay / Q&A.
    Chat,
    /// Long-running research synthesis.
    Research,
}

/// One registry entry.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    /// Short name used across the system.
    pub short_name: &'static str,
    /// Canonical Bedrock model id.
    pub bedrock_id: &'static str,
    /// Human-readable label.
    pub label: &'static str,
    /// Recommended usages.
    pub recommended_for: &'static [ModelUsage],
}

const ENTRIES: &[ModelEntry] = &[
    ModelEntry {
        short_name: "claude_sonnet4",
        bedrock_id: "us.anthropic.claude-sonnet-4-20250514-v1:0",
        label: "Claude Sonnet 4",
        recommended_for: &[ModelUsage::Chat, ModelUsage::Research],
    },
    ModelEntry {
        short_name: "claude_sonnet45",
        bedrock_id: "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
        label: "Claude Sonnet 4.5",
        recommended_for: &[ModelUsage::Chat, ModelUsage::Research],
    },
    ModelEntry {
        short_name: "claude_haiku35",
        bedrock_id: "anthropic.claude-3-5-haiku-20241022-v1:0",
        label: "Claude 3.5 Haiku",
        recommended_for: &[ModelUsage::Chat],
    },
    ModelEntry {
        short_name: "claude_haiku45",
        bedrock_id: "us.anthropic.claude-haiku-4-5-20251001-v1:0",
        label: "Claude Haiku 4.5",
        recommended_for: &[ModelUsage::Chat, ModelUsage::Research],
    },
    ModelEntry {
        short_name: "nova_pro",
        bedrock_id: "us.amazon.nova-pro-v1:0",
        label: "Amazon Nova Pro",
        recommended_for: &[ModelUsage::Chat, ModelUsage::Research],
    },
    ModelEntry {
        short_name: "llama_maverick",
        bedrock_id: "us.meta.llama4-maverick-17b-instruct-v1:0",
        label: "Llama 4 Maverick",
        recommended_for: &[ModelUsage::Research],
    },
    ModelEntry {
        short_name: "qwen3_235b",
        bedrock_id: "qwen.qwen3-235b-a22b-2507-v1:0",
        label: "Qwen3 235B",
        recommended_for: &[ModelUsage::Research],
    },
];

const ALIASES: &[(&str, &str)] = &[
    ("sonnet4", "claude_sonnet4"),
    ("sonnet45", "claude_sonnet45"),
    ("haiku35", "claude_haiku35"),
    ("haiku45", "claude_haiku45"),
    ("claude_haiku", "claude_haiku45"),
];

/// The model short-name registry.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    entries: HashMap<&'static str, &'static ModelEntry>,
    aliases: HashMap<&'static str, &'static str>,
    default_model_id: String,
}

impl ModelRegistry {
    /// Build the registry with the built-in table. `default_model_id`
    /// usually comes from the `DEFAULT_MODEL_ID` environment variable and
    /// may be a short name or a full Bedrock id.
    pub fn new(default_model_id: Option<String>) -> Self {
        let entries = ENTRIES.iter().map(|e| (e.short_name, e)).collect();
        let aliases = ALIASES.iter().copied().collect();
        let mut registry = Self {
            entries,
            aliases,
            default_model_id: String::new(),
        };
        registry.default_model_id = registry.resolve(
            default_model_id
                .as_deref()
                .unwrap_or(FALLBACK_MODEL_ID),
        );
        registry
    }

    /// Resolve a short name (or alias) to a Bedrock id. Names that are not
    /// in the table are assumed to already be Bedrock ids.
    pub fn resolve(&self, name: &str) -> String {
        let resolved = self.aliases.get(name).copied().unwrap_or(name);
        match self.entries.get(resolved) {
            Some(entry) => entry.bedrock_id.to_string(),
            None => resolved.to_string(),
        }
    }

    /// The configured default Bedrock id.
    pub fn default_model_id(&self) -> &str {
        &self.default_model_id
    }

    /// Entry lookup for labels and usage filtering.
    pub fn entry(&self, name: &str) -> Option<&ModelEntry> {
        let resolved = self.aliases.get(name).copied().unwrap_or(name);
        self.entries.get(resolved).copied()
    }

    /// All models recommended for a usage.
    pub fn recommended(&self, usage: ModelUsage) -> Vec<&ModelEntry> {
        ENTRIES
            .iter()
            .filter(|e| e.recommended_for.contains(&usage))
            .collect()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_resolve() {
        let registry = ModelRegistry::default();
        assert_eq!(registry.resolve("nova_pro"), "us.amazon.nova-pro-v1:0");
    }

    #[test]
    fn aliases_resolve_to_their_target() {
        let registry = ModelRegistry::default();
        assert_eq!(
            registry.resolve("haiku45"),
            registry.resolve("claude_haiku45")
        );
    }

    #[test]
    fn unknown_names_pass_through() {
        let registry = ModelRegistry::default();
        assert_eq!(
            registry.resolve("us.custom.model-v1:0"),
            "us.custom.model-v1:0"
        );
    }

    #[test]
    fn default_comes_from_env_value() {
        let registry = ModelRegistry::new(Some("nova_pro".to_string()));
        assert_eq!(registry.default_model_id(), "us.amazon.nova-pro-v1:0");
        let fallback = ModelRegistry::new(None);
        assert_eq!(fallback.default_model_id(), FALLBACK_MODEL_ID);
    }
}
