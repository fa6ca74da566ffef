//! Workflow state for the dimensional research pipeline.
//!
//! The state is one record passed logically immutably between stages;
//! stages return sparse [`StateUpdate`]s the engine merges. Scalar fields
//! are last-writer-wins; the three maps written by parallel workers merge
//! by key union and fail fast on overlap: aspect workers partition by
//! dimension and research workers by aspect key, so a collision is a
//! programming error, not data.

use std::collections::BTreeMap;
use std::path::PathBuf;

use deepcurrent::graph::{GraphState, MergeConflict};
use serde::{Deserialize, Serialize};

use crate::config::ResearchConfig;

/// Separator forming aspect keys.
pub const ASPECT_KEY_SEPARATOR: &str = "::";

/// The stable identity of an aspect across the workflow and event log.
pub fn aspect_key(dimension: &str, aspect_name: &str) -> String {
    format!("{dimension}{ASPECT_KEY_SEPARATOR}{aspect_name}")
}

/// Split an aspect key back into `(dimension, aspect)`.
pub fn split_aspect_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(ASPECT_KEY_SEPARATOR)
}

/// One prepared reference material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMaterial {
    /// `url` or `pdf`.
    #[serde(rename = "type")]
    pub kind: String,
    /// URL or PDF filename.
    pub source: String,
    /// Display title.
    pub title: String,
    /// LLM-generated comprehensive summary.
    pub summary: String,
    /// Main takeaways (up to 5).
    pub key_points: Vec<String>,
    /// Optional user note.
    #[serde(default)]
    pub note: String,
}

/// A structured aspect with research guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aspect {
    /// Aspect name.
    pub name: String,
    /// Why this aspect matters and what to focus on.
    pub reasoning: String,
    /// Research questions guiding the investigation.
    #[serde(default)]
    pub key_questions: Vec<String>,
    /// True when reference materials already cover this aspect; the
    /// research stage skips completed aspects.
    #[serde(default)]
    pub completed: bool,
}

/// The research produced for one aspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    /// The aspect key this research belongs to.
    pub aspect_key: String,
    /// Aspect name (title of the section).
    pub title: String,
    /// Markdown research content.
    pub content: String,
    /// Word count of `content`.
    pub word_count: usize,
}

impl ResearchResult {
    /// Build a result, computing the word count.
    pub fn new(aspect_key: impl Into<String>, title: impl Into<String>, content: String) -> Self {
        let word_count = content.split_whitespace().count();
        Self {
            aspect_key: aspect_key.into(),
            title: title.into(),
            content,
            word_count,
        }
    }
}

/// A dimension document outcome: a path on success, or a marker for
/// graceful failure (the report stage omits failed dimensions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DimensionDoc {
    /// Markdown written to this path.
    Written(PathBuf),
    /// The reduction failed; the dimension is omitted downstream.
    Failed,
}

impl DimensionDoc {
    /// The path, when the document was written.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            DimensionDoc::Written(path) => Some(path),
            DimensionDoc::Failed => None,
        }
    }
}

/// The workflow state record. All fields optional after initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchState {
    /// The research topic.
    pub topic: Option<String>,
    /// Full research configuration.
    pub config: Option<ResearchConfig>,
    /// Session id, set by the init stage before any event is emitted.
    pub session_id: Option<String>,
    /// Caller's user id, used as the event actor.
    pub user_id: Option<String>,
    /// Free-text research context from the caller.
    pub research_context: Option<String>,
    /// Prepared reference materials.
    pub references: Option<Vec<ReferenceMaterial>>,
    /// Ordered dimensions of the topic.
    pub dimensions: Option<Vec<String>>,
    /// Aspect-analysis output per dimension (map-merge).
    pub original_aspects_by_dimension: BTreeMap<String, Vec<Aspect>>,
    /// Refined structure after planning (LWW).
    pub aspects_by_dimension: Option<BTreeMap<String, Vec<Aspect>>>,
    /// Research output per aspect key (map-merge).
    pub research_by_aspect: BTreeMap<String, ResearchResult>,
    /// Dimension document outcomes (map-merge).
    pub dimension_documents: BTreeMap<String, DimensionDoc>,
    /// Merged draft markdown path.
    pub draft_report_file: Option<PathBuf>,
    /// Final docx path.
    pub report_file: Option<PathBuf>,
    /// Final pdf path.
    pub report_pdf_file: Option<PathBuf>,
    /// Workflow start time (epoch milliseconds).
    pub started_at: Option<i64>,
}

impl ResearchState {
    /// The refined structure when planning ran, otherwise the raw
    /// aspect-analysis output.
    pub fn effective_aspects(&self) -> &BTreeMap<String, Vec<Aspect>> {
        self.aspects_by_dimension
            .as_ref()
            .unwrap_or(&self.original_aspects_by_dimension)
    }

    /// Total aspects across all dimensions.
    pub fn total_aspects(&self) -> usize {
        self.effective_aspects().values().map(Vec::len).sum()
    }
}

/// Sparse update returned by stage handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    /// LWW: session id.
    pub session_id: Option<String>,
    /// LWW: research context.
    pub research_context: Option<String>,
    /// LWW: prepared references.
    pub references: Option<Vec<ReferenceMaterial>>,
    /// LWW: dimensions.
    pub dimensions: Option<Vec<String>>,
    /// Map-merge: aspect analysis contributions.
    pub original_aspects_by_dimension: BTreeMap<String, Vec<Aspect>>,
    /// LWW: planning output.
    pub aspects_by_dimension: Option<BTreeMap<String, Vec<Aspect>>>,
    /// Map-merge: research contributions.
    pub research_by_aspect: BTreeMap<String, ResearchResult>,
    /// Map-merge: dimension document outcomes.
    pub dimension_documents: BTreeMap<String, DimensionDoc>,
    /// LWW: draft path.
    pub draft_report_file: Option<PathBuf>,
    /// LWW: docx path.
    pub report_file: Option<PathBuf>,
    /// LWW: pdf path.
    pub report_pdf_file: Option<PathBuf>,
}

fn merge_map<V>(
    field: &'static str,
    target: &mut BTreeMap<String, V>,
    incoming: BTreeMap<String, V>,
) -> Result<(), MergeConflict> {
    for (key, value) in incoming {
        if target.contains_key(&key) {
            return Err(MergeConflict::new(field, key));
        }
        target.insert(key, value);
    }
    Ok(())
}

impl GraphState for ResearchState {
    type Update = StateUpdate;

    fn apply(&mut self, update: StateUpdate) -> Result<(), MergeConflict> {
        if let Some(v) = update.session_id {
            self.session_id = Some(v);
        }
        if let Some(v) = update.research_context {
            self.research_context = Some(v);
        }
        if let Some(v) = update.references {
            self.references = Some(v);
        }
        if let Some(v) = update.dimensions {
            self.dimensions = Some(v);
        }
        merge_map(
            "original_aspects_by_dimension",
            &mut self.original_aspects_by_dimension,
            update.original_aspects_by_dimension,
        )?;
        if let Some(v) = update.aspects_by_dimension {
            self.aspects_by_dimension = Some(v);
        }
        merge_map(
            "research_by_aspect",
            &mut self.research_by_aspect,
            update.research_by_aspect,
        )?;
        merge_map(
            "dimension_documents",
            &mut self.dimension_documents,
            update.dimension_documents,
        )?;
        if let Some(v) = update.draft_report_file {
            self.draft_report_file = Some(v);
        }
        if let Some(v) = update.report_file {
            self.report_file = Some(v);
        }
        if let Some(v) = update.report_pdf_file {
            self.report_pdf_file = Some(v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aspect(name: &str) -> Aspect {
        Aspect {
            name: name.to_string(),
            reasoning: "matters".to_string(),
            key_questions: vec!["why?".to_string()],
            completed: false,
        }
    }

    #[test]
    fn aspect_keys_are_stable() {
        assert_eq!(aspect_key("History", "Origins"), "History::Origins");
        assert_eq!(
            split_aspect_key("History::Origins"),
            Some(("History", "Origins"))
        );
    }

    #[test]
    fn scalar_fields_are_last_writer_wins() {
        let mut state = ResearchState::default();
        state
            .apply(StateUpdate {
                session_id: Some("a".to_string()),
                ..StateUpdate::default()
            })
            .unwrap();
        state
            .apply(StateUpdate {
                session_id: Some("b".to_string()),
                ..StateUpdate::default()
            })
            .unwrap();
        assert_eq!(state.session_id.as_deref(), Some("b"));
    }

    #[test]
    fn map_merge_is_commutative_over_disjoint_keys() {
        let update_a = StateUpdate {
            original_aspects_by_dimension: BTreeMap::from([(
                "History".to_string(),
                vec![aspect("Origins")],
            )]),
            ..StateUpdate::default()
        };
        let update_b = StateUpdate {
            original_aspects_by_dimension: BTreeMap::from([(
                "Applications".to_string(),
                vec![aspect("Industry")],
            )]),
            ..StateUpdate::default()
        };

        let mut ab = ResearchState::default();
        ab.apply(update_a.clone()).unwrap();
        ab.apply(update_b.clone()).unwrap();

        let mut ba = ResearchState::default();
        ba.apply(update_b).unwrap();
        ba.apply(update_a).unwrap();

        assert_eq!(
            ab.original_aspects_by_dimension,
            ba.original_aspects_by_dimension
        );
    }

    #[test]
    fn map_merge_overlap_is_a_conflict() {
        let mut state = ResearchState::default();
        let update = StateUpdate {
            research_by_aspect: BTreeMap::from([(
                "History::Origins".to_string(),
                ResearchResult::new("History::Origins", "Origins", "text".to_string()),
            )]),
            ..StateUpdate::default()
        };
        state.apply(update.clone()).unwrap();
        let conflict = state.apply(update).unwrap_err();
        assert_eq!(conflict.field, "research_by_aspect");
        assert_eq!(conflict.key, "History::Origins");
    }

    #[test]
    fn effective_aspects_prefers_planning_output() {
        let mut state = ResearchState::default();
        state
            .original_aspects_by_dimension
            .insert("History".to_string(), vec![aspect("Origins")]);
        assert_eq!(state.total_aspects(), 1);

        state.aspects_by_dimension = Some(BTreeMap::from([(
            "Applications".to_string(),
            vec![aspect("Industry"), aspect("Research")],
        )]));
        assert_eq!(state.total_aspects(), 2);
        assert!(state.effective_aspects().contains_key("Applications"));
    }

    #[test]
    fn research_result_counts_words() {
        let result = ResearchResult::new("k", "t", "one two three".to_string());
        assert_eq!(result.word_count, 3);
    }
}
