//! The editor sub-agent's two tools. Both write directly to the draft
//! file under its per-file mutex.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use deepcurrent::error::{Error, Result};
use deepcurrent::messages::MessageContent;
use deepcurrent::tools::{Tool, ToolInput};
use serde_json::{json, Value};
use tracing::info;

use super::locks::DraftLocks;
use deepcurrent_outputs::assembler::{CONCLUSION_PLACEHOLDER, SUMMARY_PLACEHOLDER};

/// `replace_text(find_text, replace_with, max_replacements)`.
///
/// With repeated occurrences the first `max_replacements` in document
/// order are replaced and the count reported; `-1` replaces all.
pub struct ReplaceTextTool {
    draft_path: PathBuf,
    locks: Arc<DraftLocks>,
}

impl ReplaceTextTool {
    /// Tool bound to one draft file.
    pub fn new(draft_path: PathBuf, locks: Arc<DraftLocks>) -> Self {
        Self { draft_path, locks }
    }
}

#[async_trait]
impl Tool for ReplaceTextTool {
    fn name(&self) -> &str {
        "replace_text"
    }

    fn description(&self) -> &str {
        "Replace text in the draft document and save immediately. Use for citation repairs and small flow fixes."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "find_text": { "type": "string", "description": "Text to find" },
                "replace_with": { "type": "string", "description": "Replacement text" },
                "max_replacements": {
                    "type": "integer",
                    "description": "Maximum replacements (-1 for all)",
                    "default": -1
                }
            },
            "required": ["find_text", "replace_with"]
        })
    }

    async fn call(&self, input: ToolInput) -> Result<MessageContent> {
        let find = input
            .str_field("find_text")
            .ok_or_else(|| Error::tool("replace_text requires `find_text`"))?;
        let replace_with = input
            .str_field("replace_with")
            .ok_or_else(|| Error::tool("replace_text requires `replace_with`"))?;
        let max_replacements = input.int_field("max_replacements").unwrap_or(-1);
        if find.is_empty() {
            return Err(Error::tool("`find_text` must not be empty"));
        }

        let lock = self.locks.for_path(&self.draft_path);
        let _guard = lock.lock().await;

        let content = tokio::fs::read_to_string(&self.draft_path).await?;
        let occurrences = content.matches(&find).count();
        let (new_content, count) = if max_replacements < 0 {
            (content.replace(&find, &replace_with), occurrences)
        } else {
            let cap = max_replacements as usize;
            let parts: Vec<&str> = content.splitn(cap + 1, &find).collect();
            (parts.join(&replace_with), occurrences.min(cap))
        };
        tokio::fs::write(&self.draft_path, new_content).await?;

        Ok(MessageContent::text(
            json!({ "status": "success", "replacements_made": count }).to_string(),
        ))
    }
}

/// `write_summary_and_conclusion(summary_content, conclusion_content)`.
///
/// Replaces both placeholders in one operation; errors if either
/// placeholder is already gone.
pub struct WriteSummaryConclusionTool {
    draft_path: PathBuf,
    locks: Arc<DraftLocks>,
}

impl WriteSummaryConclusionTool {
    /// Tool bound to one draft file.
    pub fn new(draft_path: PathBuf, locks: Arc<DraftLocks>) -> Self {
        Self { draft_path, locks }
    }
}

#[async_trait]
impl Tool for WriteSummaryConclusionTool {
    fn name(&self) -> &str {
        "write_summary_and_conclusion"
    }

    fn description(&self) -> &str {
        "Write the Executive Summary and Conclusion sections in one operation, replacing both placeholders."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary_content": { "type": "string", "description": "Executive Summary (200-300 words)" },
                "conclusion_content": { "type": "string", "description": "Conclusion (300-400 words)" }
            },
            "required": ["summary_content", "conclusion_content"]
        })
    }

    async fn call(&self, input: ToolInput) -> Result<MessageContent> {
        let summary = input
            .str_field("summary_content")
            .ok_or_else(|| Error::tool("write_summary_and_conclusion requires `summary_content`"))?;
        let conclusion = input.str_field("conclusion_content").ok_or_else(|| {
            Error::tool("write_summary_and_conclusion requires `conclusion_content`")
        })?;

        let lock = self.locks.for_path(&self.draft_path);
        let _guard = lock.lock().await;

        let content = tokio::fs::read_to_string(&self.draft_path).await?;
        let mut missing = Vec::new();
        if !content.contains(SUMMARY_PLACEHOLDER) {
            missing.push("Executive Summary");
        }
        if !content.contains(CONCLUSION_PLACEHOLDER) {
            missing.push("Conclusion");
        }
        if !missing.is_empty() {
            return Ok(MessageContent::text(
                json!({
                    "status": "error",
                    "message": format!(
                        "Placeholders not found: {}. Sections may already be written.",
                        missing.join(", ")
                    )
                })
                .to_string(),
            ));
        }

        let new_content = content
            .replace(SUMMARY_PLACEHOLDER, &summary)
            .replace(CONCLUSION_PLACEHOLDER, &conclusion);
        tokio::fs::write(&self.draft_path, new_content).await?;
        info!(draft = %self.draft_path.display(), "summary and conclusion written");

        let summary_words = summary.split_whitespace().count();
        let conclusion_words = conclusion.split_whitespace().count();
        Ok(MessageContent::text(
            json!({
                "status": "success",
                "summary_word_count": summary_words,
                "conclusion_word_count": conclusion_words,
            })
            .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn draft(content: &str) -> (tempfile::TempDir, PathBuf, Arc<DraftLocks>) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("draft.md");
        tokio::fs::write(&path, content).await.unwrap();
        (tmp, path, Arc::new(DraftLocks::new()))
    }

    #[tokio::test]
    async fn replace_text_caps_replacements_in_document_order() {
        let (_tmp, path, locks) = draft("a b a b a").await;
        let tool = ReplaceTextTool::new(path.clone(), locks);
        let out = tool
            .call(ToolInput::Structured(json!({
                "find_text": "a",
                "replace_with": "X",
                "max_replacements": 2
            })))
            .await
            .unwrap();
        let result: Value = serde_json::from_str(&out.as_text()).unwrap();
        assert_eq!(result["replacements_made"], 2);
        assert_eq!(
            tokio::fs::read_to_string(&path).await.unwrap(),
            "X b X b a"
        );
    }

    #[tokio::test]
    async fn replace_all_by_default() {
        let (_tmp, path, locks) = draft("x.x.x").await;
        let tool = ReplaceTextTool::new(path.clone(), locks);
        tool.call(ToolInput::Structured(json!({
            "find_text": ".",
            "replace_with": "-"
        })))
        .await
        .unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "x-x-x");
    }

    #[tokio::test]
    async fn summary_and_conclusion_replace_both_placeholders() {
        let body = format!("# R\n\n{SUMMARY_PLACEHOLDER}\n\nbody\n\n{CONCLUSION_PLACEHOLDER}\n");
        let (_tmp, path, locks) = draft(&body).await;
        let tool = WriteSummaryConclusionTool::new(path.clone(), Arc::clone(&locks));
        let out = tool
            .call(ToolInput::Structured(json!({
                "summary_content": "The summary.",
                "conclusion_content": "The conclusion."
            })))
            .await
            .unwrap();
        let result: Value = serde_json::from_str(&out.as_text()).unwrap();
        assert_eq!(result["status"], "success");

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("The summary."));
        assert!(written.contains("The conclusion."));
        assert!(!written.contains(SUMMARY_PLACEHOLDER));

        // Second call reports the missing placeholders instead of failing.
        let again = tool
            .call(ToolInput::Structured(json!({
                "summary_content": "s",
                "conclusion_content": "c"
            })))
            .await
            .unwrap();
        let result: Value = serde_json::from_str(&again.as_text()).unwrap();
        assert_eq!(result["status"], "error");
    }
}
