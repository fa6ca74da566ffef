//! The chart sub-agent's three tools.
//!
//! `generate_and_validate_chart` executes Python in the external sandbox
//! and hands the rendered PNG back to the model as image input so it can
//! review quality before inserting. `bring_and_insert_chart` rewrites the
//! draft under its per-file mutex and renumbers every figure caption.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use deepcurrent::error::{Error, Result};
use deepcurrent::messages::{ContentPart, MessageContent};
use deepcurrent::tools::{Tool, ToolInput};
use deepcurrent_outputs::assembler::{chart_block, insert_at_line, line_count, read_lines, renumber_figures};
use deepcurrent_outputs::uploader::S3Uploader;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::locks::DraftLocks;
use crate::executor::CodeExecutor;

/// Largest window `read_document_lines` serves at once.
const MAX_READ_WINDOW: usize = 100;

/// One inserted chart, reported back to the stage.
#[derive(Debug, Clone)]
pub struct InsertedChart {
    /// Local PNG path.
    pub path: PathBuf,
    /// Chart title.
    pub title: String,
}

/// Shared working set for the three chart tools.
pub struct ChartToolset {
    draft_path: PathBuf,
    locks: Arc<DraftLocks>,
    charts_dir: PathBuf,
    session_id: String,
    executor: Arc<dyn CodeExecutor>,
    uploader: Option<Arc<S3Uploader>>,
    generated: Arc<Mutex<HashMap<String, PathBuf>>>,
    inserted: Arc<Mutex<Vec<InsertedChart>>>,
}

impl ChartToolset {
    /// Build the toolset for one draft and session.
    pub fn new(
        draft_path: PathBuf,
        locks: Arc<DraftLocks>,
        charts_dir: PathBuf,
        session_id: impl Into<String>,
        executor: Arc<dyn CodeExecutor>,
        uploader: Option<Arc<S3Uploader>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            draft_path,
            locks,
            charts_dir,
            session_id: session_id.into(),
            executor,
            uploader,
            generated: Arc::new(Mutex::new(HashMap::new())),
            inserted: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The three tools, ready for an agent driver.
    pub fn tools(self: &Arc<Self>) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(ReadDocumentLinesTool(Arc::clone(self))),
            Arc::new(GenerateChartTool(Arc::clone(self))),
            Arc::new(BringAndInsertChartTool(Arc::clone(self))),
        ]
    }

    /// Charts inserted so far.
    pub fn inserted(&self) -> Vec<InsertedChart> {
        self.inserted.lock().clone()
    }
}

/// `read_document_lines(start, end)`.
pub struct ReadDocumentLinesTool(Arc<ChartToolset>);

#[async_trait]
impl Tool for ReadDocumentLinesTool {
    fn name(&self) -> &str {
        "read_document_lines"
    }

    fn description(&self) -> &str {
        "Read a window of the draft document (1-indexed, at most 100 lines per call)."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start": { "type": "integer", "minimum": 1 },
                "end": { "type": "integer", "minimum": 1 }
            },
            "required": ["start", "end"]
        })
    }

    async fn call(&self, input: ToolInput) -> Result<MessageContent> {
        let start = input.int_field("start").unwrap_or(1).max(1) as usize;
        let mut end = input.int_field("end").unwrap_or(start as i64 + 99).max(1) as usize;
        if end.saturating_sub(start) >= MAX_READ_WINDOW {
            end = start + MAX_READ_WINDOW - 1;
        }
        let content = tokio::fs::read_to_string(&self.0.draft_path).await?;
        let total = line_count(&content);
        let window = read_lines(&content, start, end);
        Ok(MessageContent::text(format!(
            "Document has {total} lines. Lines {start}-{end}:\n{window}"
        )))
    }
}

/// `generate_and_validate_chart(code, filename)`.
pub struct GenerateChartTool(Arc<ChartToolset>);

#[async_trait]
impl Tool for GenerateChartTool {
    fn name(&self) -> &str {
        "generate_and_validate_chart"
    }

    fn description(&self) -> &str {
        "Execute Python chart code in the sandbox and return the rendered PNG for visual review. The code must save exactly one PNG named after `filename`."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Python (matplotlib) code saving <filename>.png" },
                "filename": { "type": "string", "description": "Base name without extension" }
            },
            "required": ["code", "filename"]
        })
    }

    async fn call(&self, input: ToolInput) -> Result<MessageContent> {
        let code = input
            .str_field("code")
            .ok_or_else(|| Error::tool("generate_and_validate_chart requires `code`"))?;
        let filename = sanitize_filename(
            &input
                .str_field("filename")
                .ok_or_else(|| Error::tool("generate_and_validate_chart requires `filename`"))?,
        );

        let result = self.0.executor.execute_code(&code, "python").await?;
        if result.is_error {
            return Ok(MessageContent::text(format!(
                "Chart code failed:\n{}\nFix the code and regenerate.",
                result.stderr
            )));
        }

        let png_name = format!("{filename}.png");
        let remote = result
            .files
            .iter()
            .find(|f| f.ends_with(&png_name))
            .cloned()
            .unwrap_or(png_name.clone());
        let downloads = self.0.executor.read_files(&[remote]).await?;
        let Some((_, bytes)) = downloads.into_iter().next() else {
            return Ok(MessageContent::text(format!(
                "Execution succeeded but `{png_name}` was not produced. Make the code save that exact file."
            )));
        };

        tokio::fs::create_dir_all(&self.0.charts_dir).await?;
        let local = self.0.charts_dir.join(&png_name);
        tokio::fs::write(&local, &bytes).await?;
        self.0.generated.lock().insert(filename.clone(), local);
        info!(chart = %filename, bytes = bytes.len(), "chart rendered");

        let mut content = MessageContent::text(format!(
            "Chart `{filename}` rendered ({} bytes). Review the image below; insert it only if the quality is high.",
            bytes.len()
        ));
        content.push(ContentPart::Image {
            media_type: "image/png".to_string(),
            data: bytes,
        });
        Ok(content)
    }
}

/// `bring_and_insert_chart(filename, title, caption, location)`.
pub struct BringAndInsertChartTool(Arc<ChartToolset>);

#[async_trait]
impl Tool for BringAndInsertChartTool {
    fn name(&self) -> &str {
        "bring_and_insert_chart"
    }

    fn description(&self) -> &str {
        "Insert a previously generated chart into the draft at a `line:N` location. Figure captions are renumbered automatically."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": { "type": "string" },
                "title": { "type": "string" },
                "caption": { "type": "string" },
                "location": { "type": "string", "description": "Insertion point, e.g. `line:120`" }
            },
            "required": ["filename", "title", "caption", "location"]
        })
    }

    async fn call(&self, input: ToolInput) -> Result<MessageContent> {
        let filename = sanitize_filename(
            &input
                .str_field("filename")
                .ok_or_else(|| Error::tool("bring_and_insert_chart requires `filename`"))?,
        );
        let title = input
            .str_field("title")
            .ok_or_else(|| Error::tool("bring_and_insert_chart requires `title`"))?;
        let caption = input
            .str_field("caption")
            .ok_or_else(|| Error::tool("bring_and_insert_chart requires `caption`"))?;
        let location = input
            .str_field("location")
            .ok_or_else(|| Error::tool("bring_and_insert_chart requires `location`"))?;

        let line = location
            .strip_prefix("line:")
            .and_then(|n| n.trim().parse::<usize>().ok())
            .ok_or_else(|| Error::tool(format!("invalid location `{location}`; use `line:N`")))?;

        let Some(local) = self.0.generated.lock().get(&filename).cloned() else {
            return Ok(MessageContent::text(format!(
                "Chart `{filename}` has not been generated; call generate_and_validate_chart first."
            )));
        };

        // The draft references charts relative to its own directory so the
        // converter can resolve them.
        let draft_dir = self
            .0
            .draft_path
            .parent()
            .ok_or_else(|| Error::tool("draft path has no parent directory"))?;
        let relative_dir = draft_dir.join("charts");
        tokio::fs::create_dir_all(&relative_dir).await?;
        let published = relative_dir.join(format!("{filename}.png"));
        tokio::fs::copy(&local, &published).await?;

        let lock = self.0.locks.for_path(&self.0.draft_path);
        let _guard = lock.lock().await;
        let content = tokio::fs::read_to_string(&self.0.draft_path).await?;
        let block = chart_block(
            &PathBuf::from("charts").join(format!("{filename}.png")),
            &title,
            &caption,
        );
        let updated = renumber_figures(&insert_at_line(&content, line, &block));
        tokio::fs::write(&self.0.draft_path, updated).await?;
        drop(_guard);

        if let Some(uploader) = &self.0.uploader {
            if let Err(e) = uploader.upload_chart(&self.0.session_id, &published).await {
                warn!(chart = %filename, error = %e, "chart upload failed");
            }
        }

        self.0.inserted.lock().push(InsertedChart {
            path: published,
            title: title.clone(),
        });
        let figure_number = self.0.inserted.lock().len();
        Ok(MessageContent::text(
            json!({
                "status": "success",
                "message": format!("Chart `{title}` inserted at line {line}"),
                "charts_inserted_so_far": figure_number,
            })
            .to_string(),
        ))
    }
}

fn sanitize_filename(name: &str) -> String {
    name.trim_end_matches(".png")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;

    struct FakeSandbox;

    #[async_trait]
    impl CodeExecutor for FakeSandbox {
        async fn execute_code(&self, _code: &str, _language: &str) -> Result<ExecutionResult> {
            Ok(ExecutionResult {
                stdout: "saved".to_string(),
                files: vec!["growth.png".to_string()],
                ..ExecutionResult::default()
            })
        }
        async fn read_files(&self, paths: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
            Ok(paths
                .iter()
                .map(|p| (p.clone(), vec![0x89, 0x50, 0x4e, 0x47]))
                .collect())
        }
        async fn list_files(&self, _path: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    async fn toolset() -> (tempfile::TempDir, Arc<ChartToolset>) {
        let tmp = tempfile::tempdir().unwrap();
        let draft = tmp.path().join("draft.md");
        let body: String = (1..=200).map(|i| format!("line {i}\n")).collect();
        tokio::fs::write(&draft, body).await.unwrap();
        let set = ChartToolset::new(
            draft,
            Arc::new(DraftLocks::new()),
            tmp.path().join("charts"),
            "sess-1",
            Arc::new(FakeSandbox),
            None,
        );
        (tmp, set)
    }

    #[tokio::test]
    async fn read_window_is_capped_at_100_lines() {
        let (_tmp, set) = toolset().await;
        let tool = ReadDocumentLinesTool(Arc::clone(&set));
        let out = tool
            .call(ToolInput::Structured(json!({"start": 1, "end": 500})))
            .await
            .unwrap();
        let text = out.as_text();
        assert!(text.contains("Lines 1-100"));
        assert!(!text.contains("101: line 101"));
    }

    #[tokio::test]
    async fn generated_chart_returns_image_for_review() {
        let (_tmp, set) = toolset().await;
        let tool = GenerateChartTool(Arc::clone(&set));
        let out = tool
            .call(ToolInput::Structured(
                json!({"code": "plt.savefig('growth.png')", "filename": "growth"}),
            ))
            .await
            .unwrap();
        assert!(out
            .parts
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. })));
    }

    #[tokio::test]
    async fn insert_places_chart_and_renumbers() {
        let (_tmp, set) = toolset().await;
        GenerateChartTool(Arc::clone(&set))
            .call(ToolInput::Structured(
                json!({"code": "c", "filename": "growth"}),
            ))
            .await
            .unwrap();
        let insert = BringAndInsertChartTool(Arc::clone(&set));
        insert
            .call(ToolInput::Structured(json!({
                "filename": "growth",
                "title": "Growth",
                "caption": "Yearly growth",
                "location": "line:50"
            })))
            .await
            .unwrap();

        let draft = tokio::fs::read_to_string(&set.draft_path).await.unwrap();
        assert!(draft.contains("![Growth](charts/growth.png)"));
        assert!(draft.contains("*Figure 1: Yearly growth*"));
        assert_eq!(set.inserted().len(), 1);
    }

    #[tokio::test]
    async fn insert_without_generation_is_refused_softly() {
        let (_tmp, set) = toolset().await;
        let out = BringAndInsertChartTool(Arc::clone(&set))
            .call(ToolInput::Structured(json!({
                "filename": "ghost",
                "title": "t",
                "caption": "c",
                "location": "line:1"
            })))
            .await
            .unwrap();
        assert!(out.as_text().contains("has not been generated"));
    }
}
