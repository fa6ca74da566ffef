//! Report assembly: dimension merge, reference collection, placeholder
//! insertion, chart insertion and figure renumbering. Pure text work, no
//! model involvement.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Local;
use deepcurrent::error::Result;
use regex::Regex;
use tracing::{debug, warn};

/// Placeholder the editor replaces with the executive summary.
pub const SUMMARY_PLACEHOLDER: &str = "[EXECUTIVE_SUMMARY_TO_BE_GENERATED]";
/// Placeholder the editor replaces with the conclusion.
pub const CONCLUSION_PLACEHOLDER: &str = "[CONCLUSION_TO_BE_GENERATED]";

static FIGURE_CAPTION: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\*Figure [X\d]+:").unwrap()
});

/// The merged draft plus the references that were collected from the
/// per-dimension files.
#[derive(Debug, Clone)]
pub struct MergedDraft {
    /// Full draft markdown, placeholders included.
    pub content: String,
    /// Deduplicated, sorted reference lines.
    pub references: Vec<String>,
}

fn is_reference_heading(line: &str) -> bool {
    line.starts_with("##") && line.to_lowercase().contains("reference")
}

/// Strip a dimension file's own references section; the merged report
/// carries one deduplicated section instead.
fn strip_references_section(content: &str) -> String {
    let mut filtered = Vec::new();
    let mut in_references = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if is_reference_heading(trimmed) {
            in_references = true;
            continue;
        }
        if in_references && trimmed.starts_with('#') {
            in_references = false;
        }
        if !in_references {
            filtered.push(line);
        }
    }
    filtered.join("\n").trim().to_string()
}

/// Collect reference lines (`- …` or `[…`) from a file's references
/// section. Placeholder citations the model sometimes invents are skipped.
fn collect_references(content: &str, references: &mut BTreeSet<String>) {
    let mut in_references = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if is_reference_heading(trimmed) {
            in_references = true;
            continue;
        }
        if in_references && trimmed.starts_with("##") && !trimmed.to_lowercase().contains("reference")
        {
            break;
        }
        if in_references && !trimmed.is_empty() {
            if trimmed.contains("Author et al.") && trimmed.contains("Year") {
                continue;
            }
            if trimmed.starts_with('-') || trimmed.starts_with('[') {
                references.insert(trimmed.to_string());
            }
        }
    }
}

/// Merge dimension markdown files in declared order into a draft report.
///
/// Structure: title, executive-summary placeholder, dimension bodies
/// separated by horizontal rules, conclusion placeholder, deduplicated
/// `## References` section.
pub async fn merge_dimension_documents(
    ordered_paths: &[Option<PathBuf>],
    topic: &str,
) -> Result<MergedDraft> {
    let generated = Local::now().format("%Y-%m-%d %H:%M:%S %Z");
    let mut merged = format!(
        "# Research Report: {topic}\n\n*Generated: {generated}*\n\n---\n\n## Executive Summary\n\n{SUMMARY_PLACEHOLDER}\n\n---\n\n"
    );

    let mut references = BTreeSet::new();
    let mut appended = 0usize;
    for path in ordered_paths.iter().flatten() {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                // A missing dimension file is a graceful failure upstream;
                // the report simply omits it.
                warn!(path = %path.display(), error = %e, "skipping unreadable dimension file");
                continue;
            }
        };
        collect_references(&content, &mut references);
        let body = strip_references_section(&content);
        if appended > 0 {
            merged.push_str("\n\n---\n\n");
        }
        merged.push_str(&body);
        merged.push_str("\n\n");
        appended += 1;
    }
    debug!(dimensions = appended, references = references.len(), "merged dimension documents");

    merged.push_str(&format!(
        "---\n\n## Conclusion\n\n{CONCLUSION_PLACEHOLDER}\n\n---\n\n"
    ));

    let references: Vec<String> = references.into_iter().collect();
    if !references.is_empty() {
        merged.push_str("## References\n\n");
        for reference in &references {
            merged.push_str(reference);
            merged.push('\n');
        }
    }

    Ok(MergedDraft {
        content: merged,
        references,
    })
}

/// Insert a block at a 1-indexed line position (clamped to the document
/// end), returning the new content.
pub fn insert_at_line(content: &str, line: usize, block: &str) -> String {
    let mut lines: Vec<&str> = content.lines().collect();
    let index = line.saturating_sub(1).min(lines.len());
    lines.insert(index, block);
    lines.join("\n")
}

/// Renumber every `*Figure N:*` caption that follows a chart image line so
/// captions read 1..K in document order with no gaps.
pub fn renumber_figures(content: &str) -> String {
    let mut lines: Vec<String> = content.lines().map(ToString::to_string).collect();
    let mut caption_lines = Vec::new();
    for i in 0..lines.len() {
        if lines[i].starts_with("![")
            && lines[i].contains("](")
            && i + 1 < lines.len()
            && lines[i + 1].contains("*Figure")
        {
            caption_lines.push(i + 1);
        }
    }
    for (idx, &line) in caption_lines.iter().enumerate() {
        lines[line] = FIGURE_CAPTION
            .replace(&lines[line], format!("*Figure {}:", idx + 1))
            .into_owned();
    }
    lines.join("\n")
}

/// Read a window of lines (1-indexed, inclusive) for the chart agent.
pub fn read_lines(content: &str, start: usize, end: usize) -> String {
    content
        .lines()
        .enumerate()
        .filter(|(i, _)| (i + 1) >= start && (i + 1) <= end)
        .map(|(i, line)| format!("{:>5}: {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Total number of lines, for paging.
pub fn line_count(content: &str) -> usize {
    content.lines().count()
}

/// Make a chart insertion block: image plus caption. The caption number is
/// a placeholder; [`renumber_figures`] assigns the real sequence.
pub fn chart_block(relative_path: &Path, title: &str, caption: &str) -> String {
    format!(
        "\n![{title}]({})\n*Figure X: {caption}*\n",
        relative_path.display()
    )
}
