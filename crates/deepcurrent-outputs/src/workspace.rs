//! The local filesystem workspace.
//!
//! Layout:
//!
//! ```text
//! workspace/
//!   arxiv/          temp paper downloads
//!   dimensions/     per-dimension markdown
//!   final/          merged markdown/docx/pdf
//!   temp/{session}/charts/
//! ```
//!
//! Session-scoped cleanup is the caller's responsibility; the workflow
//! cleans `dimensions/` and `temp/` at construction time so a run never
//! merges a previous run's documents.

use std::path::{Path, PathBuf};

use chrono::Utc;
use deepcurrent::error::Result;
use rand::Rng;
use tracing::debug;

/// Workspace manager rooted at a base directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    base: PathBuf,
}

impl Workspace {
    /// Open (and create) a workspace at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let workspace = Self { base: base.into() };
        for dir in [
            workspace.base.clone(),
            workspace.arxiv_dir(),
            workspace.dimensions_dir(),
            workspace.final_dir(),
            workspace.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(workspace)
    }

    /// The workspace root.
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// ArXiv download directory.
    pub fn arxiv_dir(&self) -> PathBuf {
        self.base.join("arxiv")
    }

    /// Per-dimension markdown directory.
    pub fn dimensions_dir(&self) -> PathBuf {
        self.base.join("dimensions")
    }

    /// Final merged artifacts directory.
    pub fn final_dir(&self) -> PathBuf {
        self.base.join("final")
    }

    /// Temp root.
    pub fn temp_dir(&self) -> PathBuf {
        self.base.join("temp")
    }

    /// Session-isolated chart directory, created on demand.
    pub fn charts_dir(&self, session_id: &str) -> Result<PathBuf> {
        let dir = self.temp_dir().join(session_id).join("charts");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Unique path for a dimension document: slug + timestamp + random
    /// suffix, so parallel writers and retries never collide.
    pub fn dimension_document_path(&self, dimension: &str) -> PathBuf {
        let slug = slugify(dimension);
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix: u16 = rand::thread_rng().gen_range(1000..10000);
        self.dimensions_dir()
            .join(format!("{slug}_{stamp}_{suffix}.md"))
    }

    /// Path for a final artifact (`draft_<slug>.md`, `report.docx`, ...).
    pub fn final_path(&self, file_name: &str) -> PathBuf {
        self.final_dir().join(file_name)
    }

    /// Remove everything under `dimensions/`.
    pub fn clean_dimensions(&self) -> Result<()> {
        remove_children(&self.dimensions_dir())
    }

    /// Remove everything under `temp/`.
    pub fn clean_temp(&self) -> Result<()> {
        remove_children(&self.temp_dir())
    }
}

fn remove_children(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        debug!(path = %path.display(), "removed workspace entry");
    }
    Ok(())
}

/// File-name-safe slug for a dimension or topic.
pub fn slugify(value: &str) -> String {
    let mut slug: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    slug.trim_matches('_').chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_created() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(tmp.path().join("ws")).unwrap();
        assert!(workspace.dimensions_dir().is_dir());
        assert!(workspace.final_dir().is_dir());
        assert!(workspace.charts_dir("sess-1").unwrap().is_dir());
    }

    #[test]
    fn dimension_paths_are_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();
        let a = workspace.dimension_document_path("Historical Context");
        let b = workspace.dimension_document_path("Historical Context");
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_str().unwrap().starts_with("historical_context_"));
    }

    #[test]
    fn clean_removes_previous_run_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();
        std::fs::write(workspace.dimensions_dir().join("old.md"), "stale").unwrap();
        workspace.clean_dimensions().unwrap();
        assert_eq!(std::fs::read_dir(workspace.dimensions_dir()).unwrap().count(), 0);
    }

    #[test]
    fn slugify_compacts_punctuation() {
        assert_eq!(slugify("Ethics & Law (EU)!"), "ethics_law_eu");
    }
}
