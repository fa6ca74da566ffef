//! Document format conversion: markdown → docx → pdf.
//!
//! Pure format adaptation through external converters (pandoc for docx,
//! libreoffice for pdf), no model involvement. Converter binaries are
//! resolved once; a missing binary surfaces as a configuration error with
//! the binary name in the message.

use std::path::{Path, PathBuf};

use deepcurrent::error::{Error, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Converts between document formats via external converters.
#[derive(Debug, Clone)]
pub struct DocumentConverter {
    pandoc_bin: String,
    libreoffice_bin: String,
}

impl Default for DocumentConverter {
    fn default() -> Self {
        Self {
            pandoc_bin: "pandoc".to_string(),
            libreoffice_bin: "libreoffice".to_string(),
        }
    }
}

impl DocumentConverter {
    /// Converter using `pandoc` and `libreoffice` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the pandoc binary.
    #[must_use]
    pub fn with_pandoc(mut self, bin: impl Into<String>) -> Self {
        self.pandoc_bin = bin.into();
        self
    }

    /// Override the libreoffice binary.
    #[must_use]
    pub fn with_libreoffice(mut self, bin: impl Into<String>) -> Self {
        self.libreoffice_bin = bin.into();
        self
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        debug!(program, ?args, "running converter");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::config(format!("converter binary `{program}` not found on PATH"))
                } else {
                    Error::other(format!("failed to run `{program}`: {e}"))
                }
            })?;
        if !output.status.success() {
            return Err(Error::other(format!(
                "`{program}` exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    /// Markdown (with embedded images) → docx. Relative image paths are
    /// resolved against the markdown file's directory.
    pub async fn markdown_to_docx(&self, markdown_path: &Path, docx_path: &Path) -> Result<()> {
        let resource_dir = markdown_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        self.run(
            &self.pandoc_bin,
            &[
                markdown_path.to_str().unwrap_or_default(),
                "-o",
                docx_path.to_str().unwrap_or_default(),
                "--resource-path",
                resource_dir.to_str().unwrap_or_default(),
                "--from",
                "markdown",
                "--to",
                "docx",
            ],
        )
        .await?;
        info!(docx = %docx_path.display(), "markdown converted to docx");
        Ok(())
    }

    /// docx → pdf. Returns the produced pdf path (same stem, in `out_dir`).
    pub async fn docx_to_pdf(&self, docx_path: &Path, out_dir: &Path) -> Result<PathBuf> {
        self.run(
            &self.libreoffice_bin,
            &[
                "--headless",
                "--convert-to",
                "pdf",
                "--outdir",
                out_dir.to_str().unwrap_or_default(),
                docx_path.to_str().unwrap_or_default(),
            ],
        )
        .await?;

        let stem = docx_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::other("docx path has no file stem"))?;
        let pdf_path = out_dir.join(format!("{stem}.pdf"));
        if !pdf_path.exists() {
            return Err(Error::other(format!(
                "conversion produced no pdf at {}",
                pdf_path.display()
            )));
        }
        info!(pdf = %pdf_path.display(), "docx converted to pdf");
        Ok(pdf_path)
    }
}
