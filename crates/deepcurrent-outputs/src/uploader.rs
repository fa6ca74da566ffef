//! Blob-store uploads for produced artifacts.
//!
//! Canonical layout:
//!
//! ```text
//! research-outputs/{session_id}/versions/{version}/report.{md|docx|pdf}
//! research-outputs/{session_id}/charts/{name}.png
//! research-outputs/{session_id}/dimensions/{dimension_slug}.md
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use deepcurrent::error::{Error, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::workspace::slugify;

/// One uploaded object.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    /// Object key.
    pub s3_key: String,
    /// `s3://bucket/key` URI.
    pub s3_uri: String,
}

/// Upload results by artifact kind (`markdown`, `docx`, `pdf`, chart or
/// dimension names).
#[derive(Debug, Clone, Default)]
pub struct Uploads {
    /// kind → record.
    pub uploads: BTreeMap<String, UploadRecord>,
}

impl Uploads {
    /// JSON view for events and status records.
    pub fn to_value(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .uploads
            .iter()
            .map(|(kind, record)| {
                (
                    kind.clone(),
                    json!({ "s3_key": record.s3_key, "s3_uri": record.s3_uri }),
                )
            })
            .collect();
        json!({ "uploads": map })
    }

    /// Key for one artifact kind.
    pub fn key(&self, kind: &str) -> Option<&str> {
        self.uploads.get(kind).map(|r| r.s3_key.as_str())
    }
}

/// Uploads artifacts to the blob store.
#[derive(Clone)]
pub struct S3Uploader {
    client: S3Client,
    bucket: String,
}

impl S3Uploader {
    /// Wrap a configured SDK client and bucket.
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build from the ambient AWS configuration.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(S3Client::new(&config), bucket)
    }

    /// The target bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<UploadRecord> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| Error::store(format!("failed to read {}: {e}", path.display())))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::store(format!("upload of {key} failed: {e}")))?;
        info!(key, "uploaded artifact");
        Ok(UploadRecord {
            s3_key: key.to_string(),
            s3_uri: format!("s3://{}/{key}", self.bucket),
        })
    }

    /// Upload the report artifacts for a version. Absent or unreadable
    /// files are skipped with a warning; the remaining artifacts still
    /// upload.
    pub async fn upload_research_outputs(
        &self,
        session_id: &str,
        markdown_path: Option<&Path>,
        docx_path: Option<&Path>,
        pdf_path: Option<&Path>,
        version: &str,
    ) -> Uploads {
        let mut uploads = Uploads::default();
        let targets = [
            ("markdown", markdown_path, "md", "text/markdown"),
            (
                "docx",
                docx_path,
                "docx",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ),
            ("pdf", pdf_path, "pdf", "application/pdf"),
        ];
        for (kind, path, ext, content_type) in targets {
            let Some(path) = path else { continue };
            if !path.exists() {
                warn!(kind, path = %path.display(), "artifact missing; skipping upload");
                continue;
            }
            let key = format!("research-outputs/{session_id}/versions/{version}/report.{ext}");
            match self.put_file(&key, path, content_type).await {
                Ok(record) => {
                    uploads.uploads.insert(kind.to_string(), record);
                }
                Err(e) => warn!(kind, error = %e, "artifact upload failed"),
            }
        }
        uploads
    }

    /// Upload one chart image.
    pub async fn upload_chart(&self, session_id: &str, path: &Path) -> Result<UploadRecord> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::store("chart path has no file name"))?;
        let key = format!("research-outputs/{session_id}/charts/{name}");
        self.put_file(&key, path, "image/png").await
    }

    /// Upload per-dimension markdown files.
    pub async fn upload_dimension_documents(
        &self,
        session_id: &str,
        documents: &BTreeMap<String, std::path::PathBuf>,
    ) -> Uploads {
        let mut uploads = Uploads::default();
        for (dimension, path) in documents {
            let key = format!(
                "research-outputs/{session_id}/dimensions/{}.md",
                slugify(dimension)
            );
            match self.put_file(&key, path, "text/markdown").await {
                Ok(record) => {
                    uploads.uploads.insert(dimension.clone(), record);
                }
                Err(e) => warn!(dimension, error = %e, "dimension upload failed"),
            }
        }
        uploads
    }
}
