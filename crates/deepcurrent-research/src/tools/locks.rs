//! Per-file mutexes for tools that mutate the same draft.
//!
//! Keyed by absolute path; the registry itself sits behind a meta-mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Registry of per-file async locks.
#[derive(Default)]
pub struct DraftLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl DraftLocks {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a path, created on first use. The path is normalized
    /// to its absolute form so two spellings of one file share a lock.
    pub fn for_path(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        Arc::clone(
            self.locks
                .lock()
                .entry(canonical)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_file_shares_one_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("draft.md");
        std::fs::write(&file, "x").unwrap();

        let locks = DraftLocks::new();
        let a = locks.for_path(&file);
        let b = locks.for_path(&file);
        let guard = a.lock().await;
        assert!(b.try_lock().is_err());
        drop(guard);
        assert!(b.try_lock().is_ok());
    }
}
