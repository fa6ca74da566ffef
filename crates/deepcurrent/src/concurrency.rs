//! Per-stage parallelism limits.
//!
//! The [`Governor`] is a registry of named semaphores. Stages that fan out
//! (research, dimension reduction) acquire a slot under their stage name
//! before doing substantive work; stages without a registered limit run
//! unrestricted. Semaphores are created lazily, and a limit update installs
//! a fresh semaphore while existing holders finish under the old one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

struct Entry {
    limit: usize,
    semaphore: Arc<Semaphore>,
}

/// Named-semaphore registry for per-stage concurrency caps.
pub struct Governor {
    limits: Mutex<HashMap<String, usize>>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Governor {
    /// Build a governor from `{stage → limit}`; absent stages are
    /// unlimited.
    pub fn new(limits: HashMap<String, usize>) -> Self {
        Self {
            limits: Mutex::new(limits),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Governor with no limits at all.
    pub fn unlimited() -> Self {
        Self::new(HashMap::new())
    }

    /// Add or replace a limit fluently.
    #[must_use]
    pub fn with_limit(self, stage: impl Into<String>, limit: usize) -> Self {
        self.limits.lock().insert(stage.into(), limit);
        self
    }

    /// The configured limit for a stage, if any.
    pub fn limit(&self, stage: &str) -> Option<usize> {
        self.limits.lock().get(stage).copied()
    }

    /// Update a stage's limit. Passing `None` removes the cap. A new
    /// semaphore is installed; tasks already holding slots drain under the
    /// old count.
    pub fn update_limit(&self, stage: &str, limit: Option<usize>) {
        {
            let mut limits = self.limits.lock();
            match limit {
                Some(n) => {
                    limits.insert(stage.to_string(), n);
                }
                None => {
                    limits.remove(stage);
                }
            }
        }
        self.entries.lock().remove(stage);
        info!(stage, ?limit, "concurrency limit updated");
    }

    fn semaphore_for(&self, stage: &str) -> Option<Arc<Semaphore>> {
        let limit = self.limit(stage)?;
        let mut entries = self.entries.lock();
        let entry = entries.entry(stage.to_string()).or_insert_with(|| {
            info!(stage, limit, "created stage semaphore");
            Entry {
                limit,
                semaphore: Arc::new(Semaphore::new(limit)),
            }
        });
        if entry.limit != limit {
            info!(stage, limit, "recreated stage semaphore for new limit");
            *entry = Entry {
                limit,
                semaphore: Arc::new(Semaphore::new(limit)),
            };
        }
        Some(Arc::clone(&entry.semaphore))
    }

    /// Wait for a slot under the stage's limit. Returns `None` immediately
    /// when the stage is unlimited. `label` names the unit of work (aspect,
    /// dimension) for the acquire/start/complete log lines.
    pub async fn acquire(&self, stage: &str, label: &str) -> Option<SlotGuard> {
        let semaphore = self.semaphore_for(stage)?;
        debug!(stage, label, "waiting for execution slot");
        // The semaphore is never closed, so acquisition only fails if the
        // registry itself is gone.
        let permit = semaphore.acquire_owned().await.ok()?;
        info!(stage, label, "starting");
        Some(SlotGuard {
            stage: stage.to_string(),
            label: label.to_string(),
            _permit: permit,
        })
    }
}

impl Default for Governor {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// RAII guard for an acquired slot; logs completion on drop.
pub struct SlotGuard {
    stage: String,
    label: String,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        info!(stage = %self.stage, label = %self.label, "completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn unlimited_stage_returns_no_guard() {
        let governor = Governor::unlimited();
        assert!(governor.acquire("anything", "x").await.is_none());
    }

    #[tokio::test]
    async fn cap_is_never_exceeded() {
        let governor = Arc::new(Governor::unlimited().with_limit("research", 3));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..10 {
            let governor = Arc::clone(&governor);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _slot = governor.acquire("research", &format!("task-{i}")).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn update_limit_installs_fresh_semaphore() {
        let governor = Governor::unlimited().with_limit("research", 1);
        let first = governor.acquire("research", "a").await;
        assert!(first.is_some());

        // Old holder still alive, but a new semaphore admits another task.
        governor.update_limit("research", Some(2));
        let second =
            tokio::time::timeout(Duration::from_millis(100), governor.acquire("research", "b"))
                .await
                .unwrap();
        assert!(second.is_some());

        governor.update_limit("research", None);
        assert!(governor.acquire("research", "c").await.is_none());
    }
}
