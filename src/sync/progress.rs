use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Observable state of one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// Guard plus progress for a single pipeline.
///
/// The guard is non-reentrant and only ever taken with `try_begin`, so a
/// second trigger never queues behind an active pass. Progress may be read
/// at any time without the guard; it can lag the pass by one batch.
#[derive(Debug, Default)]
pub struct PipelineState {
    guard: Arc<Mutex<()>>,
    progress: RwLock<SyncProgress>,
}

impl PipelineState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the guard if nobody holds it. `None` means a pass is already
    /// running. Progress is untouched until [`PassGuard::start`].
    pub fn try_begin(self: &Arc<Self>) -> Option<PassGuard> {
        let lock = Arc::clone(&self.guard).try_lock_owned().ok()?;
        Some(PassGuard {
            state: Arc::clone(self),
            _lock: lock,
        })
    }

    pub fn progress(&self) -> SyncProgress {
        self.progress.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.progress.read().running
    }
}

/// Proof of an active pass. Dropping it (on success, error, or unwind)
/// clears `running` and then releases the guard.
#[derive(Debug)]
pub struct PassGuard {
    state: Arc<PipelineState>,
    _lock: OwnedMutexGuard<()>,
}

impl PassGuard {
    /// Mark the pipeline running and reset the counters of the previous pass.
    /// `last_completed_at` is kept.
    pub fn start(&self) {
        let mut p = self.state.progress.write();
        p.running = true;
        p.total = 0;
        p.processed = 0;
    }

    pub fn set_total(&self, total: usize) {
        self.state.progress.write().total = total;
    }

    /// Move `processed` forward. Never goes backwards.
    pub fn advance_to(&self, processed: usize) {
        let mut p = self.state.progress.write();
        p.processed = p.processed.max(processed.min(p.total));
    }

    pub fn mark_completed(&self) {
        self.state.progress.write().last_completed_at = Some(Utc::now());
    }

    pub fn progress(&self) -> SyncProgress {
        self.state.progress()
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.state.progress.write().running = false;
    }
}
