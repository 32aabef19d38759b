use std::sync::Arc;

use serde::Serialize;

use super::Pipeline;
use super::progress::{PipelineState, SyncProgress};
use super::snapshot::SnapshotStore;

/// Point-in-time view served to status pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub friends: SyncProgress,
    pub groups: SyncProgress,
    pub friend_file_exists: bool,
    pub group_file_exists: bool,
}

/// Read-only view over both pipelines and their snapshot files.
#[derive(Debug, Clone)]
pub struct UpdateStatusStore {
    friends: Arc<PipelineState>,
    groups: Arc<PipelineState>,
    snapshots: SnapshotStore,
}

impl UpdateStatusStore {
    pub fn new(
        friends: Arc<PipelineState>,
        groups: Arc<PipelineState>,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            friends,
            groups,
            snapshots,
        }
    }

    pub fn snapshot(&self) -> UpdateStatus {
        UpdateStatus {
            friends: self.friends.progress(),
            groups: self.groups.progress(),
            friend_file_exists: self.snapshots.exists(Pipeline::Friends),
            group_file_exists: self.snapshots.exists(Pipeline::Groups),
        }
    }
}
