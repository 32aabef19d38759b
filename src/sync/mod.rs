//! Contact directory sync.
//!
//! Two independent pipelines (friends, groups) pull the account's contact
//! directory from the remote API and persist it as snapshot files. Each
//! pipeline has its own guard, so a friends pass and a groups pass may run
//! concurrently, but two passes of the same pipeline never do.

pub mod cache;
pub mod progress;
pub mod retry;
pub mod snapshot;
pub mod status;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Config, SyncConfig};
use crate::directory::{
    ContactIds, ContactRecord, DirectoryClient, DirectoryError, GroupRecord, HttpDirectoryClient,
};

pub use cache::{ContactCache, ContactNames};
pub use progress::{PassGuard, PipelineState, SyncProgress};
pub use retry::RetryPolicy;
pub use snapshot::SnapshotStore;
pub use status::{UpdateStatus, UpdateStatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Friends,
    Groups,
}

impl Pipeline {
    /// Name used in the health registry.
    pub fn component(self) -> &'static str {
        match self {
            Self::Friends => "friends-sync",
            Self::Groups => "groups-sync",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Friends => "friends",
            Self::Groups => "groups",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("contact listing failed: {0}")]
    Listing(#[source] DirectoryError),
    #[error("snapshot write failed: {0:#}")]
    Snapshot(anyhow::Error),
}

/// How a refresh call ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Pass ran to the end of its ID list and wrote a snapshot.
    Completed { records: usize, processed: usize },
    /// Another pass of the same pipeline holds the guard.
    AlreadyRunning,
    /// Remote directory is not configured.
    NotSupported,
}

/// Result of a fire-and-forget trigger from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    NotSupported,
}

pub struct ContactSyncEngine {
    client: Option<Arc<dyn DirectoryClient>>,
    snapshots: SnapshotStore,
    friends: Arc<PipelineState>,
    groups: Arc<PipelineState>,
    cache: ContactCache,
    retry: RetryPolicy,
    batch_size: usize,
    progress_log_every: usize,
}

impl ContactSyncEngine {
    /// `client = None` means the remote directory is not configured; every
    /// refresh then reports [`RefreshOutcome::NotSupported`].
    pub fn new(
        client: Option<Arc<dyn DirectoryClient>>,
        snapshots: SnapshotStore,
        settings: &SyncConfig,
    ) -> Self {
        Self {
            client,
            snapshots,
            friends: PipelineState::new(),
            groups: PipelineState::new(),
            cache: ContactCache::new(Duration::from_secs(settings.cache_ttl_secs)),
            retry: RetryPolicy::from_config(settings),
            batch_size: settings.batch_size.clamp(1, 20),
            progress_log_every: settings.progress_log_every.max(1),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = HttpDirectoryClient::from_config(&config.directory)?
            .map(|c| Arc::new(c) as Arc<dyn DirectoryClient>);
        if client.is_none() {
            tracing::info!("Remote directory not configured; contact sync disabled");
        }
        Ok(Self::new(
            client,
            SnapshotStore::new(config.snapshot_dir()),
            &config.sync,
        ))
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub fn client(&self) -> Option<&Arc<dyn DirectoryClient>> {
        self.client.as_ref()
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn status(&self) -> UpdateStatusStore {
        UpdateStatusStore::new(
            Arc::clone(&self.friends),
            Arc::clone(&self.groups),
            self.snapshots.clone(),
        )
    }

    pub fn progress(&self, pipeline: Pipeline) -> SyncProgress {
        self.state(pipeline).progress()
    }

    fn state(&self, pipeline: Pipeline) -> &Arc<PipelineState> {
        match pipeline {
            Pipeline::Friends => &self.friends,
            Pipeline::Groups => &self.groups,
        }
    }

    pub async fn refresh_friends(&self) -> Result<RefreshOutcome, SyncError> {
        self.refresh(Pipeline::Friends).await
    }

    pub async fn refresh_groups(&self) -> Result<RefreshOutcome, SyncError> {
        self.refresh(Pipeline::Groups).await
    }

    /// Run one pass in the caller's task. Returns immediately with
    /// `AlreadyRunning` when the pipeline is busy.
    pub async fn refresh(&self, pipeline: Pipeline) -> Result<RefreshOutcome, SyncError> {
        let Some(pass) = self.state(pipeline).try_begin() else {
            tracing::info!(%pipeline, "Refresh already in progress, ignoring trigger");
            return Ok(RefreshOutcome::AlreadyRunning);
        };
        let Some(client) = self.client.as_deref() else {
            tracing::warn!(%pipeline, "Remote directory not configured; refresh not supported");
            return Ok(RefreshOutcome::NotSupported);
        };
        pass.start();
        self.run_pass(pipeline, client, pass).await
    }

    /// Start a pass on a background task. The guard is taken here, in the
    /// caller, and handed to the task, so a concurrent trigger can never slip
    /// in between the check and the spawn.
    pub fn trigger(self: &Arc<Self>, pipeline: Pipeline) -> TriggerOutcome {
        let Some(pass) = self.state(pipeline).try_begin() else {
            tracing::info!(%pipeline, "Refresh already in progress, ignoring trigger");
            return TriggerOutcome::AlreadyRunning;
        };
        let Some(client) = self.client.clone() else {
            tracing::warn!(%pipeline, "Remote directory not configured; refresh not supported");
            return TriggerOutcome::NotSupported;
        };
        pass.start();

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.run_pass(pipeline, client.as_ref(), pass).await {
                tracing::debug!(%pipeline, "Background refresh ended with error: {e}");
            }
        });
        TriggerOutcome::Started
    }

    /// Groups first, then friends after `inter_pass_delay`. With
    /// `only_invalid`, a pipeline whose snapshot is already usable is skipped.
    pub async fn refresh_sequence(&self, only_invalid: bool, inter_pass_delay: Duration) {
        let groups_needed = !only_invalid || !self.snapshots.is_valid(Pipeline::Groups);
        let friends_needed = !only_invalid || !self.snapshots.is_valid(Pipeline::Friends);

        if !groups_needed && !friends_needed {
            tracing::info!("Friend and group snapshots are valid; no refresh needed");
            return;
        }

        if groups_needed {
            tracing::info!("Refreshing group snapshot");
            if let Err(e) = self.refresh_groups().await {
                tracing::error!("Automatic group refresh failed: {e}");
            }
            if friends_needed {
                tokio::time::sleep(inter_pass_delay).await;
            }
        }

        if friends_needed {
            tracing::info!("Refreshing friend snapshot");
            if let Err(e) = self.refresh_friends().await {
                tracing::error!("Automatic friend refresh failed: {e}");
            }
        }
    }

    /// Display names from both snapshots, served from memory while fresh.
    /// Never triggers a refresh.
    pub fn get_contacts_cached(&self) -> ContactNames {
        if let Some(hit) = self.cache.get() {
            return hit;
        }

        let friends = match self.snapshots.read_friends() {
            Ok(records) => records.into_iter().map(|c| c.display_name).collect(),
            Err(e) => {
                tracing::error!("Failed to read friend snapshot: {e:#}");
                Vec::new()
            }
        };
        let groups = match self.snapshots.read_groups() {
            Ok(records) => records.into_iter().map(|g| g.name).collect(),
            Err(e) => {
                tracing::error!("Failed to read group snapshot: {e:#}");
                Vec::new()
            }
        };

        let names = ContactNames { friends, groups };
        self.cache.store(names.clone());
        names
    }

    async fn run_pass(
        &self,
        pipeline: Pipeline,
        client: &dyn DirectoryClient,
        pass: PassGuard,
    ) -> Result<RefreshOutcome, SyncError> {
        let result = match pipeline {
            Pipeline::Friends => self.friends_pass(client, &pass).await,
            Pipeline::Groups => self.groups_pass(client, &pass).await,
        };

        match &result {
            Ok(_) => crate::health::mark_component_ok(pipeline.component()),
            Err(e) => {
                tracing::error!(%pipeline, "Refresh pass failed: {e}");
                crate::health::mark_component_error(pipeline.component(), e);
            }
        }
        result
    }

    async fn list_ids(&self, client: &dyn DirectoryClient) -> Result<ContactIds, SyncError> {
        self.retry
            .execute("fetchContactsList", || client.list_contact_ids())
            .await
            .map_err(SyncError::Listing)
    }

    async fn friends_pass(
        &self,
        client: &dyn DirectoryClient,
        pass: &PassGuard,
    ) -> Result<RefreshOutcome, SyncError> {
        let ids = self.list_ids(client).await?.friend_ids;
        let total = ids.len();
        pass.set_total(total);
        tracing::info!(total, "Refreshing friend details");

        let batches = total.div_ceil(self.batch_size);
        let mut records = Vec::with_capacity(total);
        for (index, batch) in ids.chunks(self.batch_size).enumerate() {
            match self
                .retry
                .execute("getDetailInfo", || client.fetch_details(batch))
                .await
            {
                Ok(details) => {
                    records.extend(details.into_iter().filter_map(ContactRecord::from_detail));
                }
                Err(e) => {
                    tracing::warn!(
                        batch = index + 1,
                        batches,
                        error = %e,
                        "Skipping friend batch after retries"
                    );
                }
            }
            let processed = ((index + 1) * self.batch_size).min(total);
            pass.advance_to(processed);
            tracing::info!("Processed {processed}/{total} friends");
        }

        self.finish(Pipeline::Friends, pass, &records)
    }

    async fn groups_pass(
        &self,
        client: &dyn DirectoryClient,
        pass: &PassGuard,
    ) -> Result<RefreshOutcome, SyncError> {
        let ids = self.list_ids(client).await?.group_ids;
        let total = ids.len();
        pass.set_total(total);
        tracing::info!(total, "Refreshing group details");

        let mut records = Vec::with_capacity(total);
        for (index, group_id) in ids.iter().enumerate() {
            match self
                .retry
                .execute("getChatroomInfo", || client.fetch_group_detail(group_id))
                .await
            {
                Ok(detail) => records.extend(GroupRecord::from_detail(detail)),
                Err(e) => {
                    tracing::warn!(group = %group_id, error = %e, "Skipping group after retries");
                }
            }
            let processed = index + 1;
            pass.advance_to(processed);
            if processed % self.progress_log_every == 0 || processed == total {
                tracing::info!("Processed {processed}/{total} groups");
            }
        }

        self.finish(Pipeline::Groups, pass, &records)
    }

    fn finish<T: Serialize>(
        &self,
        pipeline: Pipeline,
        pass: &PassGuard,
        records: &[T],
    ) -> Result<RefreshOutcome, SyncError> {
        self.snapshots
            .write(pipeline, records)
            .map_err(SyncError::Snapshot)?;
        self.cache.invalidate();
        pass.mark_completed();

        let processed = pass.progress().processed;
        tracing::info!(%pipeline, records = records.len(), processed, "Snapshot updated");
        Ok(RefreshOutcome::Completed {
            records: records.len(),
            processed,
        })
    }
}
