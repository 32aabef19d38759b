use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Pipeline;
use crate::directory::{ContactRecord, GroupRecord};
use crate::util::atomic_write;

pub const FRIEND_SNAPSHOT_FILE: &str = "contact_friend.json";
pub const GROUP_SNAPSHOT_FILE: &str = "contact_room.json";

/// Anything at or below this size is treated as "no usable snapshot"
/// (covers `[]` and truncated leftovers).
const MIN_VALID_BYTES: u64 = 10;

/// On-disk directory snapshots, one JSON array file per pipeline.
///
/// Files are only ever replaced through [`atomic_write`], so a concurrent
/// reader sees either the previous complete file or the new one.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, pipeline: Pipeline) -> PathBuf {
        self.dir.join(match pipeline {
            Pipeline::Friends => FRIEND_SNAPSHOT_FILE,
            Pipeline::Groups => GROUP_SNAPSHOT_FILE,
        })
    }

    pub fn exists(&self, pipeline: Pipeline) -> bool {
        self.path(pipeline).is_file()
    }

    /// Present and larger than an empty array.
    pub fn is_valid(&self, pipeline: Pipeline) -> bool {
        fs::metadata(self.path(pipeline)).is_ok_and(|m| m.is_file() && m.len() > MIN_VALID_BYTES)
    }

    pub fn write<T: Serialize>(&self, pipeline: Pipeline, records: &[T]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path(pipeline);
        let bytes = serde_json::to_vec_pretty(records)
            .with_context(|| format!("Failed to serialize {pipeline} snapshot"))?;
        atomic_write(&path, &bytes)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))
    }

    /// Records from the snapshot file; a missing file is an empty list.
    pub fn read<T: DeserializeOwned>(&self, pipeline: Pipeline) -> Result<Vec<T>> {
        let path = self.path(pipeline);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid snapshot JSON in {}", path.display()))
    }

    pub fn read_friends(&self) -> Result<Vec<ContactRecord>> {
        self.read(Pipeline::Friends)
    }

    pub fn read_groups(&self) -> Result<Vec<GroupRecord>> {
        self.read(Pipeline::Groups)
    }

    /// Friend id for a display name, nickname or remark.
    pub fn find_friend(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .read_friends()?
            .into_iter()
            .find(|c| c.answers_to(name))
            .map(|c| c.id))
    }

    pub fn find_group(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .read_groups()?
            .into_iter()
            .find(|g| g.name == name)
            .map(|g| g.id))
    }
}
