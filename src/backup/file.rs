//! Backup store on disk.
//!
//! Layout: `<root>/<canonical id>/<timestamp>.json`, one file per record.
//! Each file is written to a temporary name, synced, then renamed into place.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{BackupRecord, BackupStore};
use crate::inventory::canonical_key;
use crate::runtime::Runtime;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

pub struct FileBackupStore<R: Runtime> {
    runtime: Arc<R>,
    root: PathBuf,
}

impl<R: Runtime> FileBackupStore<R> {
    /// Open the store, creating `root` if needed.
    pub fn open(runtime: Arc<R>, root: PathBuf) -> Result<Self> {
        if !runtime.exists(&root) {
            runtime
                .create_dir_all(&root)
                .with_context(|| format!("Failed to create backup directory {:?}", root))?;
        }
        Ok(Self { runtime, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns: `<root>/<canonical id as a directory name>`
    fn record_dir(&self, canonical_id: &str) -> PathBuf {
        self.root.join(dir_name(canonical_id))
    }

    fn record_path(&self, canonical_id: &str, timestamp: DateTime<Utc>) -> PathBuf {
        self.record_dir(canonical_id)
            .join(format!("{}.json", timestamp.format(TIMESTAMP_FORMAT)))
    }

    fn load(&self, path: &Path) -> Result<BackupRecord> {
        let content = self.runtime.read_to_string(path)?;
        serde_json::from_str(&content).with_context(|| format!("Invalid backup record {:?}", path))
    }

    /// Records for a program named the way a user would type it.
    ///
    /// `query` is normalized like a canonical id (`Notepad++` finds
    /// `notepad`). Without a `@vendor` part it also finds the programs
    /// stored under that name with any vendor. Oldest first.
    pub async fn find(&self, query: &str) -> Result<Vec<BackupRecord>>
    where
        R: 'static,
    {
        let (name, vendor) = match query.split_once('@') {
            Some((name, vendor)) => (name, Some(vendor)),
            None => (query, None),
        };
        let key = canonical_key(name, vendor);
        if key.is_empty() {
            return Ok(vec![]);
        }

        let mut records = self.list(&key).await?;
        if vendor.is_none() {
            let prefix = format!("{}+", dir_name(&key));
            for dir in self.runtime.read_dir(&self.root)? {
                let matches = dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix));
                if !matches {
                    continue;
                }
                match self.load_dir(&dir) {
                    Ok(found) => records.extend(found),
                    Err(e) => warn!("Skipping {:?}: {:#}", dir, e),
                }
            }
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    fn load_dir(&self, dir: &Path) -> Result<Vec<BackupRecord>> {
        let mut records = Vec::new();
        for path in self.runtime.read_dir(dir)? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable backup {:?}: {:#}", path, e),
            }
        }
        Ok(records)
    }
}

/// File-system safe and injective for canonical ids.
fn dir_name(canonical_id: &str) -> String {
    canonical_id
        .chars()
        .map(|c| match c {
            ' ' => '_',
            '@' => '+',
            c if c.is_alphanumeric() => c,
            _ => '-',
        })
        .collect()
}

#[async_trait]
impl<R: Runtime + 'static> BackupStore for FileBackupStore<R> {
    #[tracing::instrument(skip(self, record), fields(canonical_id = %record.canonical_id))]
    async fn write(&self, record: &BackupRecord) -> Result<()> {
        let dir = self.record_dir(&record.canonical_id);
        if !self.runtime.exists(&dir) {
            self.runtime.create_dir_all(&dir)?;
        }

        let path = self.record_path(&record.canonical_id, record.timestamp);
        if self.runtime.exists(&path) {
            bail!("Backup record {:?} already exists", path);
        }

        let content = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        self.runtime
            .write_synced(&tmp, content.as_bytes())
            .with_context(|| format!("Failed to write backup record {:?}", tmp))?;
        if let Err(e) = self.runtime.rename(&tmp, &path) {
            if let Err(cleanup) = self.runtime.remove_file(&tmp) {
                warn!("Failed to remove {:?}: {}", tmp, cleanup);
            }
            return Err(e.context(format!("Failed to commit backup record {:?}", path)));
        }
        debug!("Backup written to {:?}", path);
        Ok(())
    }

    async fn read(&self, canonical_id: &str, timestamp: DateTime<Utc>) -> Result<Option<BackupRecord>> {
        let path = self.record_path(canonical_id, timestamp);
        if !self.runtime.exists(&path) {
            return Ok(None);
        }
        self.load(&path).map(Some)
    }

    async fn list(&self, canonical_id: &str) -> Result<Vec<BackupRecord>> {
        let dir = self.record_dir(canonical_id);
        if !self.runtime.exists(&dir) {
            return Ok(vec![]);
        }

        let mut records = self.load_dir(&dir)?;
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}
