//! Append-only store of pre-update state.
//!
//! A [`BackupRecord`] is written before anything is applied and is never
//! modified afterwards. Pruning old records is left to an external cleanup
//! job.

mod file;
mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::source::{ApplyChannel, ApplyTarget, SourceId};

pub use file::FileBackupStore;
pub use memory::MemoryBackupStore;

/// Restore hint: everything an adapter needs to reinstall the old version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub source: SourceId,
    pub channel: ApplyChannel,
    pub package_id: Option<String>,
    pub display_name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub canonical_id: String,
    /// UTC, millisecond precision.
    pub timestamp: DateTime<Utc>,
    pub pre_update_version: String,
    pub artifact_reference: ArtifactReference,
}

impl BackupRecord {
    pub fn new(
        target: &ApplyTarget,
        pre_update_version: &str,
        source: SourceId,
        channel: ApplyChannel,
    ) -> Self {
        Self {
            canonical_id: target.canonical_id.clone(),
            timestamp: Utc::now().trunc_subsecs(3),
            pre_update_version: pre_update_version.to_string(),
            artifact_reference: ArtifactReference {
                source,
                channel,
                package_id: target.package_id.clone(),
                display_name: target.display_name.clone(),
                version: pre_update_version.to_string(),
            },
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Durably record `record`. Fails if a record with the same canonical id
    /// and timestamp already exists.
    async fn write(&self, record: &BackupRecord) -> Result<()>;

    async fn read(&self, canonical_id: &str, timestamp: DateTime<Utc>) -> Result<Option<BackupRecord>>;

    /// All records for `canonical_id`, oldest first.
    async fn list(&self, canonical_id: &str) -> Result<Vec<BackupRecord>>;
}
