use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{BackupRecord, BackupStore};

/// Backup store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryBackupStore {
    records: Mutex<BTreeMap<(String, DateTime<Utc>), BackupRecord>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn write(&self, record: &BackupRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("backup store lock poisoned"))?;
        let key = (record.canonical_id.clone(), record.timestamp);
        if records.contains_key(&key) {
            bail!(
                "Backup record for {} at {} already exists",
                record.canonical_id,
                record.timestamp
            );
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn read(&self, canonical_id: &str, timestamp: DateTime<Utc>) -> Result<Option<BackupRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("backup store lock poisoned"))?;
        Ok(records.get(&(canonical_id.to_string(), timestamp)).cloned())
    }

    async fn list(&self, canonical_id: &str) -> Result<Vec<BackupRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("backup store lock poisoned"))?;
        Ok(records
            .values()
            .filter(|r| r.canonical_id == canonical_id)
            .cloned()
            .collect())
    }
}
