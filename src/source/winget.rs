//! Windows Package Manager (winget) adapter.

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

use super::table::Table;
use super::{ApplyChannel, ApplyTarget, RawRecord, SourceAdapter, SourceId};
use crate::backup::BackupRecord;
use crate::error::SourceError;
use crate::runtime::{CommandOutput, Runtime, is_not_found};

const PROGRAM: &str = "winget";
const LIST_COLUMNS: &[&str] = &["Name", "Id", "Version"];
const UPGRADE_COLUMNS: &[&str] = &["Id", "Available"];

/// Arguments accepted by every mutating winget invocation.
const AGREEMENTS: &[&str] = &[
    "--silent",
    "--accept-source-agreements",
    "--accept-package-agreements",
];

pub struct WingetAdapter<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> WingetAdapter<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, SourceError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runtime
            .run_command(PROGRAM, &args)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    SourceError::Unavailable("winget is not installed".into())
                } else {
                    SourceError::Unavailable(format!("{:#}", e))
                }
            })
    }
}

/// Parse `winget list` output into raw records.
pub(crate) fn parse_list(output: &str) -> Vec<RawRecord> {
    let Some(table) = Table::parse(output, LIST_COLUMNS) else {
        return Vec::new();
    };
    table
        .rows_with(LIST_COLUMNS)
        .filter(|row| row["Name"] != "Unknown")
        .map(|row| RawRecord {
            name: row["Name"].trim_end_matches('…').trim().to_string(),
            vendor: None,
            version: row["Version"].clone(),
            package_id: Some(row["Id"].clone()),
        })
        .collect()
}

/// Parse `winget upgrade --id <id>` output: the "Available" cell of the row for `id`.
pub(crate) fn parse_upgrade(output: &str, id: &str) -> Option<String> {
    let table = Table::parse(output, UPGRADE_COLUMNS)?;
    table
        .rows_with(UPGRADE_COLUMNS)
        .find(|row| row["Id"].eq_ignore_ascii_case(id))
        .map(|row| row["Available"].clone())
}

#[async_trait]
impl<R: Runtime + 'static> SourceAdapter for WingetAdapter<R> {
    fn id(&self) -> SourceId {
        SourceId::new(PROGRAM)
    }

    fn channel(&self) -> ApplyChannel {
        ApplyChannel::new(PROGRAM)
    }

    #[tracing::instrument(skip(self))]
    async fn list_installed(&self) -> Result<Vec<RawRecord>, SourceError> {
        let output = self.run(&["list", "--accept-source-agreements"]).await?;
        if !output.success() {
            return Err(SourceError::Unavailable(output.failure_summary()));
        }
        let records = parse_list(&output.stdout);
        debug!("winget reported {} installed packages", records.len());
        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn list_available(&self, target: &ApplyTarget) -> Result<Option<String>, SourceError> {
        let Some(id) = target.package_id.as_deref() else {
            return Ok(None);
        };
        let output = self
            .run(&["upgrade", "--id", id, "--exact", "--accept-source-agreements"])
            .await?;
        // winget exits non-zero when there is simply nothing to upgrade
        Ok(parse_upgrade(&output.stdout, id))
    }

    #[tracing::instrument(skip(self))]
    async fn apply(&self, target: &ApplyTarget, to_version: &str) -> Result<(), SourceError> {
        let id = target.require_package_id()?;
        let mut args = vec!["upgrade", "--id", id, "--exact", "--version", to_version];
        args.extend_from_slice(AGREEMENTS);

        let output = self.run(&args).await?;
        if output.success() {
            Ok(())
        } else {
            warn!("winget upgrade of {} failed: {}", id, output.failure_summary());
            Err(SourceError::Failed(format!(
                "winget upgrade failed: {}",
                output.failure_summary()
            )))
        }
    }

    #[tracing::instrument(skip(self, backup))]
    async fn rollback(&self, target: &ApplyTarget, backup: &BackupRecord) -> Result<(), SourceError> {
        let id = target.require_package_id()?;
        let version = backup.pre_update_version.as_str();
        let mut args = vec!["install", "--id", id, "--exact", "--version", version, "--force"];
        args.extend_from_slice(AGREEMENTS);

        let output = self.run(&args).await?;
        if output.success() {
            Ok(())
        } else {
            Err(SourceError::Failed(format!(
                "winget could not reinstall {} {}: {}",
                id,
                version,
                output.failure_summary()
            )))
        }
    }
}
