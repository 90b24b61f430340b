//! Chocolatey adapter.

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use super::{ApplyChannel, ApplyTarget, RawRecord, SourceAdapter, SourceId};
use crate::backup::BackupRecord;
use crate::error::SourceError;
use crate::runtime::{CommandOutput, Runtime, is_not_found};

const PROGRAM: &str = "choco";
const SOURCE: &str = "chocolatey";

pub struct ChocolateyAdapter<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> ChocolateyAdapter<R> {
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
                    SourceError::Unavailable("chocolatey is not installed".into())
                } else {
                    SourceError::Unavailable(format!("{:#}", e))
                }
            })
    }

    async fn run_mutating(&self, args: &[&str], what: &str) -> Result<(), SourceError> {
        let output = self.run(args).await?;
        if output.success() {
            Ok(())
        } else {
            Err(SourceError::Failed(format!(
                "choco {} failed: {}",
                what,
                output.failure_summary()
            )))
        }
    }
}

/// "google-chrome" -> "Google Chrome"
fn display_name(package_id: &str) -> String {
    package_id
        .split(['-', '.'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `choco list` output, both `id|version` (limit-output) and `id version` lines.
pub(crate) fn parse_list(output: &str) -> Vec<RawRecord> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("Chocolatey"))
        .filter_map(|line| {
            let (id, version) = match line.split_once('|') {
                Some((id, rest)) => (id, rest.split('|').next().unwrap_or_default()),
                None => {
                    let mut parts = line.split_whitespace();
                    let id = parts.next()?;
                    let version = parts.next()?;
                    // "3 packages installed."
                    if parts.next().is_some() {
                        return None;
                    }
                    (id, version)
                }
            };
            if id.is_empty() || version.is_empty() {
                return None;
            }
            Some(RawRecord {
                name: display_name(id),
                vendor: None,
                version: version.to_string(),
                package_id: Some(id.to_string()),
            })
        })
        .collect()
}

/// Parse `choco upgrade <id> --noop`:
/// "You have firefox v101.0 installed. Version 102.0 is available based on your source(s)."
pub(crate) fn parse_noop_upgrade(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains("is available based on your source"))
        .and_then(|line| line.split("Version ").nth(1))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

#[async_trait]
impl<R: Runtime + 'static> SourceAdapter for ChocolateyAdapter<R> {
    fn id(&self) -> SourceId {
        SourceId::new(SOURCE)
    }

    fn channel(&self) -> ApplyChannel {
        ApplyChannel::new(SOURCE)
    }

    #[tracing::instrument(skip(self))]
    async fn list_installed(&self) -> Result<Vec<RawRecord>, SourceError> {
        let output = self.run(&["list", "--local-only", "--limit-output"]).await?;
        if !output.success() {
            return Err(SourceError::Unavailable(output.failure_summary()));
        }
        let records = parse_list(&output.stdout);
        debug!("chocolatey reported {} installed packages", records.len());
        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn list_available(&self, target: &ApplyTarget) -> Result<Option<String>, SourceError> {
        let Some(id) = target.package_id.as_deref() else {
            return Ok(None);
        };
        let output = self.run(&["upgrade", id, "--noop"]).await?;
        Ok(parse_noop_upgrade(&output.stdout))
    }

    #[tracing::instrument(skip(self))]
    async fn apply(&self, target: &ApplyTarget, to_version: &str) -> Result<(), SourceError> {
        let id = target.require_package_id()?;
        self.run_mutating(&["upgrade", id, "--version", to_version, "-y", "--no-progress"], "upgrade")
            .await
    }

    #[tracing::instrument(skip(self, backup))]
    async fn rollback(&self, target: &ApplyTarget, backup: &BackupRecord) -> Result<(), SourceError> {
        let id = target.require_package_id()?;
        self.run_mutating(
            &[
                "upgrade",
                id,
                "--version",
                backup.pre_update_version.as_str(),
                "--allow-downgrade",
                "-y",
                "--no-progress",
            ],
            "downgrade",
        )
        .await
    }
}
