//! Windows uninstall-registry adapter (`reg query`).
//!
//! The registry knows what is installed and who published it, but offers no
//! update feed and no way to install anything.

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

use super::{ApplyChannel, ApplyTarget, RawRecord, SourceAdapter, SourceId};
use crate::error::SourceError;
use crate::runtime::{Runtime, is_not_found};

const SOURCE: &str = "registry";

const UNINSTALL_KEYS: &[&str] = &[
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
    r"HKLM\SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall",
];

/// Entries whose names contain these are OS components, not programs.
const SYSTEM_KEYWORDS: &[&str] = &[
    "hotfix",
    "security update",
    "kb",
    "update for",
    "redistributable",
    "runtime",
    "microsoft visual c++",
    "service pack",
    "language pack",
    ".net framework",
];

pub struct UninstallRegistryAdapter<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> UninstallRegistryAdapter<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }
}

#[derive(Default)]
struct Entry {
    name: Option<String>,
    version: Option<String>,
    publisher: Option<String>,
    system_component: bool,
}

impl Entry {
    fn into_record(self) -> Option<RawRecord> {
        let name = self.name?;
        if self.system_component || is_system_name(&name) {
            return None;
        }
        Some(RawRecord {
            name,
            vendor: self.publisher.filter(|p| !p.is_empty()),
            version: self.version.unwrap_or_else(|| "Unknown".to_string()),
            package_id: None,
        })
    }
}

fn is_system_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    SYSTEM_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Parse `reg query <key> /s` output.
pub(crate) fn parse_reg_query(output: &str) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut entry = Entry::default();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HKEY_") {
            if let Some(record) = std::mem::take(&mut entry).into_record() {
                records.push(record);
            }
            continue;
        }

        let mut parts = line.splitn(3, "    ");
        let (Some(value_name), Some(value_type)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !value_type.starts_with("REG_") {
            continue;
        }
        let data = parts.next().unwrap_or_default().trim().to_string();
        match value_name {
            "DisplayName" => entry.name = Some(data),
            "DisplayVersion" => entry.version = Some(data),
            "Publisher" => entry.publisher = Some(data),
            "SystemComponent" => entry.system_component = data == "0x1",
            _ => {}
        }
    }
    if let Some(record) = entry.into_record() {
        records.push(record);
    }
    records
}

#[async_trait]
impl<R: Runtime + 'static> SourceAdapter for UninstallRegistryAdapter<R> {
    fn id(&self) -> SourceId {
        SourceId::new(SOURCE)
    }

    fn channel(&self) -> ApplyChannel {
        ApplyChannel::new(SOURCE)
    }

    #[tracing::instrument(skip(self))]
    async fn list_installed(&self) -> Result<Vec<RawRecord>, SourceError> {
        let mut records = Vec::new();
        let mut last_error = None;
        let mut any_ok = false;

        for key in UNINSTALL_KEYS {
            let args = vec![
                "query".to_string(),
                key.to_string(),
                "/s".to_string(),
            ];
            match self.runtime.run_command("reg", &args).await {
                Ok(output) if output.success() => {
                    any_ok = true;
                    records.extend(parse_reg_query(&output.stdout));
                }
                Ok(output) => {
                    debug!("reg query {} failed: {}", key, output.failure_summary());
                    last_error = Some(output.failure_summary());
                }
                Err(e) if is_not_found(&e) => {
                    return Err(SourceError::Unavailable("reg.exe not found".into()));
                }
                Err(e) => {
                    warn!("reg query {} failed: {:#}", key, e);
                    last_error = Some(format!("{:#}", e));
                }
            }
        }

        if any_ok {
            Ok(records)
        } else {
            Err(SourceError::Unavailable(
                last_error.unwrap_or_else(|| "registry query failed".into()),
            ))
        }
    }

    async fn list_available(&self, _target: &ApplyTarget) -> Result<Option<String>, SourceError> {
        Err(SourceError::Unsupported("update queries"))
    }

    async fn apply(&self, _target: &ApplyTarget, _to_version: &str) -> Result<(), SourceError> {
        Err(SourceError::Unsupported("apply"))
    }
}
