//! Source adapters for installed-software inventories and update feeds.
//!
//! Each adapter wraps one external tool (winget, Chocolatey, the Windows
//! uninstall registry) behind the [`SourceAdapter`] trait. Adapters never
//! enforce their own time limits; callers bound every call with
//! `tokio::time::timeout`, and the child processes are killed when the
//! future is dropped.

mod chocolatey;
mod registry;
mod table;
mod uninstall;
mod winget;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backup::BackupRecord;
use crate::error::SourceError;
use crate::inventory::name_key;

pub use chocolatey::ChocolateyAdapter;
pub use registry::SourceRegistry;
pub use uninstall::UninstallRegistryAdapter;
pub use winget::WingetAdapter;

/// Identifier of a source, e.g. `winget`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Serialization domain for apply operations.
///
/// Two apply invocations on the same channel never overlap, because the
/// package manager behind it keeps a single state/lock file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplyChannel(String);

impl ApplyChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ApplyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An installed program as reported by one source, before normalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RawRecord {
    pub name: String,
    pub vendor: Option<String>,
    /// Version string exactly as the source printed it.
    pub version: String,
    /// Source-specific package identifier (e.g. `Mozilla.Firefox`).
    pub package_id: Option<String>,
}

impl RawRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn package_id(mut self, id: impl Into<String>) -> Self {
        self.package_id = Some(id.into());
        self
    }
}

/// What an adapter needs to locate one program it detected earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyTarget {
    pub canonical_id: String,
    pub display_name: String,
    pub package_id: Option<String>,
}

impl ApplyTarget {
    /// Whether `record` (from a fresh `list_installed`) is this program.
    pub fn matches(&self, record: &RawRecord) -> bool {
        match (&self.package_id, &record.package_id) {
            (Some(wanted), Some(found)) => wanted.eq_ignore_ascii_case(found),
            _ => name_key(&record.name) == name_key(&self.display_name),
        }
    }

    pub(crate) fn require_package_id(&self) -> Result<&str, SourceError> {
        self.package_id
            .as_deref()
            .ok_or_else(|| SourceError::Failed(format!("no package id known for {}", self.display_name)))
    }
}

/// Trait for installed-software sources (package managers, registries).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    /// Apply channel this source's installs run on.
    fn channel(&self) -> ApplyChannel;

    /// Everything this source believes is installed.
    async fn list_installed(&self) -> Result<Vec<RawRecord>, SourceError>;

    /// Newest version this source can install for `target`, if any.
    ///
    /// Sources without an update feed answer `SourceError::Unsupported`.
    async fn list_available(&self, target: &ApplyTarget) -> Result<Option<String>, SourceError>;

    /// Install `to_version` of `target`.
    async fn apply(&self, target: &ApplyTarget, to_version: &str) -> Result<(), SourceError>;

    /// Currently installed version of `target`, re-read from the source.
    async fn installed_version(&self, target: &ApplyTarget) -> Result<Option<String>, SourceError> {
        let records = self.list_installed().await?;
        Ok(records
            .into_iter()
            .find(|r| target.matches(r))
            .map(|r| r.version))
    }

    /// Restore the state captured in `backup`.
    async fn rollback(&self, target: &ApplyTarget, backup: &BackupRecord) -> Result<(), SourceError> {
        let _ = (target, backup);
        Err(SourceError::Unsupported("rollback"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(package_id: Option<&str>) -> ApplyTarget {
        ApplyTarget {
            canonical_id: "mozilla firefox".into(),
            display_name: "Mozilla Firefox".into(),
            package_id: package_id.map(String::from),
        }
    }

    #[test]
    fn test_target_matches_by_package_id() {
        let t = target(Some("Mozilla.Firefox"));
        assert!(t.matches(&RawRecord::new("Firefox", "1").package_id("mozilla.firefox")));
        assert!(!t.matches(&RawRecord::new("Mozilla Firefox", "1").package_id("Other.Id")));
    }

    #[test]
    fn test_target_matches_by_name_without_ids() {
        let t = target(None);
        assert!(t.matches(&RawRecord::new("mozilla  FIREFOX", "1")));
        assert!(!t.matches(&RawRecord::new("Firefox Nightly", "1")));
    }

    #[test]
    fn test_require_package_id() {
        assert_eq!(target(Some("X.Y")).require_package_id().unwrap(), "X.Y");
        let err = target(None).require_package_id().unwrap_err();
        assert!(err.to_string().contains("no package id"));
    }
}
