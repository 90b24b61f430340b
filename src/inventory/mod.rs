//! Canonical inventory of installed software.

mod normalize;
mod scan;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::source::{ApplyTarget, SourceId};
use crate::version::Version;

pub use normalize::{SourceBatch, normalize};
pub use scan::scan;

/// Lower-cased, punctuation-stripped, whitespace-collapsed form of a name.
///
/// "Mozilla  Firefox (x64)" -> "mozilla firefox x64"
pub fn name_key(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical id: the name key, plus `@vendor` when a vendor is known.
pub fn canonical_key(name: &str, vendor: Option<&str>) -> String {
    let name = name_key(name);
    match vendor.map(name_key).filter(|v| !v.is_empty()) {
        Some(vendor) => format!("{}@{}", name, vendor),
        None => name,
    }
}

/// One source's view of an installed program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub version: Version,
    pub package_id: Option<String>,
    #[serde(skip)]
    pub priority: u32,
}

/// A program as seen across all sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftwareRecord {
    pub canonical_id: String,
    pub display_name: String,
    pub vendor: Option<String>,
    /// Most precise of the detected versions.
    pub installed_version: Version,
    pub sources: BTreeMap<SourceId, Detection>,
}

impl SoftwareRecord {
    /// What `source` needs to act on this program.
    pub fn apply_target(&self, source: &SourceId) -> ApplyTarget {
        ApplyTarget {
            canonical_id: self.canonical_id.clone(),
            display_name: self.display_name.clone(),
            package_id: self
                .sources
                .get(source)
                .and_then(|d| d.package_id.clone()),
        }
    }
}

/// A source that contributed nothing to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceUnavailable {
    pub source: SourceId,
    pub reason: String,
}

impl SourceUnavailable {
    pub const CODE: &'static str = "source_unavailable";
}

/// Immutable result of one inventory scan.
#[derive(Debug, Clone, Serialize)]
pub struct InventorySnapshot {
    pub records: BTreeMap<String, SoftwareRecord>,
    pub unavailable: Vec<SourceUnavailable>,
    pub taken_at: DateTime<Utc>,
}

impl InventorySnapshot {
    pub fn get(&self, canonical_id: &str) -> Option<&SoftwareRecord> {
        self.records.get(canonical_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
