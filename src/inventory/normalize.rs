//! Merge raw detections from all sources into canonical records.

use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{Detection, SoftwareRecord, canonical_key, name_key};
use crate::source::{RawRecord, SourceId};
use crate::version::Version;

/// Everything one source reported in a scan.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: SourceId,
    pub priority: u32,
    pub records: Vec<RawRecord>,
}

impl SourceBatch {
    pub fn new(source: impl Into<SourceId>, priority: u32, records: Vec<RawRecord>) -> Self {
        Self {
            source: source.into(),
            priority,
            records,
        }
    }
}

/// Build the canonical record map.
///
/// The result does not depend on the order of `batches`. Sources are folded
/// in from least to most trusted, so display name and vendor end up as the
/// most trusted source last reported them.
pub fn normalize(mut batches: Vec<SourceBatch>) -> BTreeMap<String, SoftwareRecord> {
    batches.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| b.source.cmp(&a.source)));

    // name key -> canonical ids of vendor-keyed detections with that name
    let mut vendor_keys: HashMap<String, HashSet<String>> = HashMap::new();
    for batch in &batches {
        for raw in &batch.records {
            let key = canonical_key(&raw.name, raw.vendor.as_deref());
            let name = name_key(&raw.name);
            if key != name {
                vendor_keys.entry(name).or_default().insert(key);
            }
        }
    }

    let mut records: BTreeMap<String, SoftwareRecord> = BTreeMap::new();
    for batch in &batches {
        for raw in &batch.records {
            let name = name_key(&raw.name);
            if name.is_empty() {
                continue;
            }
            let mut key = canonical_key(&raw.name, raw.vendor.as_deref());
            if key == name {
                let unique = vendor_keys
                    .get(&name)
                    .filter(|keys| keys.len() == 1)
                    .and_then(|keys| keys.iter().next());
                if let Some(only) = unique {
                    debug!("folding {} detection of {:?} into {}", batch.source, raw.name, only);
                    key = only.clone();
                }
            }
            merge(&mut records, key, batch, raw);
        }
    }

    for record in records.values_mut() {
        record.installed_version = most_precise(record);
    }
    records
}

fn merge(
    records: &mut BTreeMap<String, SoftwareRecord>,
    key: String,
    batch: &SourceBatch,
    raw: &RawRecord,
) {
    let detection = Detection {
        version: Version::parse(&raw.version),
        package_id: raw.package_id.clone(),
        priority: batch.priority,
    };

    let record = records.entry(key.clone()).or_insert_with(|| SoftwareRecord {
        canonical_id: key,
        display_name: raw.name.clone(),
        vendor: None,
        installed_version: detection.version.clone(),
        sources: BTreeMap::new(),
    });
    record.display_name = raw.name.clone();
    if raw.vendor.is_some() {
        record.vendor = raw.vendor.clone();
    }

    match record.sources.get(&batch.source) {
        // A source listing the same program twice (32- and 64-bit registry
        // views, for instance): keep the more precise version.
        Some(existing) if existing.version.kind() >= detection.version.kind() => {}
        _ => {
            record.sources.insert(batch.source.clone(), detection);
        }
    }
}

/// Most precise parse, ties going to the more trusted source.
fn most_precise(record: &SoftwareRecord) -> Version {
    record
        .sources
        .iter()
        .min_by(|(a_id, a), (b_id, b)| {
            b.version
                .kind()
                .cmp(&a.version.kind())
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a_id.cmp(b_id))
        })
        .map(|(_, d)| d.version.clone())
        .unwrap_or_else(|| record.installed_version.clone())
}
