//! Decide which installed programs have a newer version available.
//!
//! Resolution is split in two: [`collect_offers`] asks the sources that
//! detected each program what they can install (I/O), and [`resolve`] turns a
//! record plus its offers into at most one [`UpdateCandidate`] (pure).

use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::SourceError;
use crate::inventory::{InventorySnapshot, SoftwareRecord};
use crate::policy::ExclusionReason;
use crate::source::{ApplyTarget, SourceId, SourceRegistry};
use crate::version::Version;

/// What to do when sources disagree on whether an update exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementPolicy {
    /// Any source offering a newer version produces a candidate.
    #[default]
    HighestVersion,
    /// Only the most trusted source that answered decides.
    PrioritySource,
}

/// One source's answer to "what can you install for this program?".
#[derive(Debug, Clone)]
pub struct Offer {
    pub source: SourceId,
    pub priority: u32,
    /// `None`: the source has nothing newer.
    pub available: Option<Version>,
}

/// A proposed version transition for one program.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCandidate {
    pub canonical_id: String,
    pub display_name: String,
    pub vendor: Option<String>,
    pub from_version: Version,
    pub to_version: Version,
    pub source: SourceId,
    pub package_id: Option<String>,
    pub excluded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusion: Option<ExclusionReason>,
    pub priority: u32,
}

impl UpdateCandidate {
    pub fn apply_target(&self) -> ApplyTarget {
        ApplyTarget {
            canonical_id: self.canonical_id.clone(),
            display_name: self.display_name.clone(),
            package_id: self.package_id.clone(),
        }
    }
}

/// A comparison that could not be ordered (`version_undecidable`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Undecidable {
    pub canonical_id: String,
    pub source: SourceId,
    pub installed: String,
    pub available: String,
}

impl Undecidable {
    pub const CODE: &'static str = "version_undecidable";
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub candidates: Vec<UpdateCandidate>,
    pub undecidable: Vec<Undecidable>,
}

/// Resolve one record against the offers for it.
pub fn resolve(
    record: &SoftwareRecord,
    offers: &[Offer],
    policy: DisagreementPolicy,
) -> (Option<UpdateCandidate>, Vec<Undecidable>) {
    let mut ordered: Vec<&Offer> = offers.iter().collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.source.cmp(&b.source)));
    if policy == DisagreementPolicy::PrioritySource {
        ordered.truncate(1);
    }

    let installed = &record.installed_version;
    let mut undecidable = Vec::new();
    let mut best: Option<(&Offer, &Version)> = None;

    for offer in ordered {
        let Some(available) = &offer.available else {
            continue;
        };
        match available.partial_cmp(installed) {
            None => undecidable.push(Undecidable {
                canonical_id: record.canonical_id.clone(),
                source: offer.source.clone(),
                installed: installed.to_string(),
                available: available.to_string(),
            }),
            Some(Ordering::Greater) => {
                // Offers arrive most trusted first, so only a strictly newer
                // version displaces the current pick.
                let newer = best.is_none_or(|(_, v)| available.partial_cmp(v) == Some(Ordering::Greater));
                if newer {
                    best = Some((offer, available));
                }
            }
            Some(_) => {}
        }
    }

    let candidate = best.map(|(offer, to)| UpdateCandidate {
        canonical_id: record.canonical_id.clone(),
        display_name: record.display_name.clone(),
        vendor: record.vendor.clone(),
        from_version: installed.clone(),
        to_version: to.clone(),
        source: offer.source.clone(),
        package_id: record
            .sources
            .get(&offer.source)
            .and_then(|d| d.package_id.clone()),
        excluded: false,
        exclusion: None,
        priority: offer.priority,
    });
    (candidate, undecidable)
}

/// Resolve every record in `snapshot`.
pub fn resolve_all(
    snapshot: &InventorySnapshot,
    offers: &BTreeMap<String, Vec<Offer>>,
    policy: DisagreementPolicy,
) -> Resolution {
    let mut resolution = Resolution::default();
    for record in snapshot.records.values() {
        let Some(offers) = offers.get(&record.canonical_id) else {
            continue;
        };
        let (candidate, undecidable) = resolve(record, offers, policy);
        for u in &undecidable {
            debug!(
                "{}: {} installed {:?}, {} offers {:?}",
                Undecidable::CODE,
                u.canonical_id,
                u.installed,
                u.source,
                u.available
            );
        }
        resolution.undecidable.extend(undecidable);
        resolution.candidates.extend(candidate);
    }
    resolution
}

/// Ask every source that detected a program what it can install.
///
/// Queries run with at most `max_concurrent` in flight, each bounded by
/// `query_timeout`. Sources without an update feed are skipped; failing
/// queries are logged and produce no offer.
#[tracing::instrument(skip(registry, snapshot))]
pub async fn collect_offers(
    registry: &SourceRegistry,
    snapshot: &InventorySnapshot,
    query_timeout: Duration,
    max_concurrent: usize,
) -> BTreeMap<String, Vec<Offer>> {
    let mut queries = Vec::new();
    for record in snapshot.records.values() {
        for source in record.sources.keys() {
            let (Some(adapter), Some(priority)) = (registry.get(source), registry.priority_of(source)) else {
                continue;
            };
            queries.push((record, adapter, priority));
        }
    }

    let answers: Vec<_> = stream::iter(queries)
        .map(|(record, adapter, priority)| async move {
            let target = record.apply_target(&adapter.id());
            let result = match tokio::time::timeout(query_timeout, adapter.list_available(&target)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout),
            };
            (record, adapter.id(), priority, result)
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    let mut offers: BTreeMap<String, Vec<Offer>> = BTreeMap::new();
    for (record, source, priority, result) in answers {
        match result {
            Ok(available) => offers
                .entry(record.canonical_id.clone())
                .or_default()
                .push(Offer {
                    source,
                    priority,
                    available: available.as_deref().map(Version::parse),
                }),
            Err(SourceError::Unsupported(_)) => {}
            Err(e) => warn!("Update query for {} via {} failed: {}", record.display_name, source, e),
        }
    }
    offers
}
