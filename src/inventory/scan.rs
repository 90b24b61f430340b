use chrono::Utc;
use futures_util::future::join_all;
use log::{info, warn};
use std::time::Duration;

use super::{InventorySnapshot, SourceBatch, SourceUnavailable, normalize};
use crate::error::SourceError;
use crate::source::SourceRegistry;

/// Query every registered source concurrently and build a snapshot.
///
/// A source that fails or exceeds `query_timeout` is listed as unavailable
/// and contributes no records; the scan itself never fails.
#[tracing::instrument(skip(registry))]
pub async fn scan(registry: &SourceRegistry, query_timeout: Duration) -> InventorySnapshot {
    let queries = registry.iter().map(|adapter| async move {
        let result = match tokio::time::timeout(query_timeout, adapter.list_installed()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout),
        };
        (adapter.id(), result)
    });

    let mut batches = Vec::new();
    let mut unavailable = Vec::new();
    for (source, result) in join_all(queries).await {
        match result {
            Ok(records) => {
                let priority = registry.priority_of(&source).unwrap_or(u32::MAX);
                batches.push(SourceBatch {
                    source,
                    priority,
                    records,
                });
            }
            Err(e) => {
                warn!("{}: {} {}", SourceUnavailable::CODE, source, e);
                unavailable.push(SourceUnavailable {
                    source,
                    reason: e.to_string(),
                });
            }
        }
    }

    let records = normalize(batches);
    info!(
        "inventory: {} programs, {} sources unavailable",
        records.len(),
        unavailable.len()
    );
    InventorySnapshot {
        records,
        unavailable,
        taken_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ApplyChannel, MockSourceAdapter, RawRecord, SourceId};
    use std::sync::Arc;

    fn adapter(
        id: &'static str,
        result: impl Fn() -> Result<Vec<RawRecord>, SourceError> + Send + Sync + 'static,
    ) -> Arc<MockSourceAdapter> {
        let mut mock = MockSourceAdapter::new();
        mock.expect_id().returning(move || SourceId::new(id));
        mock.expect_channel().returning(move || ApplyChannel::new(id));
        mock.expect_list_installed().returning(move || result());
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_scan_merges_sources() {
        let mut registry = SourceRegistry::new();
        registry.register(
            adapter("winget", || Ok(vec![RawRecord::new("Mozilla Firefox", "101.0").package_id("Mozilla.Firefox")])),
            1,
        );
        registry.register(
            adapter("registry", || Ok(vec![RawRecord::new("Mozilla Firefox", "101.0").vendor("Mozilla")])),
            3,
        );

        let snapshot = scan(&registry, Duration::from_secs(5)).await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.unavailable.is_empty());
        assert_eq!(snapshot.get("mozilla firefox@mozilla").unwrap().sources.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_source_is_recorded_not_fatal() {
        let mut registry = SourceRegistry::new();
        registry.register(adapter("winget", || Ok(vec![RawRecord::new("Git", "2.41.0")])), 1);
        registry.register(
            adapter("chocolatey", || Err(SourceError::Unavailable("chocolatey is not installed".into()))),
            2,
        );

        let snapshot = scan(&registry, Duration::from_secs(5)).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.unavailable.len(), 1);
        assert_eq!(snapshot.unavailable[0].source.as_str(), "chocolatey");
        assert!(snapshot.unavailable[0].reason.contains("not installed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let mut registry = SourceRegistry::new();
        registry.register(
            Arc::new(crate::test_utils::FakeAdapter::new("winget").slow_listing(Duration::from_secs(60))),
            1,
        );

        let snapshot = scan(&registry, Duration::from_secs(1)).await;
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.unavailable[0].reason, SourceError::Timeout.to_string());
    }
}
