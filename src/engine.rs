//! The single entry point for a scan/resolve/apply batch.
//!
//! The CLI and any scheduler drive the pipeline the same way, through
//! [`Engine::run_batch`].

use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::backup::BackupStore;
use crate::config::Config;
use crate::inventory::{self, InventorySnapshot, name_key};
use crate::orchestrator::{
    CancelToken, CandidateReport, Orchestrator, OrchestratorEvent, OrchestratorSettings, SkipReason,
    UpdateOutcome,
};
use crate::policy::{ExclusionRules, PolicyFilter};
use crate::resolver::{self, DisagreementPolicy, Undecidable, UpdateCandidate};
use crate::runtime::Runtime;
use crate::source::SourceRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchMode {
    /// Inventory and candidates only; nothing is applied.
    ScanOnly,
    ApplyAll,
    /// Apply only candidates matching one of these canonical ids, program
    /// names or package ids.
    ApplySelected(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn from_reports(reports: &[CandidateReport]) -> Self {
        let mut summary = BatchSummary {
            total: reports.len(),
            ..Default::default()
        };
        for report in reports {
            match report.outcome {
                UpdateOutcome::Success => summary.success += 1,
                UpdateOutcome::Failed(_) => summary.failed += 1,
                UpdateOutcome::RolledBack(_) => summary.rolled_back += 1,
                UpdateOutcome::Skipped(_) => summary.skipped += 1,
            }
        }
        summary
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidate(s): {} updated, {} failed, {} rolled back, {} skipped",
            self.total, self.success, self.failed, self.rolled_back, self.skipped
        )
    }
}

/// Everything one batch saw and did.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub snapshot: InventorySnapshot,
    /// Includes excluded candidates.
    pub candidates: Vec<UpdateCandidate>,
    pub undecidable: Vec<Undecidable>,
    /// Empty for [`BatchMode::ScanOnly`].
    pub outcomes: Vec<CandidateReport>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub query_timeout: Duration,
    pub max_concurrent_queries: usize,
    pub disagreement: DisagreementPolicy,
    pub exclusions: ExclusionRules,
    pub orchestrator: OrchestratorSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(120),
            max_concurrent_queries: 8,
            disagreement: DisagreementPolicy::default(),
            exclusions: ExclusionRules::default(),
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config, assume_yes: bool) -> Self {
        Self {
            query_timeout: config.query_timeout(),
            disagreement: config.update.disagreement,
            exclusions: config.exclusions.clone(),
            orchestrator: config.orchestrator_settings(assume_yes),
            ..Default::default()
        }
    }
}

pub struct Engine {
    registry: Arc<SourceRegistry>,
    backups: Arc<dyn BackupStore>,
    runtime: Arc<dyn Runtime>,
    settings: EngineSettings,
    events: Option<UnboundedSender<OrchestratorEvent>>,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(
        registry: Arc<SourceRegistry>,
        backups: Arc<dyn BackupStore>,
        runtime: Arc<dyn Runtime>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            backups,
            runtime,
            settings,
            events: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn scan(&self) -> InventorySnapshot {
        inventory::scan(&self.registry, self.settings.query_timeout).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn run_batch(&self, mode: BatchMode) -> BatchReport {
        let snapshot = self.scan().await;
        info!(
            "Found {} program(s), {} source(s) unavailable",
            snapshot.len(),
            snapshot.unavailable.len()
        );

        let offers = resolver::collect_offers(
            &self.registry,
            &snapshot,
            self.settings.query_timeout,
            self.settings.max_concurrent_queries,
        )
        .await;
        let resolution = resolver::resolve_all(&snapshot, &offers, self.settings.disagreement);
        let mut candidates = resolution.candidates;
        PolicyFilter::from_registry(self.settings.exclusions.clone(), &self.registry)
            .apply(&mut candidates);
        info!("{} update(s) available", candidates.len());

        let outcomes = match &mode {
            BatchMode::ScanOnly => Vec::new(),
            BatchMode::ApplyAll => self.orchestrator().run(&candidates).await,
            BatchMode::ApplySelected(ids) => self.apply_selected(&candidates, ids).await,
        };

        BatchReport {
            summary: BatchSummary::from_reports(&outcomes),
            snapshot,
            candidates,
            undecidable: resolution.undecidable,
            outcomes,
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        let orchestrator = Orchestrator::new(
            self.registry.clone(),
            self.backups.clone(),
            self.runtime.clone(),
            self.settings.orchestrator.clone(),
        )
        .with_cancel(self.cancel.clone());
        match &self.events {
            Some(events) => orchestrator.with_events(events.clone()),
            None => orchestrator,
        }
    }

    async fn apply_selected(&self, candidates: &[UpdateCandidate], ids: &[String]) -> Vec<CandidateReport> {
        for id in ids {
            if !candidates.iter().any(|c| is_selected(c, id)) {
                warn!("No available update matches {:?}", id);
            }
        }

        let orchestrator = self.orchestrator();
        let (selected, rest): (Vec<_>, Vec<_>) = candidates
            .iter()
            .enumerate()
            .partition(|(_, c)| ids.iter().any(|id| is_selected(c, id)));

        let chosen: Vec<UpdateCandidate> = selected.iter().map(|(_, c)| (*c).clone()).collect();
        let ran = orchestrator.run(&chosen).await;

        let mut reports: Vec<Option<CandidateReport>> = candidates.iter().map(|_| None).collect();
        for ((idx, _), report) in selected.into_iter().zip(ran) {
            reports[idx] = Some(report);
        }
        for (idx, candidate) in rest {
            reports[idx] = Some(orchestrator.skip(candidate, SkipReason::NotSelected));
        }
        reports.into_iter().flatten().collect()
    }
}

/// Exact canonical id or package id, or a name fragment: `firefox` selects
/// "Mozilla Firefox (x64 en-US)".
fn is_selected(candidate: &UpdateCandidate, id: &str) -> bool {
    let id = id.trim();
    let key = name_key(id);
    candidate.canonical_id.eq_ignore_ascii_case(id)
        || (!key.is_empty() && name_key(&candidate.display_name).contains(&key))
        || candidate
            .package_id
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::MemoryBackupStore;
    use crate::error::UpdateError;
    use crate::orchestrator::{CandidateState, Confirmation};
    use crate::runtime::MockRuntime;
    use crate::source::RawRecord;
    use crate::test_utils::{FakeAdapter, Step};
    use tokio::sync::mpsc;

    fn settings() -> EngineSettings {
        EngineSettings {
            query_timeout: Duration::from_secs(5),
            orchestrator: OrchestratorSettings {
                retry_count: 1,
                retry_delay: Duration::ZERO,
                confirmation: Confirmation::NotRequired,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn engine(adapters: &[Arc<FakeAdapter>], backups: Arc<MemoryBackupStore>, settings: EngineSettings) -> Engine {
        let mut registry = SourceRegistry::new();
        for (i, adapter) in adapters.iter().enumerate() {
            registry.register(adapter.clone(), i as u32 + 1);
        }
        Engine::new(Arc::new(registry), backups, Arc::new(MockRuntime::new()), settings)
    }

    fn firefox_sources() -> (Arc<FakeAdapter>, Arc<FakeAdapter>) {
        let a = FakeAdapter::new("a")
            .installed(RawRecord::new("Firefox", "101.0").package_id("Mozilla.Firefox"))
            .available("Mozilla.Firefox", "102.0");
        let b = FakeAdapter::new("b")
            .installed(RawRecord::new("Firefox", "101.0").package_id("firefox"))
            .available("firefox", "101.0");
        (Arc::new(a), Arc::new(b))
    }

    #[test_log::test(tokio::test)]
    async fn test_firefox_end_to_end() {
        let (a, b) = firefox_sources();
        let backups = Arc::new(MemoryBackupStore::new());
        let engine = engine(&[a.clone(), b.clone()], backups.clone(), settings());

        let report = engine.run_batch(BatchMode::ApplyAll).await;

        assert_eq!(report.snapshot.len(), 1);
        assert_eq!(report.candidates.len(), 1);
        let candidate = &report.candidates[0];
        assert_eq!(candidate.from_version.as_str(), "101.0");
        assert_eq!(candidate.to_version.as_str(), "102.0");
        assert_eq!(candidate.source.as_str(), "a");
        assert_eq!(candidate.package_id.as_deref(), Some("Mozilla.Firefox"));

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].outcome, UpdateOutcome::Success);
        assert_eq!(a.version_of("Firefox").as_deref(), Some("102.0"));
        assert_eq!(b.apply_calls(), 0);
        assert_eq!(backups.len(), 1);
        assert_eq!(
            report.summary,
            BatchSummary {
                total: 1,
                success: 1,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_scan_only_applies_nothing() {
        let (a, b) = firefox_sources();
        let backups = Arc::new(MemoryBackupStore::new());
        let engine = engine(&[a.clone(), b.clone()], backups.clone(), settings());

        let report = engine.run_batch(BatchMode::ScanOnly).await;

        assert_eq!(report.candidates.len(), 1);
        assert!(report.outcomes.is_empty());
        assert_eq!(report.summary, BatchSummary::default());
        assert_eq!(a.apply_calls(), 0);
        assert!(backups.is_empty());
    }

    #[tokio::test]
    async fn test_excluded_candidates_reported_as_skipped() {
        let winget = Arc::new(
            FakeAdapter::new("winget")
                .installed(RawRecord::new("Realtek Audio Driver", "1.0").package_id("Realtek.Audio"))
                .installed(RawRecord::new("7-Zip", "22.01").package_id("7zip.7zip"))
                .available("Realtek.Audio", "1.1")
                .available("7zip.7zip", "23.01"),
        );
        let mut settings = settings();
        settings.exclusions.keywords = vec!["driver".into()];
        let engine = engine(&[winget.clone()], Arc::new(MemoryBackupStore::new()), settings);

        let report = engine.run_batch(BatchMode::ApplyAll).await;

        assert_eq!(report.candidates.len(), 2);
        let driver = report
            .outcomes
            .iter()
            .find(|r| r.display_name == "Realtek Audio Driver")
            .unwrap();
        assert_eq!(driver.outcome.code(), Some("excluded"));
        assert!(driver.history.is_empty());
        assert_eq!(winget.apply_calls(), 1);
        assert_eq!(report.summary.success, 1);
        assert_eq!(report.summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_apply_selected() {
        let winget = Arc::new(
            FakeAdapter::new("winget")
                .installed(RawRecord::new("Firefox", "101.0").package_id("Mozilla.Firefox"))
                .installed(RawRecord::new("7-Zip", "22.01").package_id("7zip.7zip"))
                .available("Mozilla.Firefox", "102.0")
                .available("7zip.7zip", "23.01"),
        );
        let engine = engine(&[winget.clone()], Arc::new(MemoryBackupStore::new()), settings());

        let report = engine
            .run_batch(BatchMode::ApplySelected(vec!["mozilla.firefox".into(), "nothing".into()]))
            .await;

        assert_eq!(report.outcomes.len(), 2);
        let by_name = |name: &str| {
            report
                .outcomes
                .iter()
                .find(|r| r.display_name == name)
                .unwrap()
        };
        assert_eq!(by_name("Firefox").outcome, UpdateOutcome::Success);
        assert_eq!(
            by_name("7-Zip").outcome,
            UpdateOutcome::Skipped(SkipReason::NotSelected)
        );
        assert_eq!(by_name("7-Zip").state, CandidateState::Pending);
        assert_eq!(winget.version_of("7-Zip").as_deref(), Some("22.01"));
    }

    #[tokio::test]
    async fn test_apply_selected_by_short_name() {
        let winget = Arc::new(
            FakeAdapter::new("winget")
                .installed(RawRecord::new("Mozilla Firefox (x64 en-US)", "101.0").package_id("Mozilla.Firefox"))
                .installed(RawRecord::new("7-Zip", "22.01").package_id("7zip.7zip"))
                .available("Mozilla.Firefox", "102.0")
                .available("7zip.7zip", "23.01"),
        );
        let engine = engine(&[winget.clone()], Arc::new(MemoryBackupStore::new()), settings());

        let report = engine
            .run_batch(BatchMode::ApplySelected(vec!["firefox".into()]))
            .await;

        let firefox = report
            .outcomes
            .iter()
            .find(|r| r.display_name.starts_with("Mozilla Firefox"))
            .unwrap();
        assert_eq!(firefox.outcome, UpdateOutcome::Success);
        assert_eq!(winget.apply_calls(), 1);
        assert_eq!(
            winget.version_of("Mozilla Firefox (x64 en-US)").as_deref(),
            Some("102.0")
        );
        assert_eq!(report.summary.skipped, 1);
    }

    #[test]
    fn test_is_selected() {
        let candidate = UpdateCandidate {
            canonical_id: "mozilla firefox@mozilla".into(),
            display_name: "Mozilla Firefox".into(),
            vendor: Some("Mozilla".into()),
            from_version: crate::version::Version::parse("1"),
            to_version: crate::version::Version::parse("2"),
            source: "winget".into(),
            package_id: Some("Mozilla.Firefox".into()),
            excluded: false,
            exclusion: None,
            priority: 1,
        };
        assert!(is_selected(&candidate, "Mozilla Firefox@Mozilla"));
        assert!(is_selected(&candidate, "mozilla  firefox"));
        assert!(is_selected(&candidate, "mozilla.firefox"));
        assert!(is_selected(&candidate, "Firefox"));
        assert!(!is_selected(&candidate, "thunderbird"));
        assert!(!is_selected(&candidate, "---"));
    }

    #[tokio::test]
    async fn test_partial_failure_still_summarized() {
        let winget = Arc::new(
            FakeAdapter::new("winget")
                .installed(RawRecord::new("Alpha", "1.0").package_id("alpha"))
                .installed(RawRecord::new("Beta", "1.0").package_id("beta"))
                .available("alpha", "2.0")
                .available("beta", "2.0")
                .script(vec![Step::Fail("installer exited with 1"); 4]),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine(&[winget.clone()], Arc::new(MemoryBackupStore::new()), settings()).with_events(tx);

        let report = engine.run_batch(BatchMode::ApplyAll).await;

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.rolled_back, 2);
        assert_eq!(report.summary.success, 0);
        for r in &report.outcomes {
            assert_eq!(
                r.outcome,
                UpdateOutcome::RolledBack(UpdateError::ApplyFailed("installer exited with 1".into()))
            );
        }

        drop(engine);
        let mut outcomes = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, OrchestratorEvent::Outcome { .. }) {
                outcomes += 1;
            }
        }
        assert_eq!(outcomes, 2);
    }

    #[tokio::test]
    async fn test_unavailable_source_degrades_snapshot() {
        let registry_adapter = Arc::new(FakeAdapter::new("registry").slow_listing(Duration::from_secs(60)));
        let winget = Arc::new(
            FakeAdapter::new("winget")
                .installed(RawRecord::new("Firefox", "101.0").package_id("Mozilla.Firefox")),
        );
        let mut settings = settings();
        settings.query_timeout = Duration::from_millis(50);
        let engine = engine(&[winget, registry_adapter], Arc::new(MemoryBackupStore::new()), settings);

        let report = engine.run_batch(BatchMode::ApplyAll).await;

        assert_eq!(report.snapshot.len(), 1);
        assert_eq!(report.snapshot.unavailable.len(), 1);
        assert_eq!(report.snapshot.unavailable[0].source.as_str(), "registry");
        assert!(report.candidates.is_empty());
        assert_eq!(report.summary.total, 0);
    }
}
