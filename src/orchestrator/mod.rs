//! Drives update candidates through backup, apply, verify and rollback.
//!
//! Every candidate runs its own [`StateMachine`]. Candidates are independent:
//! a failure ends that candidate only. Apply operations that share an
//! [`ApplyChannel`] never overlap, since the package manager behind a channel
//! keeps a single lock/state file.

mod cancel;
mod outcome;
mod state;

use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::backup::{BackupRecord, BackupStore};
use crate::error::UpdateError;
use crate::resolver::UpdateCandidate;
use crate::runtime::Runtime;
use crate::source::{ApplyChannel, ApplyTarget, SourceAdapter, SourceRegistry};
use crate::version::Version;

pub use cancel::CancelToken;
pub use outcome::{CandidateReport, OrchestratorEvent, SkipReason, UpdateOutcome};
pub use state::{CandidateState, InvalidTransition, StateMachine, Transition};

/// When to ask before touching anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    NotRequired,
    /// One question for the whole batch.
    Batch,
    /// One question per candidate.
    PerItem,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub apply_timeout: Duration,
    pub verify_timeout: Duration,
    pub backup_timeout: Duration,
    /// Extra apply attempts after the first one fails.
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub max_concurrent: usize,
    pub confirmation: Confirmation,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            apply_timeout: Duration::from_secs(600),
            verify_timeout: Duration::from_secs(120),
            backup_timeout: Duration::from_secs(30),
            retry_count: 2,
            retry_delay: Duration::from_secs(1),
            max_concurrent: 3,
            confirmation: Confirmation::NotRequired,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    backups: Arc<dyn BackupStore>,
    runtime: Arc<dyn Runtime>,
    settings: OrchestratorSettings,
    events: Option<UnboundedSender<OrchestratorEvent>>,
    cancel: CancelToken,
    channels: Mutex<HashMap<ApplyChannel, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        backups: Arc<dyn BackupStore>,
        runtime: Arc<dyn Runtime>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            backups,
            runtime,
            settings,
            events: None,
            cancel: CancelToken::new(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Send transitions and outcomes to `events` as they happen.
    pub fn with_events(mut self, events: UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process a batch. Returns one report per candidate, in input order.
    #[tracing::instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn run(&self, candidates: &[UpdateCandidate]) -> Vec<CandidateReport> {
        let mut reports: Vec<Option<CandidateReport>> = candidates.iter().map(|_| None).collect();

        let mut eligible = Vec::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            if candidate.excluded {
                let why = candidate
                    .exclusion
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "excluded by policy".to_string());
                reports[idx] = Some(self.skip(candidate, SkipReason::Excluded(why)));
            } else {
                eligible.push((idx, candidate));
            }
        }

        let (approved, declined) = self.confirm(eligible);
        for (idx, candidate) in declined {
            reports[idx] = Some(self.skip(candidate, SkipReason::NotConfirmed));
        }

        let done: Vec<(usize, CandidateReport)> = stream::iter(approved)
            .map(|(idx, candidate)| async move { (idx, self.process(candidate).await) })
            .buffer_unordered(self.settings.max_concurrent.max(1))
            .collect()
            .await;
        for (idx, report) in done {
            reports[idx] = Some(report);
        }

        reports.into_iter().flatten().collect()
    }

    /// Report `candidate` as skipped without touching it.
    pub fn skip(&self, candidate: &UpdateCandidate, reason: SkipReason) -> CandidateReport {
        Run::new(self, candidate).finish(UpdateOutcome::Skipped(reason))
    }

    fn confirm<'c>(
        &self,
        eligible: Vec<(usize, &'c UpdateCandidate)>,
    ) -> (Vec<(usize, &'c UpdateCandidate)>, Vec<(usize, &'c UpdateCandidate)>) {
        if eligible.is_empty() {
            return (eligible, Vec::new());
        }
        match self.settings.confirmation {
            Confirmation::NotRequired => (eligible, Vec::new()),
            Confirmation::Batch => {
                let mut prompt = format!("The following {} program(s) will be updated:\n", eligible.len());
                for (_, c) in &eligible {
                    prompt.push_str(&format!(
                        "  {} {} -> {} ({})\n",
                        c.display_name, c.from_version, c.to_version, c.source
                    ));
                }
                prompt.push_str("Proceed?");
                if self.ask(&prompt) {
                    (eligible, Vec::new())
                } else {
                    (Vec::new(), eligible)
                }
            }
            Confirmation::PerItem => eligible.into_iter().partition(|(_, c)| {
                self.ask(&format!(
                    "Update {} {} -> {} ({})?",
                    c.display_name, c.from_version, c.to_version, c.source
                ))
            }),
        }
    }

    fn ask(&self, prompt: &str) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.runtime.confirm(prompt).unwrap_or_else(|e| {
            warn!("Could not read confirmation: {:#}", e);
            false
        })
    }

    fn channel_lock(&self, channel: &ApplyChannel) -> Arc<tokio::sync::Mutex<()>> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.entry(channel.clone()).or_default().clone()
    }

    async fn process(&self, candidate: &UpdateCandidate) -> CandidateReport {
        let mut run = Run::new(self, candidate);
        if self.cancel.is_cancelled() {
            return run.finish(UpdateOutcome::Skipped(SkipReason::Cancelled));
        }
        let Some(adapter) = self.registry.get(&candidate.source).cloned() else {
            return run.finish(UpdateOutcome::Skipped(SkipReason::SourceUnavailable(
                candidate.source.clone(),
            )));
        };
        let target = candidate.apply_target();

        run.enter(CandidateState::BackingUp);
        let backup = BackupRecord::new(
            &target,
            candidate.from_version.as_str(),
            adapter.id(),
            adapter.channel(),
        );
        match tokio::time::timeout(self.settings.backup_timeout, self.backups.write(&backup)).await {
            Ok(Ok(())) => run.backup = Some(backup.timestamp),
            Ok(Err(e)) => return run.fail(UpdateError::BackupUnavailable(format!("{:#}", e))),
            Err(_) => {
                return run.fail(UpdateError::BackupUnavailable(
                    "backup store did not respond in time".into(),
                ));
            }
        }

        let lock = self.channel_lock(&adapter.channel());
        let guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            guard = lock.lock() => Some(guard),
        };
        let Some(_guard) = guard else {
            return run.fail(UpdateError::Cancelled);
        };

        let cause = loop {
            run.attempts += 1;
            run.enter(CandidateState::Applying);
            let result = match self.apply(adapter.as_ref(), &target, &candidate.to_version).await {
                Ok(()) => {
                    run.enter(CandidateState::Verifying);
                    self.verify(adapter.as_ref(), &target, &candidate.to_version).await
                }
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(()) => {
                    run.enter(CandidateState::Committed);
                    return run.finish(UpdateOutcome::Success);
                }
                Err(e) => e,
            };
            warn!(
                "{} attempt {}/{} failed: {}",
                candidate.display_name,
                run.attempts,
                self.settings.retry_count + 1,
                err
            );
            if !err.is_retryable() || run.attempts > self.settings.retry_count {
                break err;
            }
            let cancelled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = tokio::time::sleep(self.settings.retry_delay) => false,
            };
            if cancelled {
                break err;
            }
        };

        self.roll_back(run, adapter.as_ref(), &target, &backup, cause).await
    }

    async fn apply(
        &self,
        adapter: &dyn SourceAdapter,
        target: &ApplyTarget,
        to_version: &Version,
    ) -> Result<(), UpdateError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UpdateError::Cancelled),
            result = tokio::time::timeout(
                self.settings.apply_timeout,
                adapter.apply(target, to_version.as_str()),
            ) => match result {
                Ok(applied) => applied.map_err(UpdateError::from),
                Err(_) => Err(UpdateError::ApplyTimeout),
            },
        }
    }

    async fn verify(
        &self,
        adapter: &dyn SourceAdapter,
        target: &ApplyTarget,
        expected: &Version,
    ) -> Result<(), UpdateError> {
        let reread = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
            result = tokio::time::timeout(
                self.settings.verify_timeout,
                adapter.installed_version(target),
            ) => result,
        };
        let found = match reread {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!("Could not re-read version of {}: {}", target.display_name, e);
                None
            }
            Err(_) => {
                warn!("Re-reading version of {} timed out", target.display_name);
                None
            }
        };
        match found {
            Some(v) if Version::parse(&v).is_at_least(expected) => Ok(()),
            found => Err(UpdateError::VerifyMismatch {
                expected: expected.to_string(),
                found,
            }),
        }
    }

    async fn roll_back(
        &self,
        mut run: Run<'_>,
        adapter: &dyn SourceAdapter,
        target: &ApplyTarget,
        backup: &BackupRecord,
        cause: UpdateError,
    ) -> CandidateReport {
        run.enter(CandidateState::RollingBack);
        let reason = match tokio::time::timeout(
            self.settings.apply_timeout,
            adapter.rollback(target, backup),
        )
        .await
        {
            Ok(Ok(())) => cause,
            Ok(Err(e)) => UpdateError::RollbackIncomplete(format!("{} after {}", e, cause.code())),
            Err(_) => UpdateError::RollbackIncomplete(format!("restore timed out after {}", cause.code())),
        };
        run.enter(CandidateState::RolledBack);
        run.finish(UpdateOutcome::RolledBack(reason))
    }
}

/// Bookkeeping for one candidate while it is processed.
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    candidate: &'a UpdateCandidate,
    machine: StateMachine,
    attempts: u32,
    backup: Option<chrono::DateTime<chrono::Utc>>,
}

impl<'a> Run<'a> {
    fn new(orchestrator: &'a Orchestrator, candidate: &'a UpdateCandidate) -> Self {
        Self {
            orchestrator,
            candidate,
            machine: StateMachine::new(),
            attempts: 0,
            backup: None,
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(events) = &self.orchestrator.events {
            // the receiver may have gone away; progress output is optional
            let _ = events.send(event);
        }
    }

    fn enter(&mut self, to: CandidateState) {
        match self.machine.advance(to) {
            Ok(t) => {
                debug!("{}: {} -> {}", self.candidate.canonical_id, t.from, t.to);
                let event = OrchestratorEvent::Transition {
                    canonical_id: self.candidate.canonical_id.clone(),
                    from: t.from,
                    to: t.to,
                };
                self.emit(event);
            }
            Err(e) => error!("{}: {}", self.candidate.canonical_id, e),
        }
    }

    fn fail(mut self, err: UpdateError) -> CandidateReport {
        self.enter(CandidateState::Failed);
        self.finish(UpdateOutcome::Failed(err))
    }

    fn finish(self, outcome: UpdateOutcome) -> CandidateReport {
        info!("{}: {}", self.candidate.display_name, outcome);
        self.emit(OrchestratorEvent::Outcome {
            canonical_id: self.candidate.canonical_id.clone(),
            display_name: self.candidate.display_name.clone(),
            outcome: outcome.clone(),
        });
        CandidateReport {
            canonical_id: self.candidate.canonical_id.clone(),
            display_name: self.candidate.display_name.clone(),
            from_version: self.candidate.from_version.to_string(),
            to_version: self.candidate.to_version.to_string(),
            source: self.candidate.source.clone(),
            state: self.machine.state(),
            outcome,
            attempts: self.attempts,
            backup: self.backup,
            history: self.machine.history().to_vec(),
        }
    }
}
