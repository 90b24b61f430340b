use crate::engine::BatchReport;
use crate::inventory::InventorySnapshot;
use crate::orchestrator::{CandidateState, OrchestratorEvent};

/// One line per program, sorted by canonical id.
pub fn inventory_lines(snapshot: &InventorySnapshot) -> Vec<String> {
    snapshot
        .records
        .values()
        .map(|r| {
            let sources: Vec<&str> = r.sources.keys().map(|s| s.as_str()).collect();
            let mut line = format!("{} {}", r.display_name, r.installed_version);
            if let Some(vendor) = &r.vendor {
                line.push_str(&format!(" ({})", vendor));
            }
            line.push_str(&format!(" [{}]", sources.join(", ")));
            line
        })
        .collect()
}

pub fn unavailable_lines(snapshot: &InventorySnapshot) -> Vec<String> {
    snapshot
        .unavailable
        .iter()
        .map(|u| format!("warning: source {} unavailable: {}", u.source, u.reason))
        .collect()
}

pub fn candidate_lines(report: &BatchReport) -> Vec<String> {
    report
        .candidates
        .iter()
        .map(|c| {
            let mut line = format!(
                "{} {} -> {} ({})",
                c.display_name, c.from_version, c.to_version, c.source
            );
            if let Some(reason) = &c.exclusion {
                line.push_str(&format!(" [skipped: {}]", reason));
            }
            line
        })
        .collect()
}

/// Progress line for an event, if it is worth showing.
pub fn describe(event: &OrchestratorEvent) -> Option<String> {
    match event {
        OrchestratorEvent::Transition { canonical_id, to, .. } => match to {
            CandidateState::Applying => Some(format!("Updating {}...", canonical_id)),
            CandidateState::RollingBack => Some(format!("Restoring {}...", canonical_id)),
            _ => None,
        },
        OrchestratorEvent::Outcome {
            display_name,
            outcome,
            ..
        } => Some(format!("{}: {}", display_name, outcome)),
    }
}
