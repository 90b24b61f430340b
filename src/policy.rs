//! Exclusion rules and source priority annotation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::resolver::UpdateCandidate;
use crate::source::{SourceId, SourceRegistry};

/// Programs the user never wants updated automatically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionRules {
    /// Exact or prefix match on display name or canonical id.
    pub programs: Vec<String>,
    /// Exact match on vendor.
    pub publishers: Vec<String>,
    /// Substring match on display name.
    pub keywords: Vec<String>,
}

/// Which rule excluded a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", content = "entry", rename_all = "snake_case")]
pub enum ExclusionReason {
    Program(String),
    Publisher(String),
    Keyword(String),
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Program(p) => write!(f, "excluded program \"{}\"", p),
            ExclusionReason::Publisher(p) => write!(f, "excluded publisher \"{}\"", p),
            ExclusionReason::Keyword(k) => write!(f, "excluded keyword \"{}\"", k),
        }
    }
}

impl ExclusionRules {
    /// The first rule matching `candidate`, if any.
    pub fn check(&self, candidate: &UpdateCandidate) -> Option<ExclusionReason> {
        let name = candidate.display_name.to_lowercase();
        let id = candidate.canonical_id.to_lowercase();

        for entry in &self.programs {
            let entry_lower = entry.trim().to_lowercase();
            if entry_lower.is_empty() {
                continue;
            }
            if name.starts_with(&entry_lower) || id.starts_with(&entry_lower) {
                return Some(ExclusionReason::Program(entry.clone()));
            }
        }

        if let Some(vendor) = &candidate.vendor {
            let vendor = vendor.trim();
            if let Some(entry) = self
                .publishers
                .iter()
                .find(|p| p.trim().eq_ignore_ascii_case(vendor))
            {
                return Some(ExclusionReason::Publisher(entry.clone()));
            }
        }

        self.keywords
            .iter()
            .find(|k| !k.trim().is_empty() && name.contains(&k.trim().to_lowercase()))
            .map(|k| ExclusionReason::Keyword(k.clone()))
    }
}

/// Marks excluded candidates and annotates the rest with source priority.
pub struct PolicyFilter {
    rules: ExclusionRules,
    priorities: BTreeMap<SourceId, u32>,
}

impl PolicyFilter {
    pub fn new(rules: ExclusionRules, priorities: BTreeMap<SourceId, u32>) -> Self {
        Self { rules, priorities }
    }

    /// Use the priorities the adapters were registered with.
    pub fn from_registry(rules: ExclusionRules, registry: &SourceRegistry) -> Self {
        let priorities = registry
            .iter()
            .filter_map(|a| {
                let id = a.id();
                registry.priority_of(&id).map(|p| (id, p))
            })
            .collect();
        Self::new(rules, priorities)
    }

    pub fn apply(&self, candidates: &mut [UpdateCandidate]) {
        for candidate in candidates.iter_mut() {
            match self.rules.check(candidate) {
                Some(reason) => {
                    log::info!("Skipping {}: {}", candidate.display_name, reason);
                    candidate.excluded = true;
                    candidate.exclusion = Some(reason);
                }
                None => {
                    candidate.excluded = false;
                    candidate.exclusion = None;
                    if let Some(priority) = self.priorities.get(&candidate.source) {
                        candidate.priority = *priority;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn candidate(name: &str, vendor: Option<&str>) -> UpdateCandidate {
        UpdateCandidate {
            canonical_id: crate::inventory::canonical_key(name, vendor),
            display_name: name.into(),
            vendor: vendor.map(String::from),
            from_version: Version::parse("1.0"),
            to_version: Version::parse("2.0"),
            source: "winget".into(),
            package_id: None,
            excluded: false,
            exclusion: None,
            priority: 0,
        }
    }

    fn rules() -> ExclusionRules {
        ExclusionRules {
            programs: vec![
                "Windows Security".into(),
                "Microsoft Edge WebView2".into(),
            ],
            publishers: vec!["Microsoft Corporation".into()],
            keywords: vec!["driver".into(), "codec".into()],
        }
    }

    #[test]
    fn test_program_exact_and_prefix() {
        let rules = rules();
        assert_eq!(
            rules.check(&candidate("windows security", None)),
            Some(ExclusionReason::Program("Windows Security".into()))
        );
        assert!(rules.check(&candidate("Microsoft Edge WebView2 Runtime", None)).is_some());
        assert!(rules.check(&candidate("Security Windows", None)).is_none());
    }

    #[test]
    fn test_program_matches_canonical_id() {
        let rules = ExclusionRules {
            programs: vec!["mozilla firefox@mozilla".into()],
            ..Default::default()
        };
        assert!(rules.check(&candidate("Mozilla Firefox", Some("Mozilla"))).is_some());
        assert!(rules.check(&candidate("Mozilla Firefox", Some("Other"))).is_none());
    }

    #[test]
    fn test_publisher_and_keyword() {
        let rules = rules();
        assert_eq!(
            rules.check(&candidate("Teams", Some("microsoft corporation"))),
            Some(ExclusionReason::Publisher("Microsoft Corporation".into()))
        );
        assert_eq!(
            rules.check(&candidate("NVIDIA Graphics Driver", Some("NVIDIA"))),
            Some(ExclusionReason::Keyword("driver".into()))
        );
        assert!(rules.check(&candidate("Mozilla Firefox", Some("Mozilla"))).is_none());
    }

    #[test]
    fn test_empty_entries_never_match() {
        let rules = ExclusionRules {
            programs: vec!["".into()],
            publishers: vec![],
            keywords: vec!["  ".into()],
        };
        assert!(rules.check(&candidate("Anything", None)).is_none());
    }

    #[test]
    fn test_filter_marks_and_annotates() {
        let mut priorities = BTreeMap::new();
        priorities.insert(SourceId::new("winget"), 1);
        let filter = PolicyFilter::new(rules(), priorities);

        let mut candidates = vec![candidate("K-Lite Codec Pack", None), candidate("Git", None)];
        filter.apply(&mut candidates);

        assert!(candidates[0].excluded);
        assert_eq!(candidates[0].exclusion.as_ref().unwrap().to_string(), "excluded keyword \"codec\"");
        assert!(!candidates[1].excluded);
        assert_eq!(candidates[1].priority, 1);
    }
}
