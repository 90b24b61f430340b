//! User configuration, stored as JSON.
//!
//! A missing file is created with defaults on first use. A file that exists
//! but cannot be read or parsed is an error: nothing runs on a configuration
//! the user did not intend.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::{Confirmation, OrchestratorSettings};
use crate::policy::ExclusionRules;
use crate::resolver::DisagreementPolicy;
use crate::runtime::Runtime;

const APP_DIR: &str = "upkeep";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-source switches, keyed by source id.
    pub sources: BTreeMap<String, SourceSettings>,
    pub exclusions: ExclusionRules,
    pub update: UpdateSettings,
    pub backup: BackupSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub enabled: bool,
    /// Lower is more trusted.
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationScope {
    #[default]
    Batch,
    PerItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    pub require_confirmation: bool,
    pub confirmation_scope: ConfirmationScope,
    pub max_concurrent: usize,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub apply_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub backup_timeout_secs: u64,
    pub disagreement: DisagreementPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Defaults to `<data dir>/upkeep/backups`.
    pub directory: Option<PathBuf>,
    /// How long the cleanup job should keep backups; not enforced here.
    pub retention_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        let sources = [("winget", 1), ("chocolatey", 2), ("registry", 3)]
            .into_iter()
            .map(|(id, priority)| {
                (
                    id.to_string(),
                    SourceSettings {
                        enabled: true,
                        priority,
                    },
                )
            })
            .collect();
        Self {
            sources,
            exclusions: ExclusionRules {
                programs: vec![
                    "Windows Security".into(),
                    "Microsoft Edge WebView2".into(),
                    "Microsoft Visual C++ Redistributable".into(),
                ],
                publishers: vec!["Microsoft Corporation".into()],
                keywords: vec!["driver".into(), "codec".into()],
            },
            update: UpdateSettings::default(),
            backup: BackupSettings::default(),
        }
    }
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            confirmation_scope: ConfirmationScope::Batch,
            max_concurrent: 3,
            retry_count: 2,
            retry_delay_ms: 1000,
            apply_timeout_secs: 600,
            query_timeout_secs: 120,
            backup_timeout_secs: 30,
            disagreement: DisagreementPolicy::HighestVersion,
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            directory: None,
            retention_days: 30,
        }
    }
}

impl Config {
    /// Returns: `<config dir>/upkeep/config.json`
    pub fn default_path<R: Runtime + ?Sized>(runtime: &R) -> Result<PathBuf> {
        let dir = runtime
            .config_dir()
            .context("Could not find the configuration directory")?;
        Ok(dir.join(APP_DIR).join("config.json"))
    }

    /// Load `path`, writing a default configuration there if it does not exist.
    #[tracing::instrument(skip(runtime))]
    pub fn load_or_init<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        if !runtime.exists(path) {
            info!("No configuration at {:?}, writing defaults", path);
            let config = Config::default();
            config.save(runtime, path)?;
            return Ok(config);
        }
        let content = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid configuration {:?}", path))?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn save<R: Runtime + ?Sized>(&self, runtime: &R, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !runtime.exists(parent)
        {
            runtime.create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        runtime
            .write(path, content.as_bytes())
            .with_context(|| format!("Failed to save configuration to {:?}", path))
    }

    /// Priority of `source`, or `None` when it is disabled.
    ///
    /// Sources missing from the file use their built-in defaults.
    pub fn source_priority(&self, source: &str) -> Option<u32> {
        let settings = self
            .sources
            .get(source)
            .copied()
            .or_else(|| Config::default().sources.get(source).copied())?;
        settings.enabled.then_some(settings.priority)
    }

    /// Configured backup directory, or `<data dir>/upkeep/backups`.
    pub fn backup_dir<R: Runtime + ?Sized>(&self, runtime: &R) -> Result<PathBuf> {
        match &self.backup.directory {
            Some(dir) => Ok(dir.clone()),
            None => {
                let data = runtime
                    .data_dir()
                    .context("Could not find the data directory")?;
                Ok(data.join(APP_DIR).join("backups"))
            }
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.update.query_timeout_secs)
    }

    /// `assume_yes` skips the confirmation gate.
    pub fn orchestrator_settings(&self, assume_yes: bool) -> OrchestratorSettings {
        let u = &self.update;
        let confirmation = match (u.require_confirmation && !assume_yes, u.confirmation_scope) {
            (false, _) => Confirmation::NotRequired,
            (true, ConfirmationScope::Batch) => Confirmation::Batch,
            (true, ConfirmationScope::PerItem) => Confirmation::PerItem,
        };
        OrchestratorSettings {
            apply_timeout: Duration::from_secs(u.apply_timeout_secs),
            verify_timeout: Duration::from_secs(u.query_timeout_secs),
            backup_timeout: Duration::from_secs(u.backup_timeout_secs),
            retry_count: u.retry_count,
            retry_delay: Duration::from_millis(u.retry_delay_ms),
            max_concurrent: u.max_concurrent.max(1),
            confirmation,
        }
    }
}
