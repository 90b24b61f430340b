//! Builds the engine and its collaborators from the loaded configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::{
    backup::FileBackupStore,
    config::Config,
    engine::{Engine, EngineSettings},
    runtime::Runtime,
    source::{ChocolateyAdapter, SourceAdapter, SourceRegistry, UninstallRegistryAdapter, WingetAdapter},
};

const KNOWN_SOURCES: &[&str] = &["winget", "chocolatey", "registry"];

/// Configuration plus the paths it was resolved against.
pub struct Services<R: Runtime> {
    pub runtime: Arc<R>,
    pub config: Config,
    pub config_path: PathBuf,
    pub backup_dir: PathBuf,
}

impl<R: Runtime + 'static> Services<R> {
    /// Load (or create) the configuration. `config_path` and `backup_dir`
    /// override the defaults.
    #[tracing::instrument(skip(runtime))]
    pub fn load(runtime: Arc<R>, config_path: Option<PathBuf>, backup_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => Config::default_path(runtime.as_ref())?,
        };
        let config = Config::load_or_init(runtime.as_ref(), &config_path)?;
        let backup_dir = match backup_dir {
            Some(dir) => dir,
            None => config.backup_dir(runtime.as_ref())?,
        };
        debug!("Using configuration {:?}, backups in {:?}", config_path, backup_dir);
        Ok(Self {
            runtime,
            config,
            config_path,
            backup_dir,
        })
    }

    /// Register every enabled source with its configured priority.
    pub fn source_registry(&self) -> SourceRegistry {
        for id in self.config.sources.keys() {
            if !KNOWN_SOURCES.contains(&id.as_str()) {
                warn!("Ignoring unknown source {:?} in configuration", id);
            }
        }

        let mut registry = SourceRegistry::new();
        for &id in KNOWN_SOURCES {
            let Some(priority) = self.config.source_priority(id) else {
                debug!("Source {} is disabled", id);
                continue;
            };
            let adapter: Arc<dyn SourceAdapter> = match id {
                "winget" => Arc::new(WingetAdapter::new(self.runtime.clone())),
                "chocolatey" => Arc::new(ChocolateyAdapter::new(self.runtime.clone())),
                _ => Arc::new(UninstallRegistryAdapter::new(self.runtime.clone())),
            };
            registry.register(adapter, priority);
        }
        registry
    }

    pub fn backup_store(&self) -> Result<FileBackupStore<R>> {
        FileBackupStore::open(self.runtime.clone(), self.backup_dir.clone())
            .with_context(|| format!("Failed to initialize backup store at {:?}", self.backup_dir))
    }

    /// Fails when the backup directory cannot be created: nothing may be
    /// applied without one.
    pub fn engine(&self, assume_yes: bool) -> Result<Engine> {
        let backups = self.backup_store()?;
        Ok(Engine::new(
            Arc::new(self.source_registry()),
            Arc::new(backups),
            self.runtime.clone(),
            EngineSettings::from_config(&self.config, assume_yes),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceSettings;
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::source::SourceId;
    use tempfile::tempdir;

    fn services(config: Config) -> Services<MockRuntime> {
        Services {
            runtime: Arc::new(MockRuntime::new()),
            config,
            config_path: PathBuf::from("/cfg/config.json"),
            backup_dir: PathBuf::from("/data/backups"),
        }
    }

    #[test]
    fn test_registry_follows_configuration() {
        let registry = services(Config::default()).source_registry();
        let ids: Vec<String> = registry.iter().map(|a| a.id().to_string()).collect();
        assert_eq!(ids, vec!["winget", "chocolatey", "registry"]);

        let mut config = Config::default();
        config.sources.insert(
            "chocolatey".into(),
            SourceSettings {
                enabled: true,
                priority: 0,
            },
        );
        config.sources.insert(
            "registry".into(),
            SourceSettings {
                enabled: false,
                priority: 3,
            },
        );
        config.sources.insert(
            "scoop".into(),
            SourceSettings {
                enabled: true,
                priority: 1,
            },
        );
        let registry = services(config).source_registry();
        let ids: Vec<String> = registry.iter().map(|a| a.id().to_string()).collect();
        assert_eq!(ids, vec!["chocolatey", "winget"]);
        assert_eq!(registry.priority_of(&SourceId::new("chocolatey")), Some(0));
    }

    #[test]
    fn test_load_with_overrides() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let backup_dir = dir.path().join("backups");

        let services = Services::load(
            Arc::new(RealRuntime),
            Some(config_path.clone()),
            Some(backup_dir.clone()),
        )
        .unwrap();

        assert_eq!(services.config_path, config_path);
        assert_eq!(services.backup_dir, backup_dir);
        assert!(config_path.exists());

        services.engine(false).unwrap();
        assert!(backup_dir.is_dir());
    }

    #[test]
    fn test_backup_store_failure_is_fatal() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);
        runtime
            .expect_create_dir_all()
            .returning(|_| Err(anyhow::anyhow!("read-only file system")));
        let services = Services {
            runtime: Arc::new(runtime),
            config: Config::default(),
            config_path: PathBuf::from("/cfg/config.json"),
            backup_dir: PathBuf::from("/data/backups"),
        };

        let err = services.engine(false).err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to initialize backup store"));
    }
}
