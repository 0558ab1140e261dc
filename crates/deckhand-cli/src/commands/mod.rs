pub mod apply;
pub mod diff;
pub mod pipeline;
pub mod synth;
pub mod teardown;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use deckhand_apply::{ApplyEngine, LocalProvider, MigrationMode};
use deckhand_core::DeployConfig;
use deckhand_plan::{PipelineDefinition, StagePlan, compose_pipeline};
use deckhand_state::StateStore;
use tracing::{debug, info};

/// State database file inside the state directory.
pub const STATE_FILE: &str = "state.redb";

/// Where the deployment configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Toml(PathBuf),
    EnvFile(PathBuf),
    /// Process environment, after loading `./.env` if present.
    Environment,
}

impl ConfigSource {
    pub fn from_args(env_file: Option<PathBuf>, config: Option<PathBuf>) -> Self {
        match (config, env_file) {
            (Some(path), _) => ConfigSource::Toml(path),
            (None, Some(path)) => ConfigSource::EnvFile(path),
            (None, None) => ConfigSource::Environment,
        }
    }

    pub fn load(&self) -> anyhow::Result<DeployConfig> {
        let config = match self {
            ConfigSource::Toml(path) => DeployConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            ConfigSource::EnvFile(path) => DeployConfig::from_env_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            ConfigSource::Environment => {
                if let Ok(path) = dotenvy::dotenv() {
                    debug!(?path, "loaded .env");
                }
                DeployConfig::from_process_env().context("loading configuration from environment")?
            }
        };
        info!(
            application = %config.application_name,
            account = %config.environment.account,
            region = %config.environment.region,
            "configuration loaded"
        );
        Ok(config)
    }
}

pub fn synthesize(config: &DeployConfig) -> anyhow::Result<PipelineDefinition> {
    Ok(compose_pipeline(config)?)
}

pub fn find_stage<'p>(pipeline: &'p PipelineDefinition, stage: &str) -> anyhow::Result<&'p StagePlan> {
    pipeline.stage(stage).with_context(|| {
        let known: Vec<&str> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        format!("unknown stage {stage:?} (pipeline has: {})", known.join(", "))
    })
}

pub fn open_store(state_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("creating state directory {}", state_dir.display()))?;
    let path = state_dir.join(STATE_FILE);
    let store = StateStore::open(&path)?;
    debug!(path = ?path, "state store opened");
    Ok(store)
}

/// Engine backed by the local provider.
pub fn local_engine(
    config: &DeployConfig,
    state_dir: &Path,
    run_migrations: bool,
) -> anyhow::Result<ApplyEngine> {
    let migrations = if run_migrations {
        MigrationMode::Run {
            command: None,
            working_dir: Some(PathBuf::from(&config.migrator.source_root)),
        }
    } else {
        MigrationMode::Simulate
    };
    let provider = LocalProvider::new(&config.environment).with_migrations(migrations);
    Ok(ApplyEngine::new(Arc::new(provider), open_store(state_dir)?))
}
