//! Pipeline composer.
//!
//! The delivery pipeline watches one branch of one repository, re-runs
//! synthesis on every push and updates its own definition before deploying
//! the stages. Only the pipeline's own shape feeds its fingerprint, so a
//! change to a stage's resources deploys through the existing pipeline
//! without a self-mutation.

use deckhand_core::{DeployConfig, Namer};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PlanResult;
use crate::graph::digest_json;
use crate::props::Architecture;
use crate::stage::{StagePlan, compose_stage};

/// Name of the single deployment stage.
pub const PROD_STAGE: &str = "Prod";

/// Directory the synth step writes the assembly to.
pub const ASSEMBLY_DIR: &str = "deckhand.out";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub repo_slug: String,
    pub branch: String,
    pub connection_arn: String,
    pub trigger_on_push: bool,
}

/// Shell step that rebuilds the assembly from source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthSpec {
    pub install_commands: Vec<String>,
    pub commands: Vec<String>,
    pub primary_output_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub docker_enabled_for_synth: bool,
    pub publish_in_parallel: bool,
    pub build_architecture: Architecture,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub stack: String,
    pub source: SourceSpec,
    pub self_mutation: bool,
    pub cross_account_keys: bool,
    pub synth: SynthSpec,
    pub assets: AssetSpec,
    pub stages: Vec<StagePlan>,
}

/// The parts of a pipeline definition that describe the pipeline itself.
#[derive(Serialize)]
struct PipelineShape<'a> {
    name: &'a str,
    stack: &'a str,
    source: &'a SourceSpec,
    self_mutation: bool,
    cross_account_keys: bool,
    synth: &'a SynthSpec,
    assets: &'a AssetSpec,
    stages: Vec<&'a str>,
}

impl PipelineDefinition {
    /// Digest of the pipeline's own shape. Stage contents are excluded;
    /// stage names are not.
    pub fn fingerprint(&self) -> String {
        digest_json(&PipelineShape {
            name: &self.name,
            stack: &self.stack,
            source: &self.source,
            self_mutation: self.self_mutation,
            cross_account_keys: self.cross_account_keys,
            synth: &self.synth,
            assets: &self.assets,
            stages: self.stages.iter().map(|s| s.name.as_str()).collect(),
        })
    }

    pub fn stage(&self, name: &str) -> Option<&StagePlan> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Whether a push to `repo`/`branch` should start this pipeline.
    pub fn watches(&self, repo: &str, branch: &str) -> bool {
        self.source.trigger_on_push && self.source.repo_slug == repo && self.source.branch == branch
    }
}

pub fn compose_pipeline(config: &DeployConfig) -> PlanResult<PipelineDefinition> {
    let namer = Namer::new(&config.application_name);
    let prod = compose_stage(PROD_STAGE, config)?;

    let pipeline = PipelineDefinition {
        name: namer.pipeline(),
        stack: namer.pipeline_stack(),
        source: SourceSpec {
            repo_slug: config.repository.slug.clone(),
            branch: config.repository.branch.clone(),
            connection_arn: config.repository.connection_arn.clone(),
            trigger_on_push: true,
        },
        self_mutation: true,
        cross_account_keys: false,
        synth: SynthSpec {
            install_commands: vec!["cargo build --release --locked -p deckhand-cli".to_string()],
            commands: vec![format!("target/release/deckhand synth --out {ASSEMBLY_DIR}")],
            primary_output_dir: ASSEMBLY_DIR.to_string(),
        },
        assets: AssetSpec {
            docker_enabled_for_synth: true,
            publish_in_parallel: false,
            build_architecture: Architecture::Arm64,
        },
        stages: vec![prod],
    };

    info!(
        pipeline = %pipeline.name,
        fingerprint = %pipeline.fingerprint(),
        stages = pipeline.stages.len(),
        "pipeline synthesized"
    );
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config() -> DeployConfig {
        let vars: HashMap<String, String> = [
            ("AWS_ACCOUNT_ID", "123456789012"),
            ("AWS_REGION", "eu-west-1"),
            ("APPLICATION_NAME", "shop"),
            ("REPOSITORY_SLUG", "acme/shop"),
            ("REPOSITORY_BRANCH", "main"),
            ("CONNECTION_ARN", "arn:conn"),
            ("HOST_PORT", "3000"),
            ("SERVICE_NAME", "ShopWeb"),
            ("CERTIFICATE_ARN", "arn:cert"),
            ("DATABASE_PORT", "5432"),
            ("DATABASE_NAME", "shop"),
            ("DATABASE_USERNAME", "shopadmin"),
            ("DATABASE_ENGINE_NAME", "postgres"),
            ("SOURCE_ROOT", "."),
            ("MIGRATOR_DOCKERFILE_NAME", "migrator.Dockerfile"),
            ("DOCKERFILE_NAME", "Dockerfile"),
            ("HOST_MIN_CAPACITY", "1"),
            ("HOST_MAX_CAPACITY", "2"),
            ("MAX_AZS", "2"),
            ("NAT_GATEWAYS", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        DeployConfig::from_env_map(&vars).unwrap()
    }

    #[test]
    fn single_prod_stage_named_after_app() {
        let pipeline = compose_pipeline(&config()).unwrap();
        assert_eq!(pipeline.name, "shopPipeline");
        assert_eq!(pipeline.stack, "shopPipelineStack");
        assert_eq!(pipeline.stages.len(), 1);
        assert!(pipeline.stage(PROD_STAGE).is_some());
        assert!(pipeline.self_mutation);
        assert!(!pipeline.assets.publish_in_parallel);
    }

    #[test]
    fn watches_only_its_branch() {
        let pipeline = compose_pipeline(&config()).unwrap();
        assert!(pipeline.watches("acme/shop", "main"));
        assert!(!pipeline.watches("acme/shop", "feature"));
        assert!(!pipeline.watches("acme/other", "main"));
    }

    #[test]
    fn stage_changes_do_not_move_pipeline_fingerprint() {
        let base = compose_pipeline(&config()).unwrap();

        let mut resized = config();
        resized.host_cluster.max_capacity = 5;
        let resized = compose_pipeline(&resized).unwrap();
        assert_ne!(base.stages[0].fingerprint(), resized.stages[0].fingerprint());
        assert_eq!(base.fingerprint(), resized.fingerprint());

        let mut moved = config();
        moved.repository.branch = "release".into();
        let moved = compose_pipeline(&moved).unwrap();
        assert_ne!(base.fingerprint(), moved.fingerprint());
    }
}
