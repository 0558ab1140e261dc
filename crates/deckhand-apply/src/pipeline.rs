//! Pipeline controller.
//!
//! Reacts to source pushes the way the delivery pipeline does: synthesize,
//! update the pipeline itself when its definition changed, then deploy the
//! stages in order.

use deckhand_plan::{PipelineDefinition, PlanResult};
use deckhand_state::{PipelineRecord, unix_now};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::ApplyEngine;
use crate::error::{ApplyError, ApplyResult};
use crate::report::ApplyReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repo: String,
    pub branch: String,
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineRun {
    /// The push was for another repository or branch.
    Ignored,
    Deployed {
        pipeline: String,
        /// The pipeline updated its own definition before deploying.
        self_mutated: bool,
        stages: Vec<ApplyReport>,
    },
}

pub struct PipelineController {
    engine: ApplyEngine,
}

impl PipelineController {
    pub fn new(engine: ApplyEngine) -> Self {
        Self { engine }
    }

    /// Handle a push. `synth` re-runs synthesis from the pushed source.
    pub async fn on_push<F>(&self, event: &PushEvent, synth: F) -> ApplyResult<PipelineRun>
    where
        F: Fn() -> PlanResult<PipelineDefinition>,
    {
        let mut pipeline = synth()?;
        if !pipeline.watches(&event.repo, &event.branch) {
            info!(repo = %event.repo, branch = %event.branch, pipeline = %pipeline.name, "push ignored");
            return Ok(PipelineRun::Ignored);
        }
        info!(pipeline = %pipeline.name, commit = ?event.commit, "pipeline started");

        let store = self.engine.store();
        let deployed = store.get_pipeline(&pipeline.name)?;
        let fingerprint = pipeline.fingerprint();
        let self_mutated = deployed.as_ref().map(|d| &d.fingerprint) != Some(&fingerprint);

        if self_mutated && pipeline.self_mutation {
            store.put_pipeline(&PipelineRecord {
                name: pipeline.name.clone(),
                fingerprint: fingerprint.clone(),
                updated_at: unix_now(),
            })?;
            info!(pipeline = %pipeline.name, %fingerprint, "pipeline self-mutated, restarting");

            pipeline = synth()?;
            if pipeline.fingerprint() != fingerprint {
                return Err(ApplyError::SelfMutationLoop(pipeline.name));
            }
        }

        let mut stages = Vec::with_capacity(pipeline.stages.len());
        for stage in &pipeline.stages {
            info!(pipeline = %pipeline.name, stage = %stage.name, "deploying stage");
            stages.push(self.engine.apply(stage).await?);
        }

        info!(pipeline = %pipeline.name, stages = stages.len(), "pipeline succeeded");
        Ok(PipelineRun::Deployed {
            pipeline: pipeline.name,
            self_mutated,
            stages,
        })
    }
}
