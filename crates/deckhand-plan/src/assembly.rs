//! Synthesized assembly written to disk.
//!
//! Layout:
//!
//! ```text
//! <out>/manifest.json
//! <out>/<stage>/<stack>.json
//! ```
//!
//! Environment values appear only in their unresolved form, so nothing
//! resolved at apply time can leak into the files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PlanError, PlanResult};
use crate::graph::ResourceNode;
use crate::pipeline::{PipelineDefinition, SourceSpec, SynthSpec};
use crate::stage::StagePlan;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ASSEMBLY_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub pipeline: PipelineEntry,
    pub stages: Vec<StageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEntry {
    pub name: String,
    pub stack: String,
    pub fingerprint: String,
    pub source: SourceSpec,
    pub synth: SynthSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub name: String,
    pub account: String,
    pub region: String,
    pub fingerprint: String,
    pub stacks: Vec<StackEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
    pub name: String,
    /// Path relative to the assembly root.
    pub file: String,
    pub resources: usize,
}

/// Contents of one `<stage>/<stack>.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackArtifact {
    pub stage: String,
    pub stack: String,
    pub resources: Vec<ResourceNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub manifest: Manifest,
    /// Stack artifacts keyed by their relative path.
    pub stacks: BTreeMap<String, StackArtifact>,
}

impl Assembly {
    pub fn from_pipeline(pipeline: &PipelineDefinition) -> Self {
        let mut stacks = BTreeMap::new();
        let stages = pipeline
            .stages
            .iter()
            .map(|stage| stage_entry(stage, &mut stacks))
            .collect();

        Self {
            manifest: Manifest {
                version: ASSEMBLY_VERSION,
                pipeline: PipelineEntry {
                    name: pipeline.name.clone(),
                    stack: pipeline.stack.clone(),
                    fingerprint: pipeline.fingerprint(),
                    source: pipeline.source.clone(),
                    synth: pipeline.synth.clone(),
                },
                stages,
            },
            stacks,
        }
    }

    /// Write the assembly under `dir`, creating it if needed. Returns the
    /// files written.
    pub fn write(&self, dir: &Path) -> PlanResult<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.stacks.len() + 1);

        for (relative, artifact) in &self.stacks {
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, to_pretty_json(artifact)?)?;
            debug!(path = %path.display(), resources = artifact.resources.len(), "stack written");
            written.push(path);
        }

        let manifest = dir.join(MANIFEST_FILE);
        fs::write(&manifest, to_pretty_json(&self.manifest)?)?;
        written.push(manifest);

        info!(dir = %dir.display(), files = written.len(), "assembly written");
        Ok(written)
    }

    pub fn read_manifest(dir: &Path) -> PlanResult<Manifest> {
        let raw = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        serde_json::from_str(&raw).map_err(|e| PlanError::Serialize(e.to_string()))
    }
}

fn stage_entry(stage: &StagePlan, stacks: &mut BTreeMap<String, StackArtifact>) -> StageEntry {
    let entries = stage
        .graph
        .stacks()
        .into_iter()
        .map(|stack| {
            let resources: Vec<ResourceNode> =
                stage.graph.stack_nodes(&stack).into_iter().cloned().collect();
            let file = format!("{}/{}.json", stage.name, stack);
            let entry = StackEntry {
                name: stack.clone(),
                file: file.clone(),
                resources: resources.len(),
            };
            stacks.insert(
                file,
                StackArtifact {
                    stage: stage.name.clone(),
                    stack,
                    resources,
                },
            );
            entry
        })
        .collect();

    StageEntry {
        name: stage.name.clone(),
        account: stage.env.account.clone(),
        region: stage.env.region.clone(),
        fingerprint: stage.fingerprint(),
        stacks: entries,
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> PlanResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| PlanError::Serialize(e.to_string()))
}
