//! deckhand-apply: converges synthesized stages.
//!
//! [`ApplyEngine`] diffs a [`StagePlan`](deckhand_plan::StagePlan) against
//! the state store and drives a [`Provider`] through the changes, firing
//! the migration trigger on the way. [`LocalProvider`] is an in-process
//! provider for dry runs and tests. [`PipelineController`] runs the
//! delivery pipeline on pushes.

pub mod diff;
pub mod engine;
pub mod error;
pub mod local;
pub mod pipeline;
pub mod provider;
pub mod report;
pub mod trigger;

pub use diff::{Action, Change, ChangeSet};
pub use engine::ApplyEngine;
pub use error::{ApplyError, ApplyResult, ProvisionError, ProvisionResult};
pub use local::{LocalProvider, MigrationMode, ProviderEvent};
pub use pipeline::{PipelineController, PipelineRun, PushEvent};
pub use provider::{MigrationRequest, ProvisionRequest, Provider, ResolvedEnv, ResourceOutputs};
pub use report::{ActionReport, ActionStatus, ApplyReport};
pub use trigger::{MigrationTrigger, TriggerError, TriggerOutcome, TriggerPhase};

#[cfg(test)]
pub(crate) mod fixtures;
