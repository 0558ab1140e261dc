//! deckhand-plan: synthesis of the deployment topology.
//!
//! Provisioners add resources to a [`ResourceGraph`] through a stack-scoped
//! [`StackBuilder`] and hand back typed handles. The stage composer wires
//! network, database, migration, compute and routing together. The pipeline
//! composer wraps the stage in a self-mutating delivery pipeline, and
//! [`Assembly`] renders the result to disk.

pub mod assembly;
pub mod compute;
pub mod database;
pub mod error;
pub mod graph;
pub mod handles;
pub mod migration;
pub mod network;
pub mod pipeline;
pub mod props;
pub mod routing;
pub mod stage;

pub use assembly::{Assembly, Manifest};
pub use error::{PlanError, PlanResult};
pub use graph::{ResourceGraph, ResourceNode, StackBuilder};
pub use pipeline::{PROD_STAGE, PipelineDefinition, compose_pipeline};
pub use props::{ResourceKind, ResourceProps};
pub use stage::{StageOutputs, StagePlan, compose_stage};
