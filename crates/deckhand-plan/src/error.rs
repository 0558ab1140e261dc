//! Plan error types.

use deckhand_core::{ConfigError, ResourceId};
use thiserror::Error;

/// Errors raised while composing or rendering a deployment plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("resource declared twice: {0}")]
    DuplicateResource(ResourceId),

    #[error("{resource} references {dependency}, which has not been declared")]
    UnknownDependency {
        resource: ResourceId,
        dependency: ResourceId,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("failed to write assembly: {0}")]
    Io(#[from] std::io::Error),
}

pub type PlanResult<T> = Result<T, PlanError>;
