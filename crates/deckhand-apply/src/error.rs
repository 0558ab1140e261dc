//! Apply error types.

use deckhand_core::{ResolveError, ResourceId};
use deckhand_migrator::MigrationError;
use deckhand_plan::PlanError;
use deckhand_state::StateError;
use thiserror::Error;

use crate::report::ApplyReport;
use crate::trigger::TriggerError;

pub type ProvisionResult<T> = Result<T, ProvisionError>;
pub type ApplyResult<T> = Result<T, ApplyError>;

/// A provider could not converge or destroy a resource.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provider rejected {resource}: {reason}")]
    Rejected { resource: ResourceId, reason: String },

    #[error("injected failure on {0}")]
    Injected(ResourceId),

    #[error("{resource} has no output {attribute}")]
    MissingOutput {
        resource: ResourceId,
        attribute: String,
    },

    #[error("failed to resolve deferred value: {0}")]
    Resolve(#[from] ResolveError),

    #[error("stored properties of {resource} are unreadable: {reason}")]
    CorruptRecord { resource: ResourceId, reason: String },
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("provisioning {resource} failed: {source}")]
    Provisioning {
        resource: ResourceId,
        #[source]
        source: ProvisionError,
        report: Box<ApplyReport>,
    },

    #[error("migration {trigger} failed: {source}")]
    Migration {
        trigger: ResourceId,
        #[source]
        source: MigrationError,
        report: Box<ApplyReport>,
    },

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// A change went through but could not be recorded. The apply was
    /// rolled back like any other failure.
    #[error("recording {resource} failed: {source}")]
    Record {
        resource: ResourceId,
        #[source]
        source: Box<ApplyError>,
        report: Box<ApplyReport>,
    },

    #[error("{reason}")]
    Task {
        resource: Option<ResourceId>,
        reason: String,
        report: Box<ApplyReport>,
    },

    #[error("rolling back {resource} failed: {source}")]
    Rollback {
        resource: ResourceId,
        #[source]
        source: ProvisionError,
    },

    #[error("provider refresh failed: {0}")]
    Refresh(#[source] ProvisionError),

    #[error("pipeline {0} changed again after self-mutation")]
    SelfMutationLoop(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),
}

impl ApplyError {
    /// Report of the halted apply, for errors that stop one.
    pub fn report(&self) -> Option<&ApplyReport> {
        match self {
            ApplyError::Provisioning { report, .. }
            | ApplyError::Migration { report, .. }
            | ApplyError::Record { report, .. }
            | ApplyError::Task { report, .. } => Some(&**report),
            _ => None,
        }
    }

    /// The resource that halted the apply, if any.
    pub fn failed_resource(&self) -> Option<&ResourceId> {
        match self {
            ApplyError::Provisioning { resource, .. } | ApplyError::Record { resource, .. } => {
                Some(resource)
            }
            ApplyError::Migration { trigger, .. } => Some(trigger),
            ApplyError::Task { resource, .. } => resource.as_ref(),
            _ => None,
        }
    }

    /// Captured output of a failed migration.
    pub fn diagnostics(&self) -> Option<String> {
        match self {
            ApplyError::Migration { source, .. } => source.diagnostics(),
            _ => None,
        }
    }
}
