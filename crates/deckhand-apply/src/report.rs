//! Apply reports.

use std::fmt;

use deckhand_core::ResourceId;
use deckhand_state::{ApplyId, ApplyOutcome};
use serde::Serialize;

use crate::diff::Action;
use crate::trigger::TriggerOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Applied,
    Skipped,
    Fired,
    Deleted,
    Failed,
    /// Not started because an earlier action failed.
    Blocked,
    /// Applied in this apply, then undone after a failure.
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub id: ResourceId,
    pub action: Action,
    pub status: ActionStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub stage: String,
    pub apply_id: ApplyId,
    pub fingerprint: String,
    pub outcome: ApplyOutcome,
    pub actions: Vec<ActionReport>,
    pub migration: Option<TriggerOutcome>,
}

impl ApplyReport {
    pub fn status(&self, id: &ResourceId) -> Option<ActionStatus> {
        self.actions.iter().find(|a| &a.id == id).map(|a| a.status)
    }

    pub fn count(&self, status: ActionStatus) -> usize {
        self.actions.iter().filter(|a| a.status == status).count()
    }

    pub fn with_status(&self, status: ActionStatus) -> impl Iterator<Item = &ResourceId> {
        self.actions
            .iter()
            .filter(move |a| a.status == status)
            .map(|a| &a.id)
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Apply #{} of stage {}: {:?}", self.apply_id, self.stage, self.outcome)?;
        for action in &self.actions {
            write!(f, "  {:<11} {:<9} {}", format!("{:?}", action.status), action.action.as_str(), action.id)?;
            if let Some(detail) = &action.detail {
                write!(f, " ({detail})")?;
            }
            writeln!(f)?;
        }
        match &self.migration {
            Some(TriggerOutcome::Succeeded(output)) => {
                write!(f, "migration succeeded in {}ms", output.elapsed.as_millis())
            }
            Some(TriggerOutcome::Failed { error, .. }) => write!(f, "migration failed: {error}"),
            None => write!(f, "no migration fired"),
        }
    }
}
