//! Persisted records.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use deckhand_core::ResourceId;
use serde::{Deserialize, Serialize};

pub type ApplyId = u64;

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ── Resources ──────────────────────────────────────────────────────

/// A resource as last converged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    pub stage: String,
    pub id: ResourceId,
    pub stack: String,
    pub kind: String,
    /// Properties as applied, kept so an update can be reverted.
    pub props: serde_json::Value,
    pub props_digest: String,
    pub depends_on: Vec<ResourceId>,
    /// Attributes the provider reported, read by dependents.
    pub outputs: BTreeMap<String, String>,
    pub applied_at: u64,
    pub apply_id: ApplyId,
}

impl ResourceRecord {
    pub fn table_key(&self) -> String {
        resource_key(&self.stage, &self.id)
    }
}

pub(crate) fn resource_key(stage: &str, id: &ResourceId) -> String {
    format!("{stage}/{id}")
}

// ── Applies ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Succeeded,
    /// Halted at `failed_resource`; changes made in the apply were rolled back.
    Failed,
    TornDown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyRecord {
    pub apply_id: ApplyId,
    pub stage: String,
    /// Fingerprint of the plan that was applied.
    pub fingerprint: String,
    pub outcome: ApplyOutcome,
    pub failed_resource: Option<ResourceId>,
    pub error: Option<String>,
    /// Captured output of a failed migration, if any.
    pub diagnostics: Option<String>,
    pub started_at: u64,
    pub finished_at: u64,
}

impl ApplyRecord {
    pub fn table_key(&self) -> String {
        apply_key(&self.stage, self.apply_id)
    }
}

pub(crate) fn apply_key(stage: &str, apply_id: ApplyId) -> String {
    format!("{stage}:{apply_id:020}")
}

// ── Triggers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRecordPhase {
    Succeeded,
    Failed,
}

/// One firing of a run-once trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerRecord {
    pub stage: String,
    pub trigger: ResourceId,
    pub apply_id: ApplyId,
    pub phase: TriggerRecordPhase,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub fired_at: u64,
}

impl TriggerRecord {
    pub fn table_key(&self) -> String {
        format!("{}/{}:{:020}", self.stage, self.trigger, self.apply_id)
    }
}

// ── Pipelines ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineRecord {
    pub name: String,
    pub fingerprint: String,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_keys_sort_numerically() {
        assert!(apply_key("Prod", 9) < apply_key("Prod", 10));
        assert_eq!(apply_key("Prod", 7), "Prod:00000000000000000007");
    }

    #[test]
    fn trigger_key_includes_stage_and_apply() {
        let record = TriggerRecord {
            stage: "Prod".into(),
            trigger: ResourceId::new("shopMigratorLambda", "shopMigrationTrigger"),
            apply_id: 3,
            phase: TriggerRecordPhase::Succeeded,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            fired_at: 0,
        };
        assert_eq!(
            record.table_key(),
            "Prod/shopMigratorLambda/shopMigrationTrigger:00000000000000000003"
        );
    }
}
