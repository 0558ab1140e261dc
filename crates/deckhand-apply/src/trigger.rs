//! Migration trigger state machine.
//!
//! ```text
//! Pending ──fire──▶ Fired(Succeeded | Failed)
//! ```
//!
//! A trigger fires at most once per apply and only after its
//! prerequisites have converged in that apply. There is no way back to
//! `Pending`; the next apply constructs a fresh trigger.

use std::collections::BTreeSet;

use deckhand_core::ResourceId;
use deckhand_migrator::{MigrationError, MigrationOutput};
use deckhand_plan::{ResourceNode, ResourceProps};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::provider::{MigrationRequest, Provider};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("{trigger} cannot fire before {prerequisite} has converged")]
    PrerequisiteNotReady {
        trigger: ResourceId,
        prerequisite: ResourceId,
    },

    #[error("{0} has already fired in this apply")]
    AlreadyFired(ResourceId),

    #[error("{0} is not a trigger resource")]
    NotATrigger(ResourceId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Succeeded(MigrationOutput),
    Failed {
        error: String,
        exit_code: Option<i32>,
        diagnostics: Option<String>,
    },
}

impl TriggerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TriggerOutcome::Succeeded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPhase {
    Pending,
    Fired(TriggerOutcome),
}

#[derive(Debug, Clone)]
pub struct MigrationTrigger {
    trigger: ResourceId,
    function: ResourceId,
    prerequisites: Vec<ResourceId>,
    phase: TriggerPhase,
}

impl MigrationTrigger {
    pub fn new(trigger: ResourceId, function: ResourceId, prerequisites: Vec<ResourceId>) -> Self {
        Self {
            trigger,
            function,
            prerequisites,
            phase: TriggerPhase::Pending,
        }
    }

    pub fn from_node(node: &ResourceNode) -> Result<Self, TriggerError> {
        match &node.props {
            ResourceProps::Trigger(props) => Ok(Self::new(
                node.id.clone(),
                props.handler.clone(),
                props.execute_after.clone(),
            )),
            _ => Err(TriggerError::NotATrigger(node.id.clone())),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.trigger
    }

    pub fn function(&self) -> &ResourceId {
        &self.function
    }

    pub fn phase(&self) -> &TriggerPhase {
        &self.phase
    }

    pub fn outcome(&self) -> Option<&TriggerOutcome> {
        match &self.phase {
            TriggerPhase::Pending => None,
            TriggerPhase::Fired(outcome) => Some(outcome),
        }
    }

    /// Invoke the migration and block until it finishes or times out.
    ///
    /// `converged` holds the resources that have converged in the current
    /// apply. The outer error is an illegal transition; the inner result is
    /// the migration itself, which moves the trigger to `Fired` either way.
    pub async fn fire(
        &mut self,
        converged: &BTreeSet<ResourceId>,
        provider: &dyn Provider,
        request: MigrationRequest,
    ) -> Result<Result<MigrationOutput, MigrationError>, TriggerError> {
        if let TriggerPhase::Fired(_) = self.phase {
            return Err(TriggerError::AlreadyFired(self.trigger.clone()));
        }
        if let Some(missing) = self.prerequisites.iter().find(|p| !converged.contains(*p)) {
            return Err(TriggerError::PrerequisiteNotReady {
                trigger: self.trigger.clone(),
                prerequisite: missing.clone(),
            });
        }

        info!(trigger = %self.trigger, function = %self.function, "firing migration");
        let result = provider.invoke_migration(request).await;
        let outcome = match &result {
            Ok(output) => {
                info!(
                    trigger = %self.trigger,
                    elapsed_ms = output.elapsed.as_millis() as u64,
                    "migration completed"
                );
                TriggerOutcome::Succeeded(output.clone())
            }
            Err(err) => {
                warn!(trigger = %self.trigger, error = %err, "migration failed");
                TriggerOutcome::Failed {
                    error: err.to_string(),
                    exit_code: match err {
                        MigrationError::Exited { code, .. } => Some(*code),
                        _ => None,
                    },
                    diagnostics: err.diagnostics(),
                }
            }
        };
        self.phase = TriggerPhase::Fired(outcome);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use deckhand_core::SecretRef;
    use deckhand_state::ResourceRecord;
    use secrecy::SecretString;

    use super::*;
    use crate::error::{ProvisionError, ProvisionResult};
    use crate::fixtures::plan;
    use crate::provider::{ProvisionRequest, ResourceOutputs};

    struct ScriptedProvider {
        exit_code: i32,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn apply_resource(&self, request: ProvisionRequest) -> ProvisionResult<ResourceOutputs> {
            Err(ProvisionError::Injected(request.node.id))
        }

        async fn destroy_resource(&self, _record: &ResourceRecord) -> ProvisionResult<()> {
            Ok(())
        }

        async fn invoke_migration(&self, _request: MigrationRequest) -> Result<MigrationOutput, MigrationError> {
            if self.exit_code == 0 {
                Ok(MigrationOutput {
                    exit_code: 0,
                    stdout: "All migrations have been successfully applied.".into(),
                    stderr: String::new(),
                    elapsed: Duration::from_millis(5),
                })
            } else {
                Err(MigrationError::Exited {
                    code: self.exit_code,
                    stdout: String::new(),
                    stderr: "P1001: Can't reach database server".into(),
                })
            }
        }

        async fn resolve_secret(&self, reference: &SecretRef) -> ProvisionResult<SecretString> {
            Err(ProvisionError::Injected(reference.secret.clone()))
        }
    }

    fn trigger_and_request() -> (MigrationTrigger, MigrationRequest, ResourceId) {
        let plan = plan();
        let node = plan.graph.get(plan.outputs.migration.trigger.id()).unwrap();
        let trigger = MigrationTrigger::from_node(node).unwrap();
        let ResourceProps::Function(props) = &plan.graph.get(trigger.function()).unwrap().props else {
            panic!("handler is not a function");
        };
        let request = MigrationRequest {
            stage: plan.name.clone(),
            trigger: trigger.id().clone(),
            function: trigger.function().clone(),
            props: props.clone(),
            env: BTreeMap::new(),
        };
        (trigger, request, plan.outputs.database.cluster.id().clone())
    }

    #[tokio::test]
    async fn refuses_to_fire_before_database_converges() {
        let (mut trigger, request, cluster) = trigger_and_request();
        let err = trigger
            .fire(&BTreeSet::new(), &ScriptedProvider { exit_code: 0 }, request)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TriggerError::PrerequisiteNotReady {
                trigger: trigger.id().clone(),
                prerequisite: cluster,
            }
        );
        assert_eq!(trigger.phase(), &TriggerPhase::Pending);
    }

    #[tokio::test]
    async fn fires_exactly_once() {
        let (mut trigger, request, cluster) = trigger_and_request();
        let converged = BTreeSet::from([cluster]);
        let provider = ScriptedProvider { exit_code: 0 };

        let result = trigger.fire(&converged, &provider, request).await.unwrap();
        assert!(result.is_ok());
        assert!(trigger.outcome().unwrap().is_success());

        let (_, again, _) = trigger_and_request();
        let err = trigger.fire(&converged, &provider, again).await.unwrap_err();
        assert_eq!(err, TriggerError::AlreadyFired(trigger.id().clone()));
    }

    #[tokio::test]
    async fn failed_migration_is_a_fired_outcome() {
        let (mut trigger, request, cluster) = trigger_and_request();
        let converged = BTreeSet::from([cluster]);

        let result = trigger
            .fire(&converged, &ScriptedProvider { exit_code: 1 }, request)
            .await
            .unwrap();
        assert!(matches!(result, Err(MigrationError::Exited { code: 1, .. })));
        match trigger.phase() {
            TriggerPhase::Fired(TriggerOutcome::Failed { exit_code, diagnostics, .. }) => {
                assert_eq!(*exit_code, Some(1));
                assert!(diagnostics.as_deref().unwrap().contains("P1001"));
            }
            other => panic!("unexpected phase: {other:?}"),
        }
    }

    #[test]
    fn only_trigger_nodes_become_triggers() {
        let plan = plan();
        let vpc = plan.graph.get(plan.outputs.network.vpc.id()).unwrap();
        assert!(matches!(
            MigrationTrigger::from_node(vpc),
            Err(TriggerError::NotATrigger(_))
        ));
    }
}
