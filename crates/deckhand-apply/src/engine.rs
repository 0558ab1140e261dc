//! Convergence engine.
//!
//! An apply walks the stage graph wave by wave. Everything in a wave is
//! independent, so its actions run concurrently. The first failure halts
//! scheduling: nothing in later waves starts, whatever this apply already
//! changed is undone in reverse order, and the apply is recorded as
//! failed together with the failing resource and its diagnostics.
//! Resources are only destroyed by a successful apply that no longer
//! plans them, or by an explicit teardown.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use deckhand_core::{EnvValue, Fragment, ResolveError, ResourceId, SecretRef, ValueResolver};
use deckhand_migrator::{MigrationError, MigrationOutput};
use deckhand_plan::{PlanError, ResourceNode, ResourceProps, StagePlan};
use deckhand_state::{
    ApplyId, ApplyOutcome, ApplyRecord, ResourceRecord, StateStore, TriggerRecord,
    TriggerRecordPhase, unix_now,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use crate::diff::{Action, ChangeSet, diff};
use crate::error::{ApplyError, ApplyResult, ProvisionError, ProvisionResult};
use crate::provider::{MigrationRequest, ProvisionRequest, Provider, ResolvedEnv, ResourceOutputs};
use crate::report::{ActionReport, ActionStatus, ApplyReport};
use crate::trigger::{MigrationTrigger, TriggerError, TriggerOutcome};

/// Result of one spawned action.
enum TaskOutcome {
    Provisioned {
        id: ResourceId,
        action: Action,
        result: ProvisionResult<ResourceOutputs>,
    },
    Fired {
        trigger: MigrationTrigger,
        result: Result<Result<MigrationOutput, MigrationError>, TriggerError>,
    },
}

/// What halted an apply.
enum Failure {
    Provision {
        resource: ResourceId,
        error: ProvisionError,
    },
    Migration {
        trigger: ResourceId,
        error: MigrationError,
    },
    Trigger(TriggerError),
    /// The change happened but its record could not be written.
    Record {
        resource: ResourceId,
        error: ApplyError,
    },
    /// A spawned action panicked or was cancelled.
    Task {
        resource: Option<ResourceId>,
        reason: String,
    },
}

impl Failure {
    fn resource(&self) -> Option<&ResourceId> {
        match self {
            Failure::Provision { resource, .. } | Failure::Record { resource, .. } => Some(resource),
            Failure::Migration { trigger, .. } => Some(trigger),
            Failure::Task { resource, .. } => resource.as_ref(),
            Failure::Trigger(_) => None,
        }
    }

    fn message(&self) -> String {
        match self {
            Failure::Provision { error, .. } => error.to_string(),
            Failure::Migration { error, .. } => error.to_string(),
            Failure::Trigger(error) => error.to_string(),
            Failure::Record { error, .. } => format!("failed to record change: {error}"),
            Failure::Task { reason, .. } => reason.clone(),
        }
    }

    fn diagnostics(&self) -> Option<String> {
        match self {
            Failure::Migration { error, .. } => error.diagnostics(),
            _ => None,
        }
    }

    fn into_error(self, report: ApplyReport) -> ApplyError {
        match self {
            Failure::Provision { resource, error } => ApplyError::Provisioning {
                resource,
                source: error,
                report: Box::new(report),
            },
            Failure::Migration { trigger, error } => ApplyError::Migration {
                trigger,
                source: error,
                report: Box::new(report),
            },
            Failure::Trigger(error) => ApplyError::Trigger(error),
            Failure::Record { resource, error } => ApplyError::Record {
                resource,
                source: Box::new(error),
                report: Box::new(report),
            },
            Failure::Task { resource, reason } => ApplyError::Task {
                resource,
                reason,
                report: Box::new(report),
            },
        }
    }
}

/// Mutable bookkeeping of one apply.
struct ApplyRun<'p> {
    plan: &'p StagePlan,
    apply_id: ApplyId,
    changes: ChangeSet,
    previous: BTreeMap<ResourceId, ResourceRecord>,
    outputs: BTreeMap<ResourceId, ResourceOutputs>,
    converged: BTreeSet<ResourceId>,
    /// Actions that changed something, in completion order.
    applied: Vec<(ResourceId, Action)>,
    reports: BTreeMap<ResourceId, ActionReport>,
    migration: Option<TriggerOutcome>,
    failure: Option<Failure>,
}

impl ApplyRun<'_> {
    fn stage(&self) -> &str {
        &self.plan.name
    }

    fn mark(&mut self, id: &ResourceId, action: Action, status: ActionStatus, detail: Option<String>) {
        self.reports.insert(
            id.clone(),
            ActionReport {
                id: id.clone(),
                action,
                status,
                detail,
            },
        );
    }

    fn fail(&mut self, failure: Failure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    /// The state record `id` converges to, or `None` for ids outside the plan.
    fn record_for(&self, id: &ResourceId, outputs: &ResourceOutputs) -> ApplyResult<Option<ResourceRecord>> {
        let Some(node) = self.plan.graph.get(id) else {
            return Ok(None);
        };
        Ok(Some(ResourceRecord {
            stage: self.plan.name.clone(),
            id: id.clone(),
            stack: node.stack().to_string(),
            kind: node.kind().to_string(),
            props: serde_json::to_value(&node.props)
                .map_err(|e| ApplyError::Plan(PlanError::Serialize(e.to_string())))?,
            props_digest: node.props_digest(),
            depends_on: node.depends_on.iter().cloned().collect(),
            outputs: outputs.clone(),
            applied_at: unix_now(),
            apply_id: self.apply_id,
        }))
    }

    fn report(&self, outcome: ApplyOutcome) -> ApplyReport {
        let actions = self
            .changes
            .changes
            .iter()
            .filter_map(|change| self.reports.get(&change.id).cloned())
            .collect();
        ApplyReport {
            stage: self.plan.name.clone(),
            apply_id: self.apply_id,
            fingerprint: self.plan.fingerprint(),
            outcome,
            actions,
            migration: self.migration.clone(),
        }
    }
}

/// Resolves deferred values against fetched secrets and converged outputs.
struct StagedValues<'a> {
    secrets: &'a BTreeMap<SecretRef, SecretString>,
    outputs: &'a BTreeMap<ResourceId, ResourceOutputs>,
}

impl ValueResolver for StagedValues<'_> {
    fn secret(&self, reference: &SecretRef) -> Result<SecretString, ResolveError> {
        self.secrets
            .get(reference)
            .map(|value| SecretString::from(value.expose_secret().to_string()))
            .ok_or_else(|| ResolveError::UnknownSecret(reference.secret.to_string()))
    }

    fn attribute(&self, resource: &ResourceId, attribute: &str) -> Result<String, ResolveError> {
        self.outputs
            .get(resource)
            .and_then(|outputs| outputs.get(attribute))
            .cloned()
            .ok_or_else(|| ResolveError::UnknownAttribute {
                resource: resource.to_string(),
                attribute: attribute.to_string(),
            })
    }
}

#[derive(Clone)]
pub struct ApplyEngine {
    provider: Arc<dyn Provider>,
    store: StateStore,
}

impl ApplyEngine {
    pub fn new(provider: Arc<dyn Provider>, store: StateStore) -> Self {
        Self { provider, store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Change set the next apply of `plan` would carry out.
    pub fn diff(&self, plan: &StagePlan) -> ApplyResult<ChangeSet> {
        let records = self.store.list_resources(&plan.name)?;
        Ok(diff(plan, &records))
    }

    /// Converge `plan`'s stage.
    pub async fn apply(&self, plan: &StagePlan) -> ApplyResult<ApplyReport> {
        let records = self.store.list_resources(&plan.name)?;
        self.provider
            .refresh(&records)
            .await
            .map_err(ApplyError::Refresh)?;

        let changes = diff(plan, &records);
        let apply_id = self.store.next_apply_id(&plan.name)?;
        let started_at = unix_now();
        info!(
            stage = %plan.name,
            apply_id,
            provider = self.provider.name(),
            create = changes.count(Action::Create),
            update = changes.count(Action::Update),
            delete = changes.count(Action::Delete),
            unchanged = changes.count(Action::Unchanged),
            "apply started"
        );

        let mut run = ApplyRun {
            plan,
            apply_id,
            changes,
            outputs: records
                .iter()
                .map(|r| (r.id.clone(), r.outputs.clone()))
                .collect(),
            previous: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            converged: BTreeSet::new(),
            applied: Vec::new(),
            reports: BTreeMap::new(),
            migration: None,
            failure: None,
        };

        for wave in plan.graph.waves() {
            self.run_wave(&mut run, wave).await;
            if run.failure.is_some() {
                break;
            }
        }

        if run.failure.is_none() {
            self.delete_stale(&mut run).await;
        }

        match run.failure.take() {
            None => {
                let report = run.report(ApplyOutcome::Succeeded);
                self.store.put_apply(&ApplyRecord {
                    apply_id,
                    stage: plan.name.clone(),
                    fingerprint: report.fingerprint.clone(),
                    outcome: ApplyOutcome::Succeeded,
                    failed_resource: None,
                    error: None,
                    diagnostics: None,
                    started_at,
                    finished_at: unix_now(),
                })?;
                info!(stage = %plan.name, apply_id, "apply succeeded");
                Ok(report)
            }
            Some(failure) => {
                let pending: Vec<(ResourceId, Action)> = run
                    .changes
                    .changes
                    .iter()
                    .filter(|c| !run.reports.contains_key(&c.id))
                    .map(|c| (c.id.clone(), c.action))
                    .collect();
                for (id, action) in pending {
                    run.mark(&id, action, ActionStatus::Blocked, None);
                }
                self.rollback(&mut run).await;

                let report = run.report(ApplyOutcome::Failed);
                self.store.put_apply(&ApplyRecord {
                    apply_id,
                    stage: plan.name.clone(),
                    fingerprint: report.fingerprint.clone(),
                    outcome: ApplyOutcome::Failed,
                    failed_resource: failure.resource().cloned(),
                    error: Some(failure.message()),
                    diagnostics: failure.diagnostics(),
                    started_at,
                    finished_at: unix_now(),
                })?;
                error!(
                    stage = %plan.name,
                    apply_id,
                    resource = ?failure.resource(),
                    error = %failure.message(),
                    blocked = report.count(ActionStatus::Blocked),
                    "apply failed"
                );
                Err(failure.into_error(report))
            }
        }
    }

    /// Destroy every recorded resource of `stage`, dependents first.
    pub async fn teardown(&self, stage: &str) -> ApplyResult<ApplyReport> {
        let records = self.store.list_resources(stage)?;
        self.provider
            .refresh(&records)
            .await
            .map_err(ApplyError::Refresh)?;
        let apply_id = self.store.next_apply_id(stage)?;
        let started_at = unix_now();
        let fingerprint = self
            .store
            .latest_apply(stage)?
            .map(|a| a.fingerprint)
            .unwrap_or_default();
        info!(stage, apply_id, resources = records.len(), "teardown started");

        let ordered = teardown_order(records);
        let mut actions = Vec::with_capacity(ordered.len());
        let mut failure = None;
        for record in &ordered {
            if failure.is_some() {
                actions.push(action_report(&record.id, Action::Delete, ActionStatus::Blocked, None));
                continue;
            }
            let destroyed = match self.provider.destroy_resource(record).await {
                Ok(()) => self
                    .store
                    .delete_resource(stage, &record.id)
                    .map_err(|error| Failure::Record {
                        resource: record.id.clone(),
                        error: error.into(),
                    }),
                Err(error) => Err(Failure::Provision {
                    resource: record.id.clone(),
                    error,
                }),
            };
            match destroyed {
                Ok(_) => {
                    debug!(resource = %record.id, "destroyed");
                    actions.push(action_report(&record.id, Action::Delete, ActionStatus::Deleted, None));
                }
                Err(halt) => {
                    actions.push(action_report(
                        &record.id,
                        Action::Delete,
                        ActionStatus::Failed,
                        Some(halt.message()),
                    ));
                    failure = Some(halt);
                }
            }
        }

        let outcome = if failure.is_some() {
            ApplyOutcome::Failed
        } else {
            ApplyOutcome::TornDown
        };
        let report = ApplyReport {
            stage: stage.to_string(),
            apply_id,
            fingerprint: fingerprint.clone(),
            outcome,
            actions,
            migration: None,
        };
        self.store.put_apply(&ApplyRecord {
            apply_id,
            stage: stage.to_string(),
            fingerprint,
            outcome,
            failed_resource: failure.as_ref().and_then(|f| f.resource().cloned()),
            error: failure.as_ref().map(Failure::message),
            diagnostics: None,
            started_at,
            finished_at: unix_now(),
        })?;

        match failure {
            None => {
                info!(stage, apply_id, "teardown complete");
                Ok(report)
            }
            Some(failure) => {
                error!(stage, apply_id, resource = ?failure.resource(), error = %failure.message(), "teardown failed");
                Err(failure.into_error(report))
            }
        }
    }

    /// Run one wave. Every failure lands in `run.failure`.
    async fn run_wave(&self, run: &mut ApplyRun<'_>, wave: Vec<ResourceId>) {
        let mut tasks = JoinSet::new();
        let mut running: HashMap<task::Id, (ResourceId, Action)> = HashMap::new();

        for id in wave {
            let Some(node) = run.plan.graph.get(&id) else {
                continue;
            };
            let action = run.changes.action(&id).unwrap_or(Action::Create);
            match action {
                Action::Unchanged => {
                    run.converged.insert(id.clone());
                    run.mark(&id, action, ActionStatus::Skipped, None);
                }
                Action::Create | Action::Update => {
                    match self.provision_request(run.stage(), node, &run.outputs).await {
                        Ok(request) => {
                            let provider = Arc::clone(&self.provider);
                            let task_id = id.clone();
                            let handle = tasks.spawn(async move {
                                let result = provider.apply_resource(request).await;
                                TaskOutcome::Provisioned { id, action, result }
                            });
                            running.insert(handle.id(), (task_id, action));
                        }
                        Err(error) => {
                            run.mark(&id, action, ActionStatus::Failed, Some(error.to_string()));
                            run.fail(Failure::Provision { resource: id, error });
                            break;
                        }
                    }
                }
                Action::Fire => {
                    let mut trigger = match MigrationTrigger::from_node(node) {
                        Ok(trigger) => trigger,
                        Err(error) => {
                            run.mark(&id, action, ActionStatus::Failed, Some(error.to_string()));
                            run.fail(Failure::Trigger(error));
                            break;
                        }
                    };
                    match self.migration_request(run, &trigger).await {
                        Ok(request) => {
                            let provider = Arc::clone(&self.provider);
                            let converged = run.converged.clone();
                            let handle = tasks.spawn(async move {
                                let result = trigger.fire(&converged, provider.as_ref(), request).await;
                                TaskOutcome::Fired { trigger, result }
                            });
                            running.insert(handle.id(), (id, action));
                        }
                        Err(error) => {
                            run.mark(&id, action, ActionStatus::Failed, Some(error.to_string()));
                            run.fail(Failure::Provision { resource: id, error });
                            break;
                        }
                    }
                }
                Action::Delete => {}
            }
        }

        // Work already started finishes even after a failure, so that it
        // can be rolled back.
        while let Some(joined) = tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((_, outcome)) => outcome,
                Err(err) => {
                    let reason = format!("apply task failed: {err}");
                    let resource = running.remove(&err.id()).map(|(id, action)| {
                        run.mark(&id, action, ActionStatus::Failed, Some(reason.clone()));
                        id
                    });
                    error!(resource = ?resource, %reason, "apply task did not finish");
                    run.fail(Failure::Task { resource, reason });
                    continue;
                }
            };
            match outcome {
                TaskOutcome::Provisioned { id, action, result } => match result {
                    Ok(outputs) => {
                        // Pushed first so rollback undoes it even if recording fails.
                        run.applied.push((id.clone(), action));
                        match self.record_converged(run, &id, outputs) {
                            Ok(()) => {
                                run.mark(&id, action, ActionStatus::Applied, None);
                                debug!(resource = %id, action = action.as_str(), "converged");
                            }
                            Err(error) => {
                                error!(resource = %id, %error, "failed to record converged resource");
                                run.mark(&id, action, ActionStatus::Failed, Some(error.to_string()));
                                run.fail(Failure::Record { resource: id, error });
                            }
                        }
                    }
                    Err(error) => {
                        warn!(resource = %id, %error, "provisioning failed");
                        run.mark(&id, action, ActionStatus::Failed, Some(error.to_string()));
                        run.fail(Failure::Provision { resource: id, error });
                    }
                },
                TaskOutcome::Fired { trigger, result } => self.settle_trigger(run, trigger, result),
            }
        }
    }

    fn settle_trigger(
        &self,
        run: &mut ApplyRun<'_>,
        trigger: MigrationTrigger,
        result: Result<Result<MigrationOutput, MigrationError>, TriggerError>,
    ) {
        let id = trigger.id().clone();
        let migration = match result {
            Ok(migration) => migration,
            Err(error) => {
                run.mark(&id, Action::Fire, ActionStatus::Failed, Some(error.to_string()));
                run.fail(Failure::Trigger(error));
                return;
            }
        };

        let (phase, exit_code, stdout, stderr) = match &migration {
            Ok(output) => (
                TriggerRecordPhase::Succeeded,
                Some(output.exit_code),
                output.stdout.clone(),
                output.stderr.clone(),
            ),
            Err(error) => {
                let (stdout, stderr) = match error.output() {
                    Some((stdout, stderr)) => (stdout.to_string(), stderr.to_string()),
                    None => (String::new(), error.to_string()),
                };
                let exit_code = match error {
                    MigrationError::Exited { .. } | MigrationError::Signaled { .. } => {
                        Some(error.exit_code())
                    }
                    _ => None,
                };
                (TriggerRecordPhase::Failed, exit_code, stdout, stderr)
            }
        };
        run.migration = trigger.outcome().cloned();
        let recorded = self.store.put_trigger(&TriggerRecord {
            stage: run.plan.name.clone(),
            trigger: id.clone(),
            apply_id: run.apply_id,
            phase,
            exit_code,
            stdout,
            stderr,
            fired_at: unix_now(),
        });

        match (migration, recorded) {
            (Ok(output), Ok(())) => {
                let outputs = ResourceOutputs::from([
                    ("apply_id".to_string(), run.apply_id.to_string()),
                    ("exit_code".to_string(), output.exit_code.to_string()),
                ]);
                run.applied.push((id.clone(), Action::Fire));
                match self.record_converged(run, &id, outputs) {
                    Ok(()) => run.mark(&id, Action::Fire, ActionStatus::Fired, None),
                    Err(error) => {
                        error!(trigger = %id, %error, "failed to record migration trigger");
                        run.mark(&id, Action::Fire, ActionStatus::Failed, Some(error.to_string()));
                        run.fail(Failure::Record { resource: id, error });
                    }
                }
            }
            (Err(error), _) => {
                run.mark(&id, Action::Fire, ActionStatus::Failed, Some(error.to_string()));
                run.fail(Failure::Migration { trigger: id, error });
            }
            (Ok(_), Err(error)) => {
                error!(trigger = %id, %error, "failed to record migration firing");
                run.mark(&id, Action::Fire, ActionStatus::Failed, Some(error.to_string()));
                run.fail(Failure::Record {
                    resource: id,
                    error: error.into(),
                });
            }
        }
    }

    /// Outputs are kept even when the record cannot be written, so rollback
    /// can still destroy what the provider created.
    fn record_converged(
        &self,
        run: &mut ApplyRun<'_>,
        id: &ResourceId,
        outputs: ResourceOutputs,
    ) -> ApplyResult<()> {
        run.outputs.insert(id.clone(), outputs.clone());
        if let Some(record) = run.record_for(id, &outputs)? {
            self.store.put_resource(&record)?;
        }
        run.converged.insert(id.clone());
        Ok(())
    }

    /// Destroy recorded resources the plan no longer contains.
    async fn delete_stale(&self, run: &mut ApplyRun<'_>) {
        let stale: Vec<ResourceRecord> = run
            .changes
            .deletions()
            .filter_map(|c| run.previous.get(&c.id).cloned())
            .collect();
        for record in teardown_order(stale) {
            if run.failure.is_some() {
                run.mark(&record.id, Action::Delete, ActionStatus::Blocked, None);
                continue;
            }
            if let Err(error) = self.provider.destroy_resource(&record).await {
                run.mark(&record.id, Action::Delete, ActionStatus::Failed, Some(error.to_string()));
                run.fail(Failure::Provision {
                    resource: record.id.clone(),
                    error,
                });
                continue;
            }
            run.outputs.remove(&record.id);
            match self.store.delete_resource(&run.plan.name, &record.id) {
                Ok(_) => {
                    run.mark(&record.id, Action::Delete, ActionStatus::Deleted, None);
                    info!(resource = %record.id, "stale resource deleted");
                }
                Err(error) => {
                    error!(resource = %record.id, %error, "failed to forget deleted resource");
                    run.mark(&record.id, Action::Delete, ActionStatus::Failed, Some(error.to_string()));
                    run.fail(Failure::Record {
                        resource: record.id.clone(),
                        error: error.into(),
                    });
                }
            }
        }
    }

    /// Undo this apply's changes, most recent first. Failures are logged
    /// and reported; rollback carries on with the remaining actions.
    async fn rollback(&self, run: &mut ApplyRun<'_>) {
        let applied = std::mem::take(&mut run.applied);
        for (id, action) in applied.into_iter().rev() {
            if action == Action::Delete {
                continue;
            }
            let result = match run.previous.get(&id).cloned() {
                None => self.undo_create(run, &id).await,
                Some(prior) => self.restore(run, prior, action).await,
            };
            match result {
                Ok(()) => {
                    info!(resource = %id, action = action.as_str(), "rolled back");
                    run.mark(&id, action, ActionStatus::RolledBack, None);
                }
                Err(error) => {
                    warn!(resource = %id, %error, "rollback failed");
                    run.mark(&id, action, ActionStatus::Applied, Some(format!("rollback failed: {error}")));
                }
            }
        }
    }

    async fn undo_create(&self, run: &ApplyRun<'_>, id: &ResourceId) -> ApplyResult<()> {
        let stored = self.store.get_resource(run.stage(), id)?;
        let record = match (&stored, run.outputs.get(id)) {
            (Some(record), _) => record.clone(),
            // Created, but the record was never written.
            (None, Some(outputs)) => match run.record_for(id, outputs)? {
                Some(record) => record,
                None => return Ok(()),
            },
            (None, None) => return Ok(()),
        };
        self.provider
            .destroy_resource(&record)
            .await
            .map_err(|source| ApplyError::Rollback {
                resource: id.clone(),
                source,
            })?;
        if stored.is_some() {
            self.store.delete_resource(run.stage(), id)?;
        }
        Ok(())
    }

    async fn restore(&self, run: &mut ApplyRun<'_>, prior: ResourceRecord, action: Action) -> ApplyResult<()> {
        let rollback_err = |source| ApplyError::Rollback {
            resource: prior.id.clone(),
            source,
        };
        if action == Action::Update {
            let props: ResourceProps = serde_json::from_value(prior.props.clone()).map_err(|e| {
                rollback_err(ProvisionError::CorruptRecord {
                    resource: prior.id.clone(),
                    reason: e.to_string(),
                })
            })?;
            let node = ResourceNode {
                id: prior.id.clone(),
                props,
                depends_on: prior.depends_on.iter().cloned().collect(),
            };
            let request = self
                .provision_request(run.stage(), &node, &run.outputs)
                .await
                .map_err(rollback_err)?;
            self.provider
                .apply_resource(request)
                .await
                .map_err(rollback_err)?;
        }
        self.store.put_resource(&prior)?;
        run.outputs.insert(prior.id.clone(), prior.outputs.clone());
        Ok(())
    }

    async fn provision_request(
        &self,
        stage: &str,
        node: &ResourceNode,
        outputs: &BTreeMap<ResourceId, ResourceOutputs>,
    ) -> ProvisionResult<ProvisionRequest> {
        let env = self.resolve_values(node.props.deferred_values(), outputs).await?;
        let inputs = node
            .depends_on
            .iter()
            .filter_map(|dep| outputs.get(dep).map(|o| (dep.clone(), o.clone())))
            .collect();
        Ok(ProvisionRequest {
            stage: stage.to_string(),
            node: node.clone(),
            env,
            inputs,
        })
    }

    async fn migration_request(
        &self,
        run: &ApplyRun<'_>,
        trigger: &MigrationTrigger,
    ) -> ProvisionResult<MigrationRequest> {
        let function = trigger.function();
        let props = match run.plan.graph.get(function).map(|n| &n.props) {
            Some(ResourceProps::Function(props)) => props.clone(),
            _ => {
                return Err(ProvisionError::Rejected {
                    resource: trigger.id().clone(),
                    reason: format!("handler {function} is not a planned function"),
                });
            }
        };
        let values: Vec<(&str, &EnvValue)> = props
            .environment
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        let env = self.resolve_values(values, &run.outputs).await?;
        Ok(MigrationRequest {
            stage: run.plan.name.clone(),
            trigger: trigger.id().clone(),
            function: function.clone(),
            props,
            env,
        })
    }

    /// Resolve deferred values. Secrets are fetched from the provider;
    /// attributes come from converged outputs.
    async fn resolve_values(
        &self,
        values: Vec<(&str, &EnvValue)>,
        outputs: &BTreeMap<ResourceId, ResourceOutputs>,
    ) -> ProvisionResult<ResolvedEnv> {
        let mut secrets: BTreeMap<SecretRef, SecretString> = BTreeMap::new();
        for (_, value) in &values {
            for fragment in value.fragments() {
                if let Fragment::Secret { secret } = fragment {
                    if !secrets.contains_key(secret) {
                        let resolved = self.provider.resolve_secret(secret).await?;
                        secrets.insert(secret.clone(), resolved);
                    }
                }
            }
        }

        let resolver = StagedValues {
            secrets: &secrets,
            outputs,
        };
        let mut env = ResolvedEnv::new();
        for (key, value) in values {
            env.insert(key.to_string(), value.resolve(&resolver)?);
        }
        Ok(env)
    }
}

fn action_report(
    id: &ResourceId,
    action: Action,
    status: ActionStatus,
    detail: Option<String>,
) -> ActionReport {
    ActionReport {
        id: id.clone(),
        action,
        status,
        detail,
    }
}

/// Order records so that every resource comes before the resources it
/// depends on.
pub(crate) fn teardown_order(records: Vec<ResourceRecord>) -> Vec<ResourceRecord> {
    let mut remaining: BTreeMap<ResourceId, ResourceRecord> =
        records.into_iter().map(|r| (r.id.clone(), r)).collect();
    let mut order = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let depended: BTreeSet<&ResourceId> = remaining
            .values()
            .flat_map(|r| r.depends_on.iter())
            .collect();
        let leaves: Vec<ResourceId> = remaining
            .keys()
            .filter(|id| !depended.contains(id))
            .cloned()
            .collect();
        if leaves.is_empty() {
            // Stored edges form a cycle; fall back to id order.
            order.extend(remaining.into_values());
            break;
        }
        for id in leaves {
            if let Some(record) = remaining.remove(&id) {
                order.push(record);
            }
        }
    }
    order
}
