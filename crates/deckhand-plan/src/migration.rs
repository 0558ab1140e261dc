//! Migration orchestrator provisioner.
//!
//! Declares the migration function and a run-once trigger bound to it. The
//! trigger carries an explicit ordering edge on the database cluster, so it
//! can only fire once the cluster is available. Execution semantics live in
//! the apply engine.

use std::collections::BTreeMap;

use deckhand_core::{EnvValue, Namer, SecretRef};
use serde::{Deserialize, Serialize};

use crate::database::DatabaseEndpoint;
use crate::error::PlanResult;
use crate::graph::StackBuilder;
use crate::handles::{ClusterHandle, FunctionHandle, TriggerHandle};
use crate::network::NetworkTopology;
use crate::props::{
    Architecture, ConnectGrantProps, FunctionProps, ImageAsset, OutputProps, Principal,
    PrincipalRole, ResourceProps, TriggerProps,
};

pub const MIGRATION_MEMORY_MIB: u32 = 256;
/// Minutes-scale so long migrations are not cut short.
pub const MIGRATION_TIMEOUT_SECS: u64 = 120;
pub const MIGRATION_LOG_RETENTION_DAYS: u32 = 1;

#[derive(Debug, Clone)]
pub struct MigrationInput<'a> {
    pub namer: &'a Namer,
    pub network: &'a NetworkTopology,
    pub database: &'a DatabaseEndpoint,
    pub source_root: String,
    pub dockerfile_name: String,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, EnvValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub function: FunctionHandle,
    pub trigger: TriggerHandle,
    /// Resource whose availability gates the trigger.
    pub prerequisite: ClusterHandle,
}

pub fn provision(stack: &mut StackBuilder<'_>, input: &MigrationInput<'_>) -> PlanResult<MigrationJob> {
    let namer = input.namer;
    let cluster = input.database.cluster.id().clone();

    let function_name = namer.name("MigrationLambda");
    let function = stack.add(
        &function_name,
        ResourceProps::Function(FunctionProps {
            name: function_name.clone(),
            image: ImageAsset {
                source_root: input.source_root.clone(),
                file: input.dockerfile_name.clone(),
                excludes: [".git", "pgdata", "cdk.out", "node_modules"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                platform: Some(Architecture::Arm64),
            },
            command: input.command.clone(),
            memory_mib: MIGRATION_MEMORY_MIB,
            timeout_secs: MIGRATION_TIMEOUT_SECS,
            architecture: Architecture::Arm64,
            log_retention_days: MIGRATION_LOG_RETENTION_DAYS,
            vpc: input.network.vpc.id().clone(),
            security_groups: vec![input.network.web_security_group.id().clone()],
            environment: input.environment.clone(),
        }),
    )?;

    stack.add(
        &namer.name("MigrationLambdaConnect"),
        ResourceProps::ConnectGrant(ConnectGrantProps {
            cluster: cluster.clone(),
            grantee: Principal {
                resource: function.clone(),
                role: PrincipalRole::Function,
            },
            user: SecretRef::new(input.database.secret.id(), "username"),
        }),
    )?;

    // Fires during the apply, after the cluster is available.
    let trigger = stack.add_after(
        &namer.name("MigrationTrigger"),
        ResourceProps::Trigger(TriggerProps {
            handler: function.clone(),
            execute_after: vec![cluster.clone()],
        }),
        [cluster.clone()],
    )?;

    let output_name = namer.name("MigrationLambdaArn");
    stack.add(
        &output_name,
        ResourceProps::Output(OutputProps {
            name: output_name.clone(),
            value: EnvValue::default().attr(&function, "arn"),
            description: "The ARN of the migration function".to_string(),
        }),
    )?;

    Ok(MigrationJob {
        function: FunctionHandle::new(function),
        trigger: TriggerHandle::new(trigger),
        prerequisite: input.database.cluster.clone(),
    })
}
