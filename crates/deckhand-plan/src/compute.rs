//! Compute cluster provisioner.
//!
//! An auto-scaled fleet running one container per instance in bridge
//! networking mode, where host and container ports must match. The service
//! waits on the capacity group so it is never scheduled before capacity
//! exists.

use std::collections::BTreeMap;

use deckhand_core::{EnvValue, Namer, SecretRef};
use serde::{Deserialize, Serialize};

use crate::database::DatabaseEndpoint;
use crate::error::PlanResult;
use crate::graph::StackBuilder;
use crate::handles::{
    CapacityGroupHandle, ComputeClusterHandle, ServiceHandle, TaskDefinitionHandle,
};
use crate::network::NetworkTopology;
use crate::props::{
    CapacityGroupProps, ComputeClusterProps, ConnectGrantProps, ContainerSpec, ImageAsset,
    LogConfig, NetworkMode, PortMapping, Principal, PrincipalRole, ResourceProps,
    SecretReadGrantProps, ServiceProps, SubnetTier, TaskDefinitionProps,
};

pub const INSTANCE_TYPE: &str = "t4g.micro";
pub const MACHINE_IMAGE: &str = "ecs-optimized/amazon-linux-2023/arm64";
/// Soft memory limit per container.
pub const MEMORY_RESERVATION_MIB: u32 = 512;
pub const CONTAINER_LOG_RETENTION_DAYS: u32 = 7;

#[derive(Debug, Clone)]
pub struct ComputeInput<'a> {
    pub namer: &'a Namer,
    pub network: &'a NetworkTopology,
    pub database: &'a DatabaseEndpoint,
    pub host_port: u16,
    pub source_root: String,
    pub dockerfile_name: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub service_name: String,
    pub container_name: String,
    pub environment: BTreeMap<String, EnvValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeService {
    pub cluster: ComputeClusterHandle,
    pub capacity: CapacityGroupHandle,
    pub task_definition: TaskDefinitionHandle,
    pub service: ServiceHandle,
    pub container_name: String,
    pub port: u16,
}

pub fn provision(stack: &mut StackBuilder<'_>, input: &ComputeInput<'_>) -> PlanResult<ComputeService> {
    let prefix = &input.service_name;
    let vpc = input.network.vpc.id().clone();
    let web = input.network.web_security_group.id().clone();

    let cluster_name = format!("{prefix}Cluster");
    let cluster = stack.add(
        &cluster_name,
        ResourceProps::ComputeCluster(ComputeClusterProps {
            name: input.namer.name(&cluster_name),
            vpc: vpc.clone(),
        }),
    )?;

    let capacity_name = format!("{prefix}ClusterCapacity");
    let capacity = stack.add(
        &capacity_name,
        ResourceProps::CapacityGroup(CapacityGroupProps {
            name: input.namer.name(&capacity_name),
            cluster: cluster.clone(),
            vpc,
            min_capacity: input.min_capacity,
            max_capacity: input.max_capacity,
            instance_type: INSTANCE_TYPE.to_string(),
            machine_image: MACHINE_IMAGE.to_string(),
            subnet_tier: SubnetTier::PrivateWithEgress,
            security_groups: vec![web],
        }),
    )?;

    let container = ContainerSpec {
        name: input.container_name.clone(),
        image: ImageAsset {
            source_root: input.source_root.clone(),
            file: input.dockerfile_name.clone(),
            excludes: [".git", "cdk.out", "node_modules"]
                .into_iter()
                .map(String::from)
                .collect(),
            platform: None,
        },
        memory_reservation_mib: MEMORY_RESERVATION_MIB,
        port_mappings: vec![PortMapping {
            host_port: input.host_port,
            container_port: input.host_port,
        }],
        environment: input.environment.clone(),
        logging: LogConfig {
            retention_days: CONTAINER_LOG_RETENTION_DAYS,
            stream_prefix: input.container_name.to_lowercase(),
        },
    };

    let task_name = format!("{prefix}TaskDefinition");
    let task_definition = stack.add(
        &task_name,
        ResourceProps::TaskDefinition(TaskDefinitionProps {
            family: input.namer.name(&task_name),
            network_mode: NetworkMode::Bridge,
            containers: vec![container],
            task_role_policies: vec![
                "SecretsManagerReadWrite".to_string(),
                "service-role/AmazonEC2ContainerServiceforEC2Role".to_string(),
            ],
        }),
    )?;

    stack.add(
        &format!("{prefix}SecretRead"),
        ResourceProps::SecretReadGrant(SecretReadGrantProps {
            secret: input.database.secret.id().clone(),
            grantee: Principal {
                resource: task_definition.clone(),
                role: PrincipalRole::TaskRole,
            },
        }),
    )?;

    stack.add(
        &format!("{prefix}DatabaseConnect"),
        ResourceProps::ConnectGrant(ConnectGrantProps {
            cluster: input.database.cluster.id().clone(),
            grantee: Principal {
                resource: task_definition.clone(),
                role: PrincipalRole::ExecutionRole,
            },
            user: SecretRef::new(input.database.secret.id(), "username"),
        }),
    )?;

    let service = stack.add_after(
        &format!("{prefix}Service"),
        ResourceProps::Service(ServiceProps {
            name: input.service_name.clone(),
            cluster: cluster.clone(),
            task_definition: task_definition.clone(),
            desired_count: input.min_capacity,
        }),
        [capacity.clone()],
    )?;

    Ok(ComputeService {
        cluster: ComputeClusterHandle::new(cluster),
        capacity: CapacityGroupHandle::new(capacity),
        task_definition: TaskDefinitionHandle::new(task_definition),
        service: ServiceHandle::new(service),
        container_name: input.container_name.clone(),
        port: input.host_port,
    })
}
