//! Resource property types.
//!
//! Properties are plain data. Any field that names another resource holds
//! its [`ResourceId`], and [`ResourceProps::references`] reports those ids
//! so the graph can turn every cross-resource reference into an ordering
//! edge.

use std::collections::BTreeMap;
use std::fmt;

use deckhand_core::{CapacityBounds, DatabaseEngine, EnvValue, ResourceId, SecretRef};
use serde::{Deserialize, Serialize};

/// Kind of a planned resource, used for reporting and lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    SecurityGroup,
    IngressRule,
    SubnetGroup,
    DatabaseSecret,
    DatabaseCluster,
    Function,
    ConnectGrant,
    SecretReadGrant,
    Trigger,
    ComputeCluster,
    CapacityGroup,
    TaskDefinition,
    Service,
    Certificate,
    LoadBalancer,
    TargetGroup,
    Listener,
    Output,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::IngressRule => "ingress_rule",
            ResourceKind::SubnetGroup => "subnet_group",
            ResourceKind::DatabaseSecret => "database_secret",
            ResourceKind::DatabaseCluster => "database_cluster",
            ResourceKind::Function => "function",
            ResourceKind::ConnectGrant => "connect_grant",
            ResourceKind::SecretReadGrant => "secret_read_grant",
            ResourceKind::Trigger => "trigger",
            ResourceKind::ComputeCluster => "compute_cluster",
            ResourceKind::CapacityGroup => "capacity_group",
            ResourceKind::TaskDefinition => "task_definition",
            ResourceKind::Service => "service",
            ResourceKind::Certificate => "certificate",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::Listener => "listener",
            ResourceKind::Output => "output",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceProps {
    Vpc(VpcProps),
    SecurityGroup(SecurityGroupProps),
    IngressRule(IngressRuleProps),
    SubnetGroup(SubnetGroupProps),
    DatabaseSecret(DatabaseSecretProps),
    DatabaseCluster(DatabaseClusterProps),
    Function(FunctionProps),
    ConnectGrant(ConnectGrantProps),
    SecretReadGrant(SecretReadGrantProps),
    Trigger(TriggerProps),
    ComputeCluster(ComputeClusterProps),
    CapacityGroup(CapacityGroupProps),
    TaskDefinition(TaskDefinitionProps),
    Service(ServiceProps),
    Certificate(CertificateProps),
    LoadBalancer(LoadBalancerProps),
    TargetGroup(TargetGroupProps),
    Listener(ListenerProps),
    Output(OutputProps),
}

impl ResourceProps {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceProps::Vpc(_) => ResourceKind::Vpc,
            ResourceProps::SecurityGroup(_) => ResourceKind::SecurityGroup,
            ResourceProps::IngressRule(_) => ResourceKind::IngressRule,
            ResourceProps::SubnetGroup(_) => ResourceKind::SubnetGroup,
            ResourceProps::DatabaseSecret(_) => ResourceKind::DatabaseSecret,
            ResourceProps::DatabaseCluster(_) => ResourceKind::DatabaseCluster,
            ResourceProps::Function(_) => ResourceKind::Function,
            ResourceProps::ConnectGrant(_) => ResourceKind::ConnectGrant,
            ResourceProps::SecretReadGrant(_) => ResourceKind::SecretReadGrant,
            ResourceProps::Trigger(_) => ResourceKind::Trigger,
            ResourceProps::ComputeCluster(_) => ResourceKind::ComputeCluster,
            ResourceProps::CapacityGroup(_) => ResourceKind::CapacityGroup,
            ResourceProps::TaskDefinition(_) => ResourceKind::TaskDefinition,
            ResourceProps::Service(_) => ResourceKind::Service,
            ResourceProps::Certificate(_) => ResourceKind::Certificate,
            ResourceProps::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceProps::TargetGroup(_) => ResourceKind::TargetGroup,
            ResourceProps::Listener(_) => ResourceKind::Listener,
            ResourceProps::Output(_) => ResourceKind::Output,
        }
    }

    /// Every resource these properties name.
    pub fn references(&self) -> Vec<ResourceId> {
        let mut refs: Vec<ResourceId> = Vec::new();
        match self {
            ResourceProps::Vpc(_)
            | ResourceProps::DatabaseSecret(_)
            | ResourceProps::Certificate(_) => {}
            ResourceProps::SecurityGroup(p) => refs.push(p.vpc.clone()),
            ResourceProps::IngressRule(p) => {
                refs.push(p.group.clone());
                refs.push(p.source.clone());
            }
            ResourceProps::SubnetGroup(p) => refs.push(p.vpc.clone()),
            ResourceProps::DatabaseCluster(p) => {
                refs.push(p.subnet_group.clone());
                refs.push(p.credentials.clone());
                refs.extend(p.security_groups.iter().cloned());
            }
            ResourceProps::Function(p) => {
                refs.push(p.vpc.clone());
                refs.extend(p.security_groups.iter().cloned());
                refs.extend(env_references(&p.environment));
            }
            ResourceProps::ConnectGrant(p) => {
                refs.push(p.cluster.clone());
                refs.push(p.grantee.resource.clone());
                refs.push(p.user.secret.clone());
            }
            ResourceProps::SecretReadGrant(p) => {
                refs.push(p.secret.clone());
                refs.push(p.grantee.resource.clone());
            }
            ResourceProps::Trigger(p) => {
                refs.push(p.handler.clone());
                refs.extend(p.execute_after.iter().cloned());
            }
            ResourceProps::ComputeCluster(p) => refs.push(p.vpc.clone()),
            ResourceProps::CapacityGroup(p) => {
                refs.push(p.cluster.clone());
                refs.push(p.vpc.clone());
                refs.extend(p.security_groups.iter().cloned());
            }
            ResourceProps::TaskDefinition(p) => {
                for container in &p.containers {
                    refs.extend(env_references(&container.environment));
                }
            }
            ResourceProps::Service(p) => {
                refs.push(p.cluster.clone());
                refs.push(p.task_definition.clone());
            }
            ResourceProps::LoadBalancer(p) => {
                refs.push(p.vpc.clone());
                refs.push(p.security_group.clone());
            }
            ResourceProps::TargetGroup(p) => {
                refs.push(p.vpc.clone());
                refs.extend(p.targets.iter().map(|t| t.service.clone()));
            }
            ResourceProps::Listener(p) => {
                refs.push(p.load_balancer.clone());
                refs.extend(p.certificates.iter().cloned());
                refs.extend(p.default_target_groups.iter().cloned());
            }
            ResourceProps::Output(p) => refs.extend(p.value.references().cloned()),
        }
        refs
    }

    /// Environment values this resource hands to a runtime workload.
    pub fn environment(&self) -> Option<&BTreeMap<String, EnvValue>> {
        match self {
            ResourceProps::Function(p) => Some(&p.environment),
            ResourceProps::TaskDefinition(p) => p.containers.first().map(|c| &c.environment),
            _ => None,
        }
    }

    /// Every deferred value the provider needs resolved before it can
    /// converge this resource, keyed by the name it is delivered under.
    pub fn deferred_values(&self) -> Vec<(&str, &EnvValue)> {
        match self {
            ResourceProps::Output(p) => vec![("value", &p.value)],
            _ => self
                .environment()
                .map(|env| env.iter().map(|(k, v)| (k.as_str(), v)).collect())
                .unwrap_or_default(),
        }
    }
}

fn env_references(env: &BTreeMap<String, EnvValue>) -> impl Iterator<Item = ResourceId> + '_ {
    env.values().flat_map(|v| v.references().cloned())
}

// ── Network ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetTier {
    /// Internet-facing.
    Public,
    /// No egress. Hosts the database.
    PrivateIsolated,
    /// NAT-routed egress. Hosts compute.
    PrivateWithEgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub name: String,
    pub tier: SubnetTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcProps {
    pub name: String,
    pub max_azs: u32,
    pub nat_gateways: u32,
    pub subnets: Vec<SubnetSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupProps {
    pub name: String,
    pub vpc: ResourceId,
    pub description: String,
    pub allow_all_outbound: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Http,
    Https,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRuleProps {
    /// Group the rule is attached to.
    pub group: ResourceId,
    /// Only traffic originating from this group is admitted.
    pub source: ResourceId,
    pub protocol: Protocol,
    pub port: u16,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetGroupProps {
    pub name: String,
    pub vpc: ResourceId,
    pub tier: SubnetTier,
    pub description: String,
}

// ── Database ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSecretProps {
    pub name: String,
    pub username: String,
    pub dbname: String,
    /// Length of the generated password. The value itself is never planned.
    pub password_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseClusterProps {
    pub name: String,
    pub engine: DatabaseEngine,
    pub port: u16,
    pub default_database_name: String,
    pub subnet_group: ResourceId,
    pub security_groups: Vec<ResourceId>,
    pub credentials: ResourceId,
    pub storage_encrypted: bool,
    pub iam_authentication: bool,
    pub capacity: CapacityBounds,
    pub writer: String,
}

// ── Workloads ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Arm64,
    X86_64,
}

/// Container image built from a local build context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub source_root: String,
    pub file: String,
    pub excludes: Vec<String>,
    pub platform: Option<Architecture>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionProps {
    pub name: String,
    pub image: ImageAsset,
    pub command: Vec<String>,
    pub memory_mib: u32,
    pub timeout_secs: u64,
    pub architecture: Architecture,
    pub log_retention_days: u32,
    pub vpc: ResourceId,
    pub security_groups: Vec<ResourceId>,
    pub environment: BTreeMap<String, EnvValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalRole {
    Function,
    TaskRole,
    ExecutionRole,
}

/// An identity that receives a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub resource: ResourceId,
    pub role: PrincipalRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectGrantProps {
    pub cluster: ResourceId,
    pub grantee: Principal,
    /// Database user, resolved from the credential secret.
    pub user: SecretRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReadGrantProps {
    pub secret: ResourceId,
    pub grantee: Principal,
}

/// Invokes `handler` exactly once per apply, after `execute_after` converged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerProps {
    pub handler: ResourceId,
    pub execute_after: Vec<ResourceId>,
}

// ── Compute ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeClusterProps {
    pub name: String,
    pub vpc: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityGroupProps {
    pub name: String,
    pub cluster: ResourceId,
    pub vpc: ResourceId,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub instance_type: String,
    pub machine_image: String,
    pub subnet_tier: SubnetTier,
    pub security_groups: Vec<ResourceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    Bridge,
    Host,
    AwsVpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub retention_days: u32,
    pub stream_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ImageAsset,
    pub memory_reservation_mib: u32,
    pub port_mappings: Vec<PortMapping>,
    pub environment: BTreeMap<String, EnvValue>,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinitionProps {
    pub family: String,
    pub network_mode: NetworkMode,
    pub containers: Vec<ContainerSpec>,
    pub task_role_policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProps {
    pub name: String,
    pub cluster: ResourceId,
    pub task_definition: ResourceId,
    pub desired_count: u32,
}

// ── Routing ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateProps {
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerProps {
    pub name: String,
    pub vpc: ResourceId,
    pub internet_facing: bool,
    pub subnet_tier: SubnetTier,
    pub security_group: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Instance,
    Ip,
}

/// A service's container registered behind a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub service: ResourceId,
    pub container_name: String,
    pub container_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupProps {
    pub name: String,
    pub vpc: ResourceId,
    pub port: u16,
    pub protocol: Protocol,
    pub target_type: TargetType,
    pub targets: Vec<TargetSpec>,
    pub health_check: HealthCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SslPolicy {
    RecommendedTls,
    Tls13,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerProps {
    pub load_balancer: ResourceId,
    pub port: u16,
    pub protocol: Protocol,
    pub ssl_policy: SslPolicy,
    pub open: bool,
    pub certificates: Vec<ResourceId>,
    pub default_target_groups: Vec<ResourceId>,
}

// ── Outputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputProps {
    pub name: String,
    pub value: EnvValue,
    pub description: String,
}
