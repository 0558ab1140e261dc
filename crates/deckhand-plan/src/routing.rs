//! Routing provisioner: public HTTPS entry point for the compute service.

use deckhand_core::Namer;
use serde::{Deserialize, Serialize};

use crate::compute::ComputeService;
use crate::error::PlanResult;
use crate::graph::StackBuilder;
use crate::handles::{ListenerHandle, LoadBalancerHandle, TargetGroupHandle};
use crate::network::NetworkTopology;
use crate::props::{
    CertificateProps, HealthCheck, ListenerProps, LoadBalancerProps, Protocol, ResourceProps,
    SslPolicy, SubnetTier, TargetGroupProps, TargetSpec, TargetType,
};

pub const HTTPS_PORT: u16 = 443;
pub const HEALTH_CHECK_PATH: &str = "/";
pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct RoutingInput<'a> {
    pub namer: &'a Namer,
    pub network: &'a NetworkTopology,
    pub compute: &'a ComputeService,
    pub certificate_arn: String,
    pub host_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEndpoint {
    pub load_balancer: LoadBalancerHandle,
    pub target_group: TargetGroupHandle,
    pub listener: ListenerHandle,
}

pub fn provision(stack: &mut StackBuilder<'_>, input: &RoutingInput<'_>) -> PlanResult<RoutingEndpoint> {
    let namer = input.namer;
    let vpc = input.network.vpc.id().clone();

    let certificate = stack.add(
        "Certificate",
        ResourceProps::Certificate(CertificateProps {
            arn: input.certificate_arn.clone(),
        }),
    )?;

    let load_balancer = stack.add(
        "LoadBalancer",
        ResourceProps::LoadBalancer(LoadBalancerProps {
            name: namer.name("LoadBalancer"),
            vpc: vpc.clone(),
            internet_facing: true,
            subnet_tier: SubnetTier::Public,
            security_group: input.network.web_security_group.id().clone(),
        }),
    )?;

    let target_group = stack.add(
        "TargetGroup",
        ResourceProps::TargetGroup(TargetGroupProps {
            name: format!("{}-target-group", input.compute.container_name.to_lowercase()),
            vpc,
            port: input.host_port,
            protocol: Protocol::Http,
            target_type: TargetType::Instance,
            targets: vec![TargetSpec {
                service: input.compute.service.id().clone(),
                container_name: input.compute.container_name.clone(),
                container_port: input.host_port,
                protocol: Protocol::Tcp,
            }],
            health_check: HealthCheck {
                path: HEALTH_CHECK_PATH.to_string(),
                timeout_secs: HEALTH_CHECK_TIMEOUT_SECS,
                interval_secs: HEALTH_CHECK_INTERVAL_SECS,
            },
        }),
    )?;

    let listener = stack.add(
        "PublicListener",
        ResourceProps::Listener(ListenerProps {
            load_balancer: load_balancer.clone(),
            port: HTTPS_PORT,
            protocol: Protocol::Https,
            ssl_policy: SslPolicy::RecommendedTls,
            open: true,
            certificates: vec![certificate],
            default_target_groups: vec![target_group.clone()],
        }),
    )?;

    Ok(RoutingEndpoint {
        load_balancer: LoadBalancerHandle::new(load_balancer),
        target_group: TargetGroupHandle::new(target_group),
        listener: ListenerHandle::new(listener),
    })
}
