//! Network topology provisioner.
//!
//! Allocates a virtual network with three fixed subnet tiers and two
//! traffic-control groups. The database group admits traffic only from the
//! web group, only on the database port.

use deckhand_core::Namer;
use serde::{Deserialize, Serialize};

use crate::error::PlanResult;
use crate::graph::StackBuilder;
use crate::handles::{SecurityGroupHandle, SubnetGroupHandle, VpcHandle};
use crate::props::{
    IngressRuleProps, Protocol, ResourceProps, SecurityGroupProps, SubnetGroupProps, SubnetSpec,
    SubnetTier, VpcProps,
};

#[derive(Debug, Clone)]
pub struct NetworkInput<'a> {
    pub namer: &'a Namer,
    pub max_azs: u32,
    pub nat_gateways: u32,
    pub database_port: u16,
}

/// Handles to the provisioned network. Referenced, not owned, downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub vpc: VpcHandle,
    pub subnet_tiers: Vec<SubnetTier>,
    pub web_security_group: SecurityGroupHandle,
    pub db_security_group: SecurityGroupHandle,
    pub db_subnet_group: SubnetGroupHandle,
}

pub fn provision(stack: &mut StackBuilder<'_>, input: &NetworkInput<'_>) -> PlanResult<NetworkTopology> {
    let namer = input.namer;

    let subnets = vec![
        SubnetSpec {
            name: "public".to_string(),
            tier: SubnetTier::Public,
        },
        SubnetSpec {
            name: "private-isolated".to_string(),
            tier: SubnetTier::PrivateIsolated,
        },
        SubnetSpec {
            name: "private-with-egress".to_string(),
            tier: SubnetTier::PrivateWithEgress,
        },
    ];
    let subnet_tiers = subnets.iter().map(|s| s.tier).collect();

    let vpc_name = namer.name("VPC");
    let vpc = stack.add(
        &vpc_name,
        ResourceProps::Vpc(VpcProps {
            name: vpc_name.clone(),
            max_azs: input.max_azs,
            nat_gateways: input.nat_gateways,
            subnets,
        }),
    )?;

    let web_name = namer.name("WebSecurityGroup");
    let web = stack.add(
        &web_name,
        ResourceProps::SecurityGroup(SecurityGroupProps {
            name: web_name.clone(),
            vpc: vpc.clone(),
            description: "Security group for web instances or lambda functions".to_string(),
            allow_all_outbound: true,
        }),
    )?;

    let db_name = namer.name("DbSecurityGroup");
    let db = stack.add(
        &db_name,
        ResourceProps::SecurityGroup(SecurityGroupProps {
            name: db_name.clone(),
            vpc: vpc.clone(),
            description: "Security group for RDS database instances".to_string(),
            allow_all_outbound: false,
        }),
    )?;

    stack.add(
        &namer.name("DbIngressFromWeb"),
        ResourceProps::IngressRule(IngressRuleProps {
            group: db.clone(),
            source: web.clone(),
            protocol: Protocol::Tcp,
            port: input.database_port,
            description: "Allow web security group to connect to the database".to_string(),
        }),
    )?;

    let subnet_group_name = namer.name("DbSubnetGroup");
    let subnet_group = stack.add(
        &subnet_group_name,
        ResourceProps::SubnetGroup(SubnetGroupProps {
            name: subnet_group_name.clone(),
            vpc: vpc.clone(),
            tier: SubnetTier::PrivateIsolated,
            description: "Isolated subnet group for the database cluster".to_string(),
        }),
    )?;

    Ok(NetworkTopology {
        vpc: VpcHandle::new(vpc),
        subnet_tiers,
        web_security_group: SecurityGroupHandle::new(web),
        db_security_group: SecurityGroupHandle::new(db),
        db_subnet_group: SubnetGroupHandle::new(subnet_group),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceGraph;
    use crate::props::ResourceKind;
    use deckhand_core::AppName;

    fn build() -> (ResourceGraph, NetworkTopology) {
        let namer = Namer::new(&AppName::parse("shop").unwrap());
        let mut graph = ResourceGraph::new();
        let topology = {
            let mut stack = StackBuilder::new(&mut graph, &namer.network_stack());
            provision(
                &mut stack,
                &NetworkInput {
                    namer: &namer,
                    max_azs: 2,
                    nat_gateways: 1,
                    database_port: 5432,
                },
            )
            .unwrap()
        };
        (graph, topology)
    }

    #[test]
    fn three_subnet_tiers() {
        let (_, topology) = build();
        assert_eq!(
            topology.subnet_tiers,
            vec![
                SubnetTier::Public,
                SubnetTier::PrivateIsolated,
                SubnetTier::PrivateWithEgress
            ]
        );
    }

    #[test]
    fn database_ingress_only_from_web_on_db_port() {
        let (graph, topology) = build();
        let rules = graph.of_kind(ResourceKind::IngressRule);
        assert_eq!(rules.len(), 1);
        let ResourceProps::IngressRule(rule) = &rules[0].props else {
            panic!("expected ingress rule");
        };
        assert_eq!(&rule.group, topology.db_security_group.id());
        assert_eq!(&rule.source, topology.web_security_group.id());
        assert_eq!(rule.port, 5432);
        assert_eq!(rule.protocol, Protocol::Tcp);
    }

    #[test]
    fn db_group_has_no_outbound() {
        let (graph, topology) = build();
        let ResourceProps::SecurityGroup(db) = &graph.get(topology.db_security_group.id()).unwrap().props
        else {
            panic!("expected security group");
        };
        assert!(!db.allow_all_outbound);
    }

    #[test]
    fn names_are_namespaced() {
        let (graph, topology) = build();
        assert_eq!(topology.vpc.id().as_str(), "shopNetwork/shopVPC");
        assert!(graph.nodes().all(|n| n.id.logical().starts_with("shop")));
    }
}
