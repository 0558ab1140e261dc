//! Database provisioner.
//!
//! A serverless cluster inside the isolated subnet group, guarded by the
//! database security group. Credentials are generated into a managed
//! secret at apply time and never appear in the plan.

use deckhand_core::connection::database_url_template;
use deckhand_core::{CapacityBounds, DatabaseEngine, EnvValue, Namer};
use serde::{Deserialize, Serialize};

use crate::error::PlanResult;
use crate::graph::StackBuilder;
use crate::handles::{ClusterHandle, SecretHandle};
use crate::network::NetworkTopology;
use crate::props::{DatabaseClusterProps, DatabaseSecretProps, ResourceProps};

const PASSWORD_LENGTH: u32 = 30;

#[derive(Debug, Clone)]
pub struct DatabaseInput<'a> {
    pub namer: &'a Namer,
    pub network: &'a NetworkTopology,
    pub engine: DatabaseEngine,
    pub name: String,
    pub port: u16,
    pub username: String,
    pub min_capacity: Option<f64>,
    pub max_capacity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEndpoint {
    pub cluster: ClusterHandle,
    pub secret: SecretHandle,
    pub engine: DatabaseEngine,
    pub port: u16,
}

impl DatabaseEndpoint {
    /// Deferred `DATABASE_URL` for runtime consumers of this cluster.
    pub fn connection_string(&self) -> EnvValue {
        database_url_template(&self.engine, self.cluster.id(), self.secret.id())
    }
}

pub fn provision(stack: &mut StackBuilder<'_>, input: &DatabaseInput<'_>) -> PlanResult<DatabaseEndpoint> {
    let namer = input.namer;

    let secret_name = namer.name("DatabaseSecret");
    let secret = stack.add(
        &secret_name,
        ResourceProps::DatabaseSecret(DatabaseSecretProps {
            name: secret_name.clone(),
            username: input.username.clone(),
            dbname: input.name.clone(),
            password_length: PASSWORD_LENGTH,
        }),
    )?;

    let cluster_name = namer.name("DatabaseCluster");
    let cluster = stack.add(
        &cluster_name,
        ResourceProps::DatabaseCluster(DatabaseClusterProps {
            name: cluster_name.clone(),
            engine: input.engine.clone(),
            port: input.port,
            default_database_name: input.name.clone(),
            subnet_group: input.network.db_subnet_group.id().clone(),
            security_groups: vec![input.network.db_security_group.id().clone()],
            credentials: secret.clone(),
            storage_encrypted: true,
            iam_authentication: true,
            capacity: CapacityBounds::resolve(input.min_capacity, input.max_capacity),
            writer: "reader-writer".to_string(),
        }),
    )?;

    Ok(DatabaseEndpoint {
        cluster: ClusterHandle::new(cluster),
        secret: SecretHandle::new(secret),
        engine: input.engine.clone(),
        port: input.port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceGraph;
    use crate::network::{self, NetworkInput};
    use deckhand_core::{AppName, EngineKind};

    fn build(min: Option<f64>, max: Option<f64>) -> (ResourceGraph, DatabaseEndpoint) {
        let namer = Namer::new(&AppName::parse("shop").unwrap());
        let mut graph = ResourceGraph::new();
        let topology = network::provision(
            &mut StackBuilder::new(&mut graph, &namer.network_stack()),
            &NetworkInput {
                namer: &namer,
                max_azs: 2,
                nat_gateways: 1,
                database_port: 5432,
            },
        )
        .unwrap();
        let endpoint = provision(
            &mut StackBuilder::new(&mut graph, &namer.database_stack()),
            &DatabaseInput {
                namer: &namer,
                network: &topology,
                engine: DatabaseEngine::new(EngineKind::AuroraPostgresql, None),
                name: "shop".into(),
                port: 5432,
                username: "shopadmin".into(),
                min_capacity: min,
                max_capacity: max,
            },
        )
        .unwrap();
        (graph, endpoint)
    }

    fn cluster_props(graph: &ResourceGraph, endpoint: &DatabaseEndpoint) -> DatabaseClusterProps {
        match &graph.get(endpoint.cluster.id()).unwrap().props {
            ResourceProps::DatabaseCluster(p) => p.clone(),
            other => panic!("unexpected props {other:?}"),
        }
    }

    #[test]
    fn default_capacity_bounds() {
        let (graph, endpoint) = build(None, None);
        let props = cluster_props(&graph, &endpoint);
        assert_eq!(props.capacity, CapacityBounds { min: 0.5, max: 2.0 });
    }

    #[test]
    fn explicit_capacity_bounds() {
        let (graph, endpoint) = build(Some(1.0), Some(8.0));
        let props = cluster_props(&graph, &endpoint);
        assert_eq!(props.capacity, CapacityBounds { min: 1.0, max: 8.0 });
    }

    #[test]
    fn cluster_is_encrypted_and_isolated() {
        let (graph, endpoint) = build(None, None);
        let props = cluster_props(&graph, &endpoint);
        assert!(props.storage_encrypted);
        assert_eq!(props.subnet_group.logical(), "shopDbSubnetGroup");
        assert_eq!(props.security_groups.len(), 1);
        assert_eq!(props.security_groups[0].logical(), "shopDbSecurityGroup");
        assert_eq!(&props.credentials, endpoint.secret.id());
    }

    #[test]
    fn connection_string_is_deferred() {
        let (_, endpoint) = build(None, None);
        let value = endpoint.connection_string();
        assert!(value.is_sensitive());
        assert_eq!(
            value.redacted(),
            "postgresql://{{secret:shopDatabase/shopDatabaseSecret#username}}:\
             {{secret:shopDatabase/shopDatabaseSecret#password}}@\
             {{attr:shopDatabase/shopDatabaseCluster.endpoint.host}}:\
             {{attr:shopDatabase/shopDatabaseCluster.endpoint.port}}/\
             {{secret:shopDatabase/shopDatabaseSecret#dbname}}?schema=public"
        );
    }
}
