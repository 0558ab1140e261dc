//! Stage composer.
//!
//! Instantiates network → database → migration → compute → routing and
//! threads the handles each one returns into the next. The connection
//! string is built once, as a deferred value, and injected into both the
//! migration function and the application container.
//!
//! The compute stack waits on the migration trigger, not only on the
//! database. A failed migration therefore keeps the application and its
//! routing from converging in the same apply.

use std::collections::BTreeMap;

use deckhand_core::connection::DATABASE_URL_ENV;
use deckhand_core::{AppName, DeployConfig, DeploymentEnv, EnvValue, Namer, validate_stage_name};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::compute::{self, ComputeInput, ComputeService};
use crate::database::{self, DatabaseEndpoint, DatabaseInput};
use crate::error::PlanResult;
use crate::graph::{ResourceGraph, StackBuilder};
use crate::migration::{self, MigrationInput, MigrationJob};
use crate::network::{self, NetworkInput, NetworkTopology};
use crate::routing::{self, RoutingEndpoint, RoutingInput};

/// Handles produced by each provisioner of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutputs {
    pub network: NetworkTopology,
    pub database: DatabaseEndpoint,
    pub migration: MigrationJob,
    pub compute: ComputeService,
    pub routing: RoutingEndpoint,
}

/// A synthesized stage: one deployment of the whole topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePlan {
    pub name: String,
    pub application: AppName,
    pub env: DeploymentEnv,
    pub graph: ResourceGraph,
    pub outputs: StageOutputs,
}

impl StagePlan {
    pub fn fingerprint(&self) -> String {
        self.graph.fingerprint()
    }
}

pub fn compose_stage(name: &str, config: &DeployConfig) -> PlanResult<StagePlan> {
    validate_stage_name(name)?;
    config.validate()?;

    let namer = Namer::new(&config.application_name);
    let mut graph = ResourceGraph::new();

    let network = network::provision(
        &mut StackBuilder::new(&mut graph, &namer.network_stack()),
        &NetworkInput {
            namer: &namer,
            max_azs: config.network.max_azs,
            nat_gateways: config.network.nat_gateways,
            database_port: config.database.port,
        },
    )?;

    let database = database::provision(
        &mut StackBuilder::new(&mut graph, &namer.database_stack()),
        &DatabaseInput {
            namer: &namer,
            network: &network,
            engine: config.database.engine.clone(),
            name: config.database.name.clone(),
            port: config.database.port,
            username: config.database.username.clone(),
            min_capacity: config.database.min_capacity,
            max_capacity: config.database.max_capacity,
        },
    )?;

    let environment: BTreeMap<String, EnvValue> =
        BTreeMap::from([(DATABASE_URL_ENV.to_string(), database.connection_string())]);

    let migration = migration::provision(
        &mut StackBuilder::new(&mut graph, &namer.migrator_stack()),
        &MigrationInput {
            namer: &namer,
            network: &network,
            database: &database,
            source_root: config.migrator.source_root.clone(),
            dockerfile_name: config.migrator.dockerfile_name.clone(),
            command: config.migrator.command.clone(),
            environment: environment.clone(),
        },
    )?;

    let compute = compute::provision(
        &mut StackBuilder::new(&mut graph, &namer.host_cluster_stack()).after([
            network.vpc.id().clone(),
            database.cluster.id().clone(),
            migration.trigger.id().clone(),
        ]),
        &ComputeInput {
            namer: &namer,
            network: &network,
            database: &database,
            host_port: config.host_cluster.host_port,
            source_root: config.host_cluster.source_root.clone(),
            dockerfile_name: config.host_cluster.dockerfile_name.clone(),
            min_capacity: config.host_cluster.min_capacity,
            max_capacity: config.host_cluster.max_capacity,
            service_name: config.host_cluster.service_name.clone(),
            container_name: config.host_cluster.container_name.clone(),
            environment,
        },
    )?;

    let routing = routing::provision(
        &mut StackBuilder::new(&mut graph, &namer.routing_stack())
            .after([compute.service.id().clone()]),
        &RoutingInput {
            namer: &namer,
            network: &network,
            compute: &compute,
            certificate_arn: config.routing.certificate_arn.clone(),
            host_port: config.routing.host_port,
        },
    )?;

    let plan = StagePlan {
        name: name.to_string(),
        application: config.application_name.clone(),
        env: config.environment.clone(),
        graph,
        outputs: StageOutputs {
            network,
            database,
            migration,
            compute,
            routing,
        },
    };

    info!(
        stage = %plan.name,
        app = %plan.application,
        resources = plan.graph.len(),
        fingerprint = %plan.fingerprint(),
        "stage synthesized"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use deckhand_core::ConfigError;

    use super::*;
    use crate::error::PlanError;
    use crate::props::{ResourceKind, ResourceProps};

    fn config() -> DeployConfig {
        let vars: HashMap<String, String> = [
            ("AWS_ACCOUNT_ID", "123456789012"),
            ("AWS_REGION", "eu-west-1"),
            ("APPLICATION_NAME", "shop"),
            ("REPOSITORY_SLUG", "acme/shop"),
            ("REPOSITORY_BRANCH", "main"),
            ("CONNECTION_ARN", "arn:aws:codestar-connections:eu-west-1:123456789012:connection/abc"),
            ("HOST_PORT", "3000"),
            ("SERVICE_NAME", "ShopWeb"),
            ("CERTIFICATE_ARN", "arn:aws:acm:eu-west-1:123456789012:certificate/xyz"),
            ("DATABASE_PORT", "5432"),
            ("DATABASE_NAME", "shop"),
            ("DATABASE_USERNAME", "shopadmin"),
            ("DATABASE_ENGINE_NAME", "aurora-postgresql"),
            ("SOURCE_ROOT", "../.."),
            ("MIGRATOR_DOCKERFILE_NAME", "migrator.Dockerfile"),
            ("DOCKERFILE_NAME", "Dockerfile"),
            ("HOST_MIN_CAPACITY", "1"),
            ("HOST_MAX_CAPACITY", "3"),
            ("MAX_AZS", "2"),
            ("NAT_GATEWAYS", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        DeployConfig::from_env_map(&vars).unwrap()
    }

    fn wave_of(plan: &StagePlan, id: &deckhand_core::ResourceId) -> usize {
        plan.graph
            .waves()
            .iter()
            .position(|wave| wave.contains(id))
            .unwrap()
    }

    #[test]
    fn one_of_each_building_block() {
        let plan = compose_stage("Prod", &config()).unwrap();
        for kind in [
            ResourceKind::Vpc,
            ResourceKind::DatabaseCluster,
            ResourceKind::DatabaseSecret,
            ResourceKind::Function,
            ResourceKind::Trigger,
            ResourceKind::ComputeCluster,
            ResourceKind::Service,
            ResourceKind::LoadBalancer,
            ResourceKind::Listener,
        ] {
            assert_eq!(plan.graph.of_kind(kind).len(), 1, "{kind}");
        }
        assert_eq!(plan.graph.of_kind(ResourceKind::SecurityGroup).len(), 2);
        assert_eq!(plan.graph.len(), 21);
        assert_eq!(
            plan.graph.stacks().into_iter().collect::<Vec<_>>(),
            vec![
                "shopDatabase",
                "shopHostCluster",
                "shopMigratorLambda",
                "shopNetwork",
                "shopRouting",
            ]
        );
    }

    #[test]
    fn migration_trigger_waits_for_database() {
        let plan = compose_stage("Prod", &config()).unwrap();
        let trigger = plan.graph.get(plan.outputs.migration.trigger.id()).unwrap();
        assert!(trigger.depends_on.contains(plan.outputs.database.cluster.id()));
        assert!(wave_of(&plan, &trigger.id) > wave_of(&plan, plan.outputs.database.cluster.id()));
    }

    #[test]
    fn compute_stack_waits_for_migration() {
        let plan = compose_stage("Prod", &config()).unwrap();
        let trigger = plan.outputs.migration.trigger.id();
        for node in plan.graph.stack_nodes("shopHostCluster") {
            assert!(node.depends_on.contains(trigger), "{}", node.id);
            assert!(node.depends_on.contains(plan.outputs.network.vpc.id()));
            assert!(node.depends_on.contains(plan.outputs.database.cluster.id()));
        }

        let blocked = plan.graph.dependents_closure(trigger);
        assert!(blocked.contains(plan.outputs.compute.service.id()));
        assert!(blocked.contains(plan.outputs.routing.listener.id()));
        assert!(!blocked.contains(plan.outputs.database.cluster.id()));
    }

    #[test]
    fn routing_comes_after_service() {
        let plan = compose_stage("Prod", &config()).unwrap();
        let service = wave_of(&plan, plan.outputs.compute.service.id());
        assert!(wave_of(&plan, plan.outputs.routing.load_balancer.id()) > service);
        assert!(wave_of(&plan, plan.outputs.routing.listener.id()) > service);
    }

    #[test]
    fn database_accepts_only_web_traffic() {
        let plan = compose_stage("Prod", &config()).unwrap();
        let rules = plan.graph.of_kind(ResourceKind::IngressRule);
        assert_eq!(rules.len(), 1);
        let ResourceProps::IngressRule(rule) = &rules[0].props else {
            panic!("not an ingress rule");
        };
        assert_eq!(&rule.group, plan.outputs.network.db_security_group.id());
        assert_eq!(&rule.source, plan.outputs.network.web_security_group.id());
        assert_eq!(rule.port, 5432);
    }

    #[test]
    fn both_consumers_receive_the_same_connection_string() {
        let plan = compose_stage("Prod", &config()).unwrap();
        let function = plan.graph.get(plan.outputs.migration.function.id()).unwrap();
        let task = plan.graph.get(plan.outputs.compute.task_definition.id()).unwrap();

        let from_function = &function.props.environment().unwrap()[DATABASE_URL_ENV];
        let from_task = &task.props.environment().unwrap()[DATABASE_URL_ENV];
        assert_eq!(from_function, from_task);
        assert!(from_function.is_sensitive());
        assert!(from_function.redacted().starts_with("postgresql://{{secret:"));
    }

    #[test]
    fn synthesis_is_deterministic() {
        let first = compose_stage("Prod", &config()).unwrap();
        let second = compose_stage("Prod", &config()).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.graph, second.graph);

        let mut changed = config();
        changed.host_cluster.max_capacity = 4;
        let third = compose_stage("Prod", &changed).unwrap();
        assert_ne!(first.fingerprint(), third.fingerprint());
    }

    #[test]
    fn inconsistent_config_is_rejected() {
        let mut bad = config();
        bad.routing.host_port = 8080;
        assert!(matches!(
            compose_stage("Prod", &bad),
            Err(PlanError::Config(_))
        ));
    }

    #[test]
    fn stage_name_with_key_separator_is_rejected() {
        assert!(matches!(
            compose_stage("Prod/x", &config()),
            Err(PlanError::Config(ConfigError::InvalidStageName(_)))
        ));
    }
}
