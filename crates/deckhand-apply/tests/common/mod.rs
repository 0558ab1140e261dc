#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use deckhand_apply::{ApplyEngine, LocalProvider};
use deckhand_core::DeployConfig;
use deckhand_plan::{StagePlan, compose_stage};
use deckhand_state::StateStore;

pub fn vars() -> HashMap<String, String> {
    [
        ("AWS_ACCOUNT_ID", "123456789012"),
        ("AWS_REGION", "eu-west-1"),
        ("APPLICATION_NAME", "shop"),
        ("REPOSITORY_SLUG", "acme/shop"),
        ("REPOSITORY_BRANCH", "main"),
        ("CONNECTION_ARN", "arn:conn"),
        ("HOST_PORT", "3000"),
        ("SERVICE_NAME", "ShopWeb"),
        ("CERTIFICATE_ARN", "arn:aws:acm:eu-west-1:123456789012:certificate/xyz"),
        ("DATABASE_PORT", "5432"),
        ("DATABASE_NAME", "shop"),
        ("DATABASE_USERNAME", "shopadmin"),
        ("DATABASE_ENGINE_NAME", "aurora-postgresql"),
        ("SOURCE_ROOT", "."),
        ("MIGRATOR_DOCKERFILE_NAME", "migrator.Dockerfile"),
        ("DOCKERFILE_NAME", "Dockerfile"),
        ("HOST_MIN_CAPACITY", "1"),
        ("HOST_MAX_CAPACITY", "2"),
        ("MAX_AZS", "2"),
        ("NAT_GATEWAYS", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn config() -> DeployConfig {
    DeployConfig::from_env_map(&vars()).unwrap()
}

pub fn plan_with(config: &DeployConfig) -> StagePlan {
    compose_stage("Prod", config).unwrap()
}

pub fn plan() -> StagePlan {
    plan_with(&config())
}

pub fn engine_with(provider: LocalProvider) -> (ApplyEngine, Arc<LocalProvider>) {
    let provider = Arc::new(provider);
    let store = StateStore::open_in_memory().unwrap();
    (ApplyEngine::new(provider.clone(), store), provider)
}

pub fn engine() -> (ApplyEngine, Arc<LocalProvider>) {
    engine_with(LocalProvider::new(&config().environment))
}
