//! Provider contract.
//!
//! The engine decides what changes and in which order; a provider performs
//! each change. Requests own their data so they can move into spawned
//! tasks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use deckhand_core::{ResourceId, SecretRef};
use deckhand_migrator::{MigrationError, MigrationOutput};
use deckhand_plan::ResourceNode;
use deckhand_plan::props::FunctionProps;
use deckhand_state::ResourceRecord;
use secrecy::SecretString;

use crate::error::ProvisionResult;

/// Attributes a provider reports for a converged resource.
pub type ResourceOutputs = BTreeMap<String, String>;

/// Deferred values after resolution. Never logged or persisted.
pub type ResolvedEnv = BTreeMap<String, SecretString>;

#[derive(Debug)]
pub struct ProvisionRequest {
    pub stage: String,
    pub node: ResourceNode,
    pub env: ResolvedEnv,
    /// Outputs of every prerequisite of `node`.
    pub inputs: BTreeMap<ResourceId, ResourceOutputs>,
}

/// Invocation of a migration function through its trigger.
#[derive(Debug)]
pub struct MigrationRequest {
    pub stage: String,
    pub trigger: ResourceId,
    pub function: ResourceId,
    pub props: FunctionProps,
    pub env: ResolvedEnv,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Load provider-side state for resources converged by earlier applies.
    async fn refresh(&self, _records: &[ResourceRecord]) -> ProvisionResult<()> {
        Ok(())
    }

    /// Create or update a resource and report its attributes.
    async fn apply_resource(&self, request: ProvisionRequest) -> ProvisionResult<ResourceOutputs>;

    async fn destroy_resource(&self, record: &ResourceRecord) -> ProvisionResult<()>;

    /// Invoke the migration function once and wait for it to finish.
    async fn invoke_migration(&self, request: MigrationRequest) -> Result<MigrationOutput, MigrationError>;

    async fn resolve_secret(&self, reference: &SecretRef) -> ProvisionResult<SecretString>;
}
