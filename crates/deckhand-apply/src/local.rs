//! In-process provider.
//!
//! Simulates the cloud side of an apply: keeps a resource table and a
//! secret store, reports deterministic attributes derived from the target
//! account, region and resource id, and runs migrations with the real
//! [`MigrationRunner`] (or simulates them). Failures can be injected per
//! resource for dry runs and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use deckhand_core::{DeploymentEnv, ResolveError, ResourceId, SecretRef};
use deckhand_migrator::{MigrationError, MigrationOutput, MigrationRunner};
use deckhand_plan::props::{DatabaseClusterProps, DatabaseSecretProps};
use deckhand_plan::{ResourceKind, ResourceProps};
use deckhand_state::ResourceRecord;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};
use crate::provider::{MigrationRequest, ProvisionRequest, Provider, ResourceOutputs};

/// How the local provider handles migration invocations.
#[derive(Debug, Clone, Default)]
pub enum MigrationMode {
    /// Report success without running anything.
    #[default]
    Simulate,
    /// Run the function's command, or `command` when given, in `working_dir`.
    Run {
        command: Option<Vec<String>>,
        working_dir: Option<PathBuf>,
    },
}

/// Something the provider did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Applied(ResourceId),
    Destroyed(ResourceId),
    Migrated(ResourceId),
}

#[derive(Default)]
struct LocalState {
    resources: BTreeMap<ResourceId, ResourceOutputs>,
    secrets: BTreeMap<ResourceId, BTreeMap<String, SecretString>>,
    events: Vec<ProviderEvent>,
}

pub struct LocalProvider {
    account: String,
    region: String,
    migrations: MigrationMode,
    fail_on: Mutex<BTreeSet<ResourceId>>,
    state: Mutex<LocalState>,
}

impl LocalProvider {
    pub fn new(env: &DeploymentEnv) -> Self {
        Self {
            account: env.account.clone(),
            region: env.region.clone(),
            migrations: MigrationMode::default(),
            fail_on: Mutex::new(BTreeSet::new()),
            state: Mutex::new(LocalState::default()),
        }
    }

    pub fn with_migrations(mut self, mode: MigrationMode) -> Self {
        self.migrations = mode;
        self
    }

    /// Make every later operation on `id` fail. For a trigger, the
    /// migration exits non-zero.
    pub fn fail_on(&self, id: &ResourceId) {
        lock(&self.fail_on).insert(id.clone());
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_on).clear();
    }

    pub fn exists(&self, id: &ResourceId) -> bool {
        lock(&self.state).resources.contains_key(id)
    }

    pub fn outputs(&self, id: &ResourceId) -> Option<ResourceOutputs> {
        lock(&self.state).resources.get(id).cloned()
    }

    pub fn resource_ids(&self) -> Vec<ResourceId> {
        lock(&self.state).resources.keys().cloned().collect()
    }

    pub fn events(&self) -> Vec<ProviderEvent> {
        lock(&self.state).events.clone()
    }

    /// Plaintext of a stored secret field, for inspection by callers that
    /// own the provider.
    pub fn secret_value(&self, secret: &ResourceId, field: &str) -> Option<String> {
        lock(&self.state)
            .secrets
            .get(secret)
            .and_then(|fields| fields.get(field))
            .map(|value| value.expose_secret().to_string())
    }

    fn should_fail(&self, id: &ResourceId) -> bool {
        lock(&self.fail_on).contains(id)
    }

    fn token(&self, id: &ResourceId, salt: &str, len: usize) -> String {
        let digest = Sha256::digest(format!("{}/{}/{}/{}", self.account, self.region, id, salt));
        let mut token = hex::encode(digest);
        token.truncate(len);
        token
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{service}:{}:{}:{resource}", self.region, self.account)
    }

    fn cluster_host(&self, id: &ResourceId, props: &DatabaseClusterProps) -> String {
        format!(
            "{}.cluster-{}.{}.rds.amazonaws.com",
            props.name.to_lowercase(),
            self.token(id, "cluster", 12),
            self.region
        )
    }

    /// Generated credentials of a database secret. Host and port are added
    /// once the cluster using the secret exists.
    fn generate_secret(&self, id: &ResourceId, props: &DatabaseSecretProps) -> BTreeMap<String, SecretString> {
        let length = usize::try_from(props.password_length).unwrap_or(usize::MAX).min(64);
        BTreeMap::from([
            ("username".to_string(), SecretString::from(props.username.clone())),
            ("password".to_string(), SecretString::from(self.token(id, "password", length))),
            ("dbname".to_string(), SecretString::from(props.dbname.clone())),
        ])
    }

    fn attach_endpoint(
        &self,
        state: &mut LocalState,
        cluster: &ResourceId,
        props: &DatabaseClusterProps,
    ) -> ProvisionResult<()> {
        let fields = state
            .secrets
            .get_mut(&props.credentials)
            .ok_or_else(|| ProvisionError::Rejected {
                resource: cluster.clone(),
                reason: format!("credentials secret {} does not exist", props.credentials),
            })?;
        fields.insert("host".to_string(), SecretString::from(self.cluster_host(cluster, props)));
        fields.insert("port".to_string(), SecretString::from(props.port.to_string()));
        Ok(())
    }

    fn outputs_for(&self, request: &ProvisionRequest) -> ResourceOutputs {
        let id = &request.node.id;
        let token = self.token(id, "id", 8);
        let mut out = ResourceOutputs::new();
        let mut put = |key: &str, value: String| {
            out.insert(key.to_string(), value);
        };

        match &request.node.props {
            ResourceProps::Vpc(p) => {
                put("id", format!("vpc-{token}"));
                put("name", p.name.clone());
            }
            ResourceProps::SecurityGroup(_) => put("id", format!("sg-{token}")),
            ResourceProps::IngressRule(_) => put("id", format!("sgr-{token}")),
            ResourceProps::SubnetGroup(p) => put("name", p.name.to_lowercase()),
            ResourceProps::DatabaseSecret(p) => {
                put("arn", self.arn("secretsmanager", &format!("secret:{}-{}", p.name, &token[..6])));
                put("name", p.name.clone());
            }
            ResourceProps::DatabaseCluster(p) => {
                put("arn", self.arn("rds", &format!("cluster:{}", p.name.to_lowercase())));
                put("endpoint.host", self.cluster_host(id, p));
                put("endpoint.port", p.port.to_string());
            }
            ResourceProps::Function(p) => {
                put("arn", self.arn("lambda", &format!("function:{}", p.name)));
                put("name", p.name.clone());
            }
            ResourceProps::ConnectGrant(_) | ResourceProps::SecretReadGrant(_) => {
                put("policy", format!("{}-policy-{token}", id.logical()));
            }
            ResourceProps::Trigger(_) => put("id", token),
            ResourceProps::ComputeCluster(p) => {
                put("arn", self.arn("ecs", &format!("cluster/{}", p.name)));
                put("name", p.name.clone());
            }
            ResourceProps::CapacityGroup(p) => put(
                "arn",
                self.arn(
                    "autoscaling",
                    &format!("autoScalingGroup:{token}:autoScalingGroupName/{}", p.name),
                ),
            ),
            ResourceProps::TaskDefinition(p) => {
                put("arn", self.arn("ecs", &format!("task-definition/{}:1", p.family)));
            }
            ResourceProps::Service(p) => put("arn", self.arn("ecs", &format!("service/{}", p.name))),
            ResourceProps::Certificate(p) => put("arn", p.arn.clone()),
            ResourceProps::LoadBalancer(p) => {
                put(
                    "arn",
                    self.arn("elasticloadbalancing", &format!("loadbalancer/app/{}/{token}", p.name)),
                );
                put(
                    "dns_name",
                    format!("{}-{token}.{}.elb.amazonaws.com", p.name.to_lowercase(), self.region),
                );
            }
            ResourceProps::TargetGroup(p) => put(
                "arn",
                self.arn("elasticloadbalancing", &format!("targetgroup/{}/{token}", p.name)),
            ),
            ResourceProps::Listener(p) => put(
                "arn",
                self.arn(
                    "elasticloadbalancing",
                    &format!("listener/app/{}/{token}", p.port),
                ),
            ),
            ResourceProps::Output(p) => {
                let value = match request.env.get("value") {
                    Some(value) if !p.value.is_sensitive() => value.expose_secret().to_string(),
                    _ => p.value.redacted(),
                };
                put("value", value);
            }
        }
        out
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn refresh(&self, records: &[ResourceRecord]) -> ProvisionResult<()> {
        let mut state = lock(&self.state);
        for record in records {
            state.resources.insert(record.id.clone(), record.outputs.clone());
        }
        // Secrets first: clusters attach their endpoint to an existing secret.
        for kind in [ResourceKind::DatabaseSecret, ResourceKind::DatabaseCluster] {
            for record in records.iter().filter(|r| r.kind == kind.as_str()) {
                match stored_props(record)? {
                    ResourceProps::DatabaseSecret(p) => {
                        let fields = self.generate_secret(&record.id, &p);
                        state.secrets.insert(record.id.clone(), fields);
                    }
                    ResourceProps::DatabaseCluster(p) => {
                        self.attach_endpoint(&mut state, &record.id, &p)?;
                    }
                    _ => {}
                }
            }
        }
        debug!(resources = records.len(), "local provider refreshed");
        Ok(())
    }

    async fn apply_resource(&self, request: ProvisionRequest) -> ProvisionResult<ResourceOutputs> {
        let id = request.node.id.clone();
        if self.should_fail(&id) {
            return Err(ProvisionError::Injected(id));
        }
        if let Some(missing) = request
            .node
            .depends_on
            .iter()
            .find(|dep| !request.inputs.contains_key(*dep))
        {
            return Err(ProvisionError::Rejected {
                resource: id,
                reason: format!("prerequisite {missing} has not converged"),
            });
        }

        let outputs = self.outputs_for(&request);
        let mut state = lock(&self.state);
        match &request.node.props {
            ResourceProps::DatabaseSecret(p) => {
                let fields = self.generate_secret(&id, p);
                state.secrets.insert(id.clone(), fields);
            }
            ResourceProps::DatabaseCluster(p) => self.attach_endpoint(&mut state, &id, p)?,
            _ => {}
        }
        state.resources.insert(id.clone(), outputs.clone());
        state.events.push(ProviderEvent::Applied(id.clone()));
        debug!(resource = %id, kind = %request.node.kind(), "local resource applied");
        Ok(outputs)
    }

    async fn destroy_resource(&self, record: &ResourceRecord) -> ProvisionResult<()> {
        if self.should_fail(&record.id) {
            return Err(ProvisionError::Injected(record.id.clone()));
        }
        let mut state = lock(&self.state);
        state.resources.remove(&record.id);
        state.secrets.remove(&record.id);
        state.events.push(ProviderEvent::Destroyed(record.id.clone()));
        debug!(resource = %record.id, "local resource destroyed");
        Ok(())
    }

    async fn invoke_migration(&self, request: MigrationRequest) -> Result<MigrationOutput, MigrationError> {
        if !self.exists(&request.function) {
            return Err(MigrationError::Spawn {
                program: request.props.name.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "function is not deployed"),
            });
        }
        lock(&self.state)
            .events
            .push(ProviderEvent::Migrated(request.trigger.clone()));

        if self.should_fail(&request.trigger) {
            return Err(MigrationError::Exited {
                code: 1,
                stdout: String::new(),
                stderr: "injected migration failure".to_string(),
            });
        }

        match &self.migrations {
            MigrationMode::Simulate => {
                info!(function = %request.function, "simulating migration");
                Ok(MigrationOutput {
                    exit_code: 0,
                    stdout: format!("simulated: {}", request.props.command.join(" ")),
                    stderr: String::new(),
                    elapsed: Duration::ZERO,
                })
            }
            MigrationMode::Run { command, working_dir } => {
                let command = command.as_ref().unwrap_or(&request.props.command);
                // The function's memory size caps the tool's data segment.
                let mut runner = MigrationRunner::new(command)?
                    .with_timeout(Duration::from_secs(request.props.timeout_secs))
                    .with_memory_limit(Some(u64::from(request.props.memory_mib)));
                if let Some(dir) = working_dir {
                    runner = runner.with_working_dir(dir);
                }
                runner.run(&request.env).await
            }
        }
    }

    async fn resolve_secret(&self, reference: &SecretRef) -> ProvisionResult<SecretString> {
        let state = lock(&self.state);
        let fields = state
            .secrets
            .get(&reference.secret)
            .ok_or_else(|| ResolveError::UnknownSecret(reference.secret.to_string()))?;
        let value = fields
            .get(&reference.field)
            .ok_or_else(|| ResolveError::UnknownSecretField {
                secret: reference.secret.to_string(),
                field: reference.field.clone(),
            })?;
        Ok(SecretString::from(value.expose_secret().to_string()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn stored_props(record: &ResourceRecord) -> ProvisionResult<ResourceProps> {
    serde_json::from_value(record.props.clone()).map_err(|e| ProvisionError::CorruptRecord {
        resource: record.id.clone(),
        reason: e.to_string(),
    })
}
