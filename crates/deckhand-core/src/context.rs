//! Deployment target context and application-scoped naming.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

static APP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,62}$").expect("valid regex"));

/// Checks a stage name. Stage names key every record in the state store,
/// so they share the application-name alphabet and never contain the `/` or
/// `:` key separators.
pub fn validate_stage_name(name: &str) -> Result<(), ConfigError> {
    if APP_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidStageName(name.to_string()))
    }
}

/// The single deployment target shared by every stack in a stage.
///
/// Built once from configuration and passed down the composer chain by
/// reference. Provisioners never read account or region from the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEnv {
    pub account: String,
    pub region: String,
}

/// Validated application name. Every resource name is prefixed with it so
/// parallel deployments of different applications never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        if APP_NAME_RE.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(ConfigError::InvalidAppName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AppName {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppName> for String {
    fn from(name: AppName) -> Self {
        name.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces application-namespaced stack and resource names.
#[derive(Debug, Clone)]
pub struct Namer {
    app: AppName,
}

impl Namer {
    pub fn new(app: &AppName) -> Self {
        Self { app: app.clone() }
    }

    pub fn app(&self) -> &AppName {
        &self.app
    }

    /// `{app}{suffix}`, e.g. `shopVPC` or `shopDbSecurityGroup`.
    pub fn name(&self, suffix: &str) -> String {
        format!("{}{}", self.app, suffix)
    }

    pub fn network_stack(&self) -> String {
        self.name("Network")
    }

    pub fn database_stack(&self) -> String {
        self.name("Database")
    }

    pub fn migrator_stack(&self) -> String {
        self.name("MigratorLambda")
    }

    pub fn host_cluster_stack(&self) -> String {
        self.name("HostCluster")
    }

    pub fn routing_stack(&self) -> String {
        self.name("Routing")
    }

    pub fn pipeline_stack(&self) -> String {
        self.name("PipelineStack")
    }

    pub fn pipeline(&self) -> String {
        self.name("Pipeline")
    }
}
