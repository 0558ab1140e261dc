//! Database engines and connection-string construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resource::ResourceId;
use crate::secret::{EnvValue, SecretRef};

/// Schema qualifier appended to every connection string.
pub const DEFAULT_SCHEMA: &str = "public";

/// Environment variable carrying the connection string at runtime.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Managed relational engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    AuroraPostgresql,
    AuroraMysql,
}

impl EngineKind {
    /// URL scheme understood by the application's database client.
    pub fn scheme(&self) -> &'static str {
        match self {
            EngineKind::AuroraPostgresql => "postgresql",
            EngineKind::AuroraMysql => "mysql",
        }
    }

    pub fn default_version(&self) -> &'static str {
        match self {
            EngineKind::AuroraPostgresql => "15.5",
            EngineKind::AuroraMysql => "3.05.2",
        }
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aurora-postgresql" | "postgresql" | "postgres" => Ok(EngineKind::AuroraPostgresql),
            "aurora-mysql" | "mysql" => Ok(EngineKind::AuroraMysql),
            _ => Err(ConfigError::Invalid {
                key: "DATABASE_ENGINE_NAME",
                value: s.to_string(),
                reason: "expected aurora-postgresql or aurora-mysql".to_string(),
            }),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::AuroraPostgresql => f.write_str("aurora-postgresql"),
            EngineKind::AuroraMysql => f.write_str("aurora-mysql"),
        }
    }
}

/// Engine selection for a database cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEngine {
    pub kind: EngineKind,
    pub version: String,
}

impl DatabaseEngine {
    pub fn new(kind: EngineKind, version: Option<&str>) -> Self {
        Self {
            kind,
            version: version.unwrap_or(kind.default_version()).to_string(),
        }
    }
}

/// Fully resolved pieces of a connection string.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseUrlParts<'a> {
    pub scheme: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub dbname: &'a str,
    pub schema: &'a str,
}

/// `<scheme>://<user>:<password>@<host>:<port>/<dbname>?schema=<schema>`
pub fn format_database_url(parts: &DatabaseUrlParts<'_>) -> String {
    format!(
        "{}://{}:{}@{}:{}/{}?schema={}",
        parts.scheme,
        parts.user,
        parts.password,
        parts.host,
        parts.port,
        parts.dbname,
        parts.schema
    )
}

/// Deferred connection string for a cluster and its credential secret.
///
/// Credentials come from the secret's `username`, `password` and `dbname`
/// fields and the address from the cluster's `endpoint.host` and
/// `endpoint.port` attributes. Resolution happens at apply time.
pub fn database_url_template(
    engine: &DatabaseEngine,
    cluster: &ResourceId,
    secret: &ResourceId,
) -> EnvValue {
    EnvValue::literal(&format!("{}://", engine.kind.scheme()))
        .secret(SecretRef::new(secret, "username"))
        .text(":")
        .secret(SecretRef::new(secret, "password"))
        .text("@")
        .attr(cluster, "endpoint.host")
        .text(":")
        .attr(cluster, "endpoint.port")
        .text("/")
        .secret(SecretRef::new(secret, "dbname"))
        .text(&format!("?schema={DEFAULT_SCHEMA}"))
}
