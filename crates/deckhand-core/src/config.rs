//! Deployment configuration surface.
//!
//! The recognized keys form a fixed environment-style set (see
//! [`DeployConfig::from_env_map`]). The same structure can be loaded from a
//! `deckhand.toml` file. Either way the result is validated before anything
//! is synthesized.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{DatabaseEngine, EngineKind};
use crate::context::{AppName, DeploymentEnv};
use crate::error::{ConfigError, ConfigResult};

/// Serverless capacity used when the lower bound is not configured.
pub const DEFAULT_MIN_CAPACITY: f64 = 0.5;
/// Serverless capacity used when the upper bound is not configured.
pub const DEFAULT_MAX_CAPACITY: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub environment: DeploymentEnv,
    pub application_name: AppName,
    pub repository: RepositoryConfig,
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    pub migrator: MigratorConfig,
    pub host_cluster: HostClusterConfig,
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// `owner/name` of the source repository.
    pub slug: String,
    pub branch: String,
    pub connection_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub max_azs: u32,
    pub nat_gateways: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub port: u16,
    pub username: String,
    pub engine: DatabaseEngine,
    pub min_capacity: Option<f64>,
    pub max_capacity: Option<f64>,
}

impl DatabaseConfig {
    pub fn capacity_bounds(&self) -> CapacityBounds {
        CapacityBounds::resolve(self.min_capacity, self.max_capacity)
    }
}

/// Serverless scaling bounds of the database cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityBounds {
    pub min: f64,
    pub max: f64,
}

impl CapacityBounds {
    /// Missing bounds never fail provisioning; they fall back to defaults.
    pub fn resolve(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            min: min.unwrap_or(DEFAULT_MIN_CAPACITY),
            max: max.unwrap_or(DEFAULT_MAX_CAPACITY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorConfig {
    pub source_root: String,
    pub dockerfile_name: String,
    /// Migration tool command line, run inside the migration image.
    #[serde(default = "default_migration_command")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostClusterConfig {
    pub host_port: u16,
    pub source_root: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub service_name: String,
    pub container_name: String,
    pub dockerfile_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub host_port: u16,
    pub container_name: String,
    pub certificate_arn: String,
}

pub fn default_migration_command() -> Vec<String> {
    ["prisma", "migrate", "deploy"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Typed lookups over a key/value map.
struct EnvReader<'a> {
    vars: &'a HashMap<String, String>,
}

impl EnvReader<'_> {
    fn optional(&self, key: &'static str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> ConfigResult<String> {
        self.optional(key)
            .map(str::to_string)
            .ok_or(ConfigError::Missing(key))
    }

    fn required_parse<T>(&self, key: &'static str) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        parse_value(key, &raw)
    }

    fn optional_parse<T>(&self, key: &'static str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map(|raw| parse_value(key, raw)).transpose()
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

impl DeployConfig {
    /// Build from an environment-style key/value map.
    pub fn from_env_map(vars: &HashMap<String, String>) -> ConfigResult<Self> {
        let env = EnvReader { vars };

        let host_port: u16 = env.required_parse("HOST_PORT")?;
        let service_name = env.required("SERVICE_NAME")?;
        let source_root = env.required("SOURCE_ROOT")?;
        let engine_kind: EngineKind = env.required_parse("DATABASE_ENGINE_NAME")?;

        let command = match env.optional("MIGRATION_COMMAND") {
            Some(raw) => raw.split_whitespace().map(String::from).collect(),
            None => default_migration_command(),
        };

        let config = DeployConfig {
            environment: DeploymentEnv {
                account: env.required("AWS_ACCOUNT_ID")?,
                region: env.required("AWS_REGION")?,
            },
            application_name: AppName::parse(&env.required("APPLICATION_NAME")?)?,
            repository: RepositoryConfig {
                slug: env.required("REPOSITORY_SLUG")?,
                branch: env.required("REPOSITORY_BRANCH")?,
                connection_arn: env.required("CONNECTION_ARN")?,
            },
            network: NetworkConfig {
                max_azs: env.required_parse("MAX_AZS")?,
                nat_gateways: env.required_parse("NAT_GATEWAYS")?,
            },
            database: DatabaseConfig {
                name: env.required("DATABASE_NAME")?,
                port: env.required_parse("DATABASE_PORT")?,
                username: env.required("DATABASE_USERNAME")?,
                engine: DatabaseEngine::new(
                    engine_kind,
                    env.optional("DATABASE_ENGINE_VERSION"),
                ),
                min_capacity: env.optional_parse("DATABASE_CLUSTER_MIN_CAPACITY")?,
                max_capacity: env.optional_parse("DATABASE_CLUSTER_MAX_CAPACITY")?,
            },
            migrator: MigratorConfig {
                source_root: source_root.clone(),
                dockerfile_name: env.required("MIGRATOR_DOCKERFILE_NAME")?,
                command,
            },
            host_cluster: HostClusterConfig {
                host_port,
                source_root,
                min_capacity: env.required_parse("HOST_MIN_CAPACITY")?,
                max_capacity: env.required_parse("HOST_MAX_CAPACITY")?,
                service_name: service_name.clone(),
                container_name: service_name.clone(),
                dockerfile_name: env.required("DOCKERFILE_NAME")?,
            },
            routing: RoutingConfig {
                host_port,
                container_name: service_name,
                certificate_arn: env.required("CERTIFICATE_ARN")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Build from the process environment.
    pub fn from_process_env() -> ConfigResult<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&vars)
    }

    /// Build from a `.env` file, with process variables taking precedence.
    pub fn from_env_file(path: &Path) -> ConfigResult<Self> {
        let mut vars = HashMap::new();
        let iter = dotenvy::from_path_iter(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
        for item in iter {
            let (key, value) = item.map_err(|e| ConfigError::Parse(e.to_string()))?;
            vars.insert(key, value);
        }
        debug!(?path, keys = vars.len(), "env file loaded");
        vars.extend(std::env::vars());
        Self::from_env_map(&vars)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: DeployConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Cross-field checks shared by every loading path.
    pub fn validate(&self) -> ConfigResult<()> {
        for (key, value) in [
            ("AWS_ACCOUNT_ID", &self.environment.account),
            ("AWS_REGION", &self.environment.region),
            ("REPOSITORY_SLUG", &self.repository.slug),
            ("REPOSITORY_BRANCH", &self.repository.branch),
            ("CONNECTION_ARN", &self.repository.connection_arn),
            ("DATABASE_NAME", &self.database.name),
            ("DATABASE_USERNAME", &self.database.username),
            ("SOURCE_ROOT", &self.migrator.source_root),
            ("MIGRATOR_DOCKERFILE_NAME", &self.migrator.dockerfile_name),
            ("DOCKERFILE_NAME", &self.host_cluster.dockerfile_name),
            ("SERVICE_NAME", &self.host_cluster.service_name),
            ("CERTIFICATE_ARN", &self.routing.certificate_arn),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(key));
            }
        }

        if self.migrator.command.is_empty() {
            return Err(ConfigError::Missing("MIGRATION_COMMAND"));
        }

        for (key, port) in [
            ("DATABASE_PORT", self.database.port),
            ("HOST_PORT", self.host_cluster.host_port),
        ] {
            if port == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: port.to_string(),
                    reason: "port must be in 1..=65535".to_string(),
                });
            }
        }

        if self.routing.host_port != self.host_cluster.host_port {
            return Err(ConfigError::Inconsistent(format!(
                "routing port {} differs from host cluster port {}",
                self.routing.host_port, self.host_cluster.host_port
            )));
        }
        if self.routing.container_name != self.host_cluster.container_name {
            return Err(ConfigError::Inconsistent(format!(
                "routing targets container {:?} but the host cluster runs {:?}",
                self.routing.container_name, self.host_cluster.container_name
            )));
        }

        if self.network.max_azs == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_AZS",
                value: "0".to_string(),
                reason: "at least one availability zone is required".to_string(),
            });
        }
        if self.network.nat_gateways > self.network.max_azs {
            return Err(ConfigError::Inconsistent(format!(
                "{} NAT gateways requested for {} availability zones",
                self.network.nat_gateways, self.network.max_azs
            )));
        }

        if self.host_cluster.max_capacity == 0
            || self.host_cluster.min_capacity > self.host_cluster.max_capacity
        {
            return Err(ConfigError::Inconsistent(format!(
                "host capacity bounds {}..={} are invalid",
                self.host_cluster.min_capacity, self.host_cluster.max_capacity
            )));
        }

        for (key, bound) in [
            ("DATABASE_CLUSTER_MIN_CAPACITY", self.database.min_capacity),
            ("DATABASE_CLUSTER_MAX_CAPACITY", self.database.max_capacity),
        ] {
            match bound {
                Some(v) if !v.is_finite() || v <= 0.0 => {
                    return Err(ConfigError::Invalid {
                        key,
                        value: v.to_string(),
                        reason: "capacity must be a positive number".to_string(),
                    });
                }
                _ => {}
            }
        }
        let bounds = self.database.capacity_bounds();
        if bounds.min > bounds.max {
            return Err(ConfigError::Inconsistent(format!(
                "database capacity bounds {}..={} are inverted",
                bounds.min, bounds.max
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vars() -> HashMap<String, String> {
        [
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
        .collect()
    }

    #[test]
    fn parses_full_env_map() {
        let config = DeployConfig::from_env_map(&sample_vars()).unwrap();
        assert_eq!(config.application_name.as_str(), "shop");
        assert_eq!(config.environment.region, "eu-west-1");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.engine.kind, EngineKind::AuroraPostgresql);
        assert_eq!(config.database.engine.version, "15.5");
        assert_eq!(config.host_cluster.container_name, "ShopWeb");
        assert_eq!(config.routing.host_port, 3000);
        assert_eq!(config.migrator.command, default_migration_command());
    }

    #[test]
    fn absent_capacity_uses_defaults() {
        let config = DeployConfig::from_env_map(&sample_vars()).unwrap();
        let bounds = config.database.capacity_bounds();
        assert_eq!(bounds, CapacityBounds { min: 0.5, max: 2.0 });
    }

    #[test]
    fn empty_optional_counts_as_absent() {
        let mut vars = sample_vars();
        vars.insert("DATABASE_CLUSTER_MIN_CAPACITY".into(), "  ".into());
        vars.insert("DATABASE_CLUSTER_MAX_CAPACITY".into(), "4".into());
        let config = DeployConfig::from_env_map(&vars).unwrap();
        assert_eq!(config.database.capacity_bounds(), CapacityBounds { min: 0.5, max: 4.0 });
    }

    #[test]
    fn missing_required_key() {
        let mut vars = sample_vars();
        vars.remove("CERTIFICATE_ARN");
        let err = DeployConfig::from_env_map(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CERTIFICATE_ARN")));
    }

    #[test]
    fn malformed_port() {
        let mut vars = sample_vars();
        vars.insert("DATABASE_PORT".into(), "postgres".into());
        let err = DeployConfig::from_env_map(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DATABASE_PORT", .. }));
    }

    #[test]
    fn inverted_database_capacity() {
        let mut vars = sample_vars();
        vars.insert("DATABASE_CLUSTER_MIN_CAPACITY".into(), "8".into());
        let err = DeployConfig::from_env_map(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn nat_gateways_bounded_by_azs() {
        let mut vars = sample_vars();
        vars.insert("NAT_GATEWAYS".into(), "3".into());
        assert!(DeployConfig::from_env_map(&vars).is_err());
    }

    #[test]
    fn custom_migration_command() {
        let mut vars = sample_vars();
        vars.insert("MIGRATION_COMMAND".into(), "sqlx migrate run".into());
        let config = DeployConfig::from_env_map(&vars).unwrap();
        assert_eq!(config.migrator.command, vec!["sqlx", "migrate", "run"]);
    }

    #[test]
    fn toml_roundtrip_preserves_config() {
        let config = DeployConfig::from_env_map(&sample_vars()).unwrap();
        let text = config.to_toml_string().unwrap();
        let back = DeployConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn env_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut body = String::new();
        for (k, v) in sample_vars() {
            body.push_str(&format!("{k}={v}\n"));
        }
        std::fs::write(&path, body).unwrap();

        let config = DeployConfig::from_env_file(&path).unwrap();
        assert_eq!(config.repository.slug, "acme/shop");
    }
}
