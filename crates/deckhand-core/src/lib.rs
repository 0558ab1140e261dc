//! deckhand-core: shared types for the Deckhand deployment toolchain.
//!
//! - **`config`**: the environment-style configuration surface and its validation
//! - **`context`**: deployment target context and application-scoped naming
//! - **`resource`**: resource identifiers used as opaque handles across stacks
//! - **`secret`**: deferred environment values (secret references, resource attributes)
//! - **`connection`**: database engines and connection-string construction

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod resource;
pub mod secret;

pub use config::{
    CapacityBounds, DatabaseConfig, DeployConfig, HostClusterConfig, MigratorConfig,
    NetworkConfig, RepositoryConfig, RoutingConfig,
};
pub use connection::{DatabaseEngine, DatabaseUrlParts, EngineKind, format_database_url};
pub use context::{AppName, DeploymentEnv, Namer, validate_stage_name};
pub use error::{ConfigError, ConfigResult, ResolveError};
pub use resource::ResourceId;
pub use secret::{EnvValue, Fragment, SecretRef, ValueResolver};
