//! deckhand-migrator: runs the schema-migration tool once per deploy.
//!
//! [`MigrationRunner`] is shared by the `deckhand-migrate` binary, which is
//! the invocation unit shipped in the migration image, and by the local
//! provider, which runs migrations in-process during an apply.

pub mod error;
pub mod runner;

pub use error::{MigrationError, MigrationResult};
pub use runner::{DEFAULT_TIMEOUT, MigrationOutput, MigrationRunner};
