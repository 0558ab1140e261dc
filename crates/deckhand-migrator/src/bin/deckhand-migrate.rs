//! deckhand-migrate: the migration invocation unit.
//!
//! Runs `MIGRATION_COMMAND` (default `prisma migrate deploy`) against the
//! database named by `DATABASE_URL`, echoes the tool's output and exits
//! with the tool's exit code. A tool killed by a signal exits with 128
//! plus the signal number; timeouts and spawn failures exit with 1.
//! `MIGRATION_MEMORY_LIMIT_MIB` optionally caps the tool's data segment.
//!
//! ```text
//! DATABASE_URL=postgresql://... deckhand-migrate
//! ```

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::time::Duration;

use deckhand_core::connection::DATABASE_URL_ENV;
use deckhand_migrator::{DEFAULT_TIMEOUT, MigrationError, MigrationRunner};
use secrecy::SecretString;
use tracing::error;

const DEFAULT_COMMAND: &str = "prisma migrate deploy";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,deckhand=debug")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some((stdout, stderr)) = err.output() {
                print!("{stdout}");
                eprint!("{stderr}");
            }
            error!(error = %err, "migration failed");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1).max(1))
        }
    }
}

async fn run() -> Result<(), MigrationError> {
    let url = std::env::var(DATABASE_URL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(MigrationError::MissingEnv(DATABASE_URL_ENV))?;

    let command = std::env::var("MIGRATION_COMMAND")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_COMMAND.to_string());

    let timeout = std::env::var("MIGRATION_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    let memory_limit = std::env::var("MIGRATION_MEMORY_LIMIT_MIB")
        .ok()
        .and_then(|v| v.parse().ok());

    let env = BTreeMap::from([(DATABASE_URL_ENV.to_string(), SecretString::from(url))]);
    let output = MigrationRunner::from_command_line(&command)?
        .with_timeout(timeout)
        .with_memory_limit(memory_limit)
        .run(&env)
        .await?;

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Ok(())
}
