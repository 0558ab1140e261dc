//! deckhand: synthesize and converge the application deployment.
//!
//! ```text
//! deckhand --env-file .env synth --out deckhand.out
//! deckhand apply --stage Prod
//! deckhand pipeline push --branch main
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use deckhand_apply::ApplyError;
use deckhand_plan::PROD_STAGE;
use deckhand_plan::pipeline::ASSEMBLY_DIR;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "deckhand",
    about = "Deckhand: container app + serverless database deployment",
    version,
    propagate_version = true
)]
struct Cli {
    /// Read configuration variables from this .env file.
    #[arg(long, global = true, conflicts_with = "config")]
    env_file: Option<PathBuf>,

    /// Read configuration from a TOML file instead of the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the deployment state.
    #[arg(long, global = true, default_value = ".deckhand")]
    state_dir: PathBuf,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the configuration and that it synthesizes.
    Validate,
    /// Write the deployment assembly.
    Synth {
        #[arg(short, long, default_value = ASSEMBLY_DIR)]
        out: PathBuf,
    },
    /// Show what the next apply would change.
    Diff {
        #[arg(long, default_value = PROD_STAGE)]
        stage: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Converge a stage.
    Apply {
        #[arg(long, default_value = PROD_STAGE)]
        stage: String,
        /// Run the migration command locally instead of simulating it.
        #[arg(long)]
        run_migrations: bool,
    },
    /// Destroy every resource of a stage.
    Teardown {
        #[arg(long, default_value = PROD_STAGE)]
        stage: String,
    },
    /// Drive the delivery pipeline.
    Pipeline {
        #[command(subcommand)]
        action: PipelineAction,
    },
}

#[derive(Subcommand)]
enum PipelineAction {
    /// Handle a push to the source repository.
    Push {
        #[arg(long)]
        branch: String,
        /// Repository slug (default: the configured repository).
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        run_migrations: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,deckhand=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let source = commands::ConfigSource::from_args(cli.env_file, cli.config);
    let state_dir = cli.state_dir;

    match cli.command {
        Command::Validate => commands::validate::validate(&source),
        Command::Synth { out } => commands::synth::synth(&source, &out),
        Command::Diff { stage, format } => commands::diff::diff(&source, &state_dir, &stage, &format),
        Command::Apply { stage, run_migrations } => {
            commands::apply::apply(&source, &state_dir, &stage, run_migrations).await
        }
        Command::Teardown { stage } => {
            commands::teardown::teardown(&source, &state_dir, &stage).await
        }
        Command::Pipeline { action } => match action {
            PipelineAction::Push {
                branch,
                repo,
                commit,
                run_migrations,
            } => {
                commands::pipeline::push(&source, &state_dir, branch, repo, commit, run_migrations)
                    .await
            }
        },
    }
}

/// Print the failing resource and captured migration output.
fn report_failure(err: &anyhow::Error) {
    eprintln!("Error: {err:#}");
    let Some(apply) = err.downcast_ref::<ApplyError>() else {
        return;
    };
    if let Some(report) = apply.report() {
        eprintln!("{report}");
    }
    if let Some(resource) = apply.failed_resource() {
        eprintln!("Failed resource: {resource}");
    }
    if let Some(diagnostics) = apply.diagnostics() {
        eprintln!("Migration output:\n{diagnostics}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_failure(&err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_options_work_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "deckhand",
            "apply",
            "--run-migrations",
            "--env-file",
            "prod.env",
            "--state-dir",
            "/tmp/state",
        ])
        .unwrap();
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));
        assert_eq!(cli.state_dir, PathBuf::from("/tmp/state"));
        assert!(matches!(
            cli.command,
            Command::Apply { ref stage, run_migrations: true } if stage == "Prod"
        ));
    }

    #[test]
    fn env_file_and_config_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "deckhand",
            "--env-file",
            ".env",
            "--config",
            "deckhand.toml",
            "validate",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn synth_defaults_to_the_assembly_dir() {
        let cli = Cli::try_parse_from(["deckhand", "synth"]).unwrap();
        assert!(matches!(cli.command, Command::Synth { ref out } if out == &PathBuf::from("deckhand.out")));
    }

    #[test]
    fn pipeline_push_requires_a_branch() {
        assert!(Cli::try_parse_from(["deckhand", "pipeline", "push"]).is_err());
        let cli = Cli::try_parse_from(["deckhand", "pipeline", "push", "--branch", "main"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Pipeline {
                action: PipelineAction::Push { ref branch, repo: None, .. }
            } if branch == "main"
        ));
    }
}
