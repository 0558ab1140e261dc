use std::path::Path;

use deckhand_apply::{PipelineController, PipelineRun, PushEvent};
use deckhand_plan::compose_pipeline;

use super::{ConfigSource, local_engine};

pub async fn push(
    source: &ConfigSource,
    state_dir: &Path,
    branch: String,
    repo: Option<String>,
    commit: Option<String>,
    run_migrations: bool,
) -> anyhow::Result<()> {
    let config = source.load()?;
    let engine = local_engine(&config, state_dir, run_migrations)?;
    let event = PushEvent {
        repo: repo.unwrap_or_else(|| config.repository.slug.clone()),
        branch,
        commit,
    };

    let run = PipelineController::new(engine)
        .on_push(&event, || compose_pipeline(&config))
        .await?;

    match run {
        PipelineRun::Ignored => {
            println!("Push to {}@{} does not trigger the pipeline", event.repo, event.branch);
        }
        PipelineRun::Deployed {
            pipeline,
            self_mutated,
            stages,
        } => {
            if self_mutated {
                println!("Pipeline {pipeline} updated its own definition");
            }
            for report in &stages {
                println!("{report}");
            }
            println!("✓ Pipeline {pipeline} deployed {} stage(s)", stages.len());
        }
    }
    Ok(())
}
