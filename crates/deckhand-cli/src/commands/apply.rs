use std::path::Path;

use tracing::info;

use super::{ConfigSource, find_stage, local_engine, synthesize};

pub async fn apply(
    source: &ConfigSource,
    state_dir: &Path,
    stage: &str,
    run_migrations: bool,
) -> anyhow::Result<()> {
    let config = source.load()?;
    let pipeline = synthesize(&config)?;
    let plan = find_stage(&pipeline, stage)?;
    let engine = local_engine(&config, state_dir, run_migrations)?;

    info!(stage, run_migrations, "applying");
    let report = engine.apply(plan).await?;
    println!("{report}");
    println!("✓ Stage {stage} converged (apply #{})", report.apply_id);
    Ok(())
}
