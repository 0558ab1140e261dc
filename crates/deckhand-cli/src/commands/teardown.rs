use std::path::Path;

use tracing::warn;

use super::{ConfigSource, local_engine};

pub async fn teardown(source: &ConfigSource, state_dir: &Path, stage: &str) -> anyhow::Result<()> {
    let config = source.load()?;
    let engine = local_engine(&config, state_dir, false)?;

    warn!(stage, "tearing down");
    let report = engine.teardown(stage).await?;
    println!("{report}");
    println!("✓ Stage {stage} torn down");
    Ok(())
}
