use std::path::Path;

use super::{ConfigSource, find_stage, local_engine, synthesize};

pub fn diff(source: &ConfigSource, state_dir: &Path, stage: &str, format: &str) -> anyhow::Result<()> {
    let config = source.load()?;
    let pipeline = synthesize(&config)?;
    let plan = find_stage(&pipeline, stage)?;

    let changes = local_engine(&config, state_dir, false)?.diff(plan)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&changes)?),
        _ => println!("{changes}"),
    }
    Ok(())
}
