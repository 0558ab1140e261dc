use super::{ConfigSource, synthesize};

pub fn validate(source: &ConfigSource) -> anyhow::Result<()> {
    let config = source.load()?;
    let pipeline = synthesize(&config)?;

    println!(
        "✓ Configuration valid for {} ({}/{})",
        config.application_name, config.environment.account, config.environment.region
    );
    println!("  Pipeline: {} watching {}@{}", pipeline.name, pipeline.source.repo_slug, pipeline.source.branch);
    for stage in &pipeline.stages {
        println!(
            "  Stage {}: {} resources in {} stacks",
            stage.name,
            stage.graph.len(),
            stage.graph.stacks().len()
        );
    }
    Ok(())
}
