use std::path::Path;

use deckhand_plan::Assembly;

use super::{ConfigSource, synthesize};

pub fn synth(source: &ConfigSource, out: &Path) -> anyhow::Result<()> {
    let config = source.load()?;
    let pipeline = synthesize(&config)?;
    let assembly = Assembly::from_pipeline(&pipeline);
    let written = assembly.write(out)?;

    println!("✓ Synthesized {} into {}", pipeline.name, out.display());
    println!("  Fingerprint: {}", assembly.manifest.pipeline.fingerprint);
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}
