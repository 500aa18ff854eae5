use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use ember::{EmberConfig, ModelFamily, Precision};

pub async fn run(
    config: &EmberConfig,
    input: &Path,
    output: &Path,
    family: Option<ModelFamily>,
    precision: Option<Precision>,
) -> Result<()> {
    let family = family.unwrap_or(config.model.family);
    let precision = precision.unwrap_or(config.model.precision);
    let resolver = config.resolver_builder().family(family).build()?;

    eprintln!(
        "Converting {} ({}) to {} ...",
        input.display(),
        family.display_name(),
        precision
    );
    let started = Instant::now();
    let artifact = resolver.convert(input, output, precision).await?;

    println!("Conversion time: {:.2} s", started.elapsed().as_secs_f64());
    println!("{}", artifact.display());
    Ok(())
}
