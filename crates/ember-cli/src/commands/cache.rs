use std::path::PathBuf;

use anyhow::Result;
use ember::cache::{CacheKey, CacheStore};
use ember::{EmberConfig, ModelSource, Precision};
use ember_cli::CacheCommands;

use super::util::format_bytes;

pub fn run(config: &EmberConfig, action: CacheCommands) -> Result<()> {
    match action {
        CacheCommands::List { cache_dir } => list(config, cache_dir),
        CacheCommands::Purge {
            source,
            precision,
            cache_dir,
        } => purge(config, &source, precision, cache_dir),
    }
}

fn list(config: &EmberConfig, cache_dir: Option<PathBuf>) -> Result<()> {
    let store = CacheStore::new(cache_dir.unwrap_or_else(|| config.cache_dir()));
    let entries = store.entries()?;

    if entries.is_empty() {
        println!("No cached models in {}", store.root().display());
        return Ok(());
    }

    println!(
        "{:<48} {:<9} {:<10} {:>10}",
        "SOURCE", "PRECISION", "FAMILY", "SIZE"
    );
    for entry in &entries {
        let m = entry.manifest();
        println!(
            "{:<48} {:<9} {:<10} {:>10}",
            m.source,
            m.precision,
            m.family,
            format_bytes(m.size_bytes)
        );
    }
    println!();
    println!("{} entries in {}", entries.len(), store.root().display());
    Ok(())
}

fn purge(
    config: &EmberConfig,
    source: &str,
    precision: Option<Precision>,
    cache_dir: Option<PathBuf>,
) -> Result<()> {
    let store = CacheStore::new(cache_dir.unwrap_or_else(|| config.cache_dir()));
    let source = ModelSource::parse(source)?;
    let precisions = match precision {
        Some(p) => vec![p],
        None => Precision::ALL.to_vec(),
    };

    let mut removed = 0;
    for precision in precisions {
        let key = CacheKey::new(&source, precision)?;
        if store.remove(&key)? {
            println!("✓ Removed {}", key);
            removed += 1;
        }
    }
    if removed == 0 {
        println!("Nothing cached for {}", source);
    }
    Ok(())
}
