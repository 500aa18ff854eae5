use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use ember::cache::{CacheKey, CacheStore};
use ember::{
    generate_output, EmberConfig, GenerationRequest, HfTokenizer, ModelFamily, ModelHandle,
    ModelSource, Precision, TextTokenizer,
};
use ember_cli::Mode;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    config: &EmberConfig,
    repo_id_or_model_path: Option<&str>,
    thread_num: Option<usize>,
    prompt: &str,
    max_new_tokens: usize,
    precision: Option<Precision>,
    family: Option<ModelFamily>,
    cache_dir: Option<PathBuf>,
    mode: Mode,
) -> Result<()> {
    // 1. Settle options: flags win over the config file
    let source = repo_id_or_model_path.unwrap_or(config.model.source.as_str());
    let source = ModelSource::parse(source)?;
    let threads = thread_num.unwrap_or(config.model.threads);
    let precision = precision.unwrap_or(config.model.precision);
    let family = family.unwrap_or(config.model.family);
    let cache_dir = cache_dir.unwrap_or_else(|| config.cache_dir());

    // 2. External tokenizer, bound to the same model
    let external = match mode {
        Mode::All | Mode::External => {
            let tokenizer = external_tokenizer(config, &source, precision, &cache_dir).await?;
            log::info!("external tokenizer {}", tokenizer.path().display());
            Some(tokenizer)
        }
        _ => None,
    };

    // 3. Resolve
    let resolver = config.resolver_builder().family(family).build()?;
    eprintln!("Loading '{}' at {} ...", source, precision);
    let started = Instant::now();
    let mut handle = resolver
        .resolve(&source, precision, &cache_dir, threads)
        .await?;
    eprintln!(
        "Loaded {} ({:?}) in {:.2} s",
        handle.artifact_path().display(),
        handle.info().origin,
        started.elapsed().as_secs_f64()
    );

    // 4. Generate
    let request = GenerationRequest::new(prompt).max_new_tokens(max_new_tokens);
    if let Some(tokenizer) = &external {
        timed(&mut handle, request.clone().external(tokenizer as &dyn TextTokenizer))?;
    }
    if matches!(mode, Mode::All | Mode::Internal) {
        timed(&mut handle, request.clone().internal())?;
    }
    if matches!(mode, Mode::All | Mode::Direct) {
        timed(&mut handle, request.direct())?;
    }

    Ok(())
}

fn timed(handle: &mut ModelHandle, request: GenerationRequest<'_>) -> Result<()> {
    let label = request.convention.label();
    let started = Instant::now();
    let output = generate_output(handle, &request)?;
    let elapsed = started.elapsed();

    log::info!(
        "{}: {} prompt tokens, {} generated",
        label,
        output.prompt_tokens,
        output.generated_tokens
    );
    println!("Inference time ({}): {:.2} s", label, elapsed.as_secs_f64());
    println!("Output:");
    println!("{}", output.text);
    println!();
    Ok(())
}

async fn external_tokenizer(
    config: &EmberConfig,
    source: &ModelSource,
    precision: Precision,
    cache_dir: &std::path::Path,
) -> Result<HfTokenizer> {
    let download_dir = match source {
        ModelSource::Local(path) => path.clone(),
        ModelSource::Remote(_) => {
            let key = CacheKey::new(source, precision)?;
            CacheStore::new(cache_dir).checkpoint_dir(&key)
        }
    };
    HfTokenizer::from_pretrained(source, &config.hub_fetcher(), &download_dir)
        .await
        .with_context(|| format!("loading tokenizer.json for {source}"))
}
