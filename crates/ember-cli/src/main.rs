mod commands;

use anyhow::Result;
use clap::Parser;

use ember_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = commands::util::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            repo_id_or_model_path,
            thread_num,
            prompt,
            max_new_tokens,
            precision,
            family,
            cache_dir,
            mode,
        } => {
            commands::generate::run(
                &config,
                repo_id_or_model_path.as_deref(),
                thread_num,
                &prompt,
                max_new_tokens,
                precision,
                family,
                cache_dir,
                mode,
            )
            .await
        }

        Commands::Convert {
            input,
            output,
            family,
            precision,
        } => commands::convert::run(&config, &input, &output, family, precision).await,

        Commands::Cache { action } => commands::cache::run(&config, action),
    }
}
