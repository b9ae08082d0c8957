//! subtrans - bitmap subtitle OCR and translation
//!
//! Entry point: parses arguments, sets up logging and configuration, and
//! dispatches to the workflow.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subtrans::cli::{parse_target_languages, Args, Commands};
use subtrans::config::{Config, ProviderKind};
use subtrans::translate::{self, ProviderFactory, TranslationProvider};
use subtrans::workflow::Workflow;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;
    info!("Starting subtrans");

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Process { input, target_langs, output_dir } => {
            let targets = target_languages(&target_langs)?;
            let provider = create_provider(&config).await?;
            let workflow = Workflow::new(config, Some(provider));

            let outputs = workflow.process_single_file(&input, &targets, output_dir).await?;
            for output in outputs {
                println!("{}", output.display());
            }
        }
        Commands::Batch { input_dir, target_langs, output_dir } => {
            let targets = target_languages(&target_langs)?;
            let provider = create_provider(&config).await?;
            let workflow = Workflow::new(config, Some(provider));

            let report = workflow.process_directory(&input_dir, &targets, output_dir).await?;
            println!(
                "Processed {} files, {} failed, {} subtitle files written",
                report.processed,
                report.failed,
                report.outputs.len()
            );
        }
        Commands::Ocr { input, output_dir } => {
            let workflow = Workflow::new(config, None);
            let output = workflow.ocr_file(&input, output_dir).await?;
            println!("{}", output.display());
        }
        Commands::Extract { input, output_dir } => {
            let workflow = Workflow::new(config, None);
            workflow.check_media().await?;
            let output = workflow.extract_file(&input, output_dir).await?;
            println!("{}", output.display());
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            config.save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

fn target_languages(value: &str) -> Result<Vec<String>> {
    let targets = parse_target_languages(value);
    if targets.is_empty() {
        anyhow::bail!("At least one target language is required");
    }
    Ok(targets)
}

async fn create_provider(config: &Config) -> Result<Arc<dyn TranslationProvider>> {
    if matches!(config.translate.provider, ProviderKind::Ollama) {
        translate::ollama::check_availability(&config.translate.endpoint, &config.translate.model).await?;
    }
    Ok(ProviderFactory::create_provider(&config.translate, config.resolved_api_key())?)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".subtrans").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation; the guard must outlive the program
    let file_appender = rolling::daily(&log_dir, "subtrans.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subtrans.log").display()
    );

    Ok(())
}
