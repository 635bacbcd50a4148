//! Recast CLI Application

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use recast_core::domain::config::{ConfigManager, JobConfig, RecastConfig};
use recast_core::domain::session::CancelFlag;
use recast_infra::audio::{JobPipeline, WavBridge};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recast")]
#[command(about = "Rebuild a single audio track from independently recorded streams", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read every segment header of a job and print the format vote as JSON
    Vote {
        #[arg(long)]
        job: PathBuf,
    },
    /// Mix a job into a WAV file
    Mix {
        #[arg(long)]
        job: PathBuf,

        /// Output file, overriding the job's
        #[arg(long)]
        output: Option<PathBuf>,

        /// Replace an existing output file
        #[arg(long)]
        overwrite: bool,
    },
    /// Write a sample job file
    InitJob { path: PathBuf },
    /// Print the configuration file location and its values
    Config,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn load_config(config_dir: Option<PathBuf>) -> Result<(ConfigManager, RecastConfig)> {
    let dir = match config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir()?,
    };
    let manager = ConfigManager::new(dir);
    let config = manager.load().await;
    Ok((manager, config))
}

async fn load_job(path: &Path) -> Result<JobConfig> {
    JobConfig::load_from_file(path)
        .await
        .with_context(|| format!("cannot load job {}", path.display()))
}

async fn vote(config: &RecastConfig, job_path: &Path) -> Result<()> {
    let job = load_job(job_path).await?;
    let pipeline = JobPipeline::prepare(job, &config.mix, &CancelFlag::new())?;
    println!("{}", serde_json::to_string_pretty(&pipeline.report())?);
    Ok(())
}

async fn mix(
    config: &RecastConfig,
    job_path: &Path,
    output: Option<PathBuf>,
    overwrite: bool,
) -> Result<()> {
    let job = load_job(job_path).await?;
    let destination = output.unwrap_or_else(|| job.output_path(&config.output));
    let overwrite = overwrite || config.output.overwrite;

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, stopping after the current step");
        handler_flag.cancel();
    }) {
        tracing::warn!("cannot install Ctrl-C handler: {e}");
    }

    let pipeline = JobPipeline::prepare(job, &config.mix, &cancel)?;

    let outcome = tokio::task::spawn_blocking(move || {
        let mut bridge = WavBridge::new(destination, overwrite);
        pipeline.run(&mut bridge, cancel)
    })
    .await
    .context("mix task panicked")??;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.is_cancelled() {
        bail!("mix cancelled after {} blocks", outcome.blocks);
    }
    Ok(())
}

async fn init_job(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    JobConfig::sample()
        .save_to_file(path)
        .await
        .with_context(|| format!("cannot write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Sample job written");
    Ok(())
}

fn show_config(manager: &ConfigManager, config: &RecastConfig) -> Result<()> {
    println!("# {}", manager.config_path().display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (manager, config) = load_config(cli.config_dir).await?;

    match cli.command {
        Command::Vote { job } => vote(&config, &job).await,
        Command::Mix {
            job,
            output,
            overwrite,
        } => mix(&config, &job, output, overwrite).await,
        Command::InitJob { path } => init_job(&path).await,
        Command::Config => show_config(&manager, &config),
    }
}
