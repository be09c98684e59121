use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use loop_agents::{CachedCompletion, CentralaClient, Completion, LlmOracle, LoopConfig, RigCompletion};
use resolution::{LocationResolver, Oracles};
use tracing::{info, warn};

/// Locate the target person from a note and report the answer.
#[derive(Debug, Parser)]
#[command(name = "loop-agents", version)]
struct Cli {
    /// Path to the note text.
    note: PathBuf,

    /// TOML config file; env and defaults fill the rest.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the person to locate.
    #[arg(long)]
    target: Option<String>,

    #[arg(long)]
    max_attempts: Option<u32>,

    /// Concurrent lookups per search phase.
    #[arg(long)]
    parallel: Option<usize>,

    /// Extract and search only; submit nothing.
    #[arg(long)]
    dry_run: bool,

    /// Also write the JSON report here.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> Result<LoopConfig> {
        let mut config = match &self.config {
            Some(path) => LoopConfig::from_file(path)?,
            None => LoopConfig::default(),
        };
        if let Some(target) = &self.target {
            config.search.target_name = target.clone();
        }
        if let Some(max_attempts) = self.max_attempts {
            config.submission.max_attempts = max_attempts;
        }
        if let Some(parallel) = self.parallel {
            config.search.max_parallel_lookups = parallel;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    let note = tokio::fs::read_to_string(&cli.note)
        .await
        .with_context(|| format!("cannot read note {}", cli.note.display()))?;

    info!(
        central = %config.central.base_url,
        llm = %config.llm.base_url,
        target_name = %config.search.target_name,
        dry_run = cli.dry_run,
        "loop resolver starting"
    );

    let central = Arc::new(CentralaClient::new(&config.central)?);
    let rig: Arc<dyn Completion> = Arc::new(RigCompletion::new(
        config.llm_client()?,
        config.llm.models.clone(),
        config.llm.temperature,
    ));
    let completion: Arc<dyn Completion> = match &config.cache_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "completion cache enabled");
            Arc::new(CachedCompletion::new(rig, dir.clone()))
        }
        None => rig,
    };
    let oracle = Arc::new(LlmOracle::new(completion, config.search.target_name.clone()));

    let resolver = LocationResolver::new(
        Oracles {
            extractor: oracle.clone(),
            normalizer: oracle.clone(),
            lookup: central.clone(),
            resolver: oracle,
            endpoint: central,
        },
        config.engine_config(),
    )?;

    let report = if cli.dry_run {
        resolver.dry_run(&note).await
    } else {
        resolver.resolve_location(&note).await
    };

    let json = serde_json::to_string_pretty(&report).context("cannot serialize report")?;
    println!("{json}");
    if let Some(path) = &cli.report {
        tokio::fs::write(path, &json)
            .await
            .with_context(|| format!("cannot write report {}", path.display()))?;
    }

    if report.is_success() {
        info!(resolution = ?report.resolution, "done");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(resolution = ?report.resolution, "no location confirmed");
        Ok(ExitCode::FAILURE)
    }
}
