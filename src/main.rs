//! Command line entry point: loads candidates and prices, runs the selection
//! and appends the outcome to the run history.
//!
//! # Usage
//! ```sh
//! RUST_LOG=debug sharpe-select --candidates ranked.csv --prices prices.csv --seed 42
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sharpe_select::pool::{load_candidates, load_price_history};
use sharpe_select::{
    CancellationToken, CandidatePool, ResultRecorder, SelectionConfig, SelectionEngine,
    TracingReporter,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sharpe-optimal portfolio selection", long_about = None)]
struct Cli {
    /// Ranked candidates CSV (`ticker,sector,score`)
    #[arg(long)]
    candidates: PathBuf,

    /// Wide daily close prices CSV with a `date` column
    #[arg(long)]
    prices: PathBuf,

    /// JSON configuration, defaults for every omitted field
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run seed, overrides the configuration
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    results_log: Option<PathBuf>,

    #[arg(long)]
    noise_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SelectionConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SelectionConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
    }
    if let Some(path) = cli.results_log {
        config.output.results_log = path;
    }
    if let Some(path) = cli.noise_log {
        config.output.noise_log = path;
    }
    config.validate().context("invalid configuration")?;

    let candidates = load_candidates(&cli.candidates)
        .with_context(|| format!("reading candidates from {}", cli.candidates.display()))?;
    let prices = load_price_history(&cli.prices)
        .with_context(|| format!("reading prices from {}", cli.prices.display()))?;
    let pool = CandidatePool::assemble(candidates, &prices, &config)
        .context("assembling the candidate pool")?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current batch");
            signal.cancel();
        }
    });

    let recorder = ResultRecorder::new(&config.output);
    let outcome = tokio::task::spawn_blocking(move || {
        SelectionEngine::new(&pool, &config).run(&TracingReporter, &cancel)
    })
    .await
    .context("selection task panicked")??;

    recorder
        .append_run(&outcome.record)
        .context("writing the run history")?;
    recorder
        .append_noise_trace(&outcome.noise_trace)
        .context("writing the noise trace")?;

    match &outcome.record.recommended {
        Some(best) => info!(
            tickers = ?best.tickers,
            weights = ?best.weights,
            sharpe = ?best.sharpe_ratio,
            final_value = ?best.final_value,
            cancelled = outcome.record.cancelled,
            "Run finished"
        ),
        None => warn!(
            cancelled = outcome.record.cancelled,
            "Run finished without a recommendation"
        ),
    }
    Ok(())
}
