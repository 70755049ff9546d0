use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_TRADING_DAYS_PER_YEAR;
use crate::error::SelectionError;

fn default_max_concurrency() -> usize {
    num_cpus::get()
}
fn default_min_stocks() -> usize {
    3
}
fn default_max_stocks() -> usize {
    20
}
fn default_heuristic_threshold_k() -> usize {
    9
}
fn default_max_stocks_per_sector() -> usize {
    2
}
fn default_risk_free_rate() -> f64 {
    0.02
}
fn default_trading_days_per_year() -> f64 {
    DEFAULT_TRADING_DAYS_PER_YEAR
}
fn default_top_n_candidates() -> usize {
    30
}
fn default_initial_investment() -> f64 {
    10_000.
}
fn default_investment_horizon_years() -> f64 {
    1.
}
fn default_parallel_batch_size() -> usize {
    64
}
fn default_progress_interval_percent() -> f64 {
    5.
}

/// Everything the engine can be tuned with. Built once per run and shared by reference.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SelectionConfig {
    #[serde(default = "default_min_stocks")]
    pub min_stocks: usize,
    #[serde(default = "default_max_stocks")]
    pub max_stocks: usize,
    /// Sizes up to and including this one are searched exhaustively.
    #[serde(default = "default_heuristic_threshold_k")]
    pub heuristic_threshold_k: usize,
    #[serde(default = "default_max_stocks_per_sector")]
    pub max_stocks_per_sector: usize,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_trading_days_per_year")]
    pub trading_days_per_year: f64,
    /// How many of the best ranked candidates make it into the pool.
    #[serde(default = "default_top_n_candidates")]
    pub top_n_candidates: usize,
    /// Trailing number of return periods to keep, all of them when absent.
    #[serde(default)]
    pub lookback_days: Option<usize>,
    #[serde(default = "default_initial_investment")]
    pub initial_investment: f64,
    #[serde(default = "default_investment_horizon_years")]
    pub investment_horizon_years: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Combinations scored in parallel against the same best-so-far snapshot.
    #[serde(default = "default_parallel_batch_size")]
    pub parallel_batch_size: usize,
    #[serde(default = "default_progress_interval_percent")]
    pub progress_interval_percent: f64,
    #[serde(default)]
    pub genetic: GeneticConfig,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub noise_trace: NoiseTraceConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_population_size() -> usize {
    100
}
fn default_num_generations() -> usize {
    50
}
fn default_mutation_rate() -> f64 {
    0.1
}
fn default_crossover_rate() -> f64 {
    0.8
}
fn default_elitism_count() -> usize {
    2
}
fn default_tournament_size() -> usize {
    3
}
fn default_convergence_generations() -> usize {
    10
}
fn default_convergence_tolerance() -> f64 {
    1e-4
}
fn default_seed_attempts_per_individual() -> usize {
    50
}
fn default_mutation_attempts() -> usize {
    20
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GeneticConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_num_generations")]
    pub num_generations: usize,
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    #[serde(default = "default_elitism_count")]
    pub elitism_count: usize,
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    #[serde(default = "default_convergence_generations")]
    pub convergence_generations: usize,
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
    /// Seeding gives up looking for unique individuals after
    /// `population_size * seed_attempts_per_individual` draws.
    #[serde(default = "default_seed_attempts_per_individual")]
    pub seed_attempts_per_individual: usize,
    #[serde(default = "default_mutation_attempts")]
    pub mutation_attempts: usize,
}

fn default_initial_scan_sims() -> usize {
    100
}
fn default_early_discard_factor() -> f64 {
    0.75
}
fn default_early_discard_min_best() -> f64 {
    0.1
}
fn default_progressive_base_sims() -> usize {
    1_000
}
fn default_progressive_max_sims_cap() -> usize {
    10_000
}
fn default_convergence_window() -> usize {
    500
}
fn default_convergence_delta() -> f64 {
    1e-3
}
fn default_convergence_check_interval() -> usize {
    250
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdaptiveConfig {
    #[serde(default = "default_initial_scan_sims")]
    pub initial_scan_sims: usize,
    #[serde(default = "default_early_discard_factor")]
    pub early_discard_factor: f64,
    /// Early discard stays off until the best overall Sharpe exceeds this.
    #[serde(default = "default_early_discard_min_best")]
    pub early_discard_min_best: f64,
    #[serde(default = "default_progressive_base_sims")]
    pub progressive_base_sims: usize,
    #[serde(default = "default_progressive_max_sims_cap")]
    pub progressive_max_sims_cap: usize,
    #[serde(default = "default_convergence_window")]
    pub convergence_window: usize,
    #[serde(default = "default_convergence_delta")]
    pub convergence_delta: f64,
    #[serde(default = "default_convergence_check_interval")]
    pub convergence_check_interval: usize,
}

fn default_top_n_percent_refinement() -> f64 {
    0.2
}
fn default_sim_runs() -> usize {
    50_000
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefinementConfig {
    /// Fraction in (0, 1] of the per-size winners that get re-simulated.
    #[serde(default = "default_top_n_percent_refinement")]
    pub top_n_percent_refinement: f64,
    #[serde(default = "default_sim_runs")]
    pub sim_runs: usize,
}

fn default_noise_enabled() -> bool {
    true
}
fn default_noise_sim_counts() -> Vec<usize> {
    vec![100, 1_000, 10_000]
}
fn default_noise_repeats() -> usize {
    10
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NoiseTraceConfig {
    #[serde(default = "default_noise_enabled")]
    pub enabled: bool,
    #[serde(default = "default_noise_sim_counts")]
    pub sim_counts: Vec<usize>,
    #[serde(default = "default_noise_repeats")]
    pub repeats: usize,
}

fn default_results_log() -> PathBuf {
    PathBuf::from("results/run_history.jsonl")
}
fn default_noise_log() -> PathBuf {
    PathBuf::from("results/noise_trace.csv")
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_results_log")]
    pub results_log: PathBuf,
    #[serde(default = "default_noise_log")]
    pub noise_log: PathBuf,
}

// An empty JSON object goes through every `default = ...` above, so Default
// and a partial config file can never disagree.
macro_rules! default_from_empty_json {
    ($($ty:ty),*) => {
        $(impl Default for $ty {
            fn default() -> Self {
                serde_json::from_str("{}").expect("every field has a serde default")
            }
        })*
    };
}
default_from_empty_json!(
    SelectionConfig,
    GeneticConfig,
    AdaptiveConfig,
    RefinementConfig,
    NoiseTraceConfig,
    OutputConfig
);

fn check(condition: bool, message: &str) -> Result<(), SelectionError> {
    if condition {
        Ok(())
    } else {
        Err(SelectionError::Config(message.into()))
    }
}

fn is_probability(p: f64) -> bool {
    (0.0..=1.0).contains(&p)
}

impl SelectionConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, SelectionError> {
        let content = fs::read_to_string(path)?;
        let config: SelectionConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no search could run with. Pool-dependent checks
    /// (k against the pool size) happen when the engine starts.
    pub fn validate(&self) -> Result<(), SelectionError> {
        check(self.min_stocks >= 1, "min_stocks must be at least 1")?;
        check(
            self.min_stocks <= self.max_stocks,
            "min_stocks cannot exceed max_stocks",
        )?;
        check(
            self.max_stocks_per_sector >= 1,
            "max_stocks_per_sector must be at least 1",
        )?;
        check(
            self.trading_days_per_year > 0.,
            "trading_days_per_year must be positive",
        )?;
        check(self.top_n_candidates >= 1, "top_n_candidates must be at least 1")?;
        check(
            self.lookback_days.map_or(true, |days| days >= 2),
            "lookback_days must be at least 2 when set",
        )?;
        check(
            self.initial_investment > 0.,
            "initial_investment must be positive",
        )?;
        check(self.max_concurrency >= 1, "max_concurrency must be at least 1")?;
        check(
            self.parallel_batch_size >= 1,
            "parallel_batch_size must be at least 1",
        )?;
        check(
            self.progress_interval_percent > 0.,
            "progress_interval_percent must be positive",
        )?;

        let ga = &self.genetic;
        check(ga.population_size >= 2, "population_size must be at least 2")?;
        check(
            ga.elitism_count < ga.population_size,
            "elitism_count must be smaller than population_size",
        )?;
        check(ga.tournament_size >= 1, "tournament_size must be at least 1")?;
        check(
            is_probability(ga.mutation_rate),
            "mutation_rate must lie in [0, 1]",
        )?;
        check(
            is_probability(ga.crossover_rate),
            "crossover_rate must lie in [0, 1]",
        )?;
        check(
            ga.convergence_generations >= 1,
            "convergence_generations must be at least 1",
        )?;
        check(
            ga.seed_attempts_per_individual >= 1,
            "seed_attempts_per_individual must be at least 1",
        )?;

        let adaptive = &self.adaptive;
        check(
            adaptive.initial_scan_sims >= 1,
            "initial_scan_sims must be at least 1",
        )?;
        check(
            adaptive.progressive_max_sims_cap >= adaptive.initial_scan_sims,
            "progressive_max_sims_cap cannot be smaller than initial_scan_sims",
        )?;
        check(
            adaptive.convergence_window >= 2,
            "convergence_window must be at least 2",
        )?;
        check(
            adaptive.convergence_check_interval >= 1,
            "convergence_check_interval must be at least 1",
        )?;
        check(
            adaptive.convergence_delta >= 0.,
            "convergence_delta cannot be negative",
        )?;
        check(
            adaptive.early_discard_factor >= 0.,
            "early_discard_factor cannot be negative",
        )?;

        let refinement = &self.refinement;
        check(
            refinement.top_n_percent_refinement > 0. && refinement.top_n_percent_refinement <= 1.,
            "top_n_percent_refinement must lie in (0, 1]",
        )?;
        check(refinement.sim_runs >= 1, "sim_runs must be at least 1")?;

        if self.noise_trace.enabled {
            check(
                self.noise_trace.repeats >= 2,
                "noise_trace.repeats must be at least 2",
            )?;
            check(
                self.noise_trace.sim_counts.iter().all(|&count| count >= 1),
                "noise_trace.sim_counts entries must be positive",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: SelectionConfig =
            serde_json::from_str(r#"{ "min_stocks": 4, "genetic": { "population_size": 40 } }"#)
                .unwrap();
        assert_eq!(config.min_stocks, 4);
        assert_eq!(config.max_stocks, 20);
        assert_eq!(config.genetic.population_size, 40);
        assert_eq!(config.genetic.tournament_size, 3);
        assert_eq!(config.adaptive.initial_scan_sims, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_is_valid() {
        assert!(SelectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SelectionConfig::default();
        config.min_stocks = 5;
        config.max_stocks = 4;
        assert!(config.validate().is_err(), "min above max should be rejected");

        let mut config = SelectionConfig::default();
        config.genetic.elitism_count = config.genetic.population_size;
        assert!(config.validate().is_err(), "elitism must leave room for offspring");

        let mut config = SelectionConfig::default();
        config.genetic.mutation_rate = 1.5;
        assert!(config.validate().is_err(), "rates are probabilities");

        let mut config = SelectionConfig::default();
        config.refinement.top_n_percent_refinement = 0.;
        assert!(config.validate().is_err(), "refinement fraction must be positive");

        let mut config = SelectionConfig::default();
        config.adaptive.progressive_max_sims_cap = config.adaptive.initial_scan_sims - 1;
        assert!(config.validate().is_err(), "cap below the scan size is meaningless");
    }
}
