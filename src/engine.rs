use std::time::Instant;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SelectionConfig;
use crate::error::SelectionError;
use crate::evolution::GeneticAlgorithmSearch;
use crate::pool::CandidatePool;
use crate::portfolio::ScoredCombination;
use crate::progress::{CancellationToken, ProgressReporter};
use crate::recorder::{NoiseTraceRow, PortfolioRecord, RunRecord, SizeRecord};
use crate::search::{
    binomial, BestTracker, BruteForceSearch, RefinementPhase, SearchContext,
    SearchMethod, SizeOutcome,
};

/// What a finished (or cancelled) run hands back for persisting.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub noise_trace: Vec<NoiseTraceRow>,
}

/// Searches every portfolio size in `[min_stocks, max_stocks]` and picks the
/// best refined combination.
pub struct SelectionEngine<'a> {
    pool: &'a CandidatePool,
    config: &'a SelectionConfig,
}

impl<'a> SelectionEngine<'a> {
    pub fn new(pool: &'a CandidatePool, config: &'a SelectionConfig) -> Self {
        SelectionEngine { pool, config }
    }

    /// Fails before any search when the input cannot support the requested
    /// sizes; per-size problems are logged and recorded instead.
    pub fn run(
        &self,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SelectionError> {
        self.config.validate()?;
        if self.pool.is_empty() {
            return Err(SelectionError::InputData("candidate pool is empty".into()));
        }
        if self.config.max_stocks > self.pool.len() {
            return Err(SelectionError::InputData(format!(
                "max_stocks {} exceeds the pool of {} securities",
                self.config.max_stocks,
                self.pool.len()
            )));
        }

        let seed = self.config.seed.unwrap_or_else(|| OsRng.next_u64());
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_concurrency)
            .build()
            .map_err(|e| SelectionError::Config(format!("cannot build worker pool: {}", e)))?;

        info!(
            seed,
            securities = self.pool.len(),
            min_stocks = self.config.min_stocks,
            max_stocks = self.config.max_stocks,
            threads = self.config.max_concurrency,
            "Selection run started"
        );
        threads.install(|| self.search(seed, reporter, cancel))
    }

    fn search(
        &self,
        seed: u64,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SelectionError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let pool = self.pool;
        let config = self.config;
        let ctx = SearchContext::new(pool, config, reporter, cancel, seed);
        let max_feasible = pool.max_feasible_size(config.max_stocks_per_sector);

        let mut tracker = BestTracker::new();
        let mut outcomes: Vec<SizeOutcome> = Vec::new();

        for k in config.min_stocks..=config.max_stocks {
            if cancel.is_cancelled() {
                warn!(k, "Run cancelled, remaining sizes skipped");
                break;
            }
            let method = SearchMethod::for_size(k, config.heuristic_threshold_k);
            if k > max_feasible {
                let infeasible = SelectionError::ConstraintInfeasible {
                    k,
                    max_feasible,
                    max_per_sector: config.max_stocks_per_sector,
                };
                error!(%infeasible, "Portfolio size skipped");
                outcomes.push(SizeOutcome::skipped(
                    k,
                    method,
                    binomial(pool.len(), k),
                    infeasible.to_string(),
                ));
                continue;
            }

            let outcome = match method {
                SearchMethod::BruteForce => Ok(BruteForceSearch::new(&ctx).run(k, &mut tracker)),
                SearchMethod::Genetic => GeneticAlgorithmSearch::new(&ctx).run(k, &mut tracker),
            };
            match outcome {
                Ok(outcome) => {
                    info!(
                        k,
                        ?method,
                        evaluated = outcome.evaluated,
                        discarded = outcome.discarded,
                        best_sharpe = outcome.best.as_ref().map(|b| b.best_sharpe()),
                        "Portfolio size searched"
                    );
                    outcomes.push(outcome);
                }
                Err(e) if !e.is_fatal() => {
                    error!(%e, k, "Portfolio size skipped");
                    outcomes.push(SizeOutcome::skipped(
                        k,
                        method,
                        binomial(pool.len(), k),
                        e.to_string(),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        let winners: Vec<ScoredCombination> = outcomes
            .iter()
            .filter_map(|outcome| outcome.best.clone())
            .collect();
        let phase = RefinementPhase::new(&ctx);
        let refined = phase.refine(&winners);

        let recommended = refined.first().cloned();

        let mut noise_trace = Vec::new();
        if config.noise_trace.enabled && !cancel.is_cancelled() {
            if let Some(best) = &recommended {
                noise_trace = phase
                    .noise_trace(&best.combination)
                    .iter()
                    .map(|point| NoiseTraceRow::new(run_id, point))
                    .collect();
            }
        }

        match &recommended {
            Some(best) => info!(
                tickers = ?pool.tickers(&best.combination),
                sharpe = best.best_sharpe(),
                "Recommended portfolio"
            ),
            None => warn!("No portfolio size produced a valid combination"),
        }
        let record = RunRecord {
            run_id,
            started_at,
            seed,
            candidates: pool.securities().iter().map(|s| s.ticker.clone()).collect(),
            config: config.clone(),
            recommended: recommended
                .as_ref()
                .map(|best| PortfolioRecord::from_scored(pool, config, best)),
            sizes: outcomes
                .iter()
                .map(|outcome| SizeRecord::from_outcome(pool, config, outcome))
                .collect(),
            refined: refined
                .iter()
                .map(|candidate| PortfolioRecord::from_scored(pool, config, candidate))
                .collect(),
            duration_ms: started.elapsed().as_millis() as u64,
            cancelled: cancel.is_cancelled(),
        };
        Ok(RunOutcome {
            record,
            noise_trace,
        })
    }
}
