use std::cmp::Ordering;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SelectionConfig;
use crate::consts::DEGENERATE_SHARPE;
use crate::diversification::DiversificationFilter;
use crate::pool::CandidatePool;
use crate::portfolio::{rank_scored, Combination, ScoredCombination};
use crate::progress::{CancellationToken, Phase, ProgressReporter, ProgressSnapshot};
use crate::sampling::{stream_id, stream_rng};
use crate::simulation::{AdaptiveOutcome, AdaptiveSimulationController};

pub mod brute_force;
pub mod refinement;

pub use brute_force::BruteForceSearch;
pub use refinement::{NoisePoint, RefinementPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    BruteForce,
    Genetic,
}

impl SearchMethod {
    /// Exhaustive up to the threshold, evolutionary above it.
    pub fn for_size(k: usize, heuristic_threshold_k: usize) -> Self {
        if k <= heuristic_threshold_k {
            SearchMethod::BruteForce
        } else {
            SearchMethod::Genetic
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Every combination was enumerated.
    Exhausted,
    Converged,
    MaxGenerations,
    Cancelled,
    /// The size was never searched (see the skip reason).
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub best_sharpe: Option<f64>,
    pub average_sharpe: Option<f64>,
}

/// What searching one portfolio size produced.
#[derive(Debug, Clone)]
pub struct SizeOutcome {
    pub k: usize,
    pub method: SearchMethod,
    pub termination: Termination,
    pub best: Option<ScoredCombination>,
    /// Size of the unconstrained search space, C(n, k).
    pub total_combinations: u64,
    /// Combinations rejected by the sector cap before scoring.
    pub skipped_invalid: u64,
    pub evaluated: u64,
    pub discarded: u64,
    pub population_size: Option<usize>,
    pub generations_run: Option<usize>,
    pub fitness_history: Vec<GenerationStats>,
    pub skip_reason: Option<String>,
    pub duration: Duration,
}

impl SizeOutcome {
    pub fn skipped(k: usize, method: SearchMethod, total_combinations: u64, reason: String) -> Self {
        SizeOutcome {
            k,
            method,
            termination: Termination::Skipped,
            best: None,
            total_combinations,
            skipped_invalid: 0,
            evaluated: 0,
            discarded: 0,
            population_size: None,
            generations_run: None,
            fitness_history: Vec::new(),
            skip_reason: Some(reason),
            duration: Duration::ZERO,
        }
    }
}

/// Best result of the whole run so far; only the coordinating thread writes it.
///
/// Workers never see the tracker itself, only the Sharpe snapshotted before
/// their batch started, which keeps results independent of thread timing.
#[derive(Debug, Clone, Default)]
pub struct BestTracker {
    best: Option<ScoredCombination>,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<&ScoredCombination> {
        self.best.as_ref()
    }

    pub fn best_sharpe(&self) -> f64 {
        self.best
            .as_ref()
            .map_or(DEGENERATE_SHARPE, |best| best.best_sharpe())
    }

    /// Returns whether the candidate became the new best.
    pub fn offer(&mut self, pool: &CandidatePool, candidate: &ScoredCombination) -> bool {
        let improves = match &self.best {
            None => true,
            Some(best) => rank_scored(pool, candidate, best) == Ordering::Greater,
        };
        if improves {
            self.best = Some(candidate.clone());
        }
        improves
    }
}

/// Keeps whichever of `current` and `candidate` ranks higher.
pub(crate) fn keep_better(
    pool: &CandidatePool,
    current: &mut Option<ScoredCombination>,
    candidate: ScoredCombination,
) {
    let replace = match current {
        None => true,
        Some(existing) => rank_scored(pool, &candidate, existing) == Ordering::Greater,
    };
    if replace {
        *current = Some(candidate);
    }
}

/// Everything the search phases share for one run.
pub struct SearchContext<'a> {
    pub pool: &'a CandidatePool,
    pub config: &'a SelectionConfig,
    pub filter: DiversificationFilter<'a>,
    pub controller: AdaptiveSimulationController,
    pub reporter: &'a dyn ProgressReporter,
    pub cancel: &'a CancellationToken,
    pub seed: u64,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        pool: &'a CandidatePool,
        config: &'a SelectionConfig,
        reporter: &'a dyn ProgressReporter,
        cancel: &'a CancellationToken,
        seed: u64,
    ) -> Self {
        SearchContext {
            pool,
            config,
            filter: DiversificationFilter::new(pool, config.max_stocks_per_sector),
            controller: AdaptiveSimulationController::new(config),
            reporter,
            cancel,
            seed,
        }
    }

    /// Scores a batch in parallel against one best-so-far snapshot. Each
    /// combination draws from its own stream, so output order and values
    /// are the same for any thread count.
    pub fn evaluate_batch(
        &self,
        phase: u64,
        k: usize,
        batch: &[(u64, Combination)],
        best_overall: f64,
    ) -> Vec<AdaptiveOutcome> {
        batch
            .par_iter()
            .map(|(position, combination)| {
                let stats = self.pool.combination_stats(combination);
                let mut rng = stream_rng(self.seed, stream_id(phase, k, *position));
                self.controller.evaluate(&stats, best_overall, &mut rng)
            })
            .collect()
    }

    pub fn report(&self, phase: Phase, k: Option<usize>, percent_complete: f64, best_sharpe: f64) {
        self.reporter.report(&ProgressSnapshot {
            phase,
            k,
            percent_complete,
            best_sharpe: best_sharpe.is_finite().then_some(best_sharpe),
        });
    }
}

/// C(n, k), saturating at `u64::MAX`.
pub fn binomial(n: usize, k: usize) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = result * (n - i) as u128 / (i + 1) as u128;
        if result > u64::MAX as u128 {
            return u64::MAX;
        }
    }
    result as u64
}
