use std::time::Instant;

use itertools::Itertools;
use tracing::{debug, info};

use crate::consts::BRUTE_FORCE_STREAM;
use crate::portfolio::{Combination, ScoredCombination};
use crate::progress::Phase;
use crate::search::{
    binomial, keep_better, BestTracker, SearchContext, SearchMethod, SizeOutcome, Termination,
};

/// Exhaustive search over every k-subset of the pool.
pub struct BruteForceSearch<'c, 'a> {
    ctx: &'c SearchContext<'a>,
}

impl<'c, 'a> BruteForceSearch<'c, 'a> {
    pub fn new(ctx: &'c SearchContext<'a>) -> Self {
        BruteForceSearch { ctx }
    }

    /// Enumerates subsets in lexicographic index order, skips the ones the
    /// sector cap rejects and scores the rest batch by batch.
    pub fn run(&self, k: usize, tracker: &mut BestTracker) -> SizeOutcome {
        let started = Instant::now();
        let pool = self.ctx.pool;
        let total = binomial(pool.len(), k);
        let batch_size = self.ctx.config.parallel_batch_size;
        let report_step = self.ctx.config.progress_interval_percent;

        let mut best: Option<ScoredCombination> = None;
        let mut skipped_invalid: u64 = 0;
        let mut evaluated: u64 = 0;
        let mut discarded: u64 = 0;
        let mut next_report = report_step;
        let mut termination = Termination::Exhausted;

        info!(k, total, "Brute force search started");

        let valid = (0..pool.len())
            .combinations(k)
            .enumerate()
            .filter_map(|(position, indices)| {
                if self.ctx.filter.is_valid_indices(&indices) {
                    Some((position as u64, Combination::new(indices)))
                } else {
                    None
                }
            });
        let batches = valid.chunks(batch_size);

        for batch in &batches {
            if self.ctx.cancel.is_cancelled() {
                termination = Termination::Cancelled;
                break;
            }
            let batch: Vec<(u64, Combination)> = batch.collect();
            let last_position = batch.last().map_or(0, |(position, _)| *position);

            let best_overall = tracker.best_sharpe();
            let outcomes = self
                .ctx
                .evaluate_batch(BRUTE_FORCE_STREAM, k, &batch, best_overall);

            // single writer: fold in enumeration order
            for ((_, combination), outcome) in batch.into_iter().zip(outcomes) {
                evaluated += 1;
                if outcome.is_discarded() {
                    discarded += 1;
                    continue;
                }
                let candidate = ScoredCombination {
                    combination,
                    score: outcome.score,
                };
                tracker.offer(pool, &candidate);
                keep_better(pool, &mut best, candidate);
            }

            let seen = last_position + 1;
            skipped_invalid = seen - evaluated;
            let percent = 100. * seen as f64 / total.max(1) as f64;
            if percent >= next_report {
                self.ctx
                    .report(Phase::BruteForce, Some(k), percent, tracker.best_sharpe());
                while next_report <= percent {
                    next_report += report_step;
                }
            }
        }
        // trailing invalid subsets after the last valid one are never batched
        if termination == Termination::Exhausted {
            skipped_invalid = total - evaluated;
            self.ctx
                .report(Phase::BruteForce, Some(k), 100., tracker.best_sharpe());
        }

        debug!(k, evaluated, discarded, skipped_invalid, "Brute force search finished");
        SizeOutcome {
            k,
            method: SearchMethod::BruteForce,
            termination,
            best,
            total_combinations: total,
            skipped_invalid,
            evaluated,
            discarded,
            population_size: None,
            generations_run: None,
            fitness_history: Vec::new(),
            skip_reason: None,
            duration: started.elapsed(),
        }
    }
}
