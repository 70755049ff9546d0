use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::{NOISE_TRACE_STREAM, REFINEMENT_STREAM};
use crate::evolution::aggregator::{Aggregator, ArithmeticMean, StandardDeviation};
use crate::portfolio::{rank_scored, Combination, ScoredCombination};
use crate::progress::Phase;
use crate::sampling::{stream_id, stream_rng};
use crate::search::SearchContext;

/// Spread of the best Sharpe found with `simulations` draws, over `repeats` reruns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoisePoint {
    pub k: usize,
    pub simulations: usize,
    pub repeats: usize,
    pub mean_sharpe: f64,
    pub std_sharpe: f64,
}

/// Re-simulates the strongest per-size winners with a large fixed budget.
pub struct RefinementPhase<'c, 'a> {
    ctx: &'c SearchContext<'a>,
}

impl<'c, 'a> RefinementPhase<'c, 'a> {
    pub fn new(ctx: &'c SearchContext<'a>) -> Self {
        RefinementPhase { ctx }
    }

    /// How many of `winners` get refined: the configured fraction, rounded
    /// up, and always at least one.
    pub fn refinement_count(&self, winners: usize) -> usize {
        let fraction = self.ctx.config.refinement.top_n_percent_refinement;
        ((winners as f64 * fraction).ceil() as usize).clamp(1, winners.max(1))
    }

    /// Returns the refined candidates, best first. Empty when `winners` is.
    pub fn refine(&self, winners: &[ScoredCombination]) -> Vec<ScoredCombination> {
        if winners.is_empty() {
            return Vec::new();
        }
        let pool = self.ctx.pool;
        let mut ranked: Vec<&ScoredCombination> = winners.iter().collect();
        ranked.sort_by(|a, b| rank_scored(pool, b, a));
        let count = self.refinement_count(ranked.len());
        let sim_runs = self.ctx.config.refinement.sim_runs;

        info!(
            candidates = count,
            of = ranked.len(),
            sim_runs,
            "Refinement started"
        );

        let mut refined: Vec<ScoredCombination> = ranked[..count]
            .par_iter()
            .map(|candidate| {
                let combination = &candidate.combination;
                let stats = pool.combination_stats(combination);
                let mut rng = stream_rng(
                    self.ctx.seed,
                    stream_id(REFINEMENT_STREAM, combination.len(), 0),
                );
                ScoredCombination {
                    combination: combination.clone(),
                    score: self
                        .ctx
                        .controller
                        .evaluate_fixed(&stats, sim_runs, &mut rng),
                }
            })
            .collect();
        refined.sort_by(|a, b| rank_scored(pool, b, a));

        let best_sharpe = refined
            .first()
            .map_or(f64::NEG_INFINITY, |best| best.best_sharpe());
        self.ctx
            .report(Phase::Refinement, None, 100., best_sharpe);
        refined
    }

    /// Repeats the simulation of `combination` at each configured draw count
    /// to show how the estimate tightens as the budget grows.
    pub fn noise_trace(&self, combination: &Combination) -> Vec<NoisePoint> {
        let settings = &self.ctx.config.noise_trace;
        let k = combination.len();
        let stats = self.ctx.pool.combination_stats(combination);
        let evaluator = self.ctx.controller.evaluator();

        let mut points = Vec::with_capacity(settings.sim_counts.len());
        for (level, &simulations) in settings.sim_counts.iter().enumerate() {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            let samples: Vec<f64> = (0..settings.repeats)
                .into_par_iter()
                .map(|repeat| {
                    let position = (level * settings.repeats + repeat) as u64;
                    let mut rng =
                        stream_rng(self.ctx.seed, stream_id(NOISE_TRACE_STREAM, k, position));
                    evaluator.evaluate(&stats, simulations, &mut rng).best_sharpe()
                })
                .collect::<Vec<f64>>()
                .into_iter()
                .filter(|sharpe| sharpe.is_finite())
                .collect();

            match (
                ArithmeticMean.value(&samples),
                StandardDeviation.value(&samples),
            ) {
                (Ok(mean_sharpe), Ok(std_sharpe)) => points.push(NoisePoint {
                    k,
                    simulations,
                    repeats: samples.len(),
                    mean_sharpe,
                    std_sharpe,
                }),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(k, simulations, %e, "Noise trace level skipped");
                }
            }
            self.ctx.report(
                Phase::NoiseTrace,
                Some(k),
                100. * (level + 1) as f64 / settings.sim_counts.len() as f64,
                f64::NEG_INFINITY,
            );
        }
        points
    }
}
