use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{AdaptiveConfig, SelectionConfig};
use crate::pool::CombinationStats;
use crate::simulation::evaluator::{CombinationScore, SimulationEvaluator};

/// Where the per-combination simulation loop stopped (or currently is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationState {
    Scanning,
    Progressive,
    /// The running best stopped moving before the budget ran out.
    Converged,
    /// The scheduled budget was used up.
    Capped,
    /// Clearly worse than the best overall after the initial scan.
    Discarded,
}

#[derive(Debug, Clone)]
pub struct AdaptiveOutcome {
    pub score: CombinationScore,
    pub state: SimulationState,
}

impl AdaptiveOutcome {
    pub fn is_discarded(&self) -> bool {
        self.state == SimulationState::Discarded
    }
}

/// Decides how many weight draws a combination deserves.
#[derive(Debug, Clone)]
pub struct AdaptiveSimulationController {
    evaluator: SimulationEvaluator,
    params: AdaptiveConfig,
}

impl AdaptiveSimulationController {
    pub fn new(config: &SelectionConfig) -> Self {
        AdaptiveSimulationController {
            evaluator: SimulationEvaluator::new(config),
            params: config.adaptive.clone(),
        }
    }

    pub fn evaluator(&self) -> &SimulationEvaluator {
        &self.evaluator
    }

    /// Total draws for a combination of size `k`: grows with ln k,
    /// never below the initial scan and never above the cap.
    pub fn scheduled_sims(&self, k: usize) -> usize {
        let k = k.max(1) as f64;
        let scheduled = (self.params.progressive_base_sims as f64 * (1. + k.ln())).round() as usize;
        scheduled.clamp(
            self.params.initial_scan_sims,
            self.params.progressive_max_sims_cap,
        )
    }

    /// `Scanning -> Progressive -> Converged | Capped`, or `Scanning -> Discarded`.
    ///
    /// `best_overall` is the best Sharpe seen anywhere in the run so far.
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        stats: &CombinationStats,
        best_overall: f64,
        rng: &mut R,
    ) -> AdaptiveOutcome {
        let k = stats.means.len();
        let mut score = self.evaluator.empty_score();

        // Scanning
        self.evaluator
            .extend(&mut score, stats, self.params.initial_scan_sims, rng);
        let discard_enabled =
            best_overall.is_finite() && best_overall > self.params.early_discard_min_best;
        if discard_enabled
            && score.best_sharpe() < best_overall * self.params.early_discard_factor
        {
            debug!(
                k,
                scan_best = score.best_sharpe(),
                best_overall,
                "Combination discarded after initial scan"
            );
            return AdaptiveOutcome {
                score,
                state: SimulationState::Discarded,
            };
        }

        // Progressive
        let target = self.scheduled_sims(k);
        let mut state = SimulationState::Capped;
        while score.simulations() < target {
            let step = self
                .params
                .convergence_check_interval
                .min(target - score.simulations());
            self.evaluator.extend(&mut score, stats, step, rng);

            if score.simulations() < target {
                if let Some(spread) = score.window_spread() {
                    if spread < self.params.convergence_delta {
                        state = SimulationState::Converged;
                        break;
                    }
                }
            }
        }

        if score.best().map_or(true, |best| best.is_degenerate()) {
            warn!(
                k,
                simulations = score.simulations(),
                "Every draw had zero volatility, combination scored with the degenerate Sharpe"
            );
        }
        AdaptiveOutcome { score, state }
    }

    /// Fixed budget, no early exit. Used when a precise estimate is wanted.
    pub fn evaluate_fixed<R: Rng + ?Sized>(
        &self,
        stats: &CombinationStats,
        simulations: usize,
        rng: &mut R,
    ) -> CombinationScore {
        self.evaluator.evaluate(stats, simulations, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{CandidatePool, Security};
    use crate::portfolio::Combination;
    use crate::sampling::stream_rng;

    fn security(ticker: &str, sector: &str, returns: Vec<f64>) -> Security {
        Security {
            ticker: ticker.into(),
            sector: sector.into(),
            score: 1.,
            returns,
        }
    }

    // Mean slightly negative, so every draw has a Sharpe below zero.
    fn weak_pool() -> CandidatePool {
        let wave = |phase: f64| {
            (0..100)
                .map(|t| -0.0005 + 0.01 * ((t as f64) * 0.9 + phase).sin())
                .collect::<Vec<f64>>()
        };
        CandidatePool::new(vec![
            security("W1", "A", wave(0.)),
            security("W2", "B", wave(1.)),
            security("W3", "C", wave(2.)),
        ])
        .unwrap()
    }

    fn config() -> SelectionConfig {
        let mut config = SelectionConfig::default();
        config.adaptive.initial_scan_sims = 50;
        config.adaptive.early_discard_factor = 0.75;
        config.adaptive.progressive_base_sims = 400;
        config.adaptive.progressive_max_sims_cap = 2_000;
        config.adaptive.convergence_window = 100;
        config.adaptive.convergence_check_interval = 50;
        config
    }

    #[test]
    fn test_inferior_combination_is_discarded_after_scan() {
        let pool = weak_pool();
        let stats = pool.combination_stats(&Combination::new(vec![0, 1, 2]));
        let controller = AdaptiveSimulationController::new(&config());

        let outcome = controller.evaluate(&stats, 1.0, &mut stream_rng(5, 0));
        assert!(outcome.score.best_sharpe() < 0.05);
        assert_eq!(outcome.state, SimulationState::Discarded);
        assert_eq!(outcome.score.simulations(), 50);
        assert!(outcome.score.simulations() < config().adaptive.progressive_max_sims_cap);
    }

    #[test]
    fn test_no_discard_below_meaningful_floor() {
        let pool = weak_pool();
        let stats = pool.combination_stats(&Combination::new(vec![0, 1, 2]));
        let controller = AdaptiveSimulationController::new(&config());

        // best overall 0.05 is under the default 0.1 floor
        let outcome = controller.evaluate(&stats, 0.05, &mut stream_rng(5, 0));
        assert_ne!(outcome.state, SimulationState::Discarded);
        assert!(outcome.score.simulations() > 50);
    }

    #[test]
    fn test_schedule_grows_with_k_and_is_capped() {
        let controller = AdaptiveSimulationController::new(&config());
        assert_eq!(controller.scheduled_sims(1), 400);
        assert!(controller.scheduled_sims(3) > controller.scheduled_sims(2));
        assert_eq!(controller.scheduled_sims(200), 2_000);
    }

    #[test]
    fn test_progressive_stops_at_convergence_or_cap() {
        let pool = weak_pool();
        let stats = pool.combination_stats(&Combination::new(vec![0, 1]));
        let controller = AdaptiveSimulationController::new(&config());
        let outcome = controller.evaluate(&stats, f64::NEG_INFINITY, &mut stream_rng(9, 0));

        let target = controller.scheduled_sims(2);
        match outcome.state {
            SimulationState::Converged => assert!(outcome.score.simulations() < target),
            SimulationState::Capped => assert_eq!(outcome.score.simulations(), target),
            other => panic!("unexpected terminal state {:?}", other),
        }
    }

    #[test]
    fn test_loose_delta_converges_early() {
        let pool = weak_pool();
        let stats = pool.combination_stats(&Combination::new(vec![0, 1, 2]));
        let mut config = config();
        config.adaptive.convergence_delta = 10.;
        let controller = AdaptiveSimulationController::new(&config);
        let outcome = controller.evaluate(&stats, f64::NEG_INFINITY, &mut stream_rng(9, 1));

        assert_eq!(outcome.state, SimulationState::Converged);
        // first time the window of 100 is full falls on the 100th draw
        assert_eq!(outcome.score.simulations(), 100);
    }
}
