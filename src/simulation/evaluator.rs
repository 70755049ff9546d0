use std::collections::VecDeque;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SelectionConfig;
use crate::consts::DEGENERATE_SHARPE;
use crate::evolution::aggregator::{Aggregator, Spread};
use crate::pool::CombinationStats;
use crate::portfolio::{compute_portfolio_performance, SimulationResult};
use crate::sampling::WeightSampler;

/// Best draw found for a combination so far, plus what is needed to decide
/// whether more draws are worth it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationScore {
    best: Option<SimulationResult>,
    simulations: usize,
    degenerate_draws: usize,
    /// Running best Sharpe after each of the most recent draws.
    recent_best: VecDeque<f64>,
    window: usize,
}

impl CombinationScore {
    pub fn new(window: usize) -> Self {
        CombinationScore {
            best: None,
            simulations: 0,
            degenerate_draws: 0,
            recent_best: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn best(&self) -> Option<&SimulationResult> {
        self.best.as_ref()
    }

    /// `DEGENERATE_SHARPE` until a draw produced a finite Sharpe.
    pub fn best_sharpe(&self) -> f64 {
        self.best
            .as_ref()
            .map_or(DEGENERATE_SHARPE, |result| result.sharpe_ratio)
    }

    pub fn simulations(&self) -> usize {
        self.simulations
    }

    pub fn degenerate_draws(&self) -> usize {
        self.degenerate_draws
    }

    pub fn recent_best(&self) -> &VecDeque<f64> {
        &self.recent_best
    }

    /// Spread of the running best over a full window of finite values.
    pub fn window_spread(&self) -> Option<f64> {
        if self.recent_best.len() < self.window || self.recent_best.iter().any(|s| !s.is_finite())
        {
            return None;
        }
        let (front, back) = self.recent_best.as_slices();
        let values = [front, back].concat();
        Spread.value(&values).ok()
    }

    pub fn record(&mut self, result: SimulationResult) {
        self.simulations += 1;
        if result.is_degenerate() {
            self.degenerate_draws += 1;
        }
        let improves = match &self.best {
            None => true,
            Some(best) => result.rank_cmp(best).is_gt(),
        };
        if improves {
            self.best = Some(result);
        }

        if self.recent_best.len() == self.window {
            self.recent_best.pop_front();
        }
        self.recent_best.push_back(self.best_sharpe());
    }
}

/// Monte-Carlo scoring of one combination over random weight vectors.
#[derive(Debug, Clone)]
pub struct SimulationEvaluator {
    sampler: WeightSampler,
    risk_free_rate: f64,
    periods_per_year: f64,
    window: usize,
}

impl SimulationEvaluator {
    pub fn new(config: &SelectionConfig) -> Self {
        SimulationEvaluator {
            sampler: WeightSampler::default(),
            risk_free_rate: config.risk_free_rate,
            periods_per_year: config.trading_days_per_year,
            window: config.adaptive.convergence_window,
        }
    }

    pub fn empty_score(&self) -> CombinationScore {
        CombinationScore::new(self.window)
    }

    pub fn draw<R: Rng + ?Sized>(&self, stats: &CombinationStats, rng: &mut R) -> SimulationResult {
        let weights = self.sampler.sample(stats.means.len(), rng);
        let performance = compute_portfolio_performance(
            stats,
            weights.as_slice(),
            self.risk_free_rate,
            self.periods_per_year,
        );
        SimulationResult {
            weights,
            annual_return: performance.annualized_return,
            annual_volatility: performance.annualized_volatility,
            sharpe_ratio: performance.sharpe_ratio,
        }
    }

    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        stats: &CombinationStats,
        num_draws: usize,
        rng: &mut R,
    ) -> CombinationScore {
        let mut score = self.empty_score();
        self.extend(&mut score, stats, num_draws, rng);
        score
    }

    /// Runs `num_draws` more draws into an existing score.
    pub fn extend<R: Rng + ?Sized>(
        &self,
        score: &mut CombinationScore,
        stats: &CombinationStats,
        num_draws: usize,
        rng: &mut R,
    ) {
        for _ in 0..num_draws {
            score.record(self.draw(stats, rng));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::FLOAT_COMPARISON_EPSILON;
    use crate::pool::{CandidatePool, Security};
    use crate::portfolio::Combination;
    use crate::sampling::stream_rng;

    fn pool() -> CandidatePool {
        let series = |offset: f64| {
            (0..60)
                .map(|t| 0.001 + offset * ((t as f64) * 0.7 + offset * 3.).sin() * 0.01)
                .collect::<Vec<f64>>()
        };
        CandidatePool::new(
            [1., 2., 3.]
                .iter()
                .enumerate()
                .map(|(i, &offset)| Security {
                    ticker: format!("S{}", i),
                    sector: format!("Sector{}", i),
                    score: 1.,
                    returns: series(offset),
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_best_is_maximum_of_draws() {
        let pool = pool();
        let stats = pool.combination_stats(&Combination::new(vec![0, 1, 2]));
        let evaluator = SimulationEvaluator::new(&SelectionConfig::default());

        let mut rng = stream_rng(11, 0);
        let draws: Vec<SimulationResult> = (0..300).map(|_| evaluator.draw(&stats, &mut rng)).collect();
        let expected = draws
            .iter()
            .map(|d| d.sharpe_ratio)
            .fold(f64::NEG_INFINITY, f64::max);

        let score = evaluator.evaluate(&stats, 300, &mut stream_rng(11, 0));
        assert_eq!(score.simulations(), 300);
        assert_eq!(score.best_sharpe(), expected);
        for draw in draws.iter() {
            let sum: f64 = draw.weights.as_slice().iter().sum();
            assert!((sum - 1.).abs() < FLOAT_COMPARISON_EPSILON);
        }
    }

    #[test]
    fn test_window_tracks_running_best() {
        let pool = pool();
        let stats = pool.combination_stats(&Combination::new(vec![0, 1]));
        let mut config = SelectionConfig::default();
        config.adaptive.convergence_window = 10;
        let evaluator = SimulationEvaluator::new(&config);

        let mut score = evaluator.evaluate(&stats, 5, &mut stream_rng(3, 0));
        assert!(score.window_spread().is_none(), "window is not full yet");

        evaluator.extend(&mut score, &stats, 50, &mut stream_rng(3, 1));
        assert_eq!(score.recent_best().len(), 10);
        let values: Vec<f64> = score.recent_best().iter().copied().collect();
        assert!(values.windows(2).all(|w| w[1] >= w[0]), "running best never drops");
        assert_eq!(*values.last().unwrap(), score.best_sharpe());
        assert!(score.window_spread().unwrap() >= 0.);
    }

    #[test]
    fn test_constant_single_security_is_degenerate() {
        let pool = CandidatePool::new(vec![Security {
            ticker: "CASH".into(),
            sector: "Money".into(),
            score: 1.,
            returns: vec![0.0001; 30],
        }])
        .unwrap();
        let stats = pool.combination_stats(&Combination::new(vec![0]));
        let evaluator = SimulationEvaluator::new(&SelectionConfig::default());
        let score = evaluator.evaluate(&stats, 20, &mut stream_rng(1, 1));

        assert_eq!(score.best_sharpe(), DEGENERATE_SHARPE);
        assert!(!score.best_sharpe().is_nan());
        assert_eq!(score.degenerate_draws(), 20);
        assert!(score.window_spread().is_none());
    }
}
