use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::consts::{DEGENERATE_SHARPE, FLOAT_COMPARISON_EPSILON};
use crate::pool::{CandidatePool, CombinationStats};
use crate::simulation::CombinationScore;

/// An unordered set of distinct pool indices, stored sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Combination(Vec<usize>);

impl Combination {
    pub fn new(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Combination(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.0.binary_search(&idx).is_ok()
    }
}

/// Non-negative weights summing to one, parallel to a combination's indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector(Vec<f64>);

impl WeightVector {
    /// Normalizes raw non-negative values onto the simplex.
    /// Falls back to equal weights when they sum to (numerically) nothing.
    pub fn normalized(mut raw: Vec<f64>) -> Self {
        raw.iter_mut().for_each(|w| *w = w.max(0.));
        let magnitude = raw.iter().sum::<f64>();
        if magnitude < FLOAT_COMPARISON_EPSILON {
            let n = raw.len();
            return WeightVector(vec![1. / n as f64; n]);
        }
        raw.iter_mut().for_each(|w| *w /= magnitude);
        WeightVector(raw)
    }

    pub fn equal(n: usize) -> Self {
        WeightVector(vec![1. / n as f64; n])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Annualized performance of one weight draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub weights: WeightVector,
    pub annual_return: f64,
    pub annual_volatility: f64,
    /// `DEGENERATE_SHARPE` when the volatility is numerically zero.
    pub sharpe_ratio: f64,
}

impl SimulationResult {
    pub fn is_degenerate(&self) -> bool {
        !self.sharpe_ratio.is_finite()
    }

    /// Higher Sharpe first, then lower volatility.
    pub fn rank_cmp(&self, other: &SimulationResult) -> Ordering {
        compare_sharpe(self.sharpe_ratio, other.sharpe_ratio).then_with(|| {
            other
                .annual_volatility
                .total_cmp(&self.annual_volatility)
        })
    }
}

/// `Greater` means `a` is the better Sharpe. Degenerate values lose to any finite one.
pub fn compare_sharpe(a: f64, b: f64) -> Ordering {
    match (a.is_finite(), b.is_finite()) {
        (true, true) => a.total_cmp(&b),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPerformance {
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
}

/// Annualized mean, volatility and Sharpe of the weighted return series.
///
/// The mean and sample variance of `sum_i w_i r_i` are `w·mu` and `w'Sw`,
/// so the series never has to be materialized.
pub fn compute_portfolio_performance(
    stats: &CombinationStats,
    weights: &[f64],
    risk_free_rate: f64,
    periods_per_year: f64,
) -> PortfolioPerformance {
    let k = weights.len();
    let mut period_mean = 0.;
    let mut period_variance = 0.;
    for i in 0..k {
        period_mean += weights[i] * stats.means[i];
        for j in 0..k {
            period_variance += weights[i] * weights[j] * stats.covariance[(i, j)];
        }
    }

    let annualized_return = period_mean * periods_per_year;
    // Rounding can leave a tiny negative variance for degenerate inputs
    let annualized_volatility = (period_variance.max(0.) * periods_per_year).sqrt();

    let sharpe_ratio = if annualized_volatility >= FLOAT_COMPARISON_EPSILON {
        (annualized_return - risk_free_rate) / annualized_volatility
    } else {
        DEGENERATE_SHARPE
    };

    PortfolioPerformance {
        annualized_return,
        annualized_volatility,
        sharpe_ratio,
    }
}

/// Money left after compounding the expected annual return over the horizon.
pub fn final_value(initial_investment: f64, annual_return: f64, horizon_years: f64) -> f64 {
    initial_investment * (1. + annual_return).powf(horizon_years)
}

/// A combination together with the best draw found for it.
#[derive(Debug, Clone)]
pub struct ScoredCombination {
    pub combination: Combination,
    pub score: CombinationScore,
}

impl ScoredCombination {
    pub fn best_sharpe(&self) -> f64 {
        self.score.best_sharpe()
    }
}

/// Run-wide ordering of candidates: higher Sharpe, then lower volatility,
/// then the lexicographically smaller sorted ticker list. `Greater` means `a` wins.
pub fn rank_scored(pool: &CandidatePool, a: &ScoredCombination, b: &ScoredCombination) -> Ordering {
    rank_candidates(
        pool,
        (&a.combination, a.score.best()),
        (&b.combination, b.score.best()),
    )
}

/// Same ordering as [`rank_scored`] on borrowed parts.
pub fn rank_candidates(
    pool: &CandidatePool,
    (combination_a, best_a): (&Combination, Option<&SimulationResult>),
    (combination_b, best_b): (&Combination, Option<&SimulationResult>),
) -> Ordering {
    let by_result = match (best_a, best_b) {
        (Some(ra), Some(rb)) => ra.rank_cmp(rb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    };
    by_result.then_with(|| {
        let mut tickers_a = pool.tickers(combination_a);
        let mut tickers_b = pool.tickers(combination_b);
        tickers_a.sort();
        tickers_b.sort();
        // smaller list wins, so it has to compare as Greater
        tickers_b.cmp(&tickers_a)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn test_combination_is_sorted_and_unique() {
        let combination = Combination::new(vec![4, 1, 3, 1]);
        assert_eq!(combination.indices(), &[1, 3, 4]);
        assert!(combination.contains(3));
        assert!(!combination.contains(2));
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        let weights = WeightVector::normalized(vec![0.2, 0.6, 0.2, 1.0]);
        let sum: f64 = weights.as_slice().iter().sum();
        assert!((sum - 1.).abs() < FLOAT_COMPARISON_EPSILON);

        let zeros = WeightVector::normalized(vec![0., 0.]);
        assert_eq!(zeros.as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn test_zero_volatility_gives_sentinel() {
        let stats = CombinationStats {
            means: DVector::from_vec(vec![0.001]),
            covariance: DMatrix::from_vec(1, 1, vec![0.]),
        };
        let performance = compute_portfolio_performance(&stats, &[1.], 0.02, 252.);
        assert_eq!(performance.sharpe_ratio, DEGENERATE_SHARPE);
        assert!(!performance.sharpe_ratio.is_nan());
        assert!((performance.annualized_return - 0.252).abs() < 1e-12);
    }

    #[test]
    fn test_performance_annualization() {
        let stats = CombinationStats {
            means: DVector::from_vec(vec![0.001, 0.002]),
            covariance: DMatrix::from_vec(2, 2, vec![0.0001, 0., 0., 0.0004]),
        };
        let performance = compute_portfolio_performance(&stats, &[0.5, 0.5], 0.0, 252.);
        let expected_vol = ((0.25 * 0.0001 + 0.25 * 0.0004) * 252f64).sqrt();
        assert!((performance.annualized_return - 0.0015 * 252.).abs() < 1e-12);
        assert!((performance.annualized_volatility - expected_vol).abs() < 1e-12);
        assert!(
            (performance.sharpe_ratio - performance.annualized_return / expected_vol).abs() < 1e-9
        );
    }

    #[test]
    fn test_compare_sharpe_pushes_degenerate_last() {
        assert_eq!(compare_sharpe(0.5, DEGENERATE_SHARPE), Ordering::Greater);
        assert_eq!(compare_sharpe(DEGENERATE_SHARPE, -3.), Ordering::Less);
        assert_eq!(compare_sharpe(1., 2.), Ordering::Less);
    }

    #[test]
    fn test_rank_cmp_breaks_ties_on_volatility() {
        let calm = SimulationResult {
            weights: WeightVector::equal(2),
            annual_return: 0.1,
            annual_volatility: 0.1,
            sharpe_ratio: 1.,
        };
        let wild = SimulationResult {
            annual_volatility: 0.2,
            ..calm.clone()
        };
        assert_eq!(calm.rank_cmp(&wild), Ordering::Greater);
    }

    fn tied_draw() -> SimulationResult {
        SimulationResult {
            weights: WeightVector::equal(2),
            annual_return: 0.12,
            annual_volatility: 0.1,
            sharpe_ratio: 1.,
        }
    }

    fn abc_pool() -> CandidatePool {
        CandidatePool::new(
            ["B", "A", "C"]
                .iter()
                .enumerate()
                .map(|(i, ticker)| crate::pool::Security {
                    ticker: ticker.to_string(),
                    sector: "Any".into(),
                    score: 1.,
                    returns: vec![0.01 * i as f64, 0.02, -0.01],
                })
                .collect(),
        )
        .unwrap()
    }

    fn tied(indices: Vec<usize>) -> ScoredCombination {
        let mut score = CombinationScore::new(4);
        score.record(tied_draw());
        ScoredCombination {
            combination: Combination::new(indices),
            score,
        }
    }

    #[test]
    fn test_rank_breaks_full_ties_on_sorted_tickers() {
        // indices 0, 1, 2 hold B, A, C
        let pool = abc_pool();
        let a_c = tied(vec![1, 2]);
        let b_c = tied(vec![0, 2]);
        assert_eq!(rank_scored(&pool, &a_c, &b_c), Ordering::Greater);
        assert_eq!(rank_scored(&pool, &b_c, &a_c), Ordering::Less);
        assert_eq!(rank_scored(&pool, &a_c, &tied(vec![2, 1])), Ordering::Equal);
    }
}
