/// Anything with an absolute value below this is treated as zero (volatility, weight sums).
pub const FLOAT_COMPARISON_EPSILON: f64 = 1e-9;

/// Sharpe assigned to draws whose volatility is numerically zero.
/// Never wins a comparison against a finite Sharpe.
pub const DEGENERATE_SHARPE: f64 = f64::NEG_INFINITY;

pub const DEFAULT_TRADING_DAYS_PER_YEAR: f64 = 252.;

// Stream id prefixes, so that brute force, GA and refinement never share a ChaCha stream.
pub const BRUTE_FORCE_STREAM: u64 = 1;
pub const GENETIC_STREAM: u64 = 2;
pub const REFINEMENT_STREAM: u64 = 3;
pub const NOISE_TRACE_STREAM: u64 = 4;
