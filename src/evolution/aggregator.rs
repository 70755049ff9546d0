use statrs::statistics::Statistics;
use thiserror::Error;

/// Aggregator trait which reduces a series to a single f64 number.
/// Used for the convergence windows and the noise trace summaries.
pub trait Aggregator: Sync + Send {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError>;
}

#[derive(Error, Debug, PartialEq)]
pub enum AggregatorError {
    #[error("Number of periods is invalid for aggregator: `{0}`")]
    InvalidNumberOfPeriods(String),
}

pub struct ArithmeticMean;
impl Aggregator for ArithmeticMean {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.is_empty() {
            return Err(AggregatorError::InvalidNumberOfPeriods(
                "Mean cannot be computed for an empty series.".into(),
            ));
        }
        Ok(series.mean())
    }
}

/// Sample (n - 1) standard deviation.
pub struct StandardDeviation;
impl Aggregator for StandardDeviation {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.len() <= 1 {
            return Err(AggregatorError::InvalidNumberOfPeriods(
                "Standard deviation cannot be computed for series with less than 2 elements."
                    .into(),
            ));
        }
        Ok(series.std_dev())
    }
}

/// max - min of the series.
pub struct Spread;
impl Aggregator for Spread {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.is_empty() {
            return Err(AggregatorError::InvalidNumberOfPeriods(
                "Spread cannot be computed for an empty series.".into(),
            ));
        }
        Ok(series.max() - series.min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregators() {
        let series = [1., 2., 3., 4.];
        assert_eq!(ArithmeticMean.value(&series), Ok(2.5));
        assert_eq!(Spread.value(&series), Ok(3.));
        let std = StandardDeviation.value(&series).unwrap();
        assert!((std - (5f64 / 3.).sqrt()).abs() < 1e-12);

        assert!(StandardDeviation.value(&[1.]).is_err());
        assert!(Spread.value(&[]).is_err());
        assert!(ArithmeticMean.value(&[]).is_err());
    }
}
