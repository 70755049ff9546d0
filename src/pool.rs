use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SelectionConfig;
use crate::error::SelectionError;
use crate::portfolio::Combination;

/// One security eligible for inclusion. Immutable for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub ticker: String,
    pub sector: String,
    /// Composite score the candidate list was ranked by.
    pub score: f64,
    /// Period returns, aligned by date with every other security of the pool.
    pub returns: Vec<f64>,
}

/// A row of the ranked candidate list.
#[derive(Debug, Clone, Deserialize)]
pub struct RankedCandidate {
    pub ticker: String,
    pub sector: String,
    pub score: f64,
}

/// Wide price table: one date column, one column per ticker.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    pub dates: Vec<NaiveDate>,
    columns: HashMap<String, Vec<Option<f64>>>,
}

impl PriceHistory {
    pub fn column(&self, ticker: &str) -> Option<&[Option<f64>]> {
        self.columns.get(ticker).map(|column| column.as_slice())
    }
}

/// Mean vector and covariance matrix of the period returns of one combination.
#[derive(Debug, Clone)]
pub struct CombinationStats {
    pub means: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

/// The read-only pool every search phase draws from.
///
/// Securities keep the rank order they were loaded in, so index order is rank order.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    securities: Vec<Security>,
    sector_of: Vec<usize>,
    sectors: Vec<String>,
    mean_returns: DVector<f64>,
    covariance: DMatrix<f64>,
    periods: usize,
}

impl CandidatePool {
    pub fn new(securities: Vec<Security>) -> Result<Self, SelectionError> {
        if securities.is_empty() {
            return Err(SelectionError::InputData("candidate pool is empty".into()));
        }
        let periods = securities[0].returns.len();
        if periods < 2 {
            return Err(SelectionError::InputData(format!(
                "need at least 2 return periods, {} has {}",
                securities[0].ticker, periods
            )));
        }

        let mut seen = HashSet::new();
        for security in securities.iter() {
            if !seen.insert(security.ticker.as_str()) {
                return Err(SelectionError::InputData(format!(
                    "ticker {} appears more than once",
                    security.ticker
                )));
            }
            if security.returns.len() != periods {
                return Err(SelectionError::InputData(format!(
                    "return series of {} has {} periods, expected {}",
                    security.ticker,
                    security.returns.len(),
                    periods
                )));
            }
            if let Some(bad) = security.returns.iter().find(|r| !r.is_finite()) {
                return Err(SelectionError::InputData(format!(
                    "return series of {} contains a non-finite value ({})",
                    security.ticker, bad
                )));
            }
        }

        let mut sectors: Vec<String> = Vec::new();
        let sector_of = securities
            .iter()
            .map(|security| match sectors.iter().position(|s| *s == security.sector) {
                Some(idx) => idx,
                None => {
                    sectors.push(security.sector.clone());
                    sectors.len() - 1
                }
            })
            .collect();

        // periods x assets
        let n = securities.len();
        let returns = DMatrix::from_fn(periods, n, |row, col| securities[col].returns[row]);
        let mean_returns = DVector::from_iterator(
            n,
            returns.column_iter().map(|column| column.mean()),
        );
        let mut centered = returns;
        for (mut column, mean) in centered.column_iter_mut().zip(mean_returns.iter()) {
            column.add_scalar_mut(-mean);
        }
        let covariance = (centered.transpose() * &centered) / ((periods - 1) as f64);

        Ok(CandidatePool {
            securities,
            sector_of,
            sectors,
            mean_returns,
            covariance,
            periods,
        })
    }

    /// Keeps the `top_n_candidates` best scored candidates and turns their
    /// prices into aligned return series.
    pub fn assemble(
        mut candidates: Vec<RankedCandidate>,
        prices: &PriceHistory,
        config: &SelectionConfig,
    ) -> Result<Self, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::InputData("candidate list is empty".into()));
        }
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });
        candidates.truncate(config.top_n_candidates);

        let start = match config.lookback_days {
            Some(days) => prices.dates.len().saturating_sub(days + 1),
            None => 0,
        };
        if prices.dates.len() - start < 3 {
            return Err(SelectionError::InputData(format!(
                "need at least 3 price rows in the lookback window, found {}",
                prices.dates.len() - start
            )));
        }

        let securities = candidates
            .into_iter()
            .map(|candidate| {
                let column = prices.column(&candidate.ticker).ok_or_else(|| {
                    SelectionError::InputData(format!(
                        "no price history for {}",
                        candidate.ticker
                    ))
                })?;
                let window = &column[start..];
                let closes = window
                    .iter()
                    .enumerate()
                    .map(|(row, price)| match price {
                        Some(p) if *p > 0. => Ok(*p),
                        _ => Err(SelectionError::InputData(format!(
                            "missing or non-positive price for {} on {}",
                            candidate.ticker,
                            prices.dates[start + row]
                        ))),
                    })
                    .collect::<Result<Vec<f64>, _>>()?;
                let returns = closes
                    .windows(2)
                    .map(|pair| pair[1] / pair[0] - 1.)
                    .collect();
                Ok(Security {
                    ticker: candidate.ticker,
                    sector: candidate.sector,
                    score: candidate.score,
                    returns,
                })
            })
            .collect::<Result<Vec<_>, SelectionError>>()?;

        let pool = CandidatePool::new(securities)?;
        info!(
            securities = pool.len(),
            sectors = pool.sectors.len(),
            periods = pool.periods,
            "Candidate pool assembled"
        );
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.securities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.securities.is_empty()
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn security(&self, idx: usize) -> &Security {
        &self.securities[idx]
    }

    pub fn securities(&self) -> &[Security] {
        &self.securities
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Dense sector id of a security, in `0..sector_count()`.
    pub fn sector_id(&self, idx: usize) -> usize {
        self.sector_of[idx]
    }

    pub fn tickers(&self, combination: &Combination) -> Vec<String> {
        combination
            .indices()
            .iter()
            .map(|&idx| self.securities[idx].ticker.clone())
            .collect()
    }

    /// Largest combination the sector cap allows.
    pub fn max_feasible_size(&self, max_per_sector: usize) -> usize {
        let mut per_sector = vec![0usize; self.sectors.len()];
        self.sector_of.iter().for_each(|&s| per_sector[s] += 1);
        per_sector
            .into_iter()
            .map(|count| count.min(max_per_sector))
            .sum()
    }

    pub fn combination_stats(&self, combination: &Combination) -> CombinationStats {
        let indices = combination.indices();
        let k = indices.len();
        CombinationStats {
            means: DVector::from_fn(k, |i, _| self.mean_returns[indices[i]]),
            covariance: DMatrix::from_fn(k, k, |i, j| self.covariance[(indices[i], indices[j])]),
        }
    }
}

pub fn load_candidates(path: &Path) -> Result<Vec<RankedCandidate>, SelectionError> {
    read_candidates(File::open(path)?)
}

pub fn read_candidates<R: Read>(reader: R) -> Result<Vec<RankedCandidate>, SelectionError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let candidates = rdr
        .deserialize()
        .collect::<Result<Vec<RankedCandidate>, csv::Error>>()?;
    debug!(count = candidates.len(), "Read ranked candidates");
    Ok(candidates)
}

pub fn load_price_history(path: &Path) -> Result<PriceHistory, SelectionError> {
    read_price_history(File::open(path)?)
}

pub fn read_price_history<R: Read>(reader: R) -> Result<PriceHistory, SelectionError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();
    if headers.get(0).map(|h| h.eq_ignore_ascii_case("date")) != Some(true) {
        return Err(SelectionError::InputData(
            "price history must start with a `date` column".into(),
        ));
    }
    let tickers: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); tickers.len()];
    for record in rdr.records() {
        let record = record?;
        let raw_date = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
            SelectionError::InputData(format!("unparseable date `{}`: {}", raw_date, e))
        })?;
        if let Some(previous) = dates.last() {
            if date <= *previous {
                return Err(SelectionError::InputData(format!(
                    "dates must be strictly increasing, {} follows {}",
                    date, previous
                )));
            }
        }
        dates.push(date);

        for (col, column) in columns.iter_mut().enumerate() {
            let cell = record.get(col + 1).unwrap_or_default();
            column.push(cell.parse::<f64>().ok().filter(|p| p.is_finite()));
        }
    }

    Ok(PriceHistory {
        dates,
        columns: tickers.into_iter().zip(columns).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security(ticker: &str, sector: &str, returns: Vec<f64>) -> Security {
        Security {
            ticker: ticker.into(),
            sector: sector.into(),
            score: 1.,
            returns,
        }
    }

    #[test]
    fn test_pool_rejects_bad_input() {
        assert!(CandidatePool::new(vec![]).is_err(), "empty pool");
        assert!(
            CandidatePool::new(vec![
                security("A", "Tech", vec![0.01, 0.02, 0.03]),
                security("B", "Tech", vec![0.01, 0.02]),
            ])
            .is_err(),
            "misaligned series"
        );
        assert!(
            CandidatePool::new(vec![
                security("A", "Tech", vec![0.01, 0.02]),
                security("A", "Energy", vec![0.01, 0.02]),
            ])
            .is_err(),
            "duplicate ticker"
        );
    }

    #[test]
    fn test_covariance_matches_sample_statistics() {
        let pool = CandidatePool::new(vec![
            security("A", "Tech", vec![0.01, 0.03, -0.02, 0.02]),
            security("B", "Energy", vec![0.00, 0.01, 0.01, 0.02]),
        ])
        .unwrap();
        let stats = pool.combination_stats(&Combination::new(vec![0, 1]));
        assert!((stats.means[0] - 0.01).abs() < 1e-12);
        assert!((stats.means[1] - 0.01).abs() < 1e-12);
        // sample variance of A: deviations 0, .02, -.03, .01 -> 0.0014 / 3
        assert!((stats.covariance[(0, 0)] - 0.0014 / 3.).abs() < 1e-12);
        assert!((stats.covariance[(0, 1)] - stats.covariance[(1, 0)]).abs() < 1e-15);
    }

    #[test]
    fn test_max_feasible_size() {
        let pool = CandidatePool::new(vec![
            security("A", "Tech", vec![0.01, 0.02]),
            security("B", "Tech", vec![0.01, 0.02]),
            security("C", "Tech", vec![0.01, 0.02]),
            security("D", "Energy", vec![0.01, 0.02]),
        ])
        .unwrap();
        assert_eq!(pool.sector_count(), 2);
        assert_eq!(pool.max_feasible_size(1), 2);
        assert_eq!(pool.max_feasible_size(2), 3);
        assert_eq!(pool.max_feasible_size(5), 4);
    }

    #[test]
    fn test_assemble_keeps_top_ranked_and_lookback() {
        let candidates = read_candidates(
            "ticker,sector,score\nAAA,Tech,1.0\nBBB,Energy,3.0\nCCC,Health,2.0\n".as_bytes(),
        )
        .unwrap();
        let prices = read_price_history(
            "date,AAA,BBB,CCC\n\
             2024-01-01,10,20,30\n\
             2024-01-02,11,21,31\n\
             2024-01-03,12,22,32\n\
             2024-01-04,13,23,33\n"
                .as_bytes(),
        )
        .unwrap();
        let mut config = SelectionConfig::default();
        config.top_n_candidates = 2;
        config.lookback_days = Some(2);

        let pool = CandidatePool::assemble(candidates, &prices, &config).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.security(0).ticker, "BBB");
        assert_eq!(pool.security(1).ticker, "CCC");
        assert_eq!(pool.periods(), 2);
        assert!((pool.security(0).returns[0] - (22. / 21. - 1.)).abs() < 1e-12);
    }

    #[test]
    fn test_assemble_reports_missing_prices() {
        let candidates =
            read_candidates("ticker,sector,score\nAAA,Tech,1.0\nZZZ,Energy,0.5\n".as_bytes())
                .unwrap();
        let prices = read_price_history(
            "date,AAA\n2024-01-01,10\n2024-01-02,11\n2024-01-03,12\n".as_bytes(),
        )
        .unwrap();
        let err = CandidatePool::assemble(candidates, &prices, &SelectionConfig::default())
            .unwrap_err();
        assert!(matches!(err, SelectionError::InputData(_)));
        assert!(err.is_fatal());

        let candidates = read_candidates("ticker,sector,score\nAAA,Tech,1.0\n".as_bytes()).unwrap();
        let gappy = read_price_history(
            "date,AAA\n2024-01-01,10\n2024-01-02,\n2024-01-03,12\n".as_bytes(),
        )
        .unwrap();
        assert!(CandidatePool::assemble(candidates, &gappy, &SelectionConfig::default()).is_err());
    }

    #[test]
    fn test_price_history_requires_increasing_dates() {
        let result = read_price_history("date,AAA\n2024-01-02,10\n2024-01-01,11\n".as_bytes());
        assert!(result.is_err());
    }
}
