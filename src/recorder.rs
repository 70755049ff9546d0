use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::{OutputConfig, SelectionConfig};
use crate::error::SelectionError;
use crate::pool::CandidatePool;
use crate::portfolio::{final_value, ScoredCombination};
use crate::search::{GenerationStats, NoisePoint, SearchMethod, SizeOutcome, Termination};

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// A scored combination in the form it is persisted and reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioRecord {
    pub k: usize,
    pub tickers: Vec<String>,
    pub weights: Vec<f64>,
    pub sharpe_ratio: Option<f64>,
    pub annual_return: Option<f64>,
    pub annual_volatility: Option<f64>,
    pub final_value: Option<f64>,
    pub simulations: usize,
}

impl PortfolioRecord {
    pub fn from_scored(
        pool: &CandidatePool,
        config: &SelectionConfig,
        scored: &ScoredCombination,
    ) -> Self {
        let best = scored.score.best();
        let annual_return = best.map(|b| b.annual_return).and_then(finite);
        PortfolioRecord {
            k: scored.combination.len(),
            tickers: pool.tickers(&scored.combination),
            weights: best.map_or_else(Vec::new, |b| b.weights.as_slice().to_vec()),
            sharpe_ratio: finite(scored.best_sharpe()),
            annual_return,
            annual_volatility: best.map(|b| b.annual_volatility).and_then(finite),
            final_value: annual_return
                .map(|r| {
                    final_value(
                        config.initial_investment,
                        r,
                        config.investment_horizon_years,
                    )
                })
                .and_then(finite),
            simulations: scored.score.simulations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeRecord {
    pub k: usize,
    pub method: SearchMethod,
    pub termination: Termination,
    pub best: Option<PortfolioRecord>,
    pub total_combinations: u64,
    pub skipped_invalid: u64,
    pub evaluated: u64,
    pub discarded: u64,
    pub population_size: Option<usize>,
    pub generations_run: Option<usize>,
    pub fitness_history: Vec<GenerationStats>,
    pub skip_reason: Option<String>,
    pub duration_ms: u64,
}

impl SizeRecord {
    pub fn from_outcome(pool: &CandidatePool, config: &SelectionConfig, outcome: &SizeOutcome) -> Self {
        SizeRecord {
            k: outcome.k,
            method: outcome.method,
            termination: outcome.termination,
            best: outcome
                .best
                .as_ref()
                .map(|best| PortfolioRecord::from_scored(pool, config, best)),
            total_combinations: outcome.total_combinations,
            skipped_invalid: outcome.skipped_invalid,
            evaluated: outcome.evaluated,
            discarded: outcome.discarded,
            population_size: outcome.population_size,
            generations_run: outcome.generations_run,
            fitness_history: outcome.fitness_history.clone(),
            skip_reason: outcome.skip_reason.clone(),
            duration_ms: outcome.duration.as_millis() as u64,
        }
    }
}

/// Everything one run produced, written as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub seed: u64,
    pub candidates: Vec<String>,
    pub config: SelectionConfig,
    pub recommended: Option<PortfolioRecord>,
    pub sizes: Vec<SizeRecord>,
    pub refined: Vec<PortfolioRecord>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoiseTraceRow {
    pub run_id: Uuid,
    pub k: usize,
    pub simulations: usize,
    pub repeats: usize,
    pub mean_sharpe: f64,
    pub std_sharpe: f64,
}

impl NoiseTraceRow {
    pub fn new(run_id: Uuid, point: &NoisePoint) -> Self {
        NoiseTraceRow {
            run_id,
            k: point.k,
            simulations: point.simulations,
            repeats: point.repeats,
            mean_sharpe: point.mean_sharpe,
            std_sharpe: point.std_sharpe,
        }
    }
}

/// Appends run history and noise traces to their log files.
#[derive(Debug, Clone)]
pub struct ResultRecorder {
    results_log: PathBuf,
    noise_log: PathBuf,
}

fn ensure_parent(path: &Path) -> Result<(), SelectionError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

fn open_append(path: &Path) -> Result<File, SelectionError> {
    ensure_parent(path)?;
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

impl ResultRecorder {
    pub fn new(output: &OutputConfig) -> Self {
        ResultRecorder {
            results_log: output.results_log.clone(),
            noise_log: output.noise_log.clone(),
        }
    }

    pub fn append_run(&self, record: &RunRecord) -> Result<(), SelectionError> {
        let mut file = open_append(&self.results_log)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        info!(run_id = %record.run_id, path = %self.results_log.display(), "Run recorded");
        Ok(())
    }

    pub fn append_noise_trace(&self, rows: &[NoiseTraceRow]) -> Result<(), SelectionError> {
        if rows.is_empty() {
            return Ok(());
        }
        let is_new = fs::metadata(&self.noise_log).map_or(true, |meta| meta.len() == 0);
        let file = open_append(&self.noise_log)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads back every run recorded so far, oldest first.
    pub fn load_history(&self) -> Result<Vec<RunRecord>, SelectionError> {
        if !self.results_log.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.results_log)?);
        let mut runs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            runs.push(serde_json::from_str(&line)?);
        }
        Ok(runs)
    }

    pub fn load_noise_trace(&self) -> Result<Vec<NoiseTraceRow>, SelectionError> {
        if !self.noise_log.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.noise_log)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<NoiseTraceRow>, csv::Error>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seed: u64) -> RunRecord {
        RunRecord {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            seed,
            candidates: vec!["AAA".into(), "BBB".into()],
            config: SelectionConfig::default(),
            recommended: Some(PortfolioRecord {
                k: 2,
                tickers: vec!["AAA".into(), "BBB".into()],
                weights: vec![0.4, 0.6],
                sharpe_ratio: Some(1.2),
                annual_return: Some(0.15),
                annual_volatility: Some(0.11),
                final_value: Some(11_500.),
                simulations: 1_000,
            }),
            sizes: Vec::new(),
            refined: Vec::new(),
            duration_ms: 12,
            cancelled: false,
        }
    }

    fn recorder(dir: &Path) -> ResultRecorder {
        ResultRecorder::new(&OutputConfig {
            results_log: dir.join("nested").join("runs.jsonl"),
            noise_log: dir.join("nested").join("noise.csv"),
        })
    }

    #[test]
    fn test_runs_are_appended_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        recorder.append_run(&record(1)).unwrap();
        recorder.append_run(&record(2)).unwrap();

        let history = recorder.load_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].seed, 1);
        assert_eq!(history[1].seed, 2);
        assert_eq!(history[0].recommended.as_ref().unwrap().final_value, Some(11_500.));
    }

    #[test]
    fn test_noise_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        let run_id = Uuid::new_v4();
        let point = NoisePoint {
            k: 3,
            simulations: 100,
            repeats: 10,
            mean_sharpe: 0.9,
            std_sharpe: 0.05,
        };
        let rows = vec![NoiseTraceRow::new(run_id, &point)];
        recorder.append_noise_trace(&rows).unwrap();
        recorder.append_noise_trace(&rows).unwrap();

        let content = fs::read_to_string(dir.path().join("nested").join("noise.csv")).unwrap();
        assert_eq!(content.matches("run_id,k,simulations").count(), 1);
        assert_eq!(recorder.load_noise_trace().unwrap().len(), 2);
    }

    #[test]
    fn test_non_finite_sharpe_is_null() {
        assert_eq!(finite(f64::NEG_INFINITY), None);
        let mut run = record(3);
        run.recommended.as_mut().unwrap().sharpe_ratio = finite(f64::NAN);
        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"sharpe_ratio\":null"));
    }
}
