use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    BruteForce,
    Genetic,
    Refinement,
    NoiseTrace,
}

/// Periodic progress report for whoever is monitoring the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub k: Option<usize>,
    /// Completion of the current phase, 0 to 100.
    pub percent_complete: f64,
    pub best_sharpe: Option<f64>,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: &ProgressSnapshot);
}

/// Emits snapshots as structured log events.
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, snapshot: &ProgressSnapshot) {
        info!(
            phase = ?snapshot.phase,
            k = ?snapshot.k,
            percent = %format!("{:.1}", snapshot.percent_complete),
            best_sharpe = ?snapshot.best_sharpe,
            "Progress"
        );
    }
}

/// Cooperative stop signal, checked between combination batches and generations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
