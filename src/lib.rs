pub mod config;
pub mod consts;
pub mod diversification;
pub mod engine;
pub mod error;
pub mod evolution;
pub mod pool;
pub mod portfolio;
pub mod progress;
pub mod recorder;
pub mod sampling;
pub mod search;
pub mod simulation;

pub use config::SelectionConfig;
pub use engine::{RunOutcome, SelectionEngine};
pub use error::SelectionError;
pub use pool::CandidatePool;
pub use progress::{CancellationToken, ProgressReporter, ProgressSnapshot, TracingReporter};
pub use recorder::ResultRecorder;
