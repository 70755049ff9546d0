pub mod adaptive;
pub mod evaluator;

pub use adaptive::{AdaptiveOutcome, AdaptiveSimulationController, SimulationState};
pub use evaluator::{CombinationScore, SimulationEvaluator};
