pub mod aggregator;
pub mod combination_evolution;

pub use combination_evolution::{GeneticAlgorithmSearch, Individual};
