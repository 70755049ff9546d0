use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelectionError {
    /// Fatal: the run cannot start with this input.
    #[error("Invalid input data: {0}")]
    InputData(String),
    /// Per size: no combination of `k` securities satisfies the sector cap.
    #[error(
        "No valid combination of {k} securities exists: at most {max_feasible} can be held with {max_per_sector} per sector"
    )]
    ConstraintInfeasible {
        k: usize,
        max_feasible: usize,
        max_per_sector: usize,
    },
    #[error("Could only seed {found} unique individuals of size {k}, {required} were required")]
    PopulationSeeding {
        k: usize,
        found: usize,
        required: usize,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SelectionError {
    /// Fatal errors abort the whole run; the others are isolated to one portfolio size.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SelectionError::ConstraintInfeasible { .. } | SelectionError::PopulationSeeding { .. }
        )
    }
}
