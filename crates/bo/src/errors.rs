use thiserror::Error;

/// A result type for Bayesian optimization errors
pub type Result<T> = std::result::Result<T, BoError>;

/// An error raised by the optimization loop
#[derive(Error, Debug)]
pub enum BoError {
    /// When the configuration is invalid: unknown kernel/mean/criterion
    /// name, hyperparameter count or dimension mismatch
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// When the surrogate fails
    #[error(transparent)]
    Gp(#[from] smbo_gp::GpError),
    /// When a numerical operation cannot be recovered from
    #[error("Numerical error in {0}")]
    Numerical(String),
    /// When the inner optimizer keeps proposing infeasible points
    #[error("Inner optimizer error: {0}")]
    Optimizer(String),
    /// When the objective callback fails; propagated unchanged
    #[error("Objective error: {0}")]
    Objective(String),
    /// When a restore is requested on an incompatible state
    #[error("State error: {0}")]
    State(String),
    /// When the loop is driven out of order
    #[error("Loop error: {0}")]
    Loop(String),
    /// When state serialization fails
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
