use thiserror::Error;

/// A result type for surrogate process errors
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when modeling with a non-parametric process
#[derive(Error, Debug)]
pub enum GpError {
    /// When the correlation matrix augmented with the nugget is not
    /// positive-definite
    #[error("Correlation matrix is not positive-definite: {0}")]
    NotPositiveDefinite(String),
    /// When the rank-1 Cholesky extension keeps failing after a full refactor
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    /// When the marginal likelihood cannot be computed
    #[error("Likelihood computation error: {0}")]
    LikelihoodComputationError(String),
    /// When a value is invalid
    #[error("Value error: {0}")]
    InvalidValueError(String),
    /// When sample dimensions do not agree
    #[error("Dimension mismatch: {0}")]
    DimensionError(String),
    /// When a kernel, mean or process name is not recognized
    #[error("Unknown name: {0}")]
    UnknownName(String),
    /// When hyperparameter learning fails
    #[error("Hyperparameter learning error: {0}")]
    LearningError(String),
    /// When a `linfa` error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
