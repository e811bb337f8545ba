//!
//! Error types of training and scoring.
//!
use thiserror::Error;

///
/// Errors raised by the trainer and its collaborators.
///
/// Reaching the iteration cap is not an error; it is reported as
/// `TrainState::MaxIterReached`.
///
#[derive(Debug, Error)]
pub enum HmmError {
    /// Malformed parameter shapes, unknown mask letters, inconsistent lengths.
    /// Detected before the first iteration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The model/data combination cannot be evaluated with the current
    /// parameters (zero likelihood, singular covariance, zero scaling factor).
    #[error("numerical degeneracy: {0}")]
    Degenerate(String),

    /// Monitored value decreased by more than the tolerance (strict monitor only).
    #[error("monitored value regressed from {previous} to {current} (delta {delta:e})")]
    Regression {
        previous: f64,
        current: f64,
        delta: f64,
    },

    /// NaN was reported to the monitor (strict monitor only).
    #[error("monitored value is NaN at iteration {iteration}")]
    NotANumber { iteration: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HmmError {
    /// Configuration error of this kind is never retried.
    pub fn is_config(&self) -> bool {
        matches!(self, HmmError::Config(_))
    }
    /// Degeneracy can be retried with a different initialization.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, HmmError::Degenerate(_))
    }
}

pub type Result<T> = std::result::Result<T, HmmError>;

///
/// short-hand of `Err(HmmError::Config(..))`
///
pub fn config_error<T, S: Into<String>>(message: S) -> Result<T> {
    Err(HmmError::Config(message.into()))
}

///
/// short-hand of `Err(HmmError::Degenerate(..))`
///
pub fn degenerate<T, S: Into<String>>(message: S) -> Result<T> {
    Err(HmmError::Degenerate(message.into()))
}
