//!
//! Convergence Monitor
//!
//! Holds the history of the monitored value (total log-likelihood, or the
//! lower bound of a variational run) and decides when to stop.
//!
use crate::error::{HmmError, Result};
use serde::{Deserialize, Serialize};

///
/// Lifecycle of a training run.
///
/// `MaxIterReached` and `Cancelled` are terminal but are not convergence.
/// `Failed` is entered when an iteration returns an error; the parameters
/// are then those left by the failing iteration.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainState {
    Uninitialized,
    Initialized,
    Iterating,
    Converged,
    MaxIterReached,
    Cancelled,
    Failed,
}

impl TrainState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainState::Converged
                | TrainState::MaxIterReached
                | TrainState::Cancelled
                | TrainState::Failed
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceMonitor {
    pub tol: f64,
    pub n_iter: usize,
    pub strict: bool,
    history: Vec<f64>,
}

impl ConvergenceMonitor {
    pub fn new(tol: f64, n_iter: usize, strict: bool) -> Self {
        ConvergenceMonitor {
            tol,
            n_iter,
            strict,
            history: Vec::new(),
        }
    }
    pub fn history(&self) -> &[f64] {
        &self.history
    }
    pub fn iter(&self) -> usize {
        self.history.len()
    }
    pub fn last(&self) -> Option<f64> {
        self.history.last().copied()
    }
    ///
    /// Gain of the last iteration, `history[-1] - history[-2]`
    ///
    pub fn delta(&self) -> Option<f64> {
        match self.history.as_slice() {
            [.., a, b] => Some(b - a),
            _ => None,
        }
    }
    ///
    /// Append the value of the latest iteration.
    ///
    /// In strict mode a NaN or a decrease larger than `tol` is an error and
    /// the value is not recorded.
    ///
    pub fn push(&mut self, value: f64) -> Result<()> {
        if value.is_nan() && self.strict {
            return Err(HmmError::NotANumber {
                iteration: self.history.len(),
            });
        }
        if let Some(&previous) = self.history.last() {
            let delta = value - previous;
            if delta < -self.tol && self.strict {
                return Err(HmmError::Regression {
                    previous,
                    current: value,
                    delta,
                });
            }
        }
        self.history.push(value);
        Ok(())
    }
    ///
    /// The gain is within `[-tol, tol)`.
    ///
    /// A regression larger than `tol` never counts as convergence.
    ///
    pub fn converged(&self) -> bool {
        match self.delta() {
            Some(delta) => -self.tol <= delta && delta < self.tol,
            None => false,
        }
    }
    ///
    /// The last pushed value decreased by more than `tol`.
    ///
    pub fn regressed(&self) -> bool {
        self.delta().map_or(false, |delta| delta < -self.tol)
    }
    pub fn exhausted(&self) -> bool {
        self.history.len() >= self.n_iter
    }
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
