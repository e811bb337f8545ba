//!
//! vhmm: classical (EM) and variational (VB-EM) training of hidden Markov
//! models with categorical, Gaussian and Gaussian mixture emissions.
//!
#[cfg(test)]
#[macro_use]
extern crate approx;

pub mod chain;
pub mod cli;
pub mod config;
pub mod covariance;
pub mod emission;
pub mod error;
pub mod fb;
pub mod init;
pub mod kl;
pub mod linalg;
pub mod mocks;
pub mod model;
pub mod monitor;
pub mod params;
pub mod prob;
pub mod sequences;
pub mod stats;

pub use chain::{ChainModel, DirichletChain, MarkovChain};
pub use config::FitConfig;
pub use covariance::CovarianceType;
pub use error::{HmmError, Result};
pub use fb::{Algorithm, Implementation};
pub use model::{
    CategoricalHmm, FitReport, GaussianHmm, GmmHmm, Hmm, VariationalCategoricalHmm,
    VariationalGaussianHmm, VariationalGmmHmm,
};
pub use monitor::{ConvergenceMonitor, TrainState};

