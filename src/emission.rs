//!
//! Emission families
//!
//! The trainer only talks to an emission family through `EmissionModel`:
//! a frame log-likelihood matrix `[T, K]` for the forward-backward pass, and
//! accumulation/re-estimation of the family's sufficient statistics.
//!
//! Classical families hold point estimates; variational families hold
//! prior/posterior pairs and report `expected_log_likelihood`
//! (sub-normalized `E[log p(x | z)]`) and a KL divergence to their prior.
//!
pub mod categorical;
pub mod components;
pub mod gaussian;
pub mod gmm;
pub mod normal_wishart;
pub mod vcategorical;
pub mod vgaussian;
pub mod vgmm;

pub use categorical::CategoricalEmission;
pub use gaussian::GaussianEmission;
pub use gmm::GmmEmission;
pub use vcategorical::VariationalCategorical;
pub use vgaussian::VariationalGaussian;
pub use vgmm::VariationalGmm;

use crate::config::FitConfig;
use crate::error::Result;
use crate::params::{Param, ParamTable};
use crate::sequences::Sequences;
use crate::stats::Stats;
use ndarray::prelude::*;
use rand::Rng;

pub trait EmissionModel: Clone + Send + Sync {
    type Stats: Stats;
    ///
    /// Parameters of this family, in mask letter order
    ///
    fn param_codes(&self) -> &'static [Param];
    ///
    /// Parameters given by the caller before fitting
    ///
    fn supplied(&self) -> Vec<Param>;
    ///
    /// Parameter `param` has a value (supplied or initialized)
    ///
    fn has_value(&self, param: Param) -> bool;
    ///
    /// Fill every parameter that `table` marks as needing initialization.
    ///
    fn initialize<R: Rng>(
        &mut self,
        seqs: &Sequences,
        n_states: usize,
        table: &ParamTable,
        rng: &mut R,
    ) -> Result<()>;
    ///
    /// Validate shapes against `n_states` and `n_features`.
    ///
    fn check(&self, n_states: usize, n_features: usize) -> Result<()>;
    ///
    /// Validate that the samples can be emitted by this family.
    ///
    fn check_samples(&self, _x: ArrayView2<f64>) -> Result<()> {
        Ok(())
    }
    ///
    /// `log p(x_t | z_t = k)` with point (or plug-in) estimates, `[T, K]`
    ///
    fn log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;
    ///
    /// The frame term used by the trainer's forward-backward pass.
    ///
    /// `E[log p(x_t | z_t = k)]` under the posterior for variational families.
    ///
    fn expected_log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.log_likelihood(x)
    }
    fn new_stats(&self, n_states: usize) -> Self::Stats;
    ///
    /// Add the statistics of sequence `x` with state posteriors `posteriors: [T, K]`.
    ///
    fn accumulate(
        &self,
        stats: &mut Self::Stats,
        x: ArrayView2<f64>,
        posteriors: ArrayView2<f64>,
    ) -> Result<()>;
    ///
    /// Re-estimate the parameters marked as updated in `table`.
    ///
    fn m_step(&mut self, stats: &Self::Stats, table: &ParamTable, config: &FitConfig)
        -> Result<()>;
    ///
    /// `KL(q || p)` of all posteriors; zero for point estimates.
    ///
    fn kl_divergence(&self) -> Result<f64> {
        Ok(0.0)
    }
}

///
/// Validate `x` as a column of symbols `0..n_symbols`.
///
pub fn symbols(x: ArrayView2<f64>, n_symbols: usize) -> Result<Vec<usize>> {
    if x.ncols() != 1 {
        return crate::error::config_error(format!(
            "categorical samples must have a single column, found {}",
            x.ncols()
        ));
    }
    x.column(0)
        .iter()
        .map(|&v| {
            if v >= 0.0 && v.fract() == 0.0 && (v as usize) < n_symbols {
                Ok(v as usize)
            } else {
                crate::error::config_error(format!(
                    "symbol {} is not an integer in 0..{}",
                    v, n_symbols
                ))
            }
        })
        .collect()
}
