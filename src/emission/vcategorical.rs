//!
//! Categorical emissions with Dirichlet posteriors
//!
use super::categorical::{accumulate_counts, CategoricalStats};
use super::{symbols, EmissionModel};
use crate::config::FitConfig;
use crate::error::{config_error, Result};
use crate::init::dirichlet_rows;
use crate::kl::{dirichlet_expected_log, kl_dirichlet};
use crate::params::{Param, ParamTable};
use crate::sequences::Sequences;
use ndarray::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

const PARAMS: [Param; 1] = [Param::Emission];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariationalCategorical {
    pub n_symbols: usize,
    /// `[K, n_symbols]`
    pub emissionprob_prior: Option<Array2<f64>>,
    /// `[K, n_symbols]`
    pub emissionprob_posterior: Option<Array2<f64>>,
    supplied: Vec<Param>,
}

impl VariationalCategorical {
    pub fn new(n_symbols: usize) -> Self {
        VariationalCategorical {
            n_symbols,
            emissionprob_prior: None,
            emissionprob_posterior: None,
            supplied: Vec::new(),
        }
    }
    pub fn with_prior(mut self, prior: Array2<f64>) -> Self {
        self.emissionprob_prior = Some(prior);
        self
    }
    pub fn with_posterior(mut self, posterior: Array2<f64>) -> Self {
        self.emissionprob_posterior = Some(posterior);
        self.supplied.push(Param::Emission);
        self
    }
    ///
    /// Posterior mean of `emissionprob`
    ///
    pub fn emissionprob(&self) -> Option<Array2<f64>> {
        self.emissionprob_posterior.as_ref().map(|p| {
            let sums = p.sum_axis(Axis(1)).insert_axis(Axis(1));
            p / &sums
        })
    }
    fn posterior(&self) -> Result<&Array2<f64>> {
        match &self.emissionprob_posterior {
            Some(p) => Ok(p),
            None => config_error("emissionprob_posterior is not set"),
        }
    }
}

impl EmissionModel for VariationalCategorical {
    type Stats = CategoricalStats;
    fn param_codes(&self) -> &'static [Param] {
        &PARAMS
    }
    fn supplied(&self) -> Vec<Param> {
        self.supplied.clone()
    }
    fn has_value(&self, param: Param) -> bool {
        param == Param::Emission && self.emissionprob_posterior.is_some()
    }
    fn initialize<R: Rng>(
        &mut self,
        seqs: &Sequences,
        n_states: usize,
        table: &ParamTable,
        rng: &mut R,
    ) -> Result<()> {
        let init = 1.0 / self.n_symbols as f64;
        if self.emissionprob_prior.is_none() {
            self.emissionprob_prior = Some(Array2::from_elem((n_states, self.n_symbols), init));
        }
        if table.needs_init(Param::Emission) {
            let draw = dirichlet_rows(n_states, self.n_symbols, init, rng)?;
            self.emissionprob_posterior =
                Some(draw * (seqs.n_samples() as f64 / n_states as f64));
        }
        Ok(())
    }
    fn check(&self, n_states: usize, _n_features: usize) -> Result<()> {
        if self.n_symbols == 0 {
            return config_error("n_symbols must be positive");
        }
        for (v, name) in [
            (&self.emissionprob_prior, "emissionprob_prior"),
            (&self.emissionprob_posterior, "emissionprob_posterior"),
        ] {
            match v {
                Some(v) if v.dim() != (n_states, self.n_symbols) => {
                    return config_error(format!(
                        "{} must have shape ({}, {}), found {:?}",
                        name,
                        n_states,
                        self.n_symbols,
                        v.dim()
                    ))
                }
                Some(v) if v.iter().any(|&a| !(a > 0.0)) => {
                    return config_error(format!("{} must be positive", name))
                }
                Some(_) => {}
                None => return config_error(format!("{} is not set", name)),
            }
        }
        Ok(())
    }
    fn check_samples(&self, x: ArrayView2<f64>) -> Result<()> {
        symbols(x, self.n_symbols).map(|_| ())
    }
    fn log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let e = match self.emissionprob() {
            Some(e) => e,
            None => return config_error("emissionprob_posterior is not set"),
        };
        let xs = symbols(x, self.n_symbols)?;
        Ok(Array2::from_shape_fn((xs.len(), e.nrows()), |(t, k)| {
            e[[k, xs[t]]].ln()
        }))
    }
    fn expected_log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let posterior = self.posterior()?;
        let mut log_e = Array2::<f64>::zeros(posterior.dim());
        for (mut row, alpha) in log_e.outer_iter_mut().zip(posterior.outer_iter()) {
            row.assign(&dirichlet_expected_log(alpha));
        }
        let xs = symbols(x, self.n_symbols)?;
        Ok(Array2::from_shape_fn((xs.len(), log_e.nrows()), |(t, k)| {
            log_e[[k, xs[t]]]
        }))
    }
    fn new_stats(&self, n_states: usize) -> CategoricalStats {
        CategoricalStats {
            obs: Array2::zeros((n_states, self.n_symbols)),
        }
    }
    fn accumulate(
        &self,
        stats: &mut CategoricalStats,
        x: ArrayView2<f64>,
        posteriors: ArrayView2<f64>,
    ) -> Result<()> {
        accumulate_counts(&mut stats.obs, x, posteriors, self.n_symbols)
    }
    fn m_step(
        &mut self,
        stats: &CategoricalStats,
        table: &ParamTable,
        _config: &FitConfig,
    ) -> Result<()> {
        if table.updated(Param::Emission) {
            if let Some(prior) = &self.emissionprob_prior {
                self.emissionprob_posterior = Some(prior + &stats.obs);
            }
        }
        Ok(())
    }
    fn kl_divergence(&self) -> Result<f64> {
        match (&self.emissionprob_posterior, &self.emissionprob_prior) {
            (Some(q), Some(p)) => Ok(q
                .outer_iter()
                .zip(p.outer_iter())
                .map(|(q, p)| kl_dirichlet(q, p))
                .sum()),
            _ => config_error("emissionprob prior/posterior is not set"),
        }
    }
}
