//!
//! Categorical emissions with point estimates
//!
use super::{symbols, EmissionModel};
use crate::config::FitConfig;
use crate::error::{config_error, Result};
use crate::params::{Param, ParamTable};
use crate::prob::{is_stochastic, normalize_rows};
use crate::sequences::Sequences;
use crate::stats::Stats;
use ndarray::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

const PARAMS: [Param; 1] = [Param::Emission];

///
/// Expected symbol counts per state, `[K, n_symbols]`
///
#[derive(Clone, Debug, PartialEq)]
pub struct CategoricalStats {
    pub obs: Array2<f64>,
}

impl Stats for CategoricalStats {
    fn merge(&mut self, other: &Self) -> Result<()> {
        if self.obs.dim() != other.obs.dim() {
            return config_error(format!(
                "cannot merge symbol counts of shape {:?} and {:?}",
                self.obs.dim(),
                other.obs.dim()
            ));
        }
        self.obs += &other.obs;
        Ok(())
    }
}

///
/// Add `posteriors[t, k]` to `obs[k, x_t]`.
///
pub fn accumulate_counts(
    obs: &mut Array2<f64>,
    x: ArrayView2<f64>,
    posteriors: ArrayView2<f64>,
    n_symbols: usize,
) -> Result<()> {
    let xs = symbols(x, n_symbols)?;
    for (t, &s) in xs.iter().enumerate() {
        let mut col = obs.column_mut(s);
        col += &posteriors.row(t);
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEmission {
    pub n_symbols: usize,
    /// `[K, n_symbols]`
    pub emissionprob: Option<Array2<f64>>,
    supplied: Vec<Param>,
}

impl CategoricalEmission {
    pub fn new(n_symbols: usize) -> Self {
        CategoricalEmission {
            n_symbols,
            emissionprob: None,
            supplied: Vec::new(),
        }
    }
    pub fn with_emissionprob(mut self, emissionprob: Array2<f64>) -> Self {
        self.emissionprob = Some(emissionprob);
        self.supplied.push(Param::Emission);
        self
    }
}

impl EmissionModel for CategoricalEmission {
    type Stats = CategoricalStats;
    fn param_codes(&self) -> &'static [Param] {
        &PARAMS
    }
    fn supplied(&self) -> Vec<Param> {
        self.supplied.clone()
    }
    fn has_value(&self, param: Param) -> bool {
        param == Param::Emission && self.emissionprob.is_some()
    }
    fn initialize<R: Rng>(
        &mut self,
        _seqs: &Sequences,
        n_states: usize,
        table: &ParamTable,
        rng: &mut R,
    ) -> Result<()> {
        if table.needs_init(Param::Emission) {
            let mut e = Array2::from_shape_fn((n_states, self.n_symbols), |_| rng.gen::<f64>());
            normalize_rows(&mut e);
            self.emissionprob = Some(e);
        }
        Ok(())
    }
    fn check(&self, n_states: usize, _n_features: usize) -> Result<()> {
        if self.n_symbols == 0 {
            return config_error("n_symbols must be positive");
        }
        match &self.emissionprob {
            Some(e) if e.dim() != (n_states, self.n_symbols) => config_error(format!(
                "emissionprob must have shape ({}, {}), found {:?}",
                n_states,
                self.n_symbols,
                e.dim()
            )),
            Some(e) if !e.outer_iter().all(|row| is_stochastic(row, 1e-6)) => {
                config_error("rows of emissionprob must sum to 1")
            }
            Some(_) => Ok(()),
            None => config_error("emissionprob is not set"),
        }
    }
    fn check_samples(&self, x: ArrayView2<f64>) -> Result<()> {
        symbols(x, self.n_symbols).map(|_| ())
    }
    fn log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let e = match &self.emissionprob {
            Some(e) => e,
            None => return config_error("emissionprob is not set"),
        };
        let xs = symbols(x, self.n_symbols)?;
        Ok(Array2::from_shape_fn((xs.len(), e.nrows()), |(t, k)| {
            e[[k, xs[t]]].ln()
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
            if let Some(e) = self.emissionprob.as_mut() {
                for (mut row, counts) in e.outer_iter_mut().zip(stats.obs.outer_iter()) {
                    let total = counts.sum();
                    if total > 0.0 {
                        row.assign(&(&counts / total));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn likelihood_and_counts() {
        let em = CategoricalEmission::new(3).with_emissionprob(array![
            [0.5, 0.25, 0.25],
            [0.1, 0.1, 0.8]
        ]);
        em.check(2, 1).unwrap();
        let x = array![[0.0], [2.0]];
        let ll = em.log_likelihood(x.view()).unwrap();
        assert_abs_diff_eq!(ll[[1, 1]], 0.8f64.ln(), epsilon = 1e-12);
        let mut stats = em.new_stats(2);
        em.accumulate(&mut stats, x.view(), array![[1.0, 0.0], [0.25, 0.75]].view())
            .unwrap();
        assert_eq!(stats.obs, array![[1.0, 0.0, 0.25], [0.0, 0.0, 0.75]]);
    }
    #[test]
    fn invalid_symbols() {
        let em = CategoricalEmission::new(3);
        assert!(em.check_samples(array![[3.0]].view()).unwrap_err().is_config());
        assert!(em.check_samples(array![[0.5]].view()).unwrap_err().is_config());
        assert!(em.check_samples(array![[-1.0]].view()).unwrap_err().is_config());
        assert!(em.check_samples(array![[0.0, 1.0]].view()).unwrap_err().is_config());
        assert!(em.check(2, 1).unwrap_err().is_config());
    }
}
