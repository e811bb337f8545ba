//!
//! Gaussian emissions with point estimates, one component per state
//!
use super::components::{ComponentStats, GaussianComponents};
use super::EmissionModel;
use crate::config::FitConfig;
use crate::covariance::{empirical_covariance, CovarianceType, Covars, Tying};
use crate::error::{config_error, Result};
use crate::init::kmeans;
use crate::params::{Param, ParamTable};
use crate::sequences::Sequences;
use ndarray::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

const PARAMS: [Param; 2] = [Param::Means, Param::Covars];

/// k-means restarts used by initialization
pub const KMEANS_INIT: usize = 10;

/// regularization of the empirical covariance used by initialization
pub const INIT_COVAR_REG: f64 = 1e-3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianEmission {
    pub covariance_type: CovarianceType,
    /// `[K, D]`
    pub means: Option<Array2<f64>>,
    pub covars: Option<Covars>,
    supplied: Vec<Param>,
}

impl GaussianEmission {
    pub fn new(covariance_type: CovarianceType) -> Self {
        GaussianEmission {
            covariance_type,
            means: None,
            covars: None,
            supplied: Vec::new(),
        }
    }
    pub fn with_means(mut self, means: Array2<f64>) -> Self {
        self.means = Some(means);
        self.supplied.push(Param::Means);
        self
    }
    pub fn with_covars(mut self, covars: Covars) -> Self {
        self.covars = Some(covars);
        self.supplied.push(Param::Covars);
        self
    }
    fn components(&self) -> Result<GaussianComponents> {
        match (&self.means, &self.covars) {
            (Some(means), Some(covars)) => Ok(GaussianComponents {
                means: means.clone(),
                covars: covars.clone(),
            }),
            _ => config_error("means/covars are not set"),
        }
    }
}

impl EmissionModel for GaussianEmission {
    type Stats = ComponentStats;
    fn param_codes(&self) -> &'static [Param] {
        &PARAMS
    }
    fn supplied(&self) -> Vec<Param> {
        self.supplied.clone()
    }
    fn has_value(&self, param: Param) -> bool {
        match param {
            Param::Means => self.means.is_some(),
            Param::Covars => self.covars.is_some(),
            _ => false,
        }
    }
    fn initialize<R: Rng>(
        &mut self,
        seqs: &Sequences,
        n_states: usize,
        table: &ParamTable,
        rng: &mut R,
    ) -> Result<()> {
        let x = seqs.x();
        if table.needs_init(Param::Means) {
            self.means = Some(kmeans(x, n_states, KMEANS_INIT, rng)?.centers);
        }
        if table.needs_init(Param::Covars) {
            let cv = empirical_covariance(x, INIT_COVAR_REG);
            self.covars = Some(Covars::from_full(
                cv.view(),
                self.covariance_type,
                Tying::global(n_states),
            ));
        }
        Ok(())
    }
    fn check(&self, n_states: usize, n_features: usize) -> Result<()> {
        let comps = self.components()?;
        if comps.covars.covariance_type() != self.covariance_type {
            return config_error(format!(
                "covars are {} but the model is {}",
                comps.covars.covariance_type(),
                self.covariance_type
            ));
        }
        if comps.covars.tying != Tying::global(n_states) || comps.covars.n_features != n_features
        {
            return config_error(format!(
                "covars must describe {} states of {} features",
                n_states, n_features
            ));
        }
        comps.check()
    }
    fn log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.components()?.log_density(x)
    }
    fn new_stats(&self, n_states: usize) -> ComponentStats {
        let d = self.means.as_ref().map_or(0, |m| m.ncols());
        ComponentStats::new(n_states, d, self.covariance_type)
    }
    fn accumulate(
        &self,
        stats: &mut ComponentStats,
        x: ArrayView2<f64>,
        posteriors: ArrayView2<f64>,
    ) -> Result<()> {
        stats.accumulate(x, posteriors);
        Ok(())
    }
    fn m_step(
        &mut self,
        stats: &ComponentStats,
        table: &ParamTable,
        config: &FitConfig,
    ) -> Result<()> {
        let mut comps = self.components()?;
        comps.m_step(
            stats,
            table.updated(Param::Means),
            table.updated(Param::Covars),
            config.min_covar,
        )?;
        self.means = Some(comps.means);
        self.covars = Some(comps.covars);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn initialize_from_data() {
        let x = array![[0.0, 0.0], [0.1, 0.2], [5.0, 5.0], [5.1, 4.9]];
        let seqs = Sequences::new(x.view(), None).unwrap();
        let mut em = GaussianEmission::new(CovarianceType::Diag);
        let table = ParamTable::new(&PARAMS, &em.supplied(), "mc", "mc").unwrap();
        em.initialize(&seqs, 2, &table, &mut Xoshiro256PlusPlus::seed_from_u64(0))
            .unwrap();
        em.check(2, 2).unwrap();
        let means = em.means.clone().unwrap();
        assert!((means[[0, 0]] - means[[1, 0]]).abs() > 4.0);
        assert_eq!(em.covars.as_ref().unwrap().shape(), vec![2, 2]);
        assert!(em.check(3, 2).unwrap_err().is_config());
    }
    #[test]
    fn wrong_covariance_layout() {
        let covars = Covars::from_full(
            Array2::<f64>::eye(2).view(),
            CovarianceType::Full,
            Tying::global(2),
        );
        let em = GaussianEmission::new(CovarianceType::Diag)
            .with_means(Array2::zeros((2, 2)))
            .with_covars(covars);
        assert!(em.check(2, 2).unwrap_err().is_config());
    }
}
