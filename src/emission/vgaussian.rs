//!
//! Gaussian emissions with Normal-Wishart posteriors, one component per state
//!
use super::components::ComponentStats;
use super::gaussian::{INIT_COVAR_REG, KMEANS_INIT};
use super::normal_wishart::NormalWishart;
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

/// scale of the default identity-shaped prior
pub const SCALE_PRIOR: f64 = 1e-3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariationalGaussian {
    pub covariance_type: CovarianceType,
    pub prior: Option<NormalWishart>,
    pub posterior: Option<NormalWishart>,
    supplied: Vec<Param>,
}

impl VariationalGaussian {
    pub fn new(covariance_type: CovarianceType) -> Self {
        VariationalGaussian {
            covariance_type,
            prior: None,
            posterior: None,
            supplied: Vec::new(),
        }
    }
    pub fn with_prior(mut self, prior: NormalWishart) -> Self {
        self.prior = Some(prior);
        self
    }
    pub fn with_posterior(mut self, posterior: NormalWishart) -> Self {
        self.posterior = Some(posterior);
        self.supplied.push(Param::Means);
        self.supplied.push(Param::Covars);
        self
    }
    /// posterior means
    pub fn means(&self) -> Option<&Array2<f64>> {
        self.posterior.as_ref().map(|p| &p.means)
    }
    /// plug-in covariances `scale / dof`
    pub fn covars(&self) -> Option<Covars> {
        self.posterior.as_ref().map(|p| p.precision.covars())
    }
    fn pair(&self) -> Result<(&NormalWishart, &NormalWishart)> {
        match (&self.prior, &self.posterior) {
            (Some(p), Some(q)) => Ok((p, q)),
            _ => config_error("Normal-Wishart prior/posterior is not set"),
        }
    }
}

impl EmissionModel for VariationalGaussian {
    type Stats = ComponentStats;
    fn param_codes(&self) -> &'static [Param] {
        &PARAMS
    }
    fn supplied(&self) -> Vec<Param> {
        self.supplied.clone()
    }
    fn has_value(&self, param: Param) -> bool {
        matches!(param, Param::Means | Param::Covars) && self.posterior.is_some()
    }
    fn initialize<R: Rng>(
        &mut self,
        seqs: &Sequences,
        n_states: usize,
        table: &ParamTable,
        rng: &mut R,
    ) -> Result<()> {
        let x = seqs.x();
        let d = x.ncols();
        let tying = Tying::global(n_states);
        if self.prior.is_none() {
            let center = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
            self.prior = Some(NormalWishart::default_prior(
                center.view(),
                self.covariance_type,
                tying,
                d as f64,
                SCALE_PRIOR,
            ));
        }
        let init_means = table.needs_init(Param::Means);
        let init_covars = table.needs_init(Param::Covars);
        if !(init_means || init_covars) {
            return Ok(());
        }
        let prior = match &self.prior {
            Some(prior) => prior,
            None => return config_error("Normal-Wishart prior is not set"),
        };
        let km = kmeans(x, n_states, KMEANS_INIT, rng)?;
        let counts: Array1<f64> = km.counts().into_iter().map(|c| c as f64).collect();
        let cv = empirical_covariance(x, INIT_COVAR_REG);
        let fresh = NormalWishart::initial_posterior(prior, km.centers, counts.view(), cv.view());
        let posterior = match self.posterior.take() {
            Some(mut current) => {
                if init_means {
                    current.means = fresh.means;
                    current.beta = fresh.beta;
                }
                if init_covars {
                    current.precision = fresh.precision;
                }
                current
            }
            None => fresh,
        };
        self.posterior = Some(posterior);
        Ok(())
    }
    fn check(&self, n_states: usize, n_features: usize) -> Result<()> {
        let (prior, posterior) = self.pair()?;
        let tying = Tying::global(n_states);
        for (nw, what) in [(prior, "prior"), (posterior, "posterior")] {
            if nw.precision.scale.covariance_type() != self.covariance_type {
                return config_error(format!(
                    "{} is {} but the model is {}",
                    what,
                    nw.precision.scale.covariance_type(),
                    self.covariance_type
                ));
            }
            nw.check(tying, n_features, what)?;
        }
        Ok(())
    }
    fn log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (_, posterior) = self.pair()?;
        posterior.plug_in().log_density(x)
    }
    fn expected_log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (_, posterior) = self.pair()?;
        posterior.expected_log_density(x)
    }
    fn new_stats(&self, n_states: usize) -> ComponentStats {
        let d = self.posterior.as_ref().map_or(0, |p| p.means.ncols());
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
        _config: &FitConfig,
    ) -> Result<()> {
        let (prior, posterior) = self.pair()?;
        let updated = NormalWishart::update(
            prior,
            posterior,
            stats,
            table.updated(Param::Means),
            table.updated(Param::Covars),
        )?;
        self.posterior = Some(updated);
        Ok(())
    }
    fn kl_divergence(&self) -> Result<f64> {
        let (prior, posterior) = self.pair()?;
        posterior.kl_divergence(prior)
    }
}
