//!
//! Gaussian mixture emissions with Dirichlet weight posteriors and
//! Normal-Wishart component posteriors
//!
use super::components::ComponentStats;
use super::gaussian::INIT_COVAR_REG;
use super::gmm::{mixture_centers, mixture_frames, mixture_responsibilities, unflatten_means};
use super::normal_wishart::NormalWishart;
use super::vgaussian::SCALE_PRIOR;
use super::EmissionModel;
use crate::config::FitConfig;
use crate::covariance::{empirical_covariance, CovarianceType, Covars, Tying};
use crate::error::{config_error, Result};
use crate::kl::{dirichlet_expected_log, kl_dirichlet};
use crate::params::{Param, ParamTable};
use crate::sequences::Sequences;
use ndarray::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

const PARAMS: [Param; 3] = [Param::Weights, Param::Means, Param::Covars];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariationalGmm {
    pub covariance_type: CovarianceType,
    pub n_mix: usize,
    /// `[K, M]`
    pub weights_prior: Option<Array2<f64>>,
    /// `[K, M]`
    pub weights_posterior: Option<Array2<f64>>,
    /// over `K * M` components
    pub prior: Option<NormalWishart>,
    pub posterior: Option<NormalWishart>,
    supplied: Vec<Param>,
}

impl VariationalGmm {
    pub fn new(covariance_type: CovarianceType, n_mix: usize) -> Self {
        VariationalGmm {
            covariance_type,
            n_mix,
            weights_prior: None,
            weights_posterior: None,
            prior: None,
            posterior: None,
            supplied: Vec::new(),
        }
    }
    pub fn with_weights_prior(mut self, prior: Array2<f64>) -> Self {
        self.weights_prior = Some(prior);
        self
    }
    pub fn with_weights_posterior(mut self, posterior: Array2<f64>) -> Self {
        self.weights_posterior = Some(posterior);
        self.supplied.push(Param::Weights);
        self
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
    pub fn tying(&self, n_states: usize) -> Tying {
        Tying::grouped(n_states, self.n_mix)
    }
    /// posterior mean of the weights
    pub fn weights(&self) -> Option<Array2<f64>> {
        self.weights_posterior.as_ref().map(|p| {
            let sums = p.sum_axis(Axis(1)).insert_axis(Axis(1));
            p / &sums
        })
    }
    /// posterior means `[K, M, D]`
    pub fn means(&self) -> Option<Array3<f64>> {
        self.posterior
            .as_ref()
            .map(|p| unflatten_means(&p.means, self.n_mix))
    }
    /// plug-in covariances `scale / dof`
    pub fn covars(&self) -> Option<Covars> {
        self.posterior.as_ref().map(|p| p.precision.covars())
    }
    fn parts(&self) -> Result<(&Array2<f64>, &Array2<f64>, &NormalWishart, &NormalWishart)> {
        match (
            &self.weights_prior,
            &self.weights_posterior,
            &self.prior,
            &self.posterior,
        ) {
            (Some(wp), Some(wq), Some(p), Some(q)) => Ok((wp, wq, p, q)),
            _ => config_error("mixture priors/posteriors are not set"),
        }
    }
    fn expected_log_weights(&self) -> Result<Array2<f64>> {
        let (_, wq, _, _) = self.parts()?;
        let mut log_w = Array2::<f64>::zeros(wq.dim());
        for (mut row, alpha) in log_w.outer_iter_mut().zip(wq.outer_iter()) {
            row.assign(&dirichlet_expected_log(alpha));
        }
        Ok(log_w)
    }
}

impl EmissionModel for VariationalGmm {
    type Stats = ComponentStats;
    fn param_codes(&self) -> &'static [Param] {
        &PARAMS
    }
    fn supplied(&self) -> Vec<Param> {
        self.supplied.clone()
    }
    fn has_value(&self, param: Param) -> bool {
        match param {
            Param::Weights => self.weights_posterior.is_some(),
            Param::Means | Param::Covars => self.posterior.is_some(),
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
        if self.n_mix == 0 {
            return config_error("n_mix must be positive");
        }
        let x = seqs.x();
        let d = x.ncols();
        let n_mix = self.n_mix;
        if self.weights_prior.is_none() {
            self.weights_prior = Some(Array2::from_elem((n_states, n_mix), 1.0 / n_mix as f64));
        }
        if table.needs_init(Param::Weights) {
            if let Some(prior) = &self.weights_prior {
                self.weights_posterior = Some(prior * seqs.n_samples() as f64);
            }
        }
        if self.prior.is_none() {
            let center = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
            let dof = match self.covariance_type {
                CovarianceType::Tied => 2.0 * d as f64,
                _ => d as f64,
            };
            self.prior = Some(NormalWishart::default_prior(
                center.view(),
                self.covariance_type,
                self.tying(n_states),
                dof,
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
        let (centers, counts) = mixture_centers(x, n_states, n_mix, rng)?;
        let cv = empirical_covariance(x, INIT_COVAR_REG);
        let fresh = NormalWishart::initial_posterior(prior, centers, counts.view(), cv.view());
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
        if self.n_mix == 0 {
            return config_error("n_mix must be positive");
        }
        let (wp, wq, p, q) = self.parts()?;
        for (w, name) in [(wp, "weights_prior"), (wq, "weights_posterior")] {
            if w.dim() != (n_states, self.n_mix) {
                return config_error(format!(
                    "{} must have shape ({}, {}), found {:?}",
                    name,
                    n_states,
                    self.n_mix,
                    w.dim()
                ));
            }
            if w.iter().any(|&a| !(a > 0.0)) {
                return config_error(format!("{} must be positive", name));
            }
        }
        let tying = self.tying(n_states);
        for (nw, what) in [(p, "prior"), (q, "posterior")] {
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
        let (_, _, _, q) = self.parts()?;
        let log_w = match self.weights() {
            Some(w) => w.mapv(f64::ln),
            None => return config_error("weights_posterior is not set"),
        };
        let log_dens = q.plug_in().log_density(x)?;
        Ok(mixture_frames(&log_dens, log_w.view()))
    }
    fn expected_log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (_, _, _, q) = self.parts()?;
        let log_w = self.expected_log_weights()?;
        let log_dens = q.expected_log_density(x)?;
        Ok(mixture_frames(&log_dens, log_w.view()))
    }
    fn new_stats(&self, n_states: usize) -> ComponentStats {
        let d = self.posterior.as_ref().map_or(0, |p| p.means.ncols());
        ComponentStats::new(n_states * self.n_mix, d, self.covariance_type)
    }
    fn accumulate(
        &self,
        stats: &mut ComponentStats,
        x: ArrayView2<f64>,
        posteriors: ArrayView2<f64>,
    ) -> Result<()> {
        let (_, _, _, q) = self.parts()?;
        let log_w = self.expected_log_weights()?;
        let log_dens = q.expected_log_density(x)?;
        let frames = mixture_frames(&log_dens, log_w.view());
        let resp = mixture_responsibilities(&log_dens, log_w.view(), &frames, posteriors);
        stats.accumulate(x, resp.view());
        Ok(())
    }
    fn m_step(
        &mut self,
        stats: &ComponentStats,
        table: &ParamTable,
        _config: &FitConfig,
    ) -> Result<()> {
        let (wp, _, p, q) = self.parts()?;
        let weights = if table.updated(Param::Weights) {
            let mass = stats
                .post
                .view()
                .into_shape(wp.dim())
                .or_else(|e| config_error(e.to_string()))?;
            Some(wp + &mass)
        } else {
            None
        };
        let updated = NormalWishart::update(
            p,
            q,
            stats,
            table.updated(Param::Means),
            table.updated(Param::Covars),
        )?;
        if let Some(weights) = weights {
            self.weights_posterior = Some(weights);
        }
        self.posterior = Some(updated);
        Ok(())
    }
    fn kl_divergence(&self) -> Result<f64> {
        let (wp, wq, p, q) = self.parts()?;
        let kl_weights: f64 = wq
            .outer_iter()
            .zip(wp.outer_iter())
            .map(|(q, p)| kl_dirichlet(q, p))
            .sum();
        Ok(kl_weights + q.kl_divergence(p)?)
    }
}
