//!
//! Gaussian mixture emissions with point estimates
//!
//! State `k` emits from `sum_m w[k, m] N(mu[k, m], Sigma[k, m])`; component
//! `(k, m)` has flat index `k * n_mix + m`. The tied structure shares one
//! covariance among the components of each state.
//!
use super::components::{ComponentStats, GaussianComponents};
use super::gaussian::{INIT_COVAR_REG, KMEANS_INIT};
use super::EmissionModel;
use crate::config::FitConfig;
use crate::covariance::{empirical_covariance, CovarianceType, Covars, Tying};
use crate::error::{config_error, Result};
use crate::init::{kmeans, sample_normal};
use crate::params::{Param, ParamTable};
use crate::prob::{is_stochastic, logsumexp};
use crate::sequences::Sequences;
use ndarray::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

const PARAMS: [Param; 3] = [Param::Weights, Param::Means, Param::Covars];

///
/// Initial component centers `[K * M, D]` and their sample counts `[K * M]`.
///
/// Samples are clustered into states, and each state's samples into `n_mix`
/// components. A state with fewer than `n_mix` samples draws its centers
/// around the mean of the state centers, each counting as one sample.
///
pub fn mixture_centers<R: Rng>(
    x: ArrayView2<f64>,
    n_states: usize,
    n_mix: usize,
    rng: &mut R,
) -> Result<(Array2<f64>, Array1<f64>)> {
    let d = x.ncols();
    let main = kmeans(x, n_states, KMEANS_INIT, rng)?;
    let main_centroid = main
        .centers
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(d));
    let mut centers = Array2::<f64>::zeros((n_states * n_mix, d));
    let mut counts = Array1::<f64>::zeros(n_states * n_mix);
    let mut cv: Option<Array2<f64>> = None;
    for k in 0..n_states {
        let members: Vec<usize> = (0..x.nrows()).filter(|&i| main.labels[i] == k).collect();
        let block = s![k * n_mix..(k + 1) * n_mix, ..];
        if members.len() >= n_mix {
            let sub = kmeans(x.select(Axis(0), &members).view(), n_mix, KMEANS_INIT, rng)?;
            centers.slice_mut(block).assign(&sub.centers);
            for (m, c) in sub.counts().into_iter().enumerate() {
                counts[k * n_mix + m] = c as f64;
            }
        } else {
            let cov = cv.get_or_insert_with(|| empirical_covariance(x, INIT_COVAR_REG));
            let drawn = sample_normal(main_centroid.view(), cov.view(), n_mix, rng)?;
            centers.slice_mut(block).assign(&drawn);
            counts
                .slice_mut(s![k * n_mix..(k + 1) * n_mix])
                .fill(1.0);
        }
    }
    Ok((centers, counts))
}

///
/// Per-state mixture log-likelihood `[T, K]` from component log densities
/// `[T, K * M]` and log weights `[K, M]`.
///
pub fn mixture_frames(log_dens: &Array2<f64>, log_weights: ArrayView2<f64>) -> Array2<f64> {
    let (n_states, n_mix) = log_weights.dim();
    let n = log_dens.nrows();
    let mut buf = vec![0.0; n_mix];
    let mut frames = Array2::<f64>::zeros((n, n_states));
    for t in 0..n {
        for k in 0..n_states {
            for m in 0..n_mix {
                buf[m] = log_weights[[k, m]] + log_dens[[t, k * n_mix + m]];
            }
            frames[[t, k]] = logsumexp(buf.iter());
        }
    }
    frames
}

///
/// Component responsibilities `[T, K * M]`, the state posterior split among
/// its components.
///
pub fn mixture_responsibilities(
    log_dens: &Array2<f64>,
    log_weights: ArrayView2<f64>,
    frames: &Array2<f64>,
    posteriors: ArrayView2<f64>,
) -> Array2<f64> {
    let (_, n_mix) = log_weights.dim();
    Array2::from_shape_fn(log_dens.dim(), |(t, c)| {
        let k = c / n_mix;
        let m = c % n_mix;
        if posteriors[[t, k]] == 0.0 || frames[[t, k]] == f64::NEG_INFINITY {
            0.0
        } else {
            posteriors[[t, k]] * (log_weights[[k, m]] + log_dens[[t, c]] - frames[[t, k]]).exp()
        }
    })
}

///
/// `[K * M, D]` to `[K, M, D]`
///
pub fn unflatten_means(flat: &Array2<f64>, n_mix: usize) -> Array3<f64> {
    let (n_comp, d) = flat.dim();
    Array3::from_shape_fn((n_comp / n_mix, n_mix, d), |(k, m, j)| flat[[k * n_mix + m, j]])
}

///
/// `[K, M, D]` to `[K * M, D]`
///
pub fn flatten_means(means: &Array3<f64>) -> Array2<f64> {
    let (n_states, n_mix, d) = means.dim();
    Array2::from_shape_fn((n_states * n_mix, d), |(c, j)| {
        means[[c / n_mix, c % n_mix, j]]
    })
}

///
/// Normalize rows of mixture mass `post: [K * M]` into weights `[K, M]`,
/// keeping `current` rows without mass.
///
pub fn reestimate_weights(post: ArrayView1<f64>, current: &mut Array2<f64>) {
    let n_mix = current.ncols();
    for (k, mut row) in current.outer_iter_mut().enumerate() {
        let mass = post.slice(s![k * n_mix..(k + 1) * n_mix]);
        let total = mass.sum();
        if total > 0.0 {
            row.assign(&(&mass / total));
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GmmEmission {
    pub covariance_type: CovarianceType,
    pub n_mix: usize,
    /// `[K, M]`
    pub weights: Option<Array2<f64>>,
    /// `[K, M, D]`
    pub means: Option<Array3<f64>>,
    /// `K * M` components, tied per state
    pub covars: Option<Covars>,
    supplied: Vec<Param>,
}

impl GmmEmission {
    pub fn new(covariance_type: CovarianceType, n_mix: usize) -> Self {
        GmmEmission {
            covariance_type,
            n_mix,
            weights: None,
            means: None,
            covars: None,
            supplied: Vec::new(),
        }
    }
    pub fn with_weights(mut self, weights: Array2<f64>) -> Self {
        self.weights = Some(weights);
        self.supplied.push(Param::Weights);
        self
    }
    pub fn with_means(mut self, means: Array3<f64>) -> Self {
        self.means = Some(means);
        self.supplied.push(Param::Means);
        self
    }
    pub fn with_covars(mut self, covars: Covars) -> Self {
        self.covars = Some(covars);
        self.supplied.push(Param::Covars);
        self
    }
    pub fn tying(&self, n_states: usize) -> Tying {
        Tying::grouped(n_states, self.n_mix)
    }
    fn parts(&self) -> Result<(&Array2<f64>, GaussianComponents)> {
        match (&self.weights, &self.means, &self.covars) {
            (Some(w), Some(means), Some(covars)) => Ok((
                w,
                GaussianComponents {
                    means: flatten_means(means),
                    covars: covars.clone(),
                },
            )),
            _ => config_error("weights/means/covars are not set"),
        }
    }
}

impl EmissionModel for GmmEmission {
    type Stats = ComponentStats;
    fn param_codes(&self) -> &'static [Param] {
        &PARAMS
    }
    fn supplied(&self) -> Vec<Param> {
        self.supplied.clone()
    }
    fn has_value(&self, param: Param) -> bool {
        match param {
            Param::Weights => self.weights.is_some(),
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
        if self.n_mix == 0 {
            return config_error("n_mix must be positive");
        }
        if table.needs_init(Param::Weights) {
            self.weights = Some(Array2::from_elem(
                (n_states, self.n_mix),
                1.0 / self.n_mix as f64,
            ));
        }
        if table.needs_init(Param::Means) {
            let (centers, _) = mixture_centers(x, n_states, self.n_mix, rng)?;
            self.means = Some(unflatten_means(&centers, self.n_mix));
        }
        if table.needs_init(Param::Covars) {
            let cv = empirical_covariance(x, INIT_COVAR_REG);
            self.covars = Some(Covars::from_full(
                cv.view(),
                self.covariance_type,
                self.tying(n_states),
            ));
        }
        Ok(())
    }
    fn check(&self, n_states: usize, n_features: usize) -> Result<()> {
        if self.n_mix == 0 {
            return config_error("n_mix must be positive");
        }
        let (weights, comps) = self.parts()?;
        if weights.dim() != (n_states, self.n_mix) {
            return config_error(format!(
                "weights must have shape ({}, {}), found {:?}",
                n_states,
                self.n_mix,
                weights.dim()
            ));
        }
        if !weights.outer_iter().all(|row| is_stochastic(row, 1e-6)) {
            return config_error("rows of weights must sum to 1");
        }
        if let Some(means) = &self.means {
            if means.dim() != (n_states, self.n_mix, n_features) {
                return config_error(format!(
                    "means must have shape ({}, {}, {}), found {:?}",
                    n_states,
                    self.n_mix,
                    n_features,
                    means.dim()
                ));
            }
        }
        if comps.covars.covariance_type() != self.covariance_type
            || comps.covars.tying != self.tying(n_states)
            || comps.covars.n_features != n_features
        {
            return config_error(format!(
                "covars must be {} covariances of {} states with {} components",
                self.covariance_type, n_states, self.n_mix
            ));
        }
        comps.check()
    }
    fn log_likelihood(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (weights, comps) = self.parts()?;
        let log_dens = comps.log_density(x)?;
        Ok(mixture_frames(&log_dens, weights.mapv(f64::ln).view()))
    }
    fn new_stats(&self, n_states: usize) -> ComponentStats {
        let d = self.means.as_ref().map_or(0, |m| m.dim().2);
        ComponentStats::new(n_states * self.n_mix, d, self.covariance_type)
    }
    fn accumulate(
        &self,
        stats: &mut ComponentStats,
        x: ArrayView2<f64>,
        posteriors: ArrayView2<f64>,
    ) -> Result<()> {
        let (weights, comps) = self.parts()?;
        let log_weights = weights.mapv(f64::ln);
        let log_dens = comps.log_density(x)?;
        let frames = mixture_frames(&log_dens, log_weights.view());
        let resp = mixture_responsibilities(&log_dens, log_weights.view(), &frames, posteriors);
        stats.accumulate(x, resp.view());
        Ok(())
    }
    fn m_step(
        &mut self,
        stats: &ComponentStats,
        table: &ParamTable,
        config: &FitConfig,
    ) -> Result<()> {
        let (_, mut comps) = self.parts()?;
        if table.updated(Param::Weights) {
            if let Some(weights) = self.weights.as_mut() {
                reestimate_weights(stats.post.view(), weights);
            }
        }
        comps.m_step(
            stats,
            table.updated(Param::Means),
            table.updated(Param::Covars),
            config.min_covar,
        )?;
        self.means = Some(unflatten_means(&comps.means, self.n_mix));
        self.covars = Some(comps.covars);
        Ok(())
    }
}
