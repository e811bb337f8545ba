//!
//! Gaussian components shared by the Gaussian and mixture emissions
//!
//! Components are addressed by a flat index: one per state for Gaussian
//! emissions, `state * n_mix + mix` for mixtures.
//!
use crate::covariance::{ComponentPrecision, CovarianceType, Covars, SecondMoment};
use crate::error::{config_error, Result};
use crate::stats::Stats;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

///
/// Sufficient statistics of every component
///
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentStats {
    /// responsibility mass `[n_comp]` (`post`, or `post_mix_sum` of mixtures)
    pub post: Array1<f64>,
    /// `sum_t r[t, c] x_t`, `[n_comp, D]`
    pub obs: Array2<f64>,
    /// `obs**2` or `obs*obs.T`
    pub second: SecondMoment,
}

impl ComponentStats {
    pub fn new(n_comp: usize, n_features: usize, covariance_type: CovarianceType) -> Self {
        ComponentStats {
            post: Array1::zeros(n_comp),
            obs: Array2::zeros((n_comp, n_features)),
            second: covariance_type.new_second_moment(n_comp, n_features),
        }
    }
    ///
    /// Add samples `x: [T, D]` with responsibilities `resp: [T, n_comp]`.
    ///
    pub fn accumulate(&mut self, x: ArrayView2<f64>, resp: ArrayView2<f64>) {
        self.post += &resp.sum_axis(Axis(0));
        self.obs += &resp.t().dot(&x);
        self.second.accumulate(x, resp);
    }
}

impl Stats for ComponentStats {
    fn merge(&mut self, other: &Self) -> Result<()> {
        if self.obs.dim() != other.obs.dim() {
            return config_error(format!(
                "cannot merge component statistics of shape {:?} and {:?}",
                self.obs.dim(),
                other.obs.dim()
            ));
        }
        self.second.merge(&other.second)?;
        self.post += &other.post;
        self.obs += &other.obs;
        Ok(())
    }
}

///
/// `log N(x_t | mean_c, precision_c)` of every sample and component, `[T, n_comp]`
///
pub fn log_densities(
    x: ArrayView2<f64>,
    means: ArrayView2<f64>,
    precisions: &[ComponentPrecision],
) -> Array2<f64> {
    let n = x.nrows();
    let n_comp = means.nrows();
    Array2::from_shape_fn((n, n_comp), |(t, c)| {
        precisions[c].log_density(x.row(t), means.row(c))
    })
}

///
/// Point estimates of every component
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponents {
    /// `[n_comp, D]`
    pub means: Array2<f64>,
    pub covars: Covars,
}

impl GaussianComponents {
    pub fn check(&self) -> Result<()> {
        let n_comp = self.covars.n_components();
        let d = self.covars.n_features;
        if self.means.dim() != (n_comp, d) {
            return config_error(format!(
                "means must have shape ({}, {}), found {:?}",
                n_comp,
                d,
                self.means.dim()
            ));
        }
        self.covars.check("covars")
    }
    pub fn log_density(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let precisions = self.covars.precisions()?;
        Ok(log_densities(x, self.means.view(), &precisions))
    }
    ///
    /// Maximum likelihood re-estimation of means and/or covariances.
    ///
    /// Components without responsibility keep their parameters.
    ///
    pub fn m_step(
        &mut self,
        stats: &ComponentStats,
        update_means: bool,
        update_covars: bool,
        min_covar: f64,
    ) -> Result<()> {
        if update_means {
            for (c, mut mean) in self.means.outer_iter_mut().enumerate() {
                if stats.post[c] > 0.0 {
                    mean.assign(&(&stats.obs.row(c) / stats.post[c]));
                }
            }
        }
        if update_covars {
            self.covars = self.covars.reestimate(
                stats.post.view(),
                stats.obs.view(),
                &stats.second,
                self.means.view(),
                min_covar,
            )?;
        }
        Ok(())
    }
}
