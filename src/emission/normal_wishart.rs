//!
//! Normal-Wishart posteriors of Gaussian components
//!
//! Each component has a mean `m`, a mean precision scale `beta` and a
//! precision distribution (`ScaleParams`):
//!
//! ```text
//! q(mu, L) = N(mu | m, (beta L)^{-1}) q(L)
//! ```
//!
use super::components::{log_densities, ComponentStats, GaussianComponents};
use crate::covariance::wishart::ScaleParams;
use crate::covariance::{CovarianceType, Covars, Tying};
use crate::error::{config_error, Result};
use crate::kl::kl_normal_shared_precision;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalWishart {
    /// `[n_comp, D]`
    pub means: Array2<f64>,
    /// `[n_comp]`
    pub beta: Array1<f64>,
    pub precision: ScaleParams,
}

impl NormalWishart {
    ///
    /// Broad prior centered at `center`: `beta = 1`, identity-shaped scale of
    /// `scale` and `dof` degrees of freedom per precision unit.
    ///
    pub fn default_prior(
        center: ArrayView1<f64>,
        covariance_type: CovarianceType,
        tying: Tying,
        dof: f64,
        scale: f64,
    ) -> NormalWishart {
        let n = tying.n_components;
        let d = center.len();
        let means = Array2::from_shape_fn((n, d), |(_, j)| center[j]);
        let unit = Array2::<f64>::eye(d) * scale;
        let scale = Covars::from_full(unit.view(), covariance_type, tying);
        let n_units = match covariance_type {
            CovarianceType::Tied => tying.n_groups(),
            _ => n,
        };
        NormalWishart {
            means,
            beta: Array1::ones(n),
            precision: ScaleParams::new(Array1::from_elem(n_units, dof), scale),
        }
    }
    ///
    /// Posterior after observing `counts` points around `centers`, with
    /// plug-in covariance `cv` for every component.
    ///
    pub fn initial_posterior(
        prior: &NormalWishart,
        centers: Array2<f64>,
        counts: ArrayView1<f64>,
        cv: ArrayView2<f64>,
    ) -> NormalWishart {
        let tying = prior.precision.tying();
        let covariance_type = prior.precision.scale.covariance_type();
        let mut dof = prior.precision.dof.clone();
        for (c, &n) in counts.iter().enumerate() {
            dof[prior.precision.unit(c)] += n;
        }
        let covars = Covars::from_full(cv, covariance_type, tying);
        NormalWishart {
            means: centers,
            beta: &prior.beta + &counts,
            precision: ScaleParams::from_covars(&covars, dof),
        }
    }
    pub fn n_components(&self) -> usize {
        self.beta.len()
    }
    pub fn check(&self, tying: Tying, n_features: usize, what: &str) -> Result<()> {
        let n = tying.n_components;
        if self.means.dim() != (n, n_features) {
            return config_error(format!(
                "{} means must have shape ({}, {}), found {:?}",
                what,
                n,
                n_features,
                self.means.dim()
            ));
        }
        if self.beta.len() != n || self.beta.iter().any(|&b| !(b > 0.0)) {
            return config_error(format!("{} beta must be {} positive values", what, n));
        }
        if self.precision.tying() != tying || self.precision.n_features() != n_features {
            return config_error(format!(
                "{} precision does not match {} components of {} features",
                what, n, n_features
            ));
        }
        self.precision.check(what)
    }
    ///
    /// `E[log N(x_t | mu_c, L_c)]` of every sample and component, `[T, n_comp]`
    ///
    pub fn expected_log_density(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let precisions = self.precision.expected_precisions(self.beta.view())?;
        Ok(log_densities(x, self.means.view(), &precisions))
    }
    ///
    /// Point estimates `(m, B / dof)`
    ///
    pub fn plug_in(&self) -> GaussianComponents {
        GaussianComponents {
            means: self.means.clone(),
            covars: self.precision.covars(),
        }
    }
    ///
    /// Conjugate update from the prior with statistics `stats`.
    ///
    /// ```text
    /// beta = beta0 + N
    /// m = (beta0 m0 + sum r x) / beta
    /// ```
    ///
    /// Parts not updated are taken from `current`.
    ///
    pub fn update(
        prior: &NormalWishart,
        current: &NormalWishart,
        stats: &ComponentStats,
        update_means: bool,
        update_precision: bool,
    ) -> Result<NormalWishart> {
        let (beta, means) = if update_means {
            let beta = &prior.beta + &stats.post;
            let weighted = &prior.means * &prior.beta.view().insert_axis(Axis(1)) + &stats.obs;
            let means = weighted / &beta.view().insert_axis(Axis(1));
            (beta, means)
        } else {
            (current.beta.clone(), current.means.clone())
        };
        let precision = if update_precision {
            ScaleParams::update(
                &prior.precision,
                stats.post.view(),
                &stats.second,
                prior.beta.view(),
                prior.means.view(),
                beta.view(),
                means.view(),
            )?
        } else {
            current.precision.clone()
        };
        Ok(NormalWishart {
            means,
            beta,
            precision,
        })
    }
    ///
    /// `KL(q || p)` of the means (averaged over the precision) and of the
    /// precisions.
    ///
    pub fn kl_divergence(&self, prior: &NormalWishart) -> Result<f64> {
        let d = self.precision.n_features();
        let precisions = self.precision.expected_precisions(self.beta.view())?;
        let mut kl = 0.0;
        for c in 0..self.n_components() {
            let diff = &self.means.row(c) - &prior.means.row(c);
            let mahalanobis = precisions[c].precision.mahalanobis(diff.view());
            kl += kl_normal_shared_precision(self.beta[c], prior.beta[c], mahalanobis, d);
        }
        Ok(kl + self.precision.kl_divergence(&prior.precision)?)
    }
}
