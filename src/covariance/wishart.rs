//!
//! Conjugate priors/posteriors of component precisions
//!
//! `ScaleParams` pairs degrees of freedom with inverse scale matrices `B`
//! stored in the same four layouts as `Covars`:
//!
//! * full / tied: Wishart `W(dof, B)` per component / per tied group
//! * diag: independent `Gamma(dof/2, B_d/2)` per feature
//! * spherical: one `Gamma(D dof/2, D B/2)` per component
//!
//! In every layout `E[precision] = dof / B`, so `B / dof` is the plug-in
//! covariance.
//!
use super::{ComponentPrecision, CovarLayout, Covars, Precision, SecondMoment, Tying};
use crate::error::{config_error, degenerate, Result};
use crate::kl::{gamma_expected_log, kl_gamma, kl_wishart, wishart_expected_log_det};
use crate::linalg::{outer, spd_factor};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    /// `[n_comp]`, or `[n_groups]` for tied
    pub dof: Array1<f64>,
    /// inverse scale in the covariance layout
    pub scale: Covars,
}

impl ScaleParams {
    pub fn new(dof: Array1<f64>, scale: Covars) -> Self {
        ScaleParams { dof, scale }
    }
    ///
    /// Scale chosen so that the plug-in covariance equals `covars`.
    ///
    pub fn from_covars(covars: &Covars, dof: Array1<f64>) -> Self {
        let scale = match &covars.layout {
            CovarLayout::Spherical(v) => CovarLayout::Spherical(v * &dof),
            CovarLayout::Diag(v) => CovarLayout::Diag(v * &dof.view().insert_axis(Axis(1))),
            CovarLayout::Full(v) => {
                CovarLayout::Full(v * &dof.view().insert_axis(Axis(1)).insert_axis(Axis(2)))
            }
            CovarLayout::Tied(v) => {
                CovarLayout::Tied(v * &dof.view().insert_axis(Axis(1)).insert_axis(Axis(2)))
            }
        };
        ScaleParams::new(dof, Covars::new(covars.n_features, covars.tying, scale))
    }
    pub fn n_features(&self) -> usize {
        self.scale.n_features
    }
    pub fn tying(&self) -> Tying {
        self.scale.tying
    }
    ///
    /// index into `dof` of the component `c`
    ///
    pub fn unit(&self, c: usize) -> usize {
        match self.scale.layout {
            CovarLayout::Tied(_) => self.tying().group(c),
            _ => c,
        }
    }
    pub fn n_units(&self) -> usize {
        match self.scale.layout {
            CovarLayout::Tied(_) => self.tying().n_groups(),
            _ => self.tying().n_components,
        }
    }
    ///
    /// Check shapes and positivity. Wishart dofs must exceed `D - 1`.
    ///
    pub fn check(&self, what: &str) -> Result<()> {
        if self.dof.len() != self.n_units() {
            return config_error(format!(
                "{} dof must have length {}, found {}",
                what,
                self.n_units(),
                self.dof.len()
            ));
        }
        let min_dof = match self.scale.layout {
            CovarLayout::Full(_) | CovarLayout::Tied(_) => self.n_features() as f64 - 1.0,
            _ => 0.0,
        };
        if self.dof.iter().any(|&v| !(v > min_dof)) {
            return config_error(format!("{} dof must be greater than {}", what, min_dof));
        }
        self.scale.check(what)
    }
    ///
    /// Plug-in covariance `B / dof`
    ///
    pub fn covars(&self) -> Covars {
        let dof = &self.dof;
        let layout = match &self.scale.layout {
            CovarLayout::Spherical(b) => CovarLayout::Spherical(b / dof),
            CovarLayout::Diag(b) => CovarLayout::Diag(b / &dof.view().insert_axis(Axis(1))),
            CovarLayout::Full(b) => {
                CovarLayout::Full(b / &dof.view().insert_axis(Axis(1)).insert_axis(Axis(2)))
            }
            CovarLayout::Tied(b) => {
                CovarLayout::Tied(b / &dof.view().insert_axis(Axis(1)).insert_axis(Axis(2)))
            }
        };
        Covars::new(self.n_features(), self.tying(), layout)
    }
    ///
    /// `E[log|L|]` and `E[L]` of every component, with `extra = D / beta_c`.
    ///
    pub fn expected_precisions(&self, beta: ArrayView1<f64>) -> Result<Vec<ComponentPrecision>> {
        let n = self.tying().n_components;
        let d = self.n_features();
        let df = d as f64;
        let units: Vec<(f64, Precision)> = match &self.scale.layout {
            CovarLayout::Spherical(b) => b
                .iter()
                .zip(self.dof.iter())
                .map(|(&b, &dof)| {
                    if !(b > 0.0) {
                        return degenerate("non-positive spherical scale");
                    }
                    let e = gamma_expected_log(df * dof / 2.0, df * b / 2.0);
                    Ok((df * e, Precision::Scalar(dof / b)))
                })
                .collect::<Result<_>>()?,
            CovarLayout::Diag(b) => b
                .outer_iter()
                .zip(self.dof.iter())
                .map(|(b, &dof)| {
                    if b.iter().any(|&x| !(x > 0.0)) {
                        return degenerate("non-positive diagonal scale");
                    }
                    let e: f64 = b
                        .iter()
                        .map(|&bd| gamma_expected_log(dof / 2.0, bd / 2.0))
                        .sum();
                    Ok((e, Precision::Diag(b.mapv(|bd| dof / bd))))
                })
                .collect::<Result<_>>()?,
            CovarLayout::Full(b) | CovarLayout::Tied(b) => b
                .outer_iter()
                .zip(self.dof.iter())
                .map(|(b, &dof)| {
                    let f = spd_factor(b, "wishart scale")?;
                    let e = wishart_expected_log_det(dof, f.log_det, d);
                    Ok((e, Precision::Dense(f.inverse * dof)))
                })
                .collect::<Result<_>>()?,
        };
        Ok((0..n)
            .map(|c| {
                let (log_det, precision) = units[self.unit(c)].clone();
                ComponentPrecision {
                    log_det,
                    extra: df / beta[c],
                    precision,
                }
            })
            .collect())
    }
    ///
    /// Conjugate update of the precision posterior.
    ///
    /// `post`, `second` are the accumulated statistics; `(beta0, means0)` the
    /// prior and `(beta, means)` the already updated posterior of the means.
    /// Per component
    ///
    /// ```text
    /// dof = dof0 + N
    /// B = B0 + S + beta0 m0 m0^T - beta m m^T
    /// ```
    ///
    /// summed over the group for tied, and averaged over features for spherical.
    ///
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        prior: &ScaleParams,
        post: ArrayView1<f64>,
        second: &SecondMoment,
        beta0: ArrayView1<f64>,
        means0: ArrayView2<f64>,
        beta: ArrayView1<f64>,
        means: ArrayView2<f64>,
    ) -> Result<ScaleParams> {
        let n = prior.tying().n_components;
        let d = prior.n_features();
        let diag_term = |c: usize| -> Array1<f64> {
            let m0 = means0.row(c);
            let m = means.row(c);
            second.diag(c) + &(&m0 * &m0 * beta0[c]) - &(&m * &m * beta[c])
        };
        let outer_term = |c: usize| -> Result<Array2<f64>> {
            let m0 = means0.row(c);
            let m = means.row(c);
            Ok(&second.outer(c)? + &(outer(m0, m0) * beta0[c]) - &(outer(m, m) * beta[c]))
        };
        let (dof, layout) = match &prior.scale.layout {
            CovarLayout::Spherical(b0) => {
                let dof = &prior.dof + &post;
                let b = Array1::from_shape_fn(n, |c| {
                    b0[c] + diag_term(c).mean().unwrap_or(0.0)
                });
                (dof, CovarLayout::Spherical(b))
            }
            CovarLayout::Diag(b0) => {
                let dof = &prior.dof + &post;
                let mut b = b0.clone();
                for c in 0..n {
                    let mut row = b.row_mut(c);
                    row += &diag_term(c);
                }
                (dof, CovarLayout::Diag(b))
            }
            CovarLayout::Full(b0) => {
                let dof = &prior.dof + &post;
                let mut b = b0.clone();
                for c in 0..n {
                    let mut m = b.index_axis_mut(Axis(0), c);
                    m += &outer_term(c)?;
                }
                (dof, CovarLayout::Full(b))
            }
            CovarLayout::Tied(b0) => {
                let tying = prior.tying();
                let mut dof = prior.dof.clone();
                let mut b = b0.clone();
                for g in 0..tying.n_groups() {
                    for c in tying.members(g) {
                        dof[g] += post[c];
                        let mut m = b.index_axis_mut(Axis(0), g);
                        m += &outer_term(c)?;
                    }
                }
                (dof, CovarLayout::Tied(b))
            }
        };
        Ok(ScaleParams::new(dof, Covars::new(d, prior.tying(), layout)))
    }
    ///
    /// KL of the precision posterior from the prior, summed over units.
    ///
    /// A tied matrix is one unit shared by its group, so it contributes once.
    ///
    pub fn kl_divergence(&self, prior: &ScaleParams) -> Result<f64> {
        let df = self.n_features() as f64;
        match (&self.scale.layout, &prior.scale.layout) {
            (CovarLayout::Spherical(bq), CovarLayout::Spherical(bp)) => Ok((0..bq.len())
                .map(|c| {
                    kl_gamma(
                        df * self.dof[c] / 2.0,
                        df * bq[c] / 2.0,
                        df * prior.dof[c] / 2.0,
                        df * bp[c] / 2.0,
                    )
                })
                .sum()),
            (CovarLayout::Diag(bq), CovarLayout::Diag(bp)) => Ok(bq
                .outer_iter()
                .zip(bp.outer_iter())
                .enumerate()
                .map(|(c, (q, p))| {
                    q.iter()
                        .zip(p.iter())
                        .map(|(&q, &p)| {
                            kl_gamma(self.dof[c] / 2.0, q / 2.0, prior.dof[c] / 2.0, p / 2.0)
                        })
                        .sum::<f64>()
                })
                .sum()),
            (CovarLayout::Full(bq), CovarLayout::Full(bp))
            | (CovarLayout::Tied(bq), CovarLayout::Tied(bp)) => {
                let mut kl = 0.0;
                for (u, (q, p)) in bq.outer_iter().zip(bp.outer_iter()).enumerate() {
                    kl += kl_wishart(self.dof[u], q, prior.dof[u], p)?;
                }
                Ok(kl)
            }
            _ => config_error("posterior and prior have different covariance types"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::CovarianceType;

    fn prior(ty: CovarianceType, tying: Tying, d: usize) -> ScaleParams {
        let covars = Covars::from_full(Array2::<f64>::eye(d).view(), ty, tying);
        let n_units = match ty {
            CovarianceType::Tied => tying.n_groups(),
            _ => tying.n_components,
        };
        ScaleParams::from_covars(&covars, Array1::from_elem(n_units, d as f64 + 1.0))
    }

    #[test]
    fn plug_in_covariance_roundtrip() {
        let cv = array![[2.0, 0.3], [0.3, 1.0]];
        for ty in [
            CovarianceType::Spherical,
            CovarianceType::Diag,
            CovarianceType::Full,
            CovarianceType::Tied,
        ] {
            let covars = Covars::from_full(cv.view(), ty, Tying::global(3));
            let n_units = if ty == CovarianceType::Tied { 1 } else { 3 };
            let sp = ScaleParams::from_covars(&covars, Array1::from_elem(n_units, 4.0));
            sp.check("scale").unwrap();
            let back = sp.covars().to_full();
            for (a, b) in back.iter().zip(covars.to_full().iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
        }
    }
    #[test]
    fn tied_kl_is_counted_once_per_group() {
        // 4 components sharing one matrix vs 4 components with their own matrix
        let d = 2;
        let tied_p = prior(CovarianceType::Tied, Tying::global(4), d);
        let full_p = prior(CovarianceType::Full, Tying::global(4), d);
        let mut tied_q = tied_p.clone();
        let mut full_q = full_p.clone();
        tied_q.dof[0] += 3.0;
        full_q.dof += 3.0;
        let kl_tied = tied_q.kl_divergence(&tied_p).unwrap();
        let kl_full = full_q.kl_divergence(&full_p).unwrap();
        assert!(kl_tied > 0.0);
        assert_abs_diff_eq!(kl_full, 4.0 * kl_tied, epsilon = 1e-10);
    }
    #[test]
    fn update_of_single_point() {
        // D=1, one component, observation x=2 with weight 1,
        // prior beta0=1, m0=0, dof0=2, B0=2.
        let p = prior(CovarianceType::Full, Tying::global(1), 1);
        let x = array![[2.0]];
        let resp = array![[1.0]];
        let mut second = CovarianceType::Full.new_second_moment(1, 1);
        second.accumulate(x.view(), resp.view());
        let beta0 = array![1.0];
        let means0 = array![[0.0]];
        let beta = array![2.0];
        let means = array![[1.0]];
        let q = ScaleParams::update(
            &p,
            array![1.0].view(),
            &second,
            beta0.view(),
            means0.view(),
            beta.view(),
            means.view(),
        )
        .unwrap();
        // B = 2 + 4 + 0 - 2 * 1 = 4, dof = 3
        assert_abs_diff_eq!(q.dof[0], 3.0);
        assert_abs_diff_eq!(q.scale.full(0)[[0, 0]], 4.0, epsilon = 1e-12);
    }
    #[test]
    fn expected_precision_is_dof_over_scale() {
        for ty in [
            CovarianceType::Spherical,
            CovarianceType::Diag,
            CovarianceType::Full,
        ] {
            let p = prior(ty, Tying::global(2), 2);
            let prec = p.expected_precisions(array![1.0, 1.0].view()).unwrap();
            // prior mean of the precision is the identity
            let v = array![1.0, 1.0];
            assert_abs_diff_eq!(prec[1].precision.mahalanobis(v.view()), 2.0, epsilon = 1e-12);
            assert_abs_diff_eq!(prec[1].extra, 2.0);
        }
    }
}
