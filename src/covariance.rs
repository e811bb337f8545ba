//!
//! Covariance structure of Gaussian components
//!
//! Every Gaussian component (one per state for Gaussian emissions, `n_mix`
//! per state for mixtures) is addressed by a flat component index `c`.
//! The structure is one of
//!
//! * `Spherical`: one variance per component, `[n_comp]`
//! * `Diag`: one variance vector per component, `[n_comp, D]`
//! * `Full`: one matrix per component, `[n_comp, D, D]`
//! * `Tied`: one matrix per *group* of components, `[n_groups, D, D]`
//!
//! Which components share a tied matrix is described by `Tying`: for Gaussian
//! emissions all states form one group, for mixtures the components of one
//! state form a group.
//!
//! The variational counterpart (Wishart / Gamma priors and posteriors with
//! the same four layouts) lives in `wishart`.
//!
pub mod wishart;

use crate::error::{config_error, degenerate, HmmError, Result};
use crate::linalg::{outer, spd_factor};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceType {
    Spherical,
    Diag,
    Full,
    Tied,
}

impl FromStr for CovarianceType {
    type Err = HmmError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spherical" => Ok(CovarianceType::Spherical),
            "diag" => Ok(CovarianceType::Diag),
            "full" => Ok(CovarianceType::Full),
            "tied" => Ok(CovarianceType::Tied),
            _ => config_error(format!("unsupported covariance type {:?}", s)),
        }
    }
}

impl std::fmt::Display for CovarianceType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            CovarianceType::Spherical => "spherical",
            CovarianceType::Diag => "diag",
            CovarianceType::Full => "full",
            CovarianceType::Tied => "tied",
        };
        write!(f, "{}", s)
    }
}

impl CovarianceType {
    /// `obs*obs.T` is needed (full/tied), otherwise `obs**2` is enough.
    pub fn needs_outer(&self) -> bool {
        matches!(self, CovarianceType::Full | CovarianceType::Tied)
    }
    ///
    /// Zeroed second moment statistic for `n_comp` components
    ///
    pub fn new_second_moment(&self, n_comp: usize, n_features: usize) -> SecondMoment {
        if self.needs_outer() {
            SecondMoment::Outer(Array3::zeros((n_comp, n_features, n_features)))
        } else {
            SecondMoment::Diag(Array2::zeros((n_comp, n_features)))
        }
    }
}

///
/// Groups of components sharing one tied covariance.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tying {
    pub n_components: usize,
    pub group_size: usize,
}

impl Tying {
    /// all components in one group
    pub fn global(n_components: usize) -> Self {
        Tying {
            n_components,
            group_size: n_components,
        }
    }
    /// `n_groups` groups of `group_size` consecutive components
    pub fn grouped(n_groups: usize, group_size: usize) -> Self {
        Tying {
            n_components: n_groups * group_size,
            group_size,
        }
    }
    pub fn n_groups(&self) -> usize {
        if self.group_size == 0 {
            0
        } else {
            self.n_components / self.group_size
        }
    }
    pub fn group(&self, c: usize) -> usize {
        c / self.group_size
    }
    pub fn members(&self, g: usize) -> std::ops::Range<usize> {
        g * self.group_size..(g + 1) * self.group_size
    }
}

///
/// Second moment sufficient statistic per component,
/// `sum_t r[t,c] x_t^2` (spherical/diag) or `sum_t r[t,c] x_t x_t^T` (full/tied).
///
#[derive(Clone, Debug, PartialEq)]
pub enum SecondMoment {
    Diag(Array2<f64>),
    Outer(Array3<f64>),
}

impl SecondMoment {
    ///
    /// Add responsibility-weighted moments of `x: [T, D]` with
    /// `resp: [T, n_comp]`.
    ///
    pub fn accumulate(&mut self, x: ArrayView2<f64>, resp: ArrayView2<f64>) {
        match self {
            SecondMoment::Diag(s) => {
                let x2 = x.mapv(|v| v * v);
                *s += &resp.t().dot(&x2);
            }
            SecondMoment::Outer(s) => {
                for (c, mut sc) in s.outer_iter_mut().enumerate() {
                    let r = resp.column(c);
                    let weighted = &x * &r.insert_axis(Axis(1));
                    sc += &weighted.t().dot(&x);
                }
            }
        }
    }
    ///
    /// `sum_t r[t,c] x_t^2` of component `c`
    ///
    pub fn diag(&self, c: usize) -> Array1<f64> {
        match self {
            SecondMoment::Diag(s) => s.row(c).to_owned(),
            SecondMoment::Outer(s) => s.index_axis(Axis(0), c).diag().to_owned(),
        }
    }
    ///
    /// `sum_t r[t,c] x_t x_t^T` of component `c`
    ///
    /// Only available when accumulated as outer products.
    ///
    pub fn outer(&self, c: usize) -> Result<ArrayView2<f64>> {
        match self {
            SecondMoment::Outer(s) => Ok(s.index_axis(Axis(0), c)),
            SecondMoment::Diag(_) => config_error("outer second moment was not accumulated"),
        }
    }
}

impl SecondMoment {
    ///
    /// Add `other` of the same layout and shape. `self` is unchanged on error.
    ///
    pub fn merge(&mut self, other: &SecondMoment) -> Result<()> {
        match (self, other) {
            (SecondMoment::Diag(a), SecondMoment::Diag(b)) if a.dim() == b.dim() => *a += b,
            (SecondMoment::Outer(a), SecondMoment::Outer(b)) if a.dim() == b.dim() => *a += b,
            (a, b) => {
                return config_error(format!(
                    "cannot merge second moments {:?} and {:?}",
                    a.layout_shape(),
                    b.layout_shape()
                ))
            }
        }
        Ok(())
    }
    fn layout_shape(&self) -> (&'static str, Vec<usize>) {
        match self {
            SecondMoment::Diag(s) => ("diag", s.shape().to_vec()),
            SecondMoment::Outer(s) => ("outer", s.shape().to_vec()),
        }
    }
}

///
/// Precision of a single Gaussian component, in the form needed to evaluate
/// `(x - mu)^T P (x - mu)`.
///
#[derive(Clone, Debug)]
pub enum Precision {
    Scalar(f64),
    Diag(Array1<f64>),
    Dense(Array2<f64>),
}

impl Precision {
    pub fn mahalanobis(&self, diff: ArrayView1<f64>) -> f64 {
        match self {
            Precision::Scalar(p) => p * diff.dot(&diff),
            Precision::Diag(p) => diff.iter().zip(p.iter()).map(|(d, p)| d * d * p).sum(),
            Precision::Dense(p) => diff.dot(&p.dot(&diff)),
        }
    }
}

///
/// Everything needed to evaluate one component's log density
///
/// ```text
/// log N(x) = 1/2 (log_det - D log(2 pi) - extra - (x - mu)^T P (x - mu))
/// ```
///
/// `log_det` is `log|P|` for point estimates and `E[log|P|]` under a
/// posterior, where `extra = D / beta` accounts for the uncertainty of the mean.
///
#[derive(Clone, Debug)]
pub struct ComponentPrecision {
    pub log_det: f64,
    pub extra: f64,
    pub precision: Precision,
}

impl ComponentPrecision {
    pub fn log_density(&self, x: ArrayView1<f64>, mean: ArrayView1<f64>) -> f64 {
        let d = x.len() as f64;
        let diff = &x - &mean;
        0.5 * (self.log_det
            - d * (2.0 * std::f64::consts::PI).ln()
            - self.extra
            - self.precision.mahalanobis(diff.view()))
    }
}

///
/// Numeric layout of the four covariance structures.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CovarLayout {
    Spherical(Array1<f64>),
    Diag(Array2<f64>),
    Full(Array3<f64>),
    Tied(Array3<f64>),
}

///
/// Covariances (or, in `wishart`, inverse scale matrices) of all components.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Covars {
    pub n_features: usize,
    pub tying: Tying,
    pub layout: CovarLayout,
}

impl Covars {
    pub fn new(n_features: usize, tying: Tying, layout: CovarLayout) -> Self {
        Covars {
            n_features,
            tying,
            layout,
        }
    }
    ///
    /// Distribute a single `[D, D]` matrix to every component in the layout
    /// of `covariance_type`.
    ///
    pub fn from_full(cv: ArrayView2<f64>, covariance_type: CovarianceType, tying: Tying) -> Self {
        let n = tying.n_components;
        let d = cv.nrows();
        let diag = cv.diag().to_owned();
        let layout = match covariance_type {
            CovarianceType::Spherical => CovarLayout::Spherical(Array1::from_elem(n, diag.mean().unwrap_or(0.0))),
            CovarianceType::Diag => {
                CovarLayout::Diag(Array2::from_shape_fn((n, d), |(_, j)| diag[j]))
            }
            CovarianceType::Full => {
                CovarLayout::Full(Array3::from_shape_fn((n, d, d), |(_, i, j)| cv[[i, j]]))
            }
            CovarianceType::Tied => CovarLayout::Tied(Array3::from_shape_fn(
                (tying.n_groups(), d, d),
                |(_, i, j)| cv[[i, j]],
            )),
        };
        Covars::new(d, tying, layout)
    }
    pub fn covariance_type(&self) -> CovarianceType {
        match self.layout {
            CovarLayout::Spherical(_) => CovarianceType::Spherical,
            CovarLayout::Diag(_) => CovarianceType::Diag,
            CovarLayout::Full(_) => CovarianceType::Full,
            CovarLayout::Tied(_) => CovarianceType::Tied,
        }
    }
    pub fn n_components(&self) -> usize {
        self.tying.n_components
    }
    ///
    /// Shape of the numeric layout
    ///
    pub fn shape(&self) -> Vec<usize> {
        match &self.layout {
            CovarLayout::Spherical(v) => v.shape().to_vec(),
            CovarLayout::Diag(v) => v.shape().to_vec(),
            CovarLayout::Full(v) => v.shape().to_vec(),
            CovarLayout::Tied(v) => v.shape().to_vec(),
        }
    }
    ///
    /// Shape the layout must have
    ///
    pub fn expected_shape(&self) -> Vec<usize> {
        let n = self.tying.n_components;
        let d = self.n_features;
        match self.layout {
            CovarLayout::Spherical(_) => vec![n],
            CovarLayout::Diag(_) => vec![n, d],
            CovarLayout::Full(_) => vec![n, d, d],
            CovarLayout::Tied(_) => vec![self.tying.n_groups(), d, d],
        }
    }
    ///
    /// `[D, D]` matrix of component `c`
    ///
    pub fn full(&self, c: usize) -> Array2<f64> {
        let d = self.n_features;
        match &self.layout {
            CovarLayout::Spherical(v) => Array2::eye(d) * v[c],
            CovarLayout::Diag(v) => Array2::from_diag(&v.row(c)),
            CovarLayout::Full(v) => v.index_axis(Axis(0), c).to_owned(),
            CovarLayout::Tied(v) => v.index_axis(Axis(0), self.tying.group(c)).to_owned(),
        }
    }
    ///
    /// `[n_comp, D, D]` matrices of every component
    ///
    pub fn to_full(&self) -> Array3<f64> {
        let n = self.n_components();
        let d = self.n_features;
        let mut ret = Array3::zeros((n, d, d));
        for c in 0..n {
            ret.index_axis_mut(Axis(0), c).assign(&self.full(c));
        }
        ret
    }
    ///
    /// Check the shape and positive definiteness.
    ///
    pub fn check(&self, what: &str) -> Result<()> {
        if self.shape() != self.expected_shape() {
            return config_error(format!(
                "{} must have shape {:?} for {} covariance, found {:?}",
                what,
                self.expected_shape(),
                self.covariance_type(),
                self.shape()
            ));
        }
        let ok = match &self.layout {
            CovarLayout::Spherical(v) => v.iter().all(|&x| x > 0.0),
            CovarLayout::Diag(v) => v.iter().all(|&x| x > 0.0),
            CovarLayout::Full(v) | CovarLayout::Tied(v) => v
                .outer_iter()
                .all(|m| is_symmetric(m) && spd_factor(m, what).is_ok()),
        };
        if ok {
            Ok(())
        } else {
            config_error(format!(
                "{} must be symmetric, positive-definite",
                what
            ))
        }
    }
    ///
    /// Precisions of every component, used for evaluating log densities.
    ///
    pub fn precisions(&self) -> Result<Vec<ComponentPrecision>> {
        let n = self.n_components();
        let d = self.n_features as f64;
        match &self.layout {
            CovarLayout::Spherical(v) => v
                .iter()
                .map(|&var| {
                    if var <= 0.0 {
                        return degenerate(format!("non-positive variance {}", var));
                    }
                    Ok(ComponentPrecision {
                        log_det: -d * var.ln(),
                        extra: 0.0,
                        precision: Precision::Scalar(1.0 / var),
                    })
                })
                .collect(),
            CovarLayout::Diag(v) => v
                .outer_iter()
                .map(|vars| {
                    if vars.iter().any(|&x| x <= 0.0) {
                        return degenerate("non-positive diagonal variance");
                    }
                    Ok(ComponentPrecision {
                        log_det: -vars.mapv(f64::ln).sum(),
                        extra: 0.0,
                        precision: Precision::Diag(vars.mapv(|x| 1.0 / x)),
                    })
                })
                .collect(),
            CovarLayout::Full(v) => v
                .outer_iter()
                .map(|m| {
                    let f = spd_factor(m, "covariance")?;
                    Ok(ComponentPrecision {
                        log_det: -f.log_det,
                        extra: 0.0,
                        precision: Precision::Dense(f.inverse),
                    })
                })
                .collect(),
            CovarLayout::Tied(v) => {
                let groups: Vec<ComponentPrecision> = v
                    .outer_iter()
                    .map(|m| {
                        let f = spd_factor(m, "tied covariance")?;
                        Ok(ComponentPrecision {
                            log_det: -f.log_det,
                            extra: 0.0,
                            precision: Precision::Dense(f.inverse),
                        })
                    })
                    .collect::<Result<_>>()?;
                Ok((0..n)
                    .map(|c| groups[self.tying.group(c)].clone())
                    .collect())
            }
        }
    }
    ///
    /// Maximum likelihood re-estimation from the accumulated statistics.
    ///
    /// * `post`: `[n_comp]` responsibility mass
    /// * `obs`: `[n_comp, D]` weighted sum of observations
    /// * `second`: second moment in the layout of this structure
    /// * `means`: `[n_comp, D]` means (already re-estimated if they are updated)
    ///
    /// Components (or tied groups) without any responsibility keep the
    /// current value. `min_covar` is added to the diagonal.
    ///
    pub fn reestimate(
        &self,
        post: ArrayView1<f64>,
        obs: ArrayView2<f64>,
        second: &SecondMoment,
        means: ArrayView2<f64>,
        min_covar: f64,
    ) -> Result<Covars> {
        let d = self.n_features;
        // per-feature centered second moment: sum r (x - mu)^2
        let centered_diag = |c: usize| -> Array1<f64> {
            let mu = means.row(c);
            let o = obs.row(c);
            let s = second.diag(c);
            &s - &(&mu * &o * 2.0) + &(&mu * &mu * post[c])
        };
        let centered_outer = |c: usize| -> Result<Array2<f64>> {
            let mu = means.row(c);
            let o = obs.row(c);
            let s = second.outer(c)?;
            Ok(&s - &outer(mu, o) - &outer(o, mu) + &(outer(mu, mu) * post[c]))
        };
        let layout = match &self.layout {
            CovarLayout::Spherical(old) => {
                let mut new = old.clone();
                for c in 0..self.n_components() {
                    if post[c] > 0.0 {
                        new[c] = centered_diag(c).mean().unwrap_or(0.0) / post[c] + min_covar;
                    }
                }
                CovarLayout::Spherical(new)
            }
            CovarLayout::Diag(old) => {
                let mut new = old.clone();
                for c in 0..self.n_components() {
                    if post[c] > 0.0 {
                        let v = centered_diag(c) / post[c] + min_covar;
                        new.row_mut(c).assign(&v);
                    }
                }
                CovarLayout::Diag(new)
            }
            CovarLayout::Full(old) => {
                let mut new = old.clone();
                for c in 0..self.n_components() {
                    if post[c] > 0.0 {
                        let m = centered_outer(c)? / post[c] + Array2::<f64>::eye(d) * min_covar;
                        new.index_axis_mut(Axis(0), c).assign(&m);
                    }
                }
                CovarLayout::Full(new)
            }
            CovarLayout::Tied(old) => {
                let mut new = old.clone();
                for g in 0..self.tying.n_groups() {
                    let mut total = Array2::<f64>::zeros((d, d));
                    let mut mass = 0.0;
                    for c in self.tying.members(g) {
                        total += &centered_outer(c)?;
                        mass += post[c];
                    }
                    if mass > 0.0 {
                        let m = total / mass + Array2::<f64>::eye(d) * min_covar;
                        new.index_axis_mut(Axis(0), g).assign(&m);
                    }
                }
                CovarLayout::Tied(new)
            }
        };
        Ok(Covars::new(d, self.tying, layout))
    }
}

fn is_symmetric(m: ArrayView2<f64>) -> bool {
    let scale = m.iter().fold(0.0f64, |a, b| a.max(b.abs())).max(1.0);
    m.iter()
        .zip(m.t().iter())
        .all(|(a, b)| (a - b).abs() <= 1e-8 * scale)
}

///
/// Empirical covariance of the rows of `x` (denominator `n - 1`)
/// plus `reg` on the diagonal.
///
pub fn empirical_covariance(x: ArrayView2<f64>, reg: f64) -> Array2<f64> {
    let (n, d) = x.dim();
    let mut cv = Array2::<f64>::zeros((d, d));
    if n > 1 {
        if let Some(mean) = x.mean_axis(Axis(0)) {
            let centered = &x - &mean.insert_axis(Axis(0));
            cv = centered.t().dot(&centered) / (n as f64 - 1.0);
        }
    }
    cv + Array2::<f64>::eye(d) * reg
}
