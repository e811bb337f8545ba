//!
//! KL divergences and expectations of the conjugate families used by the
//! variational trainer.
//!
//! Wishart distributions are parameterized by degrees of freedom `dof` and
//! the *inverse* scale matrix `B`:
//!
//! ```text
//! W(L; dof, B) ∝ |L|^{(dof-D-1)/2} exp(-tr(B L)/2)
//! E[L] = dof B^{-1}
//! E[log|L|] = sum_{i=0}^{D-1} digamma((dof-i)/2) + D log 2 - log|B|
//! ```
//!
//! Gamma distributions are parameterized by `(shape, rate)`.
//!
use crate::error::Result;
use crate::linalg::spd_factor;
use ndarray::{Array1, ArrayView1, ArrayView2};
use statrs::function::gamma::{digamma, ln_gamma};

///
/// `E[log x]` of Dirichlet(alpha)
///
/// ```text
/// E[log x_i] = digamma(alpha_i) - digamma(sum_j alpha_j)
/// ```
pub fn dirichlet_expected_log(alpha: ArrayView1<f64>) -> Array1<f64> {
    let total = digamma(alpha.sum());
    alpha.mapv(|a| digamma(a) - total)
}

///
/// KL(Dir(q) || Dir(p))
///
pub fn kl_dirichlet(q: ArrayView1<f64>, p: ArrayView1<f64>) -> f64 {
    let q_sum = q.sum();
    let p_sum = p.sum();
    let digamma_q_sum = digamma(q_sum);
    let mut kl = ln_gamma(q_sum) - ln_gamma(p_sum);
    for (&qi, &pi) in q.iter().zip(p.iter()) {
        kl += ln_gamma(pi) - ln_gamma(qi) + (qi - pi) * (digamma(qi) - digamma_q_sum);
    }
    kl
}

///
/// `E[log x]` of Gamma(shape, rate)
///
pub fn gamma_expected_log(shape: f64, rate: f64) -> f64 {
    digamma(shape) - rate.ln()
}

///
/// KL(Gamma(shape_q, rate_q) || Gamma(shape_p, rate_p))
///
pub fn kl_gamma(shape_q: f64, rate_q: f64, shape_p: f64, rate_p: f64) -> f64 {
    (shape_q - shape_p) * digamma(shape_q) - ln_gamma(shape_q)
        + ln_gamma(shape_p)
        + shape_p * (rate_q.ln() - rate_p.ln())
        + shape_q * (rate_p - rate_q) / rate_q
}

///
/// `E[log|L|]` of a Wishart with `dof` and inverse scale of log-determinant `log_det_scale`.
///
pub fn wishart_expected_log_det(dof: f64, log_det_scale: f64, n_features: usize) -> f64 {
    let d = n_features as f64;
    (0..n_features)
        .map(|i| digamma((dof - i as f64) / 2.0))
        .sum::<f64>()
        + d * std::f64::consts::LN_2
        - log_det_scale
}

///
/// log normalizing constant of a Wishart
///
/// ```text
/// log Z = D(D-1)/4 log(pi) - dof/2 log|B| + sum_i lgamma((dof-i)/2) + dof D/2 log 2
/// ```
pub fn wishart_log_z(dof: f64, log_det_scale: f64, n_features: usize) -> f64 {
    let d = n_features as f64;
    d * (d - 1.0) / 4.0 * std::f64::consts::PI.ln() - dof / 2.0 * log_det_scale
        + (0..n_features)
            .map(|i| ln_gamma((dof - i as f64) / 2.0))
            .sum::<f64>()
        + dof * d / 2.0 * std::f64::consts::LN_2
}

///
/// KL(W(dof_q, scale_q) || W(dof_p, scale_p))
///
/// ```text
/// KL = (dof_q - dof_p)/2 E_q[log|L|] - D dof_q/2 + dof_q/2 tr(B_p B_q^{-1})
///      + log Z_p - log Z_q
/// ```
pub fn kl_wishart(
    dof_q: f64,
    scale_q: ArrayView2<f64>,
    dof_p: f64,
    scale_p: ArrayView2<f64>,
) -> Result<f64> {
    let d = scale_q.nrows();
    let fq = spd_factor(scale_q, "posterior scale")?;
    let fp = spd_factor(scale_p, "prior scale")?;
    let trace: f64 = scale_p.dot(&fq.inverse).diag().sum();
    let e_log_det = wishart_expected_log_det(dof_q, fq.log_det, d);
    Ok((dof_q - dof_p) / 2.0 * e_log_det - d as f64 * dof_q / 2.0
        + dof_q / 2.0 * trace
        + wishart_log_z(dof_p, fp.log_det, d)
        - wishart_log_z(dof_q, fq.log_det, d))
}

///
/// KL between the conditional Normals of the means
/// `N(m_q, (beta_q L)^{-1})` and `N(m_p, (beta_p L)^{-1})`, averaged over the
/// precision `L`.
///
/// `mahalanobis` is `(m_q - m_p)^T E[L] (m_q - m_p)`.
///
/// ```text
/// KL = 1/2 (D log(beta_q/beta_p) + D beta_p/beta_q - D + beta_p mahalanobis)
/// ```
pub fn kl_normal_shared_precision(
    beta_q: f64,
    beta_p: f64,
    mahalanobis: f64,
    n_features: usize,
) -> f64 {
    let d = n_features as f64;
    0.5 * (d * (beta_q / beta_p).ln() + d * beta_p / beta_q - d + beta_p * mahalanobis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn dirichlet_self_kl_is_zero() {
        let q = array![1.5, 2.0, 0.3];
        assert_abs_diff_eq!(kl_dirichlet(q.view(), q.view()), 0.0, epsilon = 1e-12);
        let p = array![1.0, 1.0, 1.0];
        assert!(kl_dirichlet(q.view(), p.view()) > 0.0);
    }
    #[test]
    fn dirichlet_expectation_of_two_ones() {
        // Dir(1, 1): E[log x] = digamma(1) - digamma(2) = -1
        let e = dirichlet_expected_log(array![1.0, 1.0].view());
        assert_abs_diff_eq!(e[0], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e[1], -1.0, epsilon = 1e-12);
    }
    #[test]
    fn gamma_kl() {
        assert_abs_diff_eq!(kl_gamma(2.0, 3.0, 2.0, 3.0), 0.0, epsilon = 1e-12);
        assert!(kl_gamma(2.0, 3.0, 1.0, 1.0) > 0.0);
    }
    #[test]
    fn wishart_self_kl_is_zero() {
        let b = array![[2.0, 0.3], [0.3, 1.0]];
        let kl = kl_wishart(5.0, b.view(), 5.0, b.view()).unwrap();
        assert_abs_diff_eq!(kl, 0.0, epsilon = 1e-10);
        let b2 = array![[1.0, 0.0], [0.0, 1.0]];
        assert!(kl_wishart(5.0, b.view(), 3.0, b2.view()).unwrap() > 0.0);
    }
    #[test]
    fn one_dimensional_wishart_is_gamma() {
        // W(dof, [B]) == Gamma(dof/2, B/2)
        let (dq, bq, dp, bp) = (7.0, 3.5, 2.0, 0.01);
        let kw = kl_wishart(dq, array![[bq]].view(), dp, array![[bp]].view()).unwrap();
        let kg = kl_gamma(dq / 2.0, bq / 2.0, dp / 2.0, bp / 2.0);
        assert_abs_diff_eq!(kw, kg, epsilon = 1e-10);
        let ew = wishart_expected_log_det(dq, bq.ln(), 1);
        let eg = gamma_expected_log(dq / 2.0, bq / 2.0);
        assert_abs_diff_eq!(ew, eg, epsilon = 1e-12);
    }
    #[test]
    fn normal_kl() {
        assert_abs_diff_eq!(kl_normal_shared_precision(3.0, 3.0, 0.0, 2), 0.0);
        assert!(kl_normal_shared_precision(3.0, 1.0, 0.5, 2) > 0.0);
    }
}
