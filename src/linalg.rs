//!
//! Small dense linear algebra on symmetric positive definite matrices.
//!
//! Storage is `ndarray` everywhere in the crate; decompositions go through
//! `nalgebra::Cholesky`.
//!
use crate::error::{degenerate, Result};
use nalgebra::{Cholesky, DMatrix};
use ndarray::{Array2, ArrayView1, ArrayView2};

pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    let (n, m) = a.dim();
    DMatrix::from_fn(n, m, |i, j| a[[i, j]])
}

pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

///
/// Inverse and log-determinant of a SPD matrix, from its Cholesky factor.
///
#[derive(Clone, Debug)]
pub struct SpdFactor {
    pub inverse: Array2<f64>,
    pub log_det: f64,
}

///
/// Largest condition number accepted by `spd_factor`.
///
pub const MAX_CONDITION: f64 = 1e12;

///
/// Lower bound of the condition number of `L L^T` from the diagonal of the
/// Cholesky factor `L`, `(max l_ii / min l_ii)^2`. Infinite for a zero pivot.
///
fn condition_lower_bound(l_diag: &[f64]) -> f64 {
    let max = l_diag.iter().copied().fold(0.0f64, f64::max);
    let min = l_diag.iter().copied().fold(f64::INFINITY, f64::min);
    if min > 0.0 {
        (max / min).powi(2)
    } else {
        f64::INFINITY
    }
}

///
/// Factorize the SPD matrix `a`.
///
/// `what` names the matrix in the error message when `a` is not positive
/// definite or its condition number exceeds `MAX_CONDITION`.
///
pub fn spd_factor(a: ArrayView2<f64>, what: &str) -> Result<SpdFactor> {
    if a.iter().any(|v| !v.is_finite()) {
        return degenerate(format!("{} has non-finite entries", what));
    }
    let m = to_dmatrix(a);
    match Cholesky::new(m) {
        Some(chol) => {
            let l_diag: Vec<f64> = chol.l().diagonal().iter().copied().collect();
            let condition = condition_lower_bound(&l_diag);
            if !(condition <= MAX_CONDITION) {
                return degenerate(format!(
                    "{} is near-singular (condition number >= {:e})",
                    what, condition
                ));
            }
            let log_det = 2.0 * l_diag.iter().map(|x| x.ln()).sum::<f64>();
            let inverse = from_dmatrix(&chol.inverse());
            Ok(SpdFactor { inverse, log_det })
        }
        None => degenerate(format!("{} is not positive definite", what)),
    }
}

///
/// Lower Cholesky factor `L` with `a = L L^T`
///
pub fn cholesky_lower(a: ArrayView2<f64>, what: &str) -> Result<Array2<f64>> {
    match Cholesky::new(to_dmatrix(a)) {
        Some(chol) => Ok(from_dmatrix(&chol.l())),
        None => degenerate(format!("{} is not positive definite", what)),
    }
}

///
/// `log |a|` of SPD matrix
///
pub fn log_det(a: ArrayView2<f64>, what: &str) -> Result<f64> {
    spd_factor(a, what).map(|f| f.log_det)
}

///
/// Quadratic form `v^T P v`
///
pub fn quad_form(p: ArrayView2<f64>, v: ArrayView1<f64>) -> f64 {
    v.dot(&p.dot(&v))
}

///
/// Outer product `u v^T`
///
pub fn outer(u: ArrayView1<f64>, v: ArrayView1<f64>) -> Array2<f64> {
    let n = u.len();
    let m = v.len();
    Array2::from_shape_fn((n, m), |(i, j)| u[i] * v[j])
}
