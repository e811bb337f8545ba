//!
//! Forward-backward with per-step scaling
//!
//! Frame likelihoods are shifted by their row maximum `m_t` before
//! exponentiation, so
//!
//! ```text
//! log P(X) = sum_t log c_t + sum_t m_t
//! ```
//!
use crate::error::{degenerate, Result};
use crate::prob::normalize_rows;
use ndarray::prelude::*;

///
/// Scaled forward variables
///
pub struct Forward {
    /// `[T, K]`, each row sums to 1
    pub alpha: Array2<f64>,
    /// `[T]`
    pub scaling: Array1<f64>,
    /// `exp(frame_log_lik - m_t)`, `[T, K]`
    pub frames: Array2<f64>,
    /// `sum_t m_t`
    pub shift: f64,
}

impl Forward {
    pub fn log_prob(&self) -> f64 {
        self.scaling.mapv(f64::ln).sum() + self.shift
    }
}

pub fn forward(
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<Forward> {
    let (n, k) = frame_log_lik.dim();
    let start = log_start.mapv(f64::exp);
    let trans = log_trans.mapv(f64::exp);
    let maxes: Array1<f64> = frame_log_lik
        .outer_iter()
        .map(|row| row.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
        .collect();
    let frames = &frame_log_lik - &maxes.view().insert_axis(Axis(1));
    let frames = frames.mapv(f64::exp);

    let mut alpha = Array2::<f64>::zeros((n, k));
    let mut scaling = Array1::<f64>::zeros(n);
    for t in 0..n {
        let mut a = if t == 0 {
            &start * &frames.row(0)
        } else {
            alpha.row(t - 1).dot(&trans) * &frames.row(t)
        };
        let c = a.sum();
        if !(c > 0.0) || !c.is_finite() {
            return degenerate(format!("scaling factor at step {} is {}", t, c));
        }
        a /= c;
        alpha.row_mut(t).assign(&a);
        scaling[t] = c;
    }
    Ok(Forward {
        alpha,
        scaling,
        frames,
        shift: maxes.sum(),
    })
}

///
/// Scaled backward variables, `beta[T-1] = 1` and
/// `beta[t] = A (f[t+1] * beta[t+1]) / c[t+1]`.
///
pub fn backward(log_trans: ArrayView2<f64>, fwd: &Forward) -> Array2<f64> {
    let (n, k) = fwd.frames.dim();
    let trans = log_trans.mapv(f64::exp);
    let mut beta = Array2::<f64>::ones((n, k));
    for t in (0..n - 1).rev() {
        let next = &fwd.frames.row(t + 1) * &beta.row(t + 1);
        let b = trans.dot(&next) / fwd.scaling[t + 1];
        beta.row_mut(t).assign(&b);
    }
    beta
}

pub fn forward_backward(
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<super::FbOutput> {
    let (n, k) = frame_log_lik.dim();
    let fwd = forward(log_start, log_trans, frame_log_lik)?;
    let beta = backward(log_trans, &fwd);
    let trans = log_trans.mapv(f64::exp);

    let mut posteriors = &fwd.alpha * &beta;
    normalize_rows(&mut posteriors);

    let mut xi = Array3::<f64>::zeros((n.saturating_sub(1), k, k));
    for t in 0..n.saturating_sub(1) {
        let c = fwd.scaling[t + 1];
        for i in 0..k {
            for j in 0..k {
                xi[[t, i, j]] = fwd.alpha[[t, i]] * trans[[i, j]] * fwd.frames[[t + 1, j]]
                    * beta[[t + 1, j]]
                    / c;
            }
        }
    }
    Ok(super::FbOutput {
        log_prob: fwd.log_prob(),
        posteriors,
        xi,
    })
}
