//!
//! Forward-backward in log space
//!
//! Every cell is a `Prob`, so sums over predecessors are log-space additions.
//!
use crate::error::{degenerate, Result};
use crate::prob::{lp, normalize_rows, Prob};
use ndarray::prelude::*;

///
/// `alpha[t, j] = P(x_0..x_t, z_t = j)`
///
pub fn forward(
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Array2<Prob> {
    let (n, k) = frame_log_lik.dim();
    let mut alpha = Array2::<Prob>::zeros((n, k));
    for j in 0..k {
        alpha[[0, j]] = lp(log_start[j]) * lp(frame_log_lik[[0, j]]);
    }
    for t in 1..n {
        for j in 0..k {
            let p: Prob = (0..k)
                .map(|i| alpha[[t - 1, i]] * lp(log_trans[[i, j]]))
                .sum();
            alpha[[t, j]] = p * lp(frame_log_lik[[t, j]]);
        }
    }
    alpha
}

///
/// `beta[t, i] = P(x_{t+1}..x_{T-1} | z_t = i)`
///
pub fn backward(log_trans: ArrayView2<f64>, frame_log_lik: ArrayView2<f64>) -> Array2<Prob> {
    let (n, k) = frame_log_lik.dim();
    let mut beta = Array2::<Prob>::ones((n, k));
    for t in (0..n - 1).rev() {
        for i in 0..k {
            beta[[t, i]] = (0..k)
                .map(|j| lp(log_trans[[i, j]]) * lp(frame_log_lik[[t + 1, j]]) * beta[[t + 1, j]])
                .sum();
        }
    }
    beta
}

fn total(alpha: &Array2<Prob>) -> Result<Prob> {
    let p: Prob = alpha.row(alpha.nrows() - 1).iter().sum();
    let log_prob = p.to_log_value();
    if log_prob.is_finite() {
        Ok(p)
    } else {
        degenerate(format!("sequence log-likelihood is {}", log_prob))
    }
}

pub fn forward_log_prob(
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<f64> {
    total(&forward(log_start, log_trans, frame_log_lik)).map(Prob::to_log_value)
}

pub fn forward_backward(
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<super::FbOutput> {
    let (n, k) = frame_log_lik.dim();
    let alpha = forward(log_start, log_trans, frame_log_lik);
    let beta = backward(log_trans, frame_log_lik);
    let p_x = total(&alpha)?;

    let mut posteriors = Array2::from_shape_fn((n, k), |(t, i)| {
        (alpha[[t, i]] * beta[[t, i]] / p_x).to_value()
    });
    normalize_rows(&mut posteriors);

    let mut xi = Array3::<f64>::zeros((n.saturating_sub(1), k, k));
    for t in 0..n.saturating_sub(1) {
        for i in 0..k {
            for j in 0..k {
                let v = alpha[[t, i]]
                    * lp(log_trans[[i, j]])
                    * lp(frame_log_lik[[t + 1, j]])
                    * beta[[t + 1, j]]
                    / p_x;
                xi[[t, i, j]] = v.to_value();
            }
        }
    }
    Ok(super::FbOutput {
        log_prob: p_x.to_log_value(),
        posteriors,
        xi,
    })
}
