//!
//! Viterbi decoding in log space
//!
use crate::error::{degenerate, Result};
use ndarray::prelude::*;

///
/// Most probable state path of one sequence and its joint log-probability
/// `log P(X, Z*)`. Ties go to the lower state index.
///
pub fn viterbi(
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<(f64, Vec<usize>)> {
    let (n, k) = frame_log_lik.dim();
    // delta[t, j]: best log-probability of a path ending in j at t
    // psi[t, j]: predecessor of j on that path
    let mut delta = Array2::<f64>::from_elem((n, k), f64::NEG_INFINITY);
    let mut psi = Array2::<usize>::zeros((n, k));
    delta
        .row_mut(0)
        .assign(&(&log_start + &frame_log_lik.row(0)));
    for t in 1..n {
        for j in 0..k {
            let (best_prev, best) = (0..k)
                .map(|i| (i, delta[[t - 1, i]] + log_trans[[i, j]]))
                .fold((0, f64::NEG_INFINITY), |(i_max, v_max), (i, v)| {
                    if v > v_max {
                        (i, v)
                    } else {
                        (i_max, v_max)
                    }
                });
            delta[[t, j]] = best + frame_log_lik[[t, j]];
            psi[[t, j]] = best_prev;
        }
    }

    let (last, log_prob) = delta
        .row(n - 1)
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(i_max, v_max), (i, v)| {
            if v > v_max {
                (i, v)
            } else {
                (i_max, v_max)
            }
        });
    if !log_prob.is_finite() {
        return degenerate(format!("best path log-probability is {}", log_prob));
    }

    let mut path = vec![0; n];
    path[n - 1] = last;
    for t in (1..n).rev() {
        path[t - 1] = psi[[t, path[t]]];
    }
    Ok((log_prob, path))
}
