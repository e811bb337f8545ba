//!
//! Forward-Backward Engine
//!
//! Two implementations computing the same quantities:
//!
//! * `log`: recursions in log space with logsumexp
//! * `scaling`: recursions in probability space, normalizing each step by
//!   a scaling factor `c_t`, with `log P(X) = sum_t log c_t`
//!
//! `viterbi` gives the single most probable state path instead of the
//! per-sample posteriors.
//!
//! Inputs are log values of the start and transition probabilities, which for
//! the variational trainer are the (sub-normalized) expectations
//! `E[log startprob]` and `E[log transmat]`, and the frame log-likelihood
//! matrix `[T, K]` of one sequence.
//!
pub mod log;
pub mod scaling;
pub mod viterbi;

use crate::error::{config_error, degenerate, HmmError, Result};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Implementation {
    Log,
    Scaling,
}

impl Default for Implementation {
    fn default() -> Self {
        Implementation::Log
    }
}

impl FromStr for Implementation {
    type Err = HmmError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(Implementation::Log),
            "scaling" => Ok(Implementation::Scaling),
            _ => config_error(format!("unknown forward-backward implementation {:?}", s)),
        }
    }
}

///
/// Decoder of the state sequence: `Viterbi` for the jointly most probable
/// path, `Map` for the state of maximum posterior at each sample.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Viterbi,
    Map,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Viterbi
    }
}

impl FromStr for Algorithm {
    type Err = HmmError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "viterbi" => Ok(Algorithm::Viterbi),
            "map" => Ok(Algorithm::Map),
            _ => config_error(format!("unknown decoder algorithm {:?}", s)),
        }
    }
}

///
/// Result of forward-backward on one sequence
///
#[derive(Clone, Debug)]
pub struct FbOutput {
    /// `log P(X)`
    pub log_prob: f64,
    /// `gamma[t, k] = P(z_t = k | X)`, `[T, K]`
    pub posteriors: Array2<f64>,
    /// `xi[t, i, j] = P(z_t = i, z_{t+1} = j | X)`, `[T-1, K, K]`
    pub xi: Array3<f64>,
}

impl FbOutput {
    ///
    /// expected transition counts `sum_t xi[t]`
    ///
    pub fn xi_sum(&self) -> Array2<f64> {
        self.xi.sum_axis(Axis(0))
    }
}

///
/// Reject frames that no state can explain.
///
fn check_frames(frame_log_lik: ArrayView2<f64>) -> Result<()> {
    for (t, row) in frame_log_lik.outer_iter().enumerate() {
        if row.iter().any(|v| v.is_nan()) {
            return degenerate(format!("log-likelihood of sample {} is NaN", t));
        }
        if row.iter().all(|&v| v == f64::NEG_INFINITY) {
            return degenerate(format!(
                "sample {} has zero likelihood under every state",
                t
            ));
        }
    }
    Ok(())
}

fn check_shapes(
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<()> {
    let k = log_start.len();
    if log_trans.dim() != (k, k) || frame_log_lik.ncols() != k {
        return config_error(format!(
            "inconsistent number of states: start {}, trans {:?}, frames {:?}",
            k,
            log_trans.dim(),
            frame_log_lik.dim()
        ));
    }
    if frame_log_lik.nrows() == 0 {
        return config_error("empty sequence");
    }
    Ok(())
}

///
/// Run forward-backward on one sequence.
///
pub fn forward_backward(
    implementation: Implementation,
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<FbOutput> {
    check_shapes(log_start, log_trans, frame_log_lik)?;
    check_frames(frame_log_lik)?;
    match implementation {
        Implementation::Log => self::log::forward_backward(log_start, log_trans, frame_log_lik),
        Implementation::Scaling => scaling::forward_backward(log_start, log_trans, frame_log_lik),
    }
}

///
/// Forward pass only, returning `log P(X)`.
///
pub fn forward(
    implementation: Implementation,
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<f64> {
    check_shapes(log_start, log_trans, frame_log_lik)?;
    check_frames(frame_log_lik)?;
    match implementation {
        Implementation::Log => self::log::forward_log_prob(log_start, log_trans, frame_log_lik),
        Implementation::Scaling => {
            scaling::forward(log_start, log_trans, frame_log_lik).map(|f| f.log_prob())
        }
    }
}

///
/// Viterbi path of one sequence with `log P(X, Z*)`.
///
pub fn best_path(
    log_start: ArrayView1<f64>,
    log_trans: ArrayView2<f64>,
    frame_log_lik: ArrayView2<f64>,
) -> Result<(f64, Vec<usize>)> {
    check_shapes(log_start, log_trans, frame_log_lik)?;
    check_frames(frame_log_lik)?;
    viterbi::viterbi(log_start, log_trans, frame_log_lik)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prob::is_stochastic;
    use test_case::test_case;

    fn example() -> (Array1<f64>, Array2<f64>, Array2<f64>) {
        let start = array![0.6f64, 0.4].mapv(f64::ln);
        let trans = array![[0.7f64, 0.3], [0.2, 0.8]].mapv(f64::ln);
        let frames = array![
            [0.5f64, 0.1],
            [0.4, 0.3],
            [0.1, 0.6],
            [0.05, 0.7],
            [0.3, 0.3]
        ]
        .mapv(f64::ln);
        (start, trans, frames)
    }

    ///
    /// brute-force `log P(X)` by enumerating all state paths
    ///
    fn brute_force(start: &Array1<f64>, trans: &Array2<f64>, frames: &Array2<f64>) -> f64 {
        let k = start.len();
        let t = frames.nrows();
        let mut total = 0.0;
        for code in 0..k.pow(t as u32) {
            let path: Vec<usize> = (0..t).map(|i| (code / k.pow(i as u32)) % k).collect();
            let mut lp = start[path[0]] + frames[[0, path[0]]];
            for i in 1..t {
                lp += trans[[path[i - 1], path[i]]] + frames[[i, path[i]]];
            }
            total += lp.exp();
        }
        total.ln()
    }

    ///
    /// brute-force `max_Z log P(X, Z)` and its path
    ///
    fn brute_force_best(
        start: &Array1<f64>,
        trans: &Array2<f64>,
        frames: &Array2<f64>,
    ) -> (f64, Vec<usize>) {
        let k = start.len();
        let t = frames.nrows();
        let mut best = (f64::NEG_INFINITY, vec![]);
        for code in 0..k.pow(t as u32) {
            let path: Vec<usize> = (0..t).map(|i| (code / k.pow(i as u32)) % k).collect();
            let mut lp = start[path[0]] + frames[[0, path[0]]];
            for i in 1..t {
                lp += trans[[path[i - 1], path[i]]] + frames[[i, path[i]]];
            }
            if lp > best.0 {
                best = (lp, path);
            }
        }
        best
    }

    #[test_case(Implementation::Log ; "log")]
    #[test_case(Implementation::Scaling ; "scaling")]
    fn matches_brute_force(implementation: Implementation) {
        let (start, trans, frames) = example();
        let out =
            forward_backward(implementation, start.view(), trans.view(), frames.view()).unwrap();
        let expected = brute_force(&start, &trans, &frames);
        assert_relative_eq!(out.log_prob, expected, max_relative = 1e-12);
        for row in out.posteriors.outer_iter() {
            assert!(is_stochastic(row, 1e-10));
        }
        assert_eq!(out.xi.dim(), (4, 2, 2));
        // marginal of xi over j is gamma
        for t in 0..4 {
            let m = out.xi.index_axis(Axis(0), t).sum_axis(Axis(1));
            assert_abs_diff_eq!(m[0], out.posteriors[[t, 0]], epsilon = 1e-10);
            assert_abs_diff_eq!(m[1], out.posteriors[[t, 1]], epsilon = 1e-10);
        }
        let lp = forward(implementation, start.view(), trans.view(), frames.view()).unwrap();
        assert_relative_eq!(lp, expected, max_relative = 1e-12);
    }
    #[test]
    fn log_and_scaling_agree() {
        let (start, trans, frames) = example();
        // shift frames far below underflow of exp
        let frames = frames - 800.0;
        let a = forward_backward(Implementation::Log, start.view(), trans.view(), frames.view())
            .unwrap();
        let b = forward_backward(
            Implementation::Scaling,
            start.view(),
            trans.view(),
            frames.view(),
        )
        .unwrap();
        assert_relative_eq!(a.log_prob, b.log_prob, max_relative = 1e-10);
        for (x, y) in a.posteriors.iter().zip(b.posteriors.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
        for (x, y) in a.xi.iter().zip(b.xi.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }
    #[test_case(Implementation::Log ; "log")]
    #[test_case(Implementation::Scaling ; "scaling")]
    fn single_sample(implementation: Implementation) {
        let (start, trans, frames) = example();
        let one = frames.slice(s![0..1, ..]);
        let out = forward_backward(implementation, start.view(), trans.view(), one).unwrap();
        assert_eq!(out.xi.dim(), (0, 2, 2));
        assert_eq!(out.xi_sum(), Array2::<f64>::zeros((2, 2)));
        // 0.6 * 0.5 : 0.4 * 0.1
        assert_abs_diff_eq!(out.posteriors[[0, 0]], 0.3 / 0.34, epsilon = 1e-12);
        assert_abs_diff_eq!(out.posteriors[[0, 1]], 0.04 / 0.34, epsilon = 1e-12);
        assert_abs_diff_eq!(out.log_prob, 0.34f64.ln(), epsilon = 1e-12);
    }
    #[test_case(Implementation::Log ; "log")]
    #[test_case(Implementation::Scaling ; "scaling")]
    fn zero_start_probability(implementation: Implementation) {
        let (_, trans, frames) = example();
        let start = array![1.0f64, 0.0].mapv(f64::ln);
        let out =
            forward_backward(implementation, start.view(), trans.view(), frames.view()).unwrap();
        assert!(out.posteriors.iter().all(|v| v.is_finite()));
        assert_eq!(out.posteriors[[0, 1]], 0.0);
    }
    #[test_case(Implementation::Log ; "log")]
    #[test_case(Implementation::Scaling ; "scaling")]
    fn unexplained_sample_is_degenerate(implementation: Implementation) {
        let (start, trans, mut frames) = example();
        frames.row_mut(2).fill(f64::NEG_INFINITY);
        let e = forward_backward(implementation, start.view(), trans.view(), frames.view())
            .unwrap_err();
        assert!(e.is_degenerate());
    }
    #[test]
    fn unreachable_path_is_degenerate_in_scaling() {
        // state 1 is the only one explaining sample 1, but cannot be reached
        let start = array![1.0f64, 0.0].mapv(f64::ln);
        let trans = array![[1.0f64, 0.0], [0.0, 1.0]].mapv(f64::ln);
        let frames = array![[0.5f64, 0.5], [0.0, 1.0]].mapv(f64::ln);
        let e = forward_backward(
            Implementation::Scaling,
            start.view(),
            trans.view(),
            frames.view(),
        )
        .unwrap_err();
        assert!(e.is_degenerate());
        let e = forward_backward(Implementation::Log, start.view(), trans.view(), frames.view())
            .unwrap_err();
        assert!(e.is_degenerate());
    }
    #[test]
    fn viterbi_matches_brute_force() {
        let (start, trans, frames) = example();
        let (lp, path) = best_path(start.view(), trans.view(), frames.view()).unwrap();
        let (expected_lp, expected_path) = brute_force_best(&start, &trans, &frames);
        assert_relative_eq!(lp, expected_lp, max_relative = 1e-12);
        assert_eq!(path, expected_path);
        assert_eq!(path, vec![0, 0, 1, 1, 1]);
        // best path cannot beat the sum over all paths
        assert!(lp < brute_force(&start, &trans, &frames));

        let three_start = array![0.5f64, 0.3, 0.2].mapv(f64::ln);
        let three_trans =
            array![[0.8f64, 0.1, 0.1], [0.1, 0.1, 0.8], [0.6, 0.2, 0.2]].mapv(f64::ln);
        let three_frames = array![
            [0.2f64, 0.5, 0.3],
            [0.1, 0.6, 0.3],
            [0.3, 0.1, 0.9],
            [0.7, 0.2, 0.1],
            [0.4, 0.5, 0.1],
            [0.2, 0.2, 0.6]
        ]
        .mapv(f64::ln);
        let (lp, path) =
            best_path(three_start.view(), three_trans.view(), three_frames.view()).unwrap();
        let (expected_lp, expected_path) =
            brute_force_best(&three_start, &three_trans, &three_frames);
        assert_relative_eq!(lp, expected_lp, max_relative = 1e-12);
        assert_eq!(path, expected_path);
    }
    #[test]
    fn viterbi_single_sample_and_forbidden_moves() {
        let (start, trans, frames) = example();
        let (lp, path) = best_path(start.view(), trans.view(), frames.slice(s![0..1, ..])).unwrap();
        assert_eq!(path, vec![0]);
        assert_abs_diff_eq!(lp, 0.3f64.ln(), epsilon = 1e-12);

        // state 1 is absorbing, so the path 1 -> 0 favored by the frames is
        // forbidden
        let trans = array![[0.5f64, 0.5], [0.0, 1.0]].mapv(f64::ln);
        let frames = array![[0.1f64, 0.9], [0.9, 0.1]].mapv(f64::ln);
        let (lp, path) = best_path(start.view(), trans.view(), frames.view()).unwrap();
        assert_eq!(path, vec![1, 1]);
        assert_abs_diff_eq!(lp, 0.036f64.ln(), epsilon = 1e-12);
    }
    #[test]
    fn viterbi_rejects_unexplained_samples() {
        let (start, trans, mut frames) = example();
        frames.row_mut(1).fill(f64::NEG_INFINITY);
        let e = best_path(start.view(), trans.view(), frames.view()).unwrap_err();
        assert!(e.is_degenerate());
        let start = array![1.0f64, 0.0].mapv(f64::ln);
        let trans = array![[1.0f64, 0.0], [0.0, 1.0]].mapv(f64::ln);
        let frames = array![[0.5f64, 0.5], [0.0, 1.0]].mapv(f64::ln);
        let e = best_path(start.view(), trans.view(), frames.view()).unwrap_err();
        assert!(e.is_degenerate());
    }
    #[test]
    fn parse_algorithm() {
        assert_eq!(Algorithm::default(), Algorithm::Viterbi);
        assert_eq!("map".parse::<Algorithm>().unwrap(), Algorithm::Map);
        assert!("beam".parse::<Algorithm>().unwrap_err().is_config());
    }
    #[test]
    fn parse_implementation() {
        assert_eq!("log".parse::<Implementation>().unwrap(), Implementation::Log);
        assert!("fast".parse::<Implementation>().unwrap_err().is_config());
    }
}
