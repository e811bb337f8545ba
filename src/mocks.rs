//!
//! Synthetic datasets sampled from known HMMs
//!
use crate::error::{config_error, Result};
use crate::init::sample_normal;
use ndarray::prelude::*;
use rand::distributions::WeightedIndex;
use rand::prelude::*;

///
/// Packed samples `x` with sequence `lengths`
///
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub lengths: Vec<usize>,
    /// hidden state of each sample
    pub states: Vec<usize>,
}

fn weighted(p: ArrayView1<f64>) -> Result<WeightedIndex<f64>> {
    WeightedIndex::new(p.iter().copied()).or_else(|e| config_error(format!("{}: {:?}", e, p)))
}

///
/// Hidden state paths of the given lengths, concatenated
///
pub fn sample_states<R: Rng>(
    startprob: ArrayView1<f64>,
    transmat: ArrayView2<f64>,
    lengths: &[usize],
    rng: &mut R,
) -> Result<Vec<usize>> {
    let start = weighted(startprob)?;
    let rows = transmat
        .outer_iter()
        .map(weighted)
        .collect::<Result<Vec<_>>>()?;
    let mut states = Vec::with_capacity(lengths.iter().sum());
    for &length in lengths {
        let mut z = start.sample(rng);
        for t in 0..length {
            if t > 0 {
                z = rows[z].sample(rng);
            }
            states.push(z);
        }
    }
    Ok(states)
}

///
/// Sample from a Gaussian HMM with full covariances `[K, D, D]`.
///
pub fn sample_gaussian_hmm<R: Rng>(
    startprob: ArrayView1<f64>,
    transmat: ArrayView2<f64>,
    means: ArrayView2<f64>,
    covars: ArrayView3<f64>,
    lengths: &[usize],
    rng: &mut R,
) -> Result<Dataset> {
    let states = sample_states(startprob, transmat, lengths, rng)?;
    let mut x = Array2::<f64>::zeros((states.len(), means.ncols()));
    for (mut row, &z) in x.outer_iter_mut().zip(states.iter()) {
        let draw = sample_normal(means.row(z), covars.index_axis(Axis(0), z), 1, rng)?;
        row.assign(&draw.row(0));
    }
    Ok(Dataset {
        x,
        lengths: lengths.to_vec(),
        states,
    })
}

///
/// Sample from a categorical HMM; each sample is a single column symbol.
///
pub fn sample_categorical_hmm<R: Rng>(
    startprob: ArrayView1<f64>,
    transmat: ArrayView2<f64>,
    emissionprob: ArrayView2<f64>,
    lengths: &[usize],
    rng: &mut R,
) -> Result<Dataset> {
    let states = sample_states(startprob, transmat, lengths, rng)?;
    let emissions = emissionprob
        .outer_iter()
        .map(weighted)
        .collect::<Result<Vec<_>>>()?;
    let x = Array2::from_shape_fn((states.len(), 1), |(t, _)| {
        emissions[states[t]].sample(rng) as f64
    });
    Ok(Dataset {
        x,
        lengths: lengths.to_vec(),
        states,
    })
}

///
/// "Sticky" chain: stay with probability `stay`, otherwise move uniformly.
///
pub fn sticky_transmat(n_states: usize, stay: f64) -> Array2<f64> {
    if n_states == 1 {
        return Array2::ones((1, 1));
    }
    let move_p = (1.0 - stay) / (n_states - 1) as f64;
    Array2::from_shape_fn((n_states, n_states), |(i, j)| {
        if i == j {
            stay
        } else {
            move_p
        }
    })
}

///
/// Gaussian HMM with well separated means `5 * k` on every feature and
/// unit covariances.
///
pub fn gaussian_example<R: Rng>(
    n_states: usize,
    n_features: usize,
    lengths: &[usize],
    rng: &mut R,
) -> Result<Dataset> {
    if n_states == 0 || n_features == 0 {
        return config_error("n_states and n_features must be positive");
    }
    let startprob = Array1::from_elem(n_states, 1.0 / n_states as f64);
    let transmat = sticky_transmat(n_states, 0.9);
    let means = Array2::from_shape_fn((n_states, n_features), |(k, _)| 5.0 * k as f64);
    let mut covars = Array3::<f64>::zeros((n_states, n_features, n_features));
    for mut c in covars.outer_iter_mut() {
        c.diag_mut().fill(1.0);
    }
    sample_gaussian_hmm(
        startprob.view(),
        transmat.view(),
        means.view(),
        covars.view(),
        lengths,
        rng,
    )
}

///
/// Categorical HMM over `n_symbols` whose state `k` prefers symbol `k % n_symbols`.
///
pub fn categorical_example<R: Rng>(
    n_states: usize,
    n_symbols: usize,
    lengths: &[usize],
    rng: &mut R,
) -> Result<Dataset> {
    if n_states == 0 || n_symbols == 0 {
        return config_error("n_states and n_symbols must be positive");
    }
    let startprob = Array1::from_elem(n_states, 1.0 / n_states as f64);
    let transmat = sticky_transmat(n_states, 0.8);
    let emissionprob = Array2::from_shape_fn((n_states, n_symbols), |(k, s)| {
        if s == k % n_symbols {
            0.7 + 0.3 / n_symbols as f64
        } else {
            0.3 / n_symbols as f64
        }
    });
    sample_categorical_hmm(
        startprob.view(),
        transmat.view(),
        emissionprob.view(),
        lengths,
        rng,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn gaussian_example_shape() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let d = gaussian_example(2, 3, &[10, 5], &mut rng).unwrap();
        assert_eq!(d.x.dim(), (15, 3));
        assert_eq!(d.states.len(), 15);
        assert!(d.states.iter().all(|&z| z < 2));
    }
    #[test]
    fn categorical_example_symbols() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let d = categorical_example(3, 4, &[20, 20], &mut rng).unwrap();
        assert_eq!(d.x.dim(), (40, 1));
        assert!(d.x.iter().all(|&s| s >= 0.0 && s < 4.0 && s.fract() == 0.0));
    }
    #[test]
    fn deterministic_chain() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let states = sample_states(
            array![1.0, 0.0].view(),
            array![[0.0, 1.0], [1.0, 0.0]].view(),
            &[4, 1],
            &mut rng,
        )
        .unwrap();
        assert_eq!(states, vec![0, 1, 0, 1, 0]);
    }
}
