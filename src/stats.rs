//!
//! Sufficient-Statistics Accumulator
//!
//! Statistics of an iteration are built by
//!
//! 1. `Accumulator::begin` (zeroed, sized for the current model)
//! 2. `Accumulator::accumulate` once per sequence, with its forward-backward output
//! 3. `Accumulator::finalize`, consumed by the M-step
//!
//! Accumulation is purely additive, so accumulators of disjoint sets of
//! sequences can be combined with `merge` in any grouping.
//!
use crate::emission::EmissionModel;
use crate::error::{config_error, Result};
use crate::fb::FbOutput;
use ndarray::prelude::*;

///
/// Emission-side statistics that can be summed across sequences.
///
pub trait Stats: Clone + Send + Sync + std::fmt::Debug {
    ///
    /// Add `other` into `self`. Statistics of another shape are a
    /// configuration error and leave `self` unchanged.
    ///
    fn merge(&mut self, other: &Self) -> Result<()>;
}

///
/// Expected sufficient statistics of all sequences
///
#[derive(Clone, Debug)]
pub struct SuffStats<S> {
    pub n_seqs: usize,
    /// sum of `log P(X)` of each sequence
    pub log_prob: f64,
    /// `sum_seq gamma[0]`, `[K]`
    pub start: Array1<f64>,
    /// `sum_seq sum_t xi[t]`, `[K, K]`
    pub trans: Array2<f64>,
    pub emission: S,
}

impl<S: Stats> SuffStats<S> {
    pub fn merge(&mut self, other: &SuffStats<S>) -> Result<()> {
        if self.trans.dim() != other.trans.dim() {
            return config_error(format!(
                "cannot merge statistics of {} and {} states",
                self.start.len(),
                other.start.len()
            ));
        }
        self.emission.merge(&other.emission)?;
        self.n_seqs += other.n_seqs;
        self.log_prob += other.log_prob;
        self.start += &other.start;
        self.trans += &other.trans;
        Ok(())
    }
}

///
/// Additive builder of `SuffStats`
///
pub struct Accumulator<'a, E: EmissionModel> {
    emission: &'a E,
    stats: SuffStats<E::Stats>,
}

impl<'a, E: EmissionModel> Accumulator<'a, E> {
    pub fn begin(n_states: usize, emission: &'a E) -> Self {
        Accumulator {
            emission,
            stats: SuffStats {
                n_seqs: 0,
                log_prob: 0.0,
                start: Array1::zeros(n_states),
                trans: Array2::zeros((n_states, n_states)),
                emission: emission.new_stats(n_states),
            },
        }
    }
    ///
    /// Add a sequence `x` given its forward-backward output.
    ///
    pub fn accumulate(&mut self, x: ArrayView2<f64>, fb: &FbOutput) -> Result<()> {
        self.stats.n_seqs += 1;
        self.stats.log_prob += fb.log_prob;
        self.stats.start += &fb.posteriors.row(0);
        self.stats.trans += &fb.xi_sum();
        self.emission
            .accumulate(&mut self.stats.emission, x, fb.posteriors.view())
    }
    pub fn merge(mut self, other: Self) -> Result<Self> {
        self.stats.merge(&other.stats)?;
        Ok(self)
    }
    pub fn finalize(self) -> SuffStats<E::Stats> {
        self.stats
    }
}
