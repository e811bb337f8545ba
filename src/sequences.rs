//!
//! Packed observation sequences
//!
//! All sequences are concatenated row-wise into a single `[n_samples, D]`
//! array, with `lengths` giving the number of rows of each sequence.
//!
use crate::error::{config_error, Result};
use ndarray::prelude::*;
use rayon::prelude::*;

///
/// Views of each sequence in a packed array
///
#[derive(Clone, Debug)]
pub struct Sequences<'a> {
    x: ArrayView2<'a, f64>,
    seqs: Vec<ArrayView2<'a, f64>>,
}

impl<'a> Sequences<'a> {
    ///
    /// Split `x` by `lengths`. Without `lengths`, `x` is a single sequence.
    ///
    pub fn new(x: ArrayView2<'a, f64>, lengths: Option<&[usize]>) -> Result<Self> {
        let n = x.nrows();
        if n == 0 {
            return config_error("no samples");
        }
        if x.ncols() == 0 {
            return config_error("samples have no features");
        }
        if x.iter().any(|v| !v.is_finite()) {
            return config_error("samples contain non-finite values");
        }
        let lengths = match lengths {
            Some(lengths) => lengths.to_vec(),
            None => vec![n],
        };
        if lengths.is_empty() {
            return config_error("lengths is empty");
        }
        if lengths.iter().any(|&l| l == 0) {
            return config_error("lengths contains an empty sequence");
        }
        let total: usize = lengths.iter().sum();
        if total != n {
            return config_error(format!(
                "lengths sum to {} but there are {} samples",
                total, n
            ));
        }
        let mut seqs = Vec::with_capacity(lengths.len());
        let mut start = 0;
        for l in lengths {
            seqs.push(x.slice_move(s![start..start + l, ..]));
            start += l;
        }
        Ok(Sequences { x, seqs })
    }
    /// all samples
    pub fn x(&self) -> ArrayView2<'a, f64> {
        self.x
    }
    pub fn n_seqs(&self) -> usize {
        self.seqs.len()
    }
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }
    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }
    pub fn lengths(&self) -> Vec<usize> {
        self.seqs.iter().map(|s| s.nrows()).collect()
    }
    pub fn get(&self, i: usize) -> ArrayView2<'a, f64> {
        self.seqs[i]
    }
    pub fn iter(&self) -> impl Iterator<Item = &ArrayView2<'a, f64>> {
        self.seqs.iter()
    }
    pub fn par_iter(&self) -> rayon::slice::Iter<ArrayView2<'a, f64>> {
        self.seqs.par_iter()
    }
}
