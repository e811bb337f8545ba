//!
//! Subcommands of the `vhmm` binary
//!
//! Samples are exchanged as json `{"x": [[..], ..], "lengths": [..]}`.
//!
use crate::chain::{ChainModel, DirichletChain, MarkovChain};
use crate::config::FitConfig;
use crate::covariance::CovarianceType;
use crate::emission::{
    CategoricalEmission, EmissionModel, GaussianEmission, GmmEmission, VariationalCategorical,
    VariationalGaussian, VariationalGmm,
};
use crate::error::{config_error, HmmError, Result};
use crate::mocks;
use crate::model::{FitReport, Hmm};
use log::info;
use ndarray::prelude::*;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

///
/// Json form of packed samples
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub x: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lengths: Option<Vec<usize>>,
}

impl DataFile {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<DataFile> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }
    pub fn to_array(&self) -> Result<Array2<f64>> {
        let n_features = self.x.first().map_or(0, |row| row.len());
        if self.x.iter().any(|row| row.len() != n_features) {
            return config_error("rows of x have different lengths");
        }
        let data: Vec<f64> = self.x.iter().flatten().copied().collect();
        Array2::from_shape_vec((self.x.len(), n_features), data)
            .or_else(|e| config_error(e.to_string()))
    }
    pub fn from_dataset(dataset: &mocks::Dataset) -> DataFile {
        DataFile {
            x: dataset.x.outer_iter().map(|row| row.to_vec()).collect(),
            lengths: Some(dataset.lengths.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Categorical,
    Gaussian,
    Gmm,
}

impl FromStr for ModelKind {
    type Err = HmmError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "categorical" => Ok(ModelKind::Categorical),
            "gaussian" => Ok(ModelKind::Gaussian),
            "gmm" => Ok(ModelKind::Gmm),
            _ => config_error(format!("unknown model {:?}", s)),
        }
    }
}

///
/// Model description of `fit`
///
#[derive(Clone, Debug)]
pub struct ModelOptions {
    pub kind: ModelKind,
    pub variational: bool,
    pub n_states: usize,
    pub covariance_type: CovarianceType,
    pub n_mix: usize,
    /// defaults to `max(x) + 1`
    pub n_symbols: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
struct FitOutput<C: Serialize, E: Serialize> {
    report: FitReport,
    score: f64,
    /// decoded state of each sample
    states: Vec<usize>,
    chain: C,
    emission: E,
}

fn run<C, E>(
    n_states: usize,
    chain: C,
    emission: E,
    config: FitConfig,
    x: ArrayView2<f64>,
    lengths: Option<&[usize]>,
    seed: u64,
) -> Result<serde_json::Value>
where
    C: ChainModel + Serialize,
    E: EmissionModel + Serialize,
{
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut hmm = Hmm::new(n_states, chain, emission, config);
    let report = hmm.fit(x, lengths, &mut rng)?;
    let score = hmm.score(x, lengths)?;
    let states = hmm.predict(x, lengths)?;
    info!(
        "[{}] state={:?} n_iter={} score={}",
        report.run_id, report.state, report.n_iter, score
    );
    let output = FitOutput {
        report,
        score,
        states,
        chain: hmm.chain,
        emission: hmm.emission,
    };
    Ok(serde_json::to_value(output)?)
}

///
/// Fit the model to `data` and return the report and fitted parameters.
///
pub fn fit(opts: &ModelOptions, data: &DataFile, config: FitConfig, seed: u64) -> Result<serde_json::Value> {
    let x = data.to_array()?;
    let lengths = data.lengths.as_deref();
    let k = opts.n_states;
    let ty = opts.covariance_type;
    match (opts.kind, opts.variational) {
        (ModelKind::Categorical, variational) => {
            let n_symbols = match opts.n_symbols {
                Some(n) => n,
                None => x.iter().fold(0.0f64, |a, &b| a.max(b)) as usize + 1,
            };
            if variational {
                let em = VariationalCategorical::new(n_symbols);
                run(k, DirichletChain::new(), em, config, x.view(), lengths, seed)
            } else {
                let em = CategoricalEmission::new(n_symbols);
                run(k, MarkovChain::new(), em, config, x.view(), lengths, seed)
            }
        }
        (ModelKind::Gaussian, false) => {
            let em = GaussianEmission::new(ty);
            run(k, MarkovChain::new(), em, config, x.view(), lengths, seed)
        }
        (ModelKind::Gaussian, true) => {
            let em = VariationalGaussian::new(ty);
            run(k, DirichletChain::new(), em, config, x.view(), lengths, seed)
        }
        (ModelKind::Gmm, false) => {
            let em = GmmEmission::new(ty, opts.n_mix);
            run(k, MarkovChain::new(), em, config, x.view(), lengths, seed)
        }
        (ModelKind::Gmm, true) => {
            let em = VariationalGmm::new(ty, opts.n_mix);
            run(k, DirichletChain::new(), em, config, x.view(), lengths, seed)
        }
    }
}

///
/// Synthetic samples of a Gaussian HMM (or a categorical HMM if
/// `n_symbols` is given).
///
pub fn sample(
    n_states: usize,
    n_features: usize,
    n_symbols: Option<usize>,
    lengths: &[usize],
    seed: u64,
) -> Result<DataFile> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let dataset = match n_symbols {
        Some(n_symbols) => mocks::categorical_example(n_states, n_symbols, lengths, &mut rng)?,
        None => mocks::gaussian_example(n_states, n_features, lengths, &mut rng)?,
    };
    Ok(DataFile::from_dataset(&dataset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::Algorithm;

    #[test]
    fn sample_then_fit() {
        let data = sample(2, 2, None, &[50, 50], 0).unwrap();
        let opts = ModelOptions {
            kind: ModelKind::Gaussian,
            variational: true,
            n_states: 2,
            covariance_type: CovarianceType::Diag,
            n_mix: 1,
            n_symbols: None,
        };
        let config = FitConfig {
            n_iter: 20,
            ..FitConfig::default()
        };
        let out = fit(&opts, &data, config, 0).unwrap();
        assert!(out["score"].as_f64().unwrap().is_finite());
        assert!(out["report"]["n_iter"].as_u64().unwrap() >= 1);
        assert!(out["emission"]["posterior"].is_object());
        assert_eq!(out["states"].as_array().unwrap().len(), 100);
    }
    #[test]
    fn categorical_symbols_from_data() {
        let data = sample(2, 1, Some(3), &[40], 1).unwrap();
        let opts = ModelOptions {
            kind: ModelKind::Categorical,
            variational: false,
            n_states: 2,
            covariance_type: CovarianceType::Full,
            n_mix: 1,
            n_symbols: Some(3),
        };
        let config = FitConfig {
            algorithm: Algorithm::Map,
            ..FitConfig::default()
        };
        let out = fit(&opts, &data, config, 0).unwrap();
        assert_eq!(out["emission"]["n_symbols"].as_u64(), Some(3));
        let states = out["states"].as_array().unwrap();
        assert_eq!(states.len(), 40);
        assert!(states.iter().all(|s| s.as_u64().unwrap() < 2));
    }
    #[test]
    fn ragged_rows() {
        let data = DataFile {
            x: vec![vec![0.0, 1.0], vec![2.0]],
            lengths: None,
        };
        assert!(data.to_array().unwrap_err().is_config());
        assert!("hsmm".parse::<ModelKind>().unwrap_err().is_config());
    }
}
