//!
//! Configuration and degeneracy errors surface before or during the first
//! iteration and are distinguishable.
//!
use ndarray::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use vhmm::covariance::{Covars, Tying};
use vhmm::emission::{CategoricalEmission, GaussianEmission, GmmEmission, VariationalCategorical};
use vhmm::{
    CategoricalHmm, CovarianceType, DirichletChain, FitConfig, GaussianHmm, GmmHmm, HmmError,
    Implementation, MarkovChain, TrainState, VariationalCategoricalHmm,
};

fn symbols() -> Array2<f64> {
    array![[0.0], [1.0], [2.0], [1.0], [0.0]]
}

#[test]
fn unexplained_symbol_is_degenerate() {
    for implementation in [Implementation::Log, Implementation::Scaling] {
        let config = FitConfig {
            implementation,
            ..FitConfig::default()
        };
        // no state emits symbol 2
        let emission = CategoricalEmission::new(3)
            .with_emissionprob(array![[0.5, 0.5, 0.0], [0.9, 0.1, 0.0]]);
        let mut hmm = CategoricalHmm::new(2, MarkovChain::new(), emission, config);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let e = hmm.fit(symbols().view(), None, &mut rng).unwrap_err();
        assert!(e.is_degenerate(), "{}", e);
        assert_eq!(hmm.state(), TrainState::Failed);
        assert!(hmm.report().history.is_empty());
    }
}

#[test]
fn symbol_out_of_range_is_config_error() {
    let mut hmm = VariationalCategoricalHmm::new(
        2,
        DirichletChain::new(),
        VariationalCategorical::new(2),
        FitConfig::default(),
    );
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
    let e = hmm.fit(symbols().view(), None, &mut rng).unwrap_err();
    assert!(e.is_config());
    assert_eq!(hmm.state(), TrainState::Uninitialized);
}

#[test]
fn mask_letter_of_other_family_is_config_error() {
    // weights exist only in mixture models
    let config = FitConfig {
        params: Some("stw".to_string()),
        ..FitConfig::default()
    };
    let mut hmm = CategoricalHmm::new(2, MarkovChain::new(), CategoricalEmission::new(3), config);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
    let e = hmm.fit(symbols().view(), None, &mut rng).unwrap_err();
    assert!(matches!(e, HmmError::Config(_)));
}

#[test]
fn unsupported_covariance_name() {
    let e = "banded".parse::<CovarianceType>().unwrap_err();
    assert!(e.is_config());
}

#[test]
fn zero_mixture_components() {
    let x = array![[0.0, 1.0], [1.0, 0.0], [0.5, 0.5]];
    let mut hmm = GmmHmm::new(
        1,
        MarkovChain::new(),
        GmmEmission::new(CovarianceType::Diag, 0),
        FitConfig::default(),
    );
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
    assert!(hmm.fit(x.view(), None, &mut rng).unwrap_err().is_config());
}

#[test]
fn collapsing_covariance_is_degenerate() {
    // state 1 only explains four collinear samples, so its re-estimated
    // covariance is singular without a diagonal floor
    let mut x = Array2::<f64>::zeros((24, 2));
    for i in 0..20 {
        x[[i, 0]] = 1000.0 + (i % 5) as f64 * 0.3;
        x[[i, 1]] = 1000.0 + (i / 5) as f64 * 0.4;
    }
    for t in 0..4 {
        x[[20 + t, 0]] = t as f64;
        x[[20 + t, 1]] = 2.0 * t as f64;
    }
    for implementation in [Implementation::Log, Implementation::Scaling] {
        let config = FitConfig {
            implementation,
            min_covar: 0.0,
            n_iter: 10,
            ..FitConfig::default()
        };
        let chain = MarkovChain::new()
            .with_startprob(array![0.5, 0.5])
            .with_transmat(array![[0.9, 0.1], [0.1, 0.9]]);
        let emission = GaussianEmission::new(CovarianceType::Full)
            .with_means(array![[1000.0, 1000.0], [1.5, 3.0]])
            .with_covars(Covars::from_full(
                Array2::<f64>::eye(2).view(),
                CovarianceType::Full,
                Tying::global(2),
            ));
        let mut hmm = GaussianHmm::new(2, chain, emission, config);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let e = hmm.fit(x.view(), Some(&[20, 4]), &mut rng).unwrap_err();
        assert!(e.is_degenerate(), "{}", e);
        assert_eq!(hmm.state(), TrainState::Failed);
        assert_eq!(hmm.report().n_iter, 1);
    }
}
