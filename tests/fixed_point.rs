//!
//! Converged parameters are a fixed point: fitting again from them, without
//! re-initialization, moves the monitored value by less than the tolerance.
//!
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use test_case::test_case;
use vhmm::emission::{CategoricalEmission, EmissionModel, GaussianEmission, VariationalGaussian};
use vhmm::mocks::{categorical_example, gaussian_example};
use vhmm::{
    CategoricalHmm, ChainModel, CovarianceType, DirichletChain, FitConfig, GaussianHmm, Hmm,
    MarkovChain, TrainState, VariationalGaussianHmm,
};

const TOL: f64 = 1e-4;

fn refit<C: ChainModel, E: EmissionModel>(
    hmm: &mut Hmm<C, E>,
    x: ndarray::ArrayView2<f64>,
    lengths: &[usize],
) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
    let first = hmm.fit(x, Some(lengths), &mut rng).unwrap();
    assert_eq!(first.state, TrainState::Converged);
    let converged_value = *first.history.last().unwrap();

    hmm.config.init_params = Some(String::new());
    hmm.config.n_iter = 2;
    let second = hmm.fit(x, Some(lengths), &mut rng).unwrap();
    assert_eq!(second.n_iter, second.history.len());
    assert!((second.history[0] - converged_value).abs() < TOL);
    if let [a, b] = second.history[..] {
        assert!((b - a).abs() < TOL);
    }
}

fn config() -> FitConfig {
    FitConfig {
        n_iter: 1000,
        tol: 1e-5,
        min_covar: 1e-6,
        ..FitConfig::default()
    }
}

#[test_case(CovarianceType::Diag ; "diag")]
#[test_case(CovarianceType::Full ; "full")]
fn gaussian_hmm(covariance_type: CovarianceType) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let data = gaussian_example(2, 2, &[100, 100], &mut rng).unwrap();
    let mut hmm = GaussianHmm::new(
        2,
        MarkovChain::new(),
        GaussianEmission::new(covariance_type),
        config(),
    );
    refit(&mut hmm, data.x.view(), &data.lengths);
}

#[test_case(CovarianceType::Spherical ; "spherical")]
#[test_case(CovarianceType::Tied ; "tied")]
fn variational_gaussian_hmm(covariance_type: CovarianceType) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let data = gaussian_example(2, 2, &[100, 100], &mut rng).unwrap();
    let mut hmm = VariationalGaussianHmm::new(
        2,
        DirichletChain::new(),
        VariationalGaussian::new(covariance_type),
        config(),
    );
    refit(&mut hmm, data.x.view(), &data.lengths);
}

#[test]
fn categorical_hmm() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(6);
    let data = categorical_example(2, 3, &[150, 150], &mut rng).unwrap();
    let mut hmm = CategoricalHmm::new(2, MarkovChain::new(), CategoricalEmission::new(3), config());
    refit(&mut hmm, data.x.view(), &data.lengths);
}
