//!
//! EM Trainer and Variational Trainer
//!
//! One training loop serves both: the classical models plug a
//! `MarkovChain` and a point-estimate emission family, the variational
//! models a `DirichletChain` and a prior/posterior emission family. The
//! chain and emission expose expected log parameters and KL terms, which
//! are the exact log parameters and zero for the classical ones, so the
//! monitored value is the total log-likelihood of classical EM and the
//! evidence lower bound of VB-EM.
//!
use crate::chain::{ChainModel, DirichletChain, MarkovChain};
use crate::config::FitConfig;
use crate::emission::{
    CategoricalEmission, EmissionModel, GaussianEmission, GmmEmission, VariationalCategorical,
    VariationalGaussian, VariationalGmm,
};
use crate::error::{config_error, Result};
use crate::fb::{best_path, forward, forward_backward, Algorithm};
use crate::monitor::{ConvergenceMonitor, TrainState};
use crate::params::{codes_to_string, Param, ParamTable};
use crate::sequences::Sequences;
use crate::stats::{Accumulator, SuffStats};
use log::{debug, info, warn};
use ndarray::prelude::*;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

pub type CategoricalHmm = Hmm<MarkovChain, CategoricalEmission>;
pub type GaussianHmm = Hmm<MarkovChain, GaussianEmission>;
pub type GmmHmm = Hmm<MarkovChain, GmmEmission>;
pub type VariationalCategoricalHmm = Hmm<DirichletChain, VariationalCategorical>;
pub type VariationalGaussianHmm = Hmm<DirichletChain, VariationalGaussian>;
pub type VariationalGmmHmm = Hmm<DirichletChain, VariationalGmm>;

///
/// Summary of a training run
///
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FitReport {
    pub run_id: String,
    pub state: TrainState,
    pub n_iter: usize,
    /// monitored value of each iteration
    pub history: Vec<f64>,
    pub converged: bool,
}

///
/// Hidden Markov model with `n_states` states
///
#[derive(Clone, Debug)]
pub struct Hmm<C: ChainModel, E: EmissionModel> {
    pub n_states: usize,
    pub chain: C,
    pub emission: E,
    pub config: FitConfig,
    monitor: ConvergenceMonitor,
    state: TrainState,
}

impl<C: ChainModel, E: EmissionModel> Hmm<C, E> {
    pub fn new(n_states: usize, chain: C, emission: E, config: FitConfig) -> Self {
        let monitor = ConvergenceMonitor::new(config.tol, config.n_iter, config.strict);
        Hmm {
            n_states,
            chain,
            emission,
            config,
            monitor,
            state: TrainState::Uninitialized,
        }
    }
    pub fn state(&self) -> TrainState {
        self.state
    }
    pub fn monitor(&self) -> &ConvergenceMonitor {
        &self.monitor
    }
    pub fn chain(&self) -> &C {
        &self.chain
    }
    pub fn emission(&self) -> &E {
        &self.emission
    }
    ///
    /// Parameters of this model in mask letter order
    ///
    pub fn param_codes(&self) -> Vec<Param> {
        self.chain
            .param_codes()
            .iter()
            .chain(self.emission.param_codes().iter())
            .copied()
            .collect()
    }
    ///
    /// Capability record of each parameter, from the masks of the config
    /// and the values given to the chain and emission.
    ///
    pub fn param_table(&self) -> Result<ParamTable> {
        let codes = self.param_codes();
        let all = codes_to_string(&codes);
        let supplied: Vec<Param> = self
            .chain
            .supplied()
            .into_iter()
            .chain(self.emission.supplied())
            .collect();
        ParamTable::new(
            &codes,
            &supplied,
            self.config.params.as_deref().unwrap_or(&all),
            self.config.init_params.as_deref().unwrap_or(&all),
        )
    }
    fn check(&self, n_features: usize) -> Result<()> {
        if self.n_states == 0 {
            return config_error("n_states must be positive");
        }
        self.chain.check(self.n_states)?;
        self.emission.check(self.n_states, n_features)
    }
    ///
    /// `Uninitialized -> Initialized`: fill parameters that are listed in
    /// `init_params` and not supplied, then validate every shape.
    ///
    fn initialize<R: Rng>(&mut self, seqs: &Sequences, table: &ParamTable, rng: &mut R) -> Result<()> {
        if self.n_states == 0 {
            return config_error("n_states must be positive");
        }
        if !(self.config.tol >= 0.0) {
            return config_error(format!("tol must be non-negative, found {}", self.config.tol));
        }
        self.emission.check_samples(seqs.x())?;
        table.check_complete(|p| self.chain.has_value(p) || self.emission.has_value(p))?;
        self.chain.initialize(seqs, self.n_states, table, rng)?;
        self.emission.initialize(seqs, self.n_states, table, rng)?;
        self.check(seqs.n_features())?;
        self.state = TrainState::Initialized;
        debug!(
            "[{}] initialized n_states={} n_seqs={} n_samples={} params={:?}",
            self.config.run_id,
            self.n_states,
            seqs.n_seqs(),
            seqs.n_samples(),
            table.specs()
        );
        Ok(())
    }
    fn accumulate_sequence<'a>(
        &'a self,
        mut acc: Accumulator<'a, E>,
        x: ArrayView2<f64>,
        log_start: ArrayView1<f64>,
        log_trans: ArrayView2<f64>,
    ) -> Result<Accumulator<'a, E>> {
        let frames = self.emission.expected_log_likelihood(x)?;
        let fb = forward_backward(self.config.implementation, log_start, log_trans, frames.view())?;
        acc.accumulate(x, &fb)?;
        Ok(acc)
    }
    ///
    /// Forward-backward on every sequence and accumulate statistics.
    ///
    fn e_step(&self, seqs: &Sequences) -> Result<SuffStats<E::Stats>> {
        let (log_start, log_trans) = self.chain.expected_log_params()?;
        let (log_start, log_trans) = (log_start.view(), log_trans.view());
        let begin = || Accumulator::begin(self.n_states, &self.emission);
        let acc = if self.config.parallel {
            seqs.par_iter()
                .try_fold(begin, |acc, x| {
                    self.accumulate_sequence(acc, x.view(), log_start, log_trans)
                })
                .try_reduce(begin, |a, b| a.merge(b))?
        } else {
            seqs.iter().try_fold(begin(), |acc, x| {
                self.accumulate_sequence(acc, x.view(), log_start, log_trans)
            })?
        };
        Ok(acc.finalize())
    }
    fn m_step(&mut self, stats: &SuffStats<E::Stats>, table: &ParamTable) -> Result<()> {
        self.chain
            .m_step(stats.start.view(), stats.trans.view(), table);
        self.emission.m_step(&stats.emission, table, &self.config)
    }
    ///
    /// Monitored value of the current parameters given the statistics of
    /// their E-step: `log P(X)` minus the KL of the posteriors to the priors.
    ///
    fn lower_bound(&self, stats: &SuffStats<E::Stats>) -> Result<f64> {
        Ok(stats.log_prob - self.chain.kl_divergence()? - self.emission.kl_divergence()?)
    }
    ///
    /// Fit to the packed samples `x` split into sequences by `lengths`
    /// (one sequence if `None`).
    ///
    pub fn fit<R: Rng>(
        &mut self,
        x: ArrayView2<f64>,
        lengths: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<FitReport> {
        self.fit_with_cancel(x, lengths, rng, &AtomicBool::new(false))
    }
    ///
    /// `fit` that stops in `TrainState::Cancelled` once `cancel` is set.
    /// The flag is checked between iterations.
    ///
    pub fn fit_with_cancel<R: Rng>(
        &mut self,
        x: ArrayView2<f64>,
        lengths: Option<&[usize]>,
        rng: &mut R,
        cancel: &AtomicBool,
    ) -> Result<FitReport> {
        self.state = TrainState::Uninitialized;
        let seqs = Sequences::new(x, lengths)?;
        let table = self.param_table()?;
        self.initialize(&seqs, &table, rng)?;

        self.monitor = ConvergenceMonitor::new(self.config.tol, self.config.n_iter, self.config.strict);
        self.state = TrainState::Iterating;
        if let Err(e) = self.iterate(&seqs, &table, cancel) {
            warn!(
                "[{}] failed at iter={}: {}",
                self.config.run_id,
                self.monitor.iter() + 1,
                e
            );
            self.state = TrainState::Failed;
            return Err(e);
        }
        info!(
            "[{}] finished state={:?} n_iter={}",
            self.config.run_id,
            self.state,
            self.monitor.iter()
        );
        Ok(self.report())
    }
    ///
    /// `Iterating -> Converged | MaxIterReached | Cancelled`. An error leaves
    /// the parameters of the failing iteration in place.
    ///
    fn iterate(&mut self, seqs: &Sequences, table: &ParamTable, cancel: &AtomicBool) -> Result<()> {
        let run_id = self.config.run_id.clone();
        while self.state == TrainState::Iterating {
            if cancel.load(Ordering::Relaxed) {
                info!("[{}] cancelled after {} iterations", run_id, self.monitor.iter());
                self.state = TrainState::Cancelled;
                break;
            }
            if self.monitor.exhausted() {
                self.state = TrainState::MaxIterReached;
                break;
            }
            let stats = self.e_step(seqs)?;
            let bound = self.lower_bound(&stats)?;
            self.m_step(&stats, table)?;
            self.monitor.push(bound)?;
            info!(
                "[{}] iter={} value={} delta={:?}",
                run_id,
                self.monitor.iter(),
                bound,
                self.monitor.delta()
            );
            if self.monitor.regressed() {
                warn!(
                    "[{}] monitored value decreased at iter={} (delta={:?})",
                    run_id,
                    self.monitor.iter(),
                    self.monitor.delta()
                );
            }
            if self.monitor.converged() {
                self.state = TrainState::Converged;
            }
        }
        Ok(())
    }
    pub fn report(&self) -> FitReport {
        FitReport {
            run_id: self.config.run_id.clone(),
            state: self.state,
            n_iter: self.monitor.iter(),
            history: self.monitor.history().to_vec(),
            converged: self.state == TrainState::Converged,
        }
    }
    ///
    /// Total log-likelihood of `x` under the current (plug-in) parameters.
    /// No parameter is changed.
    ///
    pub fn score(&self, x: ArrayView2<f64>, lengths: Option<&[usize]>) -> Result<f64> {
        let seqs = Sequences::new(x, lengths)?;
        self.check(seqs.n_features())?;
        self.emission.check_samples(seqs.x())?;
        let (log_start, log_trans) = self.chain.log_params()?;
        let mut total = 0.0;
        for x in seqs.iter() {
            let frames = self.emission.log_likelihood(x.view())?;
            total += forward(
                self.config.implementation,
                log_start.view(),
                log_trans.view(),
                frames.view(),
            )?;
        }
        Ok(total)
    }
    ///
    /// State posteriors `[N, K]` of every sample under the current (plug-in)
    /// parameters.
    ///
    pub fn predict_proba(&self, x: ArrayView2<f64>, lengths: Option<&[usize]>) -> Result<Array2<f64>> {
        let seqs = Sequences::new(x, lengths)?;
        self.check(seqs.n_features())?;
        self.emission.check_samples(seqs.x())?;
        let (log_start, log_trans) = self.chain.log_params()?;
        let mut posteriors = Array2::<f64>::zeros((seqs.n_samples(), self.n_states));
        let mut offset = 0;
        for x in seqs.iter() {
            let frames = self.emission.log_likelihood(x.view())?;
            let fb = forward_backward(
                self.config.implementation,
                log_start.view(),
                log_trans.view(),
                frames.view(),
            )?;
            let t = x.nrows();
            posteriors
                .slice_mut(s![offset..offset + t, ..])
                .assign(&fb.posteriors);
            offset += t;
        }
        Ok(posteriors)
    }
    ///
    /// Most probable state sequence of `x` and its log-probability, by the
    /// decoder of `config.algorithm`.
    ///
    pub fn decode(&self, x: ArrayView2<f64>, lengths: Option<&[usize]>) -> Result<(f64, Vec<usize>)> {
        self.decode_with(self.config.algorithm, x, lengths)
    }
    ///
    /// `Viterbi` gives `log P(X, Z*)` of the best joint path.
    /// `Map` gives `log P(X)` and the state of maximum posterior per sample.
    ///
    pub fn decode_with(
        &self,
        algorithm: Algorithm,
        x: ArrayView2<f64>,
        lengths: Option<&[usize]>,
    ) -> Result<(f64, Vec<usize>)> {
        match algorithm {
            Algorithm::Viterbi => {
                let seqs = Sequences::new(x, lengths)?;
                self.check(seqs.n_features())?;
                self.emission.check_samples(seqs.x())?;
                let (log_start, log_trans) = self.chain.log_params()?;
                let mut log_prob = 0.0;
                let mut states = Vec::with_capacity(seqs.n_samples());
                for x in seqs.iter() {
                    let frames = self.emission.log_likelihood(x.view())?;
                    let (lp, path) = best_path(log_start.view(), log_trans.view(), frames.view())?;
                    log_prob += lp;
                    states.extend(path);
                }
                Ok((log_prob, states))
            }
            Algorithm::Map => {
                let log_prob = self.score(x, lengths)?;
                let posteriors = self.predict_proba(x, lengths)?;
                let states = posteriors.outer_iter().map(argmax).collect();
                Ok((log_prob, states))
            }
        }
    }
    ///
    /// Most probable state of each sample, by the decoder of
    /// `config.algorithm`.
    ///
    pub fn predict(&self, x: ArrayView2<f64>, lengths: Option<&[usize]>) -> Result<Vec<usize>> {
        self.decode(x, lengths).map(|(_, states)| states)
    }
}

fn argmax(row: ArrayView1<f64>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(i_max, p_max), (i, &p)| {
            if p > p_max {
                (i, p)
            } else {
                (i_max, p_max)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::{CovarianceType, Covars, Tying};
    use crate::error::HmmError;
    use crate::fb::Implementation;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use test_case::test_case;

    fn two_blobs() -> Array2<f64> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        Array2::from_shape_fn((60, 1), |(i, _)| {
            let center = if (i / 10) % 2 == 0 { 0.0 } else { 5.0 };
            center + rng.gen_range(-0.5..0.5)
        })
    }

    fn strict_config(implementation: Implementation) -> FitConfig {
        FitConfig {
            n_iter: 50,
            tol: 1e-6,
            strict: true,
            min_covar: 1e-6,
            implementation,
            ..FitConfig::default()
        }
    }

    #[test_case(Implementation::Log ; "log")]
    #[test_case(Implementation::Scaling ; "scaling")]
    fn gaussian_fit_separates_blobs(implementation: Implementation) {
        let x = two_blobs();
        let mut hmm = GaussianHmm::new(
            2,
            MarkovChain::new(),
            GaussianEmission::new(CovarianceType::Diag),
            strict_config(implementation),
        );
        let report = hmm
            .fit(x.view(), Some(&[30, 30]), &mut Xoshiro256PlusPlus::seed_from_u64(0))
            .unwrap();
        assert!(report.state.is_terminal());
        assert_eq!(report.n_iter, report.history.len());
        let labels = hmm.predict(x.view(), Some(&[30, 30])).unwrap();
        assert_ne!(labels[0], labels[10]);
        assert_eq!(labels[0], labels[20]);
        let score = hmm.score(x.view(), Some(&[30, 30])).unwrap();
        assert!(score.is_finite());
        let proba = hmm.predict_proba(x.view(), None).unwrap();
        for row in proba.outer_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn viterbi_agrees_with_map_on_blobs() {
        let x = two_blobs();
        let lengths = [30, 30];
        let mut hmm = GaussianHmm::new(
            2,
            MarkovChain::new(),
            GaussianEmission::new(CovarianceType::Diag),
            strict_config(Implementation::Log),
        );
        hmm.fit(x.view(), Some(&lengths), &mut Xoshiro256PlusPlus::seed_from_u64(0))
            .unwrap();
        let (lp_viterbi, viterbi) = hmm
            .decode_with(Algorithm::Viterbi, x.view(), Some(&lengths))
            .unwrap();
        let (lp_map, map) = hmm
            .decode_with(Algorithm::Map, x.view(), Some(&lengths))
            .unwrap();
        assert_eq!(viterbi.len(), 60);
        assert_eq!(viterbi, map);
        // one path against the sum over all paths
        assert!(lp_viterbi <= lp_map);
        assert_abs_diff_eq!(lp_map, hmm.score(x.view(), Some(&lengths)).unwrap(), epsilon = 1e-9);
        for block in 0..6 {
            let first = viterbi[block * 10];
            assert!(viterbi[block * 10..(block + 1) * 10].iter().all(|&s| s == first));
        }
        assert_eq!(hmm.predict(x.view(), Some(&lengths)).unwrap(), viterbi);
        assert_eq!(hmm.decode(x.view(), Some(&lengths)).unwrap().1, viterbi);
    }

    #[test]
    fn error_during_iteration_is_failed() {
        let x = array![[0.0], [1.0], [2.0], [1.0]];
        // symbol 2 is emitted by no state
        let emission = CategoricalEmission::new(3)
            .with_emissionprob(array![[0.5, 0.5, 0.0], [0.9, 0.1, 0.0]]);
        let mut hmm = CategoricalHmm::new(2, MarkovChain::new(), emission, strict_config(Implementation::Log));
        let e = hmm
            .fit(x.view(), None, &mut Xoshiro256PlusPlus::seed_from_u64(0))
            .unwrap_err();
        assert!(e.is_degenerate());
        assert_eq!(hmm.state(), TrainState::Failed);
        assert!(hmm.state().is_terminal());
        let report = hmm.report();
        assert_eq!(report.state, TrainState::Failed);
        assert!(!report.converged);
        assert_eq!(report.n_iter, 0);
    }

    #[test]
    fn max_iter_is_not_convergence() {
        let x = two_blobs();
        let config = FitConfig {
            n_iter: 2,
            tol: 0.0,
            ..FitConfig::default()
        };
        let mut hmm = VariationalGaussianHmm::new(
            2,
            DirichletChain::new(),
            VariationalGaussian::new(CovarianceType::Full),
            config,
        );
        let report = hmm
            .fit(x.view(), None, &mut Xoshiro256PlusPlus::seed_from_u64(1))
            .unwrap();
        assert_eq!(report.state, TrainState::MaxIterReached);
        assert!(!report.converged);
        assert_eq!(report.n_iter, 2);
    }

    #[test]
    fn cancelled_before_first_iteration() {
        let x = two_blobs();
        let mut hmm = GaussianHmm::new(
            2,
            MarkovChain::new(),
            GaussianEmission::new(CovarianceType::Spherical),
            FitConfig::default(),
        );
        let cancel = AtomicBool::new(true);
        let report = hmm
            .fit_with_cancel(x.view(), None, &mut Xoshiro256PlusPlus::seed_from_u64(0), &cancel)
            .unwrap();
        assert_eq!(report.state, TrainState::Cancelled);
        assert_eq!(report.n_iter, 0);
        assert_eq!(hmm.state(), TrainState::Cancelled);
    }

    #[test]
    fn frozen_parameters_are_not_updated() {
        let x = two_blobs();
        let means = array![[0.0], [5.0]];
        let config = FitConfig {
            params: Some("stc".to_string()),
            n_iter: 5,
            ..FitConfig::default()
        };
        let mut hmm = GaussianHmm::new(
            2,
            MarkovChain::new().with_startprob(array![0.5, 0.5]),
            GaussianEmission::new(CovarianceType::Diag).with_means(means.clone()),
            config,
        );
        hmm.fit(x.view(), None, &mut Xoshiro256PlusPlus::seed_from_u64(0))
            .unwrap();
        assert_eq!(hmm.emission().means.as_ref().unwrap(), &means);
        let table = hmm.param_table().unwrap();
        assert!(!table.updated(Param::Means));
        assert!(table.get(Param::Start).unwrap().user_supplied);
    }

    #[test]
    fn parallel_matches_serial() {
        let x = two_blobs();
        let lengths = [10, 20, 15, 15];
        let fit = |parallel: bool| {
            let config = FitConfig {
                n_iter: 10,
                parallel,
                ..FitConfig::default()
            };
            let mut hmm = VariationalGaussianHmm::new(
                2,
                DirichletChain::new(),
                VariationalGaussian::new(CovarianceType::Diag),
                config,
            );
            hmm.fit(x.view(), Some(&lengths), &mut Xoshiro256PlusPlus::seed_from_u64(7))
                .unwrap()
        };
        let serial = fit(false);
        let parallel = fit(true);
        assert_eq!(serial.n_iter, parallel.n_iter);
        for (a, b) in serial.history.iter().zip(parallel.history.iter()) {
            assert_relative_eq!(a, b, max_relative = 1e-9);
        }
    }

    #[test]
    fn configuration_errors() {
        let x = two_blobs();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);

        // unknown mask letter
        let config = FitConfig {
            params: Some("stz".to_string()),
            ..FitConfig::default()
        };
        let mut hmm = GaussianHmm::new(
            2,
            MarkovChain::new(),
            GaussianEmission::new(CovarianceType::Full),
            config,
        );
        assert!(hmm.fit(x.view(), None, &mut rng).unwrap_err().is_config());
        assert_eq!(hmm.state(), TrainState::Uninitialized);

        // lengths not summing to the number of samples
        let mut hmm = GaussianHmm::new(
            2,
            MarkovChain::new(),
            GaussianEmission::new(CovarianceType::Full),
            FitConfig::default(),
        );
        assert!(hmm
            .fit(x.view(), Some(&[10, 10]), &mut rng)
            .unwrap_err()
            .is_config());

        // supplied covars of the wrong layout
        let covars = Covars::from_full(
            Array2::<f64>::eye(1).view(),
            CovarianceType::Full,
            Tying::global(3),
        );
        let mut hmm = GaussianHmm::new(
            2,
            MarkovChain::new(),
            GaussianEmission::new(CovarianceType::Full).with_covars(covars),
            FitConfig::default(),
        );
        assert!(hmm.fit(x.view(), None, &mut rng).unwrap_err().is_config());

        // not supplied and not initialized
        let config = FitConfig {
            init_params: Some("st".to_string()),
            ..FitConfig::default()
        };
        let mut hmm = GaussianHmm::new(
            2,
            MarkovChain::new(),
            GaussianEmission::new(CovarianceType::Full),
            config,
        );
        let e = hmm.fit(x.view(), None, &mut rng).unwrap_err();
        assert!(matches!(e, HmmError::Config(_)));
    }
}
