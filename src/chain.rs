//!
//! Start and transition parameters of the hidden Markov chain
//!
//! * `MarkovChain`: point estimates `startprob` / `transmat` (classical EM)
//! * `DirichletChain`: Dirichlet priors and posteriors over them (VB-EM)
//!
use crate::error::{config_error, Result};
use crate::init::{dirichlet, dirichlet_rows};
use crate::kl::{dirichlet_expected_log, kl_dirichlet};
use crate::params::{Param, ParamTable};
use crate::prob::{is_stochastic, ln_array};
use crate::sequences::Sequences;
use ndarray::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

const CHAIN_PARAMS: [Param; 2] = [Param::Start, Param::Trans];

pub trait ChainModel: Clone + Send + Sync {
    fn param_codes(&self) -> &'static [Param] {
        &CHAIN_PARAMS
    }
    fn supplied(&self) -> Vec<Param>;
    fn has_value(&self, param: Param) -> bool;
    fn initialize<R: Rng>(
        &mut self,
        seqs: &Sequences,
        n_states: usize,
        table: &ParamTable,
        rng: &mut R,
    ) -> Result<()>;
    fn check(&self, n_states: usize) -> Result<()>;
    ///
    /// `(log startprob, log transmat)` of the point or plug-in estimates
    ///
    fn log_params(&self) -> Result<(Array1<f64>, Array2<f64>)>;
    ///
    /// Log parameters used by the trainer's forward-backward pass.
    ///
    /// `(E[log startprob], E[log transmat])` for Dirichlet posteriors.
    ///
    fn expected_log_params(&self) -> Result<(Array1<f64>, Array2<f64>)> {
        self.log_params()
    }
    ///
    /// Re-estimate from expected start counts `[K]` and transition counts `[K, K]`.
    ///
    fn m_step(&mut self, start: ArrayView1<f64>, trans: ArrayView2<f64>, table: &ParamTable);
    fn kl_divergence(&self) -> Result<f64> {
        Ok(0.0)
    }
}

fn missing<T>(name: &str) -> Result<T> {
    config_error(format!("{} is not set", name))
}

fn check_vector(v: &Array1<f64>, n_states: usize, name: &str) -> Result<()> {
    if v.len() != n_states {
        return config_error(format!(
            "{} must have length {}, found {}",
            name,
            n_states,
            v.len()
        ));
    }
    Ok(())
}

fn check_matrix(m: &Array2<f64>, n_states: usize, name: &str) -> Result<()> {
    if m.dim() != (n_states, n_states) {
        return config_error(format!(
            "{} must have shape ({}, {}), found {:?}",
            name,
            n_states,
            n_states,
            m.dim()
        ));
    }
    Ok(())
}

fn check_positive<'a>(mut values: impl Iterator<Item = &'a f64>, name: &str) -> Result<()> {
    if values.all(|&v| v > 0.0 && v.is_finite()) {
        Ok(())
    } else {
        config_error(format!("{} must be positive", name))
    }
}

///
/// Normalized copy of non-negative `v`, or `None` if it sums to zero.
///
fn normalized(v: ArrayView1<f64>) -> Option<Array1<f64>> {
    let s = v.sum();
    if s > 0.0 {
        Some(&v / s)
    } else {
        None
    }
}

//
// Point estimates
//

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkovChain {
    pub startprob: Option<Array1<f64>>,
    pub transmat: Option<Array2<f64>>,
    supplied: Vec<Param>,
}

impl MarkovChain {
    pub fn new() -> Self {
        MarkovChain::default()
    }
    pub fn with_startprob(mut self, startprob: Array1<f64>) -> Self {
        self.startprob = Some(startprob);
        self.supplied.push(Param::Start);
        self
    }
    pub fn with_transmat(mut self, transmat: Array2<f64>) -> Self {
        self.transmat = Some(transmat);
        self.supplied.push(Param::Trans);
        self
    }
}

impl ChainModel for MarkovChain {
    fn supplied(&self) -> Vec<Param> {
        self.supplied.clone()
    }
    fn has_value(&self, param: Param) -> bool {
        match param {
            Param::Start => self.startprob.is_some(),
            Param::Trans => self.transmat.is_some(),
            _ => false,
        }
    }
    fn initialize<R: Rng>(
        &mut self,
        _seqs: &Sequences,
        n_states: usize,
        table: &ParamTable,
        rng: &mut R,
    ) -> Result<()> {
        let init = 1.0 / n_states as f64;
        if table.needs_init(Param::Start) {
            self.startprob = Some(dirichlet(Array1::from_elem(n_states, init).view(), rng)?);
        }
        if table.needs_init(Param::Trans) {
            self.transmat = Some(dirichlet_rows(n_states, n_states, init, rng)?);
        }
        Ok(())
    }
    fn check(&self, n_states: usize) -> Result<()> {
        let startprob = match &self.startprob {
            Some(v) => v,
            None => return missing("startprob"),
        };
        check_vector(startprob, n_states, "startprob")?;
        if !is_stochastic(startprob.view(), 1e-6) {
            return config_error("startprob must sum to 1");
        }
        let transmat = match &self.transmat {
            Some(m) => m,
            None => return missing("transmat"),
        };
        check_matrix(transmat, n_states, "transmat")?;
        if !transmat.outer_iter().all(|row| is_stochastic(row, 1e-6)) {
            return config_error("rows of transmat must sum to 1");
        }
        Ok(())
    }
    fn log_params(&self) -> Result<(Array1<f64>, Array2<f64>)> {
        match (&self.startprob, &self.transmat) {
            (Some(s), Some(t)) => Ok((ln_array(s.view()), t.mapv(f64::ln))),
            _ => missing("startprob/transmat"),
        }
    }
    fn m_step(&mut self, start: ArrayView1<f64>, trans: ArrayView2<f64>, table: &ParamTable) {
        if table.updated(Param::Start) {
            if let (Some(startprob), Some(new)) = (self.startprob.as_mut(), normalized(start)) {
                *startprob = new;
            }
        }
        if table.updated(Param::Trans) {
            if let Some(transmat) = self.transmat.as_mut() {
                for (mut row, counts) in transmat.outer_iter_mut().zip(trans.outer_iter()) {
                    // states never left keep their row
                    if let Some(new) = normalized(counts) {
                        row.assign(&new);
                    }
                }
            }
        }
    }
}

//
// Dirichlet posteriors
//

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DirichletChain {
    pub startprob_prior: Option<Array1<f64>>,
    pub startprob_posterior: Option<Array1<f64>>,
    pub transmat_prior: Option<Array2<f64>>,
    pub transmat_posterior: Option<Array2<f64>>,
    supplied: Vec<Param>,
}

impl DirichletChain {
    pub fn new() -> Self {
        DirichletChain::default()
    }
    pub fn with_startprob_prior(mut self, prior: Array1<f64>) -> Self {
        self.startprob_prior = Some(prior);
        self
    }
    pub fn with_transmat_prior(mut self, prior: Array2<f64>) -> Self {
        self.transmat_prior = Some(prior);
        self
    }
    pub fn with_startprob_posterior(mut self, posterior: Array1<f64>) -> Self {
        self.startprob_posterior = Some(posterior);
        self.supplied.push(Param::Start);
        self
    }
    pub fn with_transmat_posterior(mut self, posterior: Array2<f64>) -> Self {
        self.transmat_posterior = Some(posterior);
        self.supplied.push(Param::Trans);
        self
    }
    ///
    /// Posterior mean of `startprob`
    ///
    pub fn startprob(&self) -> Option<Array1<f64>> {
        self.startprob_posterior
            .as_ref()
            .and_then(|p| normalized(p.view()))
    }
    ///
    /// Posterior mean of `transmat`
    ///
    pub fn transmat(&self) -> Option<Array2<f64>> {
        self.transmat_posterior.as_ref().map(|p| {
            let sums = p.sum_axis(Axis(1)).insert_axis(Axis(1));
            p / &sums
        })
    }
}

impl ChainModel for DirichletChain {
    fn supplied(&self) -> Vec<Param> {
        self.supplied.clone()
    }
    fn has_value(&self, param: Param) -> bool {
        match param {
            Param::Start => self.startprob_posterior.is_some(),
            Param::Trans => self.transmat_posterior.is_some(),
            _ => false,
        }
    }
    fn initialize<R: Rng>(
        &mut self,
        seqs: &Sequences,
        n_states: usize,
        table: &ParamTable,
        rng: &mut R,
    ) -> Result<()> {
        let init = 1.0 / n_states as f64;
        if self.startprob_prior.is_none() {
            self.startprob_prior = Some(Array1::from_elem(n_states, init));
        }
        if self.transmat_prior.is_none() {
            self.transmat_prior = Some(Array2::from_elem((n_states, n_states), init));
        }
        if table.needs_init(Param::Start) {
            let draw = dirichlet(Array1::from_elem(n_states, init).view(), rng)?;
            self.startprob_posterior = Some(draw * seqs.n_seqs() as f64);
        }
        if table.needs_init(Param::Trans) {
            let draw = dirichlet_rows(n_states, n_states, init, rng)?;
            self.transmat_posterior = Some(draw * (seqs.n_samples() as f64 / n_states as f64));
        }
        Ok(())
    }
    fn check(&self, n_states: usize) -> Result<()> {
        for (v, name) in [
            (&self.startprob_prior, "startprob_prior"),
            (&self.startprob_posterior, "startprob_posterior"),
        ] {
            match v {
                Some(v) => {
                    check_vector(v, n_states, name)?;
                    check_positive(v.iter(), name)?;
                }
                None => return missing(name),
            }
        }
        for (m, name) in [
            (&self.transmat_prior, "transmat_prior"),
            (&self.transmat_posterior, "transmat_posterior"),
        ] {
            match m {
                Some(m) => {
                    check_matrix(m, n_states, name)?;
                    check_positive(m.iter(), name)?;
                }
                None => return missing(name),
            }
        }
        Ok(())
    }
    fn log_params(&self) -> Result<(Array1<f64>, Array2<f64>)> {
        match (self.startprob(), self.transmat()) {
            (Some(s), Some(t)) => Ok((ln_array(s.view()), t.mapv(f64::ln))),
            _ => missing("startprob_posterior/transmat_posterior"),
        }
    }
    fn expected_log_params(&self) -> Result<(Array1<f64>, Array2<f64>)> {
        match (&self.startprob_posterior, &self.transmat_posterior) {
            (Some(s), Some(t)) => {
                let mut log_trans = Array2::<f64>::zeros(t.dim());
                for (mut row, alpha) in log_trans.outer_iter_mut().zip(t.outer_iter()) {
                    row.assign(&dirichlet_expected_log(alpha));
                }
                Ok((dirichlet_expected_log(s.view()), log_trans))
            }
            _ => missing("startprob_posterior/transmat_posterior"),
        }
    }
    fn m_step(&mut self, start: ArrayView1<f64>, trans: ArrayView2<f64>, table: &ParamTable) {
        if table.updated(Param::Start) {
            if let Some(prior) = &self.startprob_prior {
                self.startprob_posterior = Some(prior + &start);
            }
        }
        if table.updated(Param::Trans) {
            if let Some(prior) = &self.transmat_prior {
                self.transmat_posterior = Some(prior + &trans);
            }
        }
    }
    fn kl_divergence(&self) -> Result<f64> {
        match (
            &self.startprob_posterior,
            &self.startprob_prior,
            &self.transmat_posterior,
            &self.transmat_prior,
        ) {
            (Some(sq), Some(sp), Some(tq), Some(tp)) => {
                let mut kl = kl_dirichlet(sq.view(), sp.view());
                for (q, p) in tq.outer_iter().zip(tp.outer_iter()) {
                    kl += kl_dirichlet(q, p);
                }
                Ok(kl)
            }
            _ => missing("chain priors/posteriors"),
        }
    }
}
