//!
//! Training configuration
//!
use crate::error::Result;
use crate::fb::{Algorithm, Implementation};
use serde::{Deserialize, Serialize};
use std::path::Path;

///
/// Options of one training run.
///
/// `params`/`init_params` are mask strings of parameter letters
/// (`s` start, `t` transition, `e` emission, `w` weights, `m` means,
/// `c` covars). `None` selects every parameter of the model family.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// iteration cap
    pub n_iter: usize,
    /// convergence threshold on the gain of the monitored value
    pub tol: f64,
    pub implementation: Implementation,
    /// decoder used by `predict` and `decode`
    pub algorithm: Algorithm,
    /// parameters re-estimated by the M-step
    pub params: Option<String>,
    /// parameters initialized from data when not supplied
    pub init_params: Option<String>,
    /// fail on regression or NaN instead of logging a warning
    pub strict: bool,
    /// run the E-step of each sequence on the rayon pool
    pub parallel: bool,
    /// added to the diagonal of re-estimated classical covariances
    pub min_covar: f64,
    /// tag of the log lines of this run
    pub run_id: String,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            n_iter: 100,
            tol: 1e-6,
            implementation: Implementation::default(),
            algorithm: Algorithm::default(),
            params: None,
            init_params: None,
            strict: false,
            parallel: false,
            min_covar: 1e-3,
            run_id: "hmm".to_string(),
        }
    }
}

impl FitConfig {
    pub fn from_json_str(s: &str) -> Result<FitConfig> {
        Ok(serde_json::from_str(s)?)
    }
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<FitConfig> {
        let s = std::fs::read_to_string(path)?;
        FitConfig::from_json_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_uses_defaults() {
        let c = FitConfig::from_json_str(r#"{"n_iter": 5, "implementation": "scaling"}"#).unwrap();
        assert_eq!(c.n_iter, 5);
        assert_eq!(c.implementation, Implementation::Scaling);
        assert_eq!(c.algorithm, Algorithm::Viterbi);
        assert_eq!(c.tol, 1e-6);
        assert_eq!(c.params, None);
        assert_eq!(c.run_id, "hmm");
    }
    #[test]
    fn from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, r#"{{"params": "st", "strict": true, "algorithm": "map"}}"#).unwrap();
        let c = FitConfig::from_json_file(f.path()).unwrap();
        assert_eq!(c.algorithm, Algorithm::Map);
        assert_eq!(c.params.as_deref(), Some("st"));
        assert!(c.strict);
        assert!(FitConfig::from_json_file("/nonexistent/config.json").is_err());
    }
    #[test]
    fn malformed_json() {
        let e = FitConfig::from_json_str(r#"{"n_iter": "many"}"#).unwrap_err();
        assert!(matches!(e, crate::error::HmmError::Json(_)));
    }
}
