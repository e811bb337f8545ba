//!
//! Per-parameter capability records
//!
//! The `params` / `init_params` mask strings are parsed once into a
//! `ParamTable` before training starts, and the trainer only asks the table
//! afterwards.
//!
use crate::error::{config_error, Result};
use serde::{Deserialize, Serialize};

///
/// Parameter groups that can be initialized and re-estimated separately.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Param {
    /// `s`
    Start,
    /// `t`
    Trans,
    /// `e` (categorical emission probabilities)
    Emission,
    /// `m`
    Means,
    /// `c`
    Covars,
    /// `w` (mixture weights)
    Weights,
}

impl Param {
    pub fn code(&self) -> char {
        match self {
            Param::Start => 's',
            Param::Trans => 't',
            Param::Emission => 'e',
            Param::Means => 'm',
            Param::Covars => 'c',
            Param::Weights => 'w',
        }
    }
    pub fn from_code(code: char) -> Option<Param> {
        match code {
            's' => Some(Param::Start),
            't' => Some(Param::Trans),
            'e' => Some(Param::Emission),
            'm' => Some(Param::Means),
            'c' => Some(Param::Covars),
            'w' => Some(Param::Weights),
            _ => None,
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            Param::Start => "startprob",
            Param::Trans => "transmat",
            Param::Emission => "emissionprob",
            Param::Means => "means",
            Param::Covars => "covars",
            Param::Weights => "weights",
        }
    }
}

///
/// Mask string of all `params`
///
pub fn codes_to_string(params: &[Param]) -> String {
    params.iter().map(|p| p.code()).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub param: Param,
    /// value was given by the caller before fitting
    pub user_supplied: bool,
    /// listed in `init_params`
    pub init: bool,
    /// listed in `params`
    pub updated: bool,
}

impl ParamSpec {
    /// initialization collaborator must fill this parameter
    pub fn needs_init(&self) -> bool {
        self.init && !self.user_supplied
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamTable {
    specs: Vec<ParamSpec>,
}

fn parse_mask(mask: &str, applicable: &[Param], what: &str) -> Result<Vec<Param>> {
    let mut ret = Vec::new();
    for code in mask.chars() {
        match Param::from_code(code) {
            Some(p) if applicable.contains(&p) => {
                if !ret.contains(&p) {
                    ret.push(p)
                }
            }
            Some(p) => {
                return config_error(format!(
                    "{} mask {:?} contains {:?} ({}) which this model does not have",
                    what,
                    mask,
                    code,
                    p.name()
                ))
            }
            None => {
                return config_error(format!(
                    "{} mask {:?} contains unknown parameter code {:?}",
                    what, mask, code
                ))
            }
        }
    }
    Ok(ret)
}

impl ParamTable {
    ///
    /// Build the table of a model with parameters `applicable`, of which
    /// `supplied` were set by the caller.
    ///
    pub fn new(
        applicable: &[Param],
        supplied: &[Param],
        params: &str,
        init_params: &str,
    ) -> Result<Self> {
        let updated = parse_mask(params, applicable, "params")?;
        let init = parse_mask(init_params, applicable, "init_params")?;
        let specs = applicable
            .iter()
            .map(|&param| ParamSpec {
                param,
                user_supplied: supplied.contains(&param),
                init: init.contains(&param),
                updated: updated.contains(&param),
            })
            .collect();
        Ok(ParamTable { specs })
    }
    pub fn get(&self, param: Param) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.param == param)
    }
    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }
    pub fn updated(&self, param: Param) -> bool {
        self.get(param).map_or(false, |s| s.updated)
    }
    pub fn needs_init(&self, param: Param) -> bool {
        self.get(param).map_or(false, |s| s.needs_init())
    }
    ///
    /// A parameter that is neither initialized nor supplied has no value.
    ///
    pub fn check_complete(&self, has_value: impl Fn(Param) -> bool) -> Result<()> {
        for spec in self.specs.iter() {
            if !spec.needs_init() && !has_value(spec.param) {
                return config_error(format!(
                    "{} is neither supplied nor listed in init_params",
                    spec.param.name()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAUSSIAN: [Param; 4] = [Param::Start, Param::Trans, Param::Means, Param::Covars];

    #[test]
    fn table_from_masks() {
        let t = ParamTable::new(&GAUSSIAN, &[Param::Start], "stm", "stmc").unwrap();
        assert!(t.updated(Param::Means));
        assert!(!t.updated(Param::Covars));
        assert!(!t.needs_init(Param::Start));
        assert!(t.needs_init(Param::Covars));
        assert!(!t.updated(Param::Weights));
        assert_eq!(codes_to_string(&GAUSSIAN), "stmc");
    }
    #[test]
    fn unknown_and_inapplicable_codes() {
        assert!(ParamTable::new(&GAUSSIAN, &[], "stx", "")
            .unwrap_err()
            .is_config());
        assert!(ParamTable::new(&GAUSSIAN, &[], "stmc", "w")
            .unwrap_err()
            .is_config());
    }
    #[test]
    fn missing_value() {
        let t = ParamTable::new(&GAUSSIAN, &[], "stmc", "").unwrap();
        assert!(t.check_complete(|_| false).is_err());
        assert!(t.check_complete(|_| true).is_ok());
    }
}
