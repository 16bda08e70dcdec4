//! Common value types for trexsub

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::{Error, Result};

/// Action letters that must be submitted on their own (ntuple translation, bootstrap).
pub const EXCLUSIVE_ACTIONS: [char; 2] = ['n', 'b'];

/// TRExFitter action string, e.g. `n`, `wfp`, `mwf`, `r`.
///
/// Validated on construction: letters only, and the exclusive actions
/// (`n`, `b`) never combined with anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionSet(String);

impl ActionSet {
    /// Parse and validate an action string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Validation("action string must not be empty".into()));
        }
        if let Some(bad) = s.chars().find(|c| !c.is_ascii_alphabetic()) {
            return Err(Error::Validation(format!("invalid action letter {bad:?} in `{s}`")));
        }
        for exclusive in EXCLUSIVE_ACTIONS {
            if s.contains(exclusive) && s.len() > 1 {
                return Err(Error::Validation(format!(
                    "action `{exclusive}` must be used alone, got `{s}`"
                )));
            }
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn contains(&self, letter: char) -> bool {
        self.0.contains(letter)
    }

    /// True for the single-letter action `letter`.
    pub fn is_only(&self, letter: char) -> bool {
        self.0.len() == 1 && self.0.starts_with(letter)
    }

    /// Ranking (`r`) harvests nuisance parameters and norm factors as systematics.
    pub fn is_ranking(&self) -> bool {
        self.contains('r')
    }

    /// Multi-fit actions (`m...`) follow `ConfigFile` references.
    pub fn is_multi_fit(&self) -> bool {
        self.contains('m')
    }
}

impl FromStr for ActionSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job-splitting granularity of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One job per config.
    Global,
    /// One job per (config, region).
    Region,
    /// One job per (config, region, systematics bundle).
    Syst,
    /// One job per (config, ranking bundle).
    Ranking,
    /// One job per (config, likelihood-scan step).
    LhScan,
}

impl Granularity {
    pub const ALL: [Granularity; 5] =
        [Self::Global, Self::Region, Self::Syst, Self::Ranking, Self::LhScan];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Region => "region",
            Self::Syst => "syst",
            Self::Ranking => "ranking",
            Self::LhScan => "lhscan",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_actions_must_be_alone() {
        assert!(ActionSet::parse("n").is_ok());
        assert!(ActionSet::parse("b").is_ok());
        let err = ActionSet::parse("nwf").unwrap_err();
        assert!(err.to_string().contains("`n` must be used alone"), "{err}");
        assert!(ActionSet::parse("wfb").is_err());
    }

    #[test]
    fn action_flags() {
        let a = ActionSet::parse("mwf").unwrap();
        assert!(a.is_multi_fit());
        assert!(!a.is_ranking());
        assert!(!a.is_only('w'));
        assert!(ActionSet::parse("r").unwrap().is_only('r'));
    }

    #[test]
    fn rejects_non_letters() {
        assert!(ActionSet::parse("").is_err());
        assert!(ActionSet::parse("w f").is_err());
        assert!(ActionSet::parse("wf1").is_err());
    }

    #[test]
    fn granularity_serializes_lowercase() {
        let v = serde_json::to_value(Granularity::LhScan).unwrap();
        assert_eq!(v, serde_json::json!("lhscan"));
        assert_eq!(Granularity::Syst.to_string(), "syst");
    }
}
