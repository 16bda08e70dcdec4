//! Region / systematic inventory of a config and its nested configs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tsub_core::{ActionSet, Error, Result};

use crate::document::ConfigDocument;

/// Include chains deeper than this are reported as a probable cycle.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Likelihood-scan steps assumed when a config does not set `LHscanSteps`.
pub const DEFAULT_LHSCAN_STEPS: u32 = 30;

/// Norm factors with this prefix are parameters of interest, not nuisances.
pub const POI_PREFIX: &str = "mu_";

pub(crate) const KEY_REGION: &str = "Region";
pub(crate) const KEY_SYSTEMATIC: &str = "Systematic";
pub(crate) const KEY_UNFOLDING_SYSTEMATIC: &str = "UnfoldingSystematic";
pub(crate) const KEY_NUISANCE_PARAMETER: &str = "NuisanceParameter";
pub(crate) const KEY_NORM_FACTOR: &str = "NormFactor";
pub(crate) const KEY_INCLUDE: &str = "INCLUDE";
pub(crate) const KEY_CONFIG_FILE: &str = "ConfigFile";
pub(crate) const KEY_LHSCAN_STEPS: &str = "LHscanSteps";

/// Which action-dependent rules the scanner applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanMode {
    /// Harvest nuisance-parameter and non-POI norm-factor names (ranking).
    pub ranking: bool,
    /// Follow `ConfigFile` references (multi-fit).
    pub follow_config_files: bool,
}

impl ScanMode {
    pub fn for_actions(actions: &ActionSet) -> Self {
        Self { ranking: actions.is_ranking(), follow_config_files: actions.is_multi_fit() }
    }
}

/// Regions and systematics declared by one top-level config (nested configs included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigInventory {
    /// Sorted, duplicate-free.
    pub regions: Vec<String>,
    /// Sorted, duplicate-free.
    pub systematics: Vec<String>,
    pub lhscan_steps: u32,
}

impl ConfigInventory {
    pub fn scan(path: &Path, mode: ScanMode) -> Result<Self> {
        let mut scanner = Scanner { mode, chain: Vec::new() };
        let mut found = Found::default();
        scanner.visit(path, &mut found)?;
        Ok(Self {
            regions: found.regions.into_iter().collect(),
            systematics: found.systematics.into_iter().collect(),
            lhscan_steps: found.lhscan_steps.unwrap_or(DEFAULT_LHSCAN_STEPS),
        })
    }
}

#[derive(Default)]
struct Found {
    regions: BTreeSet<String>,
    systematics: BTreeSet<String>,
    lhscan_steps: Option<u32>,
}

struct Scanner {
    mode: ScanMode,
    chain: Vec<PathBuf>,
}

impl Scanner {
    fn visit(&mut self, path: &Path, found: &mut Found) -> Result<()> {
        self.chain.push(path.to_path_buf());
        if self.chain.len() > MAX_INCLUDE_DEPTH {
            return Err(Error::IncludeDepth { chain: self.chain.clone() });
        }

        let doc = ConfigDocument::read(path)?;
        let nested = self.scan_document(&doc, found)?;
        for sub in nested {
            self.visit(&sub, found)?;
        }

        self.chain.pop();
        Ok(())
    }

    /// Scan one file; returns the nested configs it references.
    fn scan_document(&self, doc: &ConfigDocument, found: &mut Found) -> Result<Vec<PathBuf>> {
        let mut systematics: Vec<String> = Vec::new();
        // Size of the last Systematic declaration a NuisanceParameter may replace.
        let mut last_batch: Option<usize> = None;
        let mut nested = Vec::new();

        for (line, e) in doc.entries() {
            if e.key_is(KEY_REGION) {
                if !e.value.is_empty() {
                    found.regions.insert(e.value.clone());
                }
            } else if e.key_is(KEY_SYSTEMATIC) || e.key_is(KEY_UNFOLDING_SYSTEMATIC) {
                let tokens = e.tokens();
                last_batch = Some(tokens.len());
                systematics.extend(tokens);
            } else if self.mode.ranking && e.key_is(KEY_NUISANCE_PARAMETER) {
                let tokens = e.tokens();
                match last_batch.take() {
                    Some(n) if n == tokens.len() => {
                        systematics.truncate(systematics.len() - n);
                        systematics.extend(tokens);
                    }
                    Some(n) => {
                        return Err(Error::Config {
                            path: doc.path().to_path_buf(),
                            line,
                            message: format!(
                                "NuisanceParameter declares {} name(s) but the preceding \
                                 Systematic declares {n}",
                                tokens.len()
                            ),
                        });
                    }
                    None => {
                        return Err(Error::Config {
                            path: doc.path().to_path_buf(),
                            line,
                            message: "NuisanceParameter without a preceding Systematic".into(),
                        });
                    }
                }
            } else if self.mode.ranking && e.key_is(KEY_NORM_FACTOR) {
                last_batch = None;
                systematics.extend(e.tokens().into_iter().filter(|t| !t.starts_with(POI_PREFIX)));
            } else if e.key_is(KEY_INCLUDE)
                || (self.mode.follow_config_files && e.key_is(KEY_CONFIG_FILE))
            {
                nested.push(doc.resolve(&e.value));
            } else if e.key_is(KEY_LHSCAN_STEPS) && found.lhscan_steps.is_none() {
                found.lhscan_steps = Some(parse_steps(doc, line, &e.value)?);
            }
        }

        tracing::debug!(
            path = %doc.path().display(),
            systematics = systematics.len(),
            nested = nested.len(),
            "scanned config"
        );
        found.systematics.extend(systematics);
        Ok(nested)
    }
}

fn parse_steps(doc: &ConfigDocument, line: usize, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config {
            path: doc.path().to_path_buf(),
            line,
            message: format!("LHscanSteps must be a positive integer, got {value:?}"),
        }),
    }
}
