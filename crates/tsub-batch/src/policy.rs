//! Job-splitting policy: what the operator asked for, and what the run does.
//!
//! Resolution is two-phase. [`RequestedPolicy`] is derived from the CLI flags
//! and the action letters alone and never changes afterwards; [`resolve_policy`]
//! looks at the scanned inventory and returns a separate [`EffectivePolicy`].

use std::num::NonZeroUsize;

use serde::Serialize;
use tsub_core::{ActionSet, Granularity};

use crate::plan::Inventory;

/// Default number of systematics per job.
pub const DEFAULT_SYST_PER_JOB: usize = 20;

/// Split switches as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRequest {
    pub split_regions: bool,
    pub split_systs: bool,
    pub split_scan: bool,
    pub syst_per_job: NonZeroUsize,
}

impl Default for SplitRequest {
    fn default() -> Self {
        Self {
            split_regions: true,
            split_systs: true,
            split_scan: true,
            syst_per_job: NonZeroUsize::new(DEFAULT_SYST_PER_JOB).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Split policy after applying the action rules, before looking at any config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedPolicy {
    pub split_regions: bool,
    pub split_systs: bool,
    pub split_scan: bool,
    pub syst_per_job: NonZeroUsize,
}

impl RequestedPolicy {
    /// Region splitting only applies to a lone ntuple step (`n`). Systematics
    /// splitting applies to rankings (`r`) and to `n` when regions are split too.
    /// Scan splitting applies to likelihood scans (`l`).
    pub fn new(actions: &ActionSet, request: SplitRequest) -> Self {
        let split_regions = request.split_regions && actions.is_only('n');
        let split_systs = if actions.is_ranking() {
            request.split_systs
        } else if actions.contains('n') {
            request.split_systs && split_regions
        } else {
            false
        };
        Self {
            split_regions,
            split_systs,
            split_scan: request.split_scan && actions.contains('l'),
            syst_per_job: request.syst_per_job,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectivePolicy {
    pub granularity: Granularity,
    /// Bundle size; set only for granularities that bundle systematics.
    pub syst_per_job: Option<NonZeroUsize>,
}

/// Derive the policy the run actually uses.
///
/// A config without systematics disables the systematics split for the whole
/// run, so that every row of the job table keeps the same columns.
pub fn resolve_policy(requested: &RequestedPolicy, inventory: &Inventory) -> EffectivePolicy {
    let mut split_systs = requested.split_systs;
    if split_systs
        && let Some(entry) = inventory.entries().iter().find(|e| e.inventory.systematics.is_empty())
    {
        tracing::info!(
            config = %entry.config.display(),
            "no systematics present, disabling the systematics split for this run"
        );
        split_systs = false;
    }

    let granularity = match (requested.split_regions, split_systs) {
        (true, true) => Granularity::Syst,
        (true, false) => Granularity::Region,
        (false, true) => Granularity::Ranking,
        (false, false) if requested.split_scan => Granularity::LhScan,
        (false, false) => Granularity::Global,
    };

    EffectivePolicy {
        granularity,
        syst_per_job: split_systs.then_some(requested.syst_per_job),
    }
}
