//! Grouping of systematics into fixed-size batches to bound per-job input I/O.

use std::num::NonZeroUsize;

/// Named group of systematics processed by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystBundle {
    pub name: String,
    pub members: Vec<String>,
}

impl SystBundle {
    /// Members in TRExFitter list syntax (`a,b,c`).
    pub fn joined(&self) -> String {
        self.members.join(",")
    }
}

/// Minimum number of digits in a synthetic bundle index.
pub const MIN_INDEX_WIDTH: usize = 4;

/// Name of the `index`-th synthetic bundle, zero-padded to `width` digits.
pub fn bundle_name(index: usize, width: usize) -> String {
    format!("Syst_group_{index:0width$}")
}

/// Index width that keeps `count` bundle names in creation order when sorted.
fn index_width(count: usize) -> usize {
    let digits = count.saturating_sub(1).checked_ilog10().map_or(1, |d| d as usize + 1);
    digits.max(MIN_INDEX_WIDTH)
}

/// Split `systematics` into bundles of `per_job` members (the last may be smaller).
///
/// Bundles come back in creation order. Synthetic names are padded to at least
/// [`MIN_INDEX_WIDTH`] digits and wide enough that name order equals creation
/// order. With `per_job == 1` each bundle is named after its systematic.
pub fn bundle_systematics(systematics: &[String], per_job: NonZeroUsize) -> Vec<SystBundle> {
    let per_job = per_job.get();
    if per_job == 1 {
        return systematics
            .iter()
            .map(|s| SystBundle { name: s.clone(), members: vec![s.clone()] })
            .collect();
    }
    let width = index_width(systematics.len().div_ceil(per_job));
    systematics
        .chunks(per_job)
        .enumerate()
        .map(|(i, chunk)| SystBundle { name: bundle_name(i, width), members: chunk.to_vec() })
        .collect()
}
