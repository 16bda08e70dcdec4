//! Work-unit planning: per-config inventories in, job-table rows out.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tsub_config::{ConfigInventory, ScanMode};
use tsub_core::{Error, Granularity, Result};

use crate::bundle::bundle_systematics;
use crate::policy::EffectivePolicy;

/// Inventory of one top-level config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub config: PathBuf,
    pub short_name: String,
    pub inventory: ConfigInventory,
}

/// Inventories of all configs of a run, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: Vec<InventoryEntry>,
}

impl Inventory {
    pub fn from_entries(entries: Vec<InventoryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Short config name used in job tables and log names: file stem, `.` replaced by `_`.
pub fn short_config_name(config: &Path) -> String {
    config
        .file_stem()
        .map(|s| s.to_string_lossy().replace('.', "_"))
        .unwrap_or_default()
}

/// Scan every config and check that no region is declared by two of them.
///
/// Histogram outputs are filed by region name, so a shared region would make
/// later merge steps mix up unrelated results.
pub fn build_inventory(configs: &[PathBuf], mode: ScanMode) -> Result<Inventory> {
    let mut seen_regions: BTreeSet<String> = BTreeSet::new();
    let mut entries = Vec::with_capacity(configs.len());

    for config in configs {
        let inventory = ConfigInventory::scan(config, mode)?;

        let collisions: Vec<String> =
            inventory.regions.iter().filter(|r| seen_regions.contains(*r)).cloned().collect();
        if !collisions.is_empty() {
            return Err(Error::RegionCollision { config: config.clone(), regions: collisions });
        }
        seen_regions.extend(inventory.regions.iter().cloned());

        log_inventory(config, &inventory);
        entries.push(InventoryEntry {
            config: config.clone(),
            short_name: short_config_name(config),
            inventory,
        });
    }

    Ok(Inventory { entries })
}

fn log_inventory(config: &Path, inventory: &ConfigInventory) {
    tracing::info!(
        config = %config.display(),
        regions = inventory.regions.len(),
        systematics = inventory.systematics.len(),
        "scanned config"
    );
    for region in &inventory.regions {
        tracing::info!("  region: {region}");
    }
    let width = inventory.systematics.len().to_string().len();
    for (i, syst) in inventory.systematics.iter().enumerate() {
        tracing::debug!("  {:>width$}. {syst}", i + 1);
    }
}

/// One row of the job-argument table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub config: PathBuf,
    pub short_config: String,
    pub region: Option<String>,
    /// Bundle name; doubles as the `SaveSuffix` of split histogram outputs.
    pub suffix: Option<String>,
    /// Comma-joined bundle members.
    pub systematics: Option<String>,
    pub step: Option<u32>,
}

impl WorkUnit {
    fn new(entry: &InventoryEntry) -> Self {
        Self {
            config: entry.config.clone(),
            short_config: entry.short_name.clone(),
            region: None,
            suffix: None,
            systematics: None,
            step: None,
        }
    }
}

/// Expand the inventory into work units according to the effective policy.
pub fn plan(inventory: &Inventory, policy: &EffectivePolicy) -> Result<Vec<WorkUnit>> {
    let bundle_size = || {
        policy.syst_per_job.ok_or_else(|| {
            Error::Validation(format!("granularity {} requires a bundle size", policy.granularity))
        })
    };

    let mut units = Vec::new();
    for entry in inventory.entries() {
        let inv = &entry.inventory;
        match policy.granularity {
            Granularity::Global => units.push(WorkUnit::new(entry)),
            Granularity::Region => {
                for region in &inv.regions {
                    units.push(WorkUnit { region: Some(region.clone()), ..WorkUnit::new(entry) });
                }
            }
            Granularity::Syst => {
                let bundles = bundle_systematics(&inv.systematics, bundle_size()?);
                for region in &inv.regions {
                    for bundle in &bundles {
                        units.push(WorkUnit {
                            region: Some(region.clone()),
                            suffix: Some(bundle.name.clone()),
                            systematics: Some(bundle.joined()),
                            ..WorkUnit::new(entry)
                        });
                    }
                }
            }
            Granularity::Ranking => {
                for bundle in bundle_systematics(&inv.systematics, bundle_size()?) {
                    units.push(WorkUnit {
                        systematics: Some(bundle.joined()),
                        suffix: Some(bundle.name),
                        ..WorkUnit::new(entry)
                    });
                }
            }
            Granularity::LhScan => {
                for step in 1..=inv.lhscan_steps {
                    units.push(WorkUnit { step: Some(step), ..WorkUnit::new(entry) });
                }
            }
        }
    }

    tracing::info!(granularity = %policy.granularity, jobs = units.len(), "planned work units");
    Ok(units)
}
