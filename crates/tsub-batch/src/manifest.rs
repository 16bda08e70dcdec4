//! JSON manifest describing one set of generated batch artifacts.

use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tsub_core::{Granularity, Result};

use crate::emit::ArtifactPaths;
use crate::policy::EffectivePolicy;

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub tool: String,
    pub tool_version: String,
    pub actions: String,
    pub granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syst_per_job: Option<usize>,
    pub jobs: usize,
    pub configs: Vec<String>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestFile {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let out = h.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn describe(path: &Path) -> Result<ManifestFile> {
    let bytes = std::fs::read(path)?;
    Ok(ManifestFile {
        path: path.display().to_string(),
        bytes: bytes.len() as u64,
        sha256: sha256_hex(&bytes),
    })
}

impl Manifest {
    /// Describe already written artifacts.
    pub fn collect(
        paths: &ArtifactPaths,
        actions: &str,
        policy: &EffectivePolicy,
        jobs: usize,
        configs: &[String],
    ) -> Result<Self> {
        let files = [&paths.job_table, &paths.script, &paths.submit]
            .into_iter()
            .map(|p| describe(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tool: "trexsub".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            actions: actions.to_string(),
            granularity: policy.granularity,
            syst_per_job: policy.syst_per_job.map(|n| n.get()),
            jobs,
            configs: configs.to_vec(),
            files,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
