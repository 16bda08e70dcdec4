//! Driver for the external `hupdate` histogram-merge tool.
//!
//! A merge configuration pairs each input histogram file with a baseline output
//! pattern containing a `{}` placeholder, and lists named sets of systematics to
//! substitute into it:
//!
//! ```yaml
//! input_files: [Histograms/1l_histos.root]
//! baseline_output_files: ["Histograms/1l_{}_histos.root"]
//! systematics:
//!   inc: [JES, JER]
//! ```
//!
//! Sets may also be given as top-level `systematics_<set>` lists, e.g.
//! `systematics_STXS: [PS]`. Set names are matched case-insensitively when
//! there is no exact match.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use tsub_core::{Error, Result};

pub const DEFAULT_HUPDATE: &str = "hupdate";
pub const PLACEHOLDER: &str = "{}";

#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub input_files: Option<Vec<String>>,
    #[serde(default)]
    pub baseline_output_files: Option<Vec<String>>,
    #[serde(default)]
    pub systematics: BTreeMap<String, Vec<String>>,
    /// Remaining top-level keys, searched for `systematics_<set>` lists.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml_ng::Value>,
}

const SET_KEY_PREFIX: &str = "systematics_";

/// One `hupdate` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCommand {
    pub input: String,
    pub outputs: Vec<String>,
}

impl MergeCommand {
    pub fn args(&self) -> Vec<&str> {
        std::iter::once(self.input.as_str()).chain(self.outputs.iter().map(String::as_str)).collect()
    }

    pub fn display(&self, program: &str) -> String {
        format!("{program} {}", self.args().join(" "))
    }
}

impl MergeConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::MissingFile { what: "merge config", path: path.to_path_buf() }
            }
            _ => Error::Io(e),
        })?;
        Ok(serde_yaml_ng::from_slice(&bytes)?)
    }

    /// Prefix every input and baseline path with `dir`. Absolute paths are kept.
    pub fn with_directory(mut self, dir: &Path) -> Self {
        let join = |files: &mut Vec<String>| {
            for f in files.iter_mut() {
                *f = dir.join(&*f).to_string_lossy().into_owned();
            }
        };
        if let Some(files) = self.input_files.as_mut() {
            join(files);
        }
        if let Some(files) = self.baseline_output_files.as_mut() {
            join(files);
        }
        self
    }

    /// All systematic sets, from the `systematics` map and `systematics_<set>` keys.
    pub fn sets(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut sets = self.systematics.clone();
        for (key, value) in &self.extra {
            let Some(name) = key.strip_prefix(SET_KEY_PREFIX) else { continue };
            if name.is_empty() {
                continue;
            }
            let list: Vec<String> = serde_yaml_ng::from_value(value.clone()).map_err(|e| {
                Error::Validation(format!("'{key}' must be a list of systematics: {e}"))
            })?;
            sets.entry(name.to_string()).or_insert(list);
        }
        Ok(sets)
    }

    /// Build the commands for systematic set `set`.
    pub fn commands(&self, set: &str) -> Result<Vec<MergeCommand>> {
        let inputs = self
            .input_files
            .as_ref()
            .ok_or_else(|| Error::Validation("'input_files' key not found in merge config".into()))?;
        let baselines = self.baseline_output_files.as_ref().ok_or_else(|| {
            Error::Validation("'baseline_output_files' key not found in merge config".into())
        })?;
        let sets = self.sets()?;
        let systematics = sets
            .get(set)
            .or_else(|| sets.iter().find(|(k, _)| k.eq_ignore_ascii_case(set)).map(|(_, v)| v))
            .ok_or_else(|| {
                let known: Vec<&str> = sets.keys().map(String::as_str).collect();
                Error::Validation(format!(
                    "systematics set '{set}' not found in merge config (available: {})",
                    known.join(", ")
                ))
            })?;

        if inputs.len() != baselines.len() {
            return Err(Error::Validation(format!(
                "input_files has {} entries but baseline_output_files has {}",
                inputs.len(),
                baselines.len()
            )));
        }
        if let Some(bad) = baselines.iter().find(|b| !b.contains(PLACEHOLDER)) {
            return Err(Error::Validation(format!(
                "baseline output file '{bad}' has no '{PLACEHOLDER}' placeholder"
            )));
        }

        Ok(inputs
            .iter()
            .zip(baselines)
            .map(|(input, baseline)| MergeCommand {
                input: input.clone(),
                outputs: systematics.iter().map(|s| baseline.replace(PLACEHOLDER, s)).collect(),
            })
            .collect())
    }
}

/// Run each command in order, stopping at the first failure. With `dry_run`
/// the commands are only printed.
pub fn run_merge(program: &str, commands: &[MergeCommand], dry_run: bool) -> Result<()> {
    for cmd in commands {
        let line = cmd.display(program);
        println!("{line}");
        if dry_run {
            continue;
        }
        let status = Command::new(program)
            .args(cmd.args())
            .status()
            .map_err(|e| Error::Process { command: line.clone(), message: e.to_string() })?;
        if !status.success() {
            return Err(Error::Process { command: line, message: format!("exited with {status}") });
        }
        tracing::info!(input = %cmd.input, outputs = cmd.outputs.len(), "merged");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = "\
input_files: [in_1l.root, in_2l.root]
baseline_output_files: ['out_1l_{}.root', 'out_2l_{}.root']
systematics:
  inc: [JES, JER]
  STXS: [PS]
";

    fn config(text: &str) -> MergeConfig {
        serde_yaml_ng::from_str(text).unwrap()
    }

    #[test]
    fn commands_substitute_each_systematic() {
        let cmds = config(YAML).commands("inc").unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].display("hupdate"), "hupdate in_1l.root out_1l_JES.root out_1l_JER.root");
        assert_eq!(cmds[1].outputs, vec!["out_2l_JES.root", "out_2l_JER.root"]);
    }

    #[test]
    fn unknown_set_lists_available() {
        let err = config(YAML).commands("nope").unwrap_err();
        assert!(err.to_string().contains("STXS, inc"), "{err}");
    }

    #[test]
    fn structural_errors() {
        assert!(config("baseline_output_files: ['a_{}']\n").commands("x").is_err());
        let mismatch = "input_files: [a, b]\nbaseline_output_files: ['o_{}']\nsystematics: {s: [x]}\n";
        assert!(matches!(config(mismatch).commands("s"), Err(Error::Validation(_))));
        let no_placeholder = "input_files: [a]\nbaseline_output_files: [o]\nsystematics: {s: [x]}\n";
        let err = config(no_placeholder).commands("s").unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn top_level_set_lists() {
        let text = "\
input_files: [Histograms/in_1l.root]
baseline_output_files: ['Histograms/out_1l_{}.root']
systematics_STXS: [PS, ME]
systematics_inc: [JES]
";
        let merge = config(text).with_directory(Path::new("/data/run"));
        let cmds = merge.commands("stxs").unwrap();
        assert_eq!(
            cmds[0].display("hupdate"),
            "hupdate /data/run/Histograms/in_1l.root /data/run/Histograms/out_1l_PS.root \
             /data/run/Histograms/out_1l_ME.root"
        );
        assert_eq!(merge.commands("inc").unwrap()[0].outputs, vec!["/data/run/Histograms/out_1l_JES.root"]);

        let err = merge.commands("nope").unwrap_err();
        assert!(err.to_string().contains("STXS, inc"), "{err}");
        let bad = "input_files: [a]\nbaseline_output_files: ['o_{}']\nsystematics_x: 3\n";
        assert!(matches!(config(bad).commands("x"), Err(Error::Validation(_))));
    }

    #[test]
    fn absolute_paths_ignore_directory() {
        let text = "input_files: [/abs/in.root]\nbaseline_output_files: ['o_{}.root']\nsystematics: {s: [a]}\n";
        let cmds = config(text).with_directory(Path::new("base")).commands("s").unwrap();
        assert_eq!(cmds[0].input, "/abs/in.root");
        assert_eq!(cmds[0].outputs, vec!["base/o_a.root"]);
    }

    #[test]
    fn missing_config_file() {
        let err = MergeConfig::from_path(Path::new("/nonexistent/merge.yaml")).unwrap_err();
        assert!(matches!(err, Error::MissingFile { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_is_a_process_error() {
        let cmds = config(YAML).commands("STXS").unwrap();
        run_merge("false", &cmds, true).unwrap();
        run_merge("true", &cmds, false).unwrap();
        assert!(matches!(run_merge("false", &cmds, false), Err(Error::Process { .. })));
    }
}
