//! Integrated mode: stage configs (and the files they reference) inside the
//! work directory and point their path-bearing keys at the managed workspace.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tsub_core::{Error, Result};

use crate::document::ConfigDocument;
use crate::scan::{KEY_INCLUDE, MAX_INCLUDE_DEPTH};

/// Keys whose directory values are redirected into the results workspace.
pub const PATH_KEYS: [&str; 2] = ["OutputDir", "InputFolder"];

pub const KEY_REPLACEMENT_FILE: &str = "ReplacementFile";

/// Extension of staged configs.
pub const CONFIG_EXTENSION: &str = ".yaml";

/// Suffix of a staged replacement file (`<name>.yaml_REPLACEMENTFILE`).
pub const REPLACEMENT_SUFFIX: &str = "_REPLACEMENTFILE";

/// Marker of a staged include file (`<name>.yaml_INCLUDE_<k>`).
pub const INCLUDE_MARKER: &str = "_INCLUDE_";

/// Staged name of a config: file name without a trailing `.yaml`.
pub fn config_name(path: &Path) -> String {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    match name.strip_suffix(CONFIG_EXTENSION) {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// True for staged replacement/include files that are not configs themselves.
pub fn is_sibling_file(file_name: &str) -> bool {
    if file_name.ends_with(&format!("{CONFIG_EXTENSION}{REPLACEMENT_SUFFIX}")) {
        return true;
    }
    let marker = format!("{CONFIG_EXTENSION}{INCLUDE_MARKER}");
    match file_name.rfind(&marker) {
        Some(idx) => {
            let k = &file_name[idx + marker.len()..];
            !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Configs already staged in `config_dir`, sorted by file name.
pub fn cached_configs(config_dir: &Path) -> Result<Vec<PathBuf>> {
    if !config_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(config_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_sibling_file(&name) {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Replacement values applied to one staged file.
#[derive(Debug, Clone, Default)]
pub struct RewritePlan {
    /// New value for `OutputDir` / `InputFolder` (always written quoted).
    pub results_dir: String,
    /// New value for `ReplacementFile`, if the file declares one.
    pub replacement_file: Option<String>,
    /// New values for `INCLUDE` references, keyed by the value as written.
    pub includes: HashMap<String, String>,
}

/// Apply `plan` to the document in memory. Lines without a matching key are untouched.
pub fn rewrite_document(doc: &mut ConfigDocument, plan: &RewritePlan) -> Result<()> {
    let path = doc.path().to_path_buf();
    for line in doc.lines_mut() {
        let Some(entry) = line.entry() else {
            continue;
        };
        let number = line.number;
        if entry.key_is(KEY_REPLACEMENT_FILE) {
            let Some(new) = &plan.replacement_file else {
                return Err(Error::Config {
                    path,
                    line: number,
                    message: "ReplacementFile declared but no staged copy was provided".into(),
                });
            };
            line.set_value(new, false);
        } else if entry.key_is(KEY_INCLUDE) {
            let Some(new) = plan.includes.get(&entry.value) else {
                return Err(Error::Config {
                    path,
                    line: number,
                    message: format!("INCLUDE '{}' has no staged copy", entry.value),
                });
            };
            line.set_value(new, false);
        } else if PATH_KEYS.iter().any(|k| entry.key_is(k)) {
            line.set_value(&plan.results_dir, true);
        }
    }
    Ok(())
}

/// Replace `path` with `contents` via a temporary sibling file and an atomic rename.
///
/// The permissions of the existing file are carried over.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Rewrite a staged config on disk according to `plan`.
pub fn rewrite_config_file(path: &Path, plan: &RewritePlan) -> Result<()> {
    let mut doc = ConfigDocument::read(path)?;
    rewrite_document(&mut doc, plan)?;
    write_atomic(path, &doc.render())
}

/// Copies new configs into `config_dir` and rewrites them for the workspace.
pub struct Integrator<'a> {
    config_dir: &'a Path,
    results_dir: String,
}

impl<'a> Integrator<'a> {
    /// `results_dir` is written into `OutputDir`/`InputFolder`, relative to `config_dir`.
    pub fn new(config_dir: &'a Path, results_dir: impl Into<String>) -> Self {
        Self { config_dir, results_dir: results_dir.into() }
    }

    /// Stage `configs`, returning the staged config paths in input order.
    ///
    /// All inputs are validated before anything is copied: existence, name
    /// clashes among themselves and with already cached configs, and the
    /// replacement and include files of every nested file up to
    /// [`MAX_INCLUDE_DEPTH`].
    pub fn integrate(&self, configs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let cached: BTreeSet<String> =
            cached_configs(self.config_dir)?.iter().map(|p| config_name(p)).collect();

        let mut names = BTreeSet::new();
        for config in configs {
            if !config.is_file() {
                return Err(Error::MissingFile { what: "config file", path: config.clone() });
            }
            let name = config_name(config);
            if !names.insert(name.clone()) {
                return Err(Error::Validation(format!(
                    "multiple configs share the file name '{name}' and cannot be cached together"
                )));
            }
            if cached.contains(&name) {
                return Err(Error::Validation(format!(
                    "config name '{name}' clashes with an already cached config"
                )));
            }
        }
        // Missing replacement or include files anywhere in a tree fail the whole
        // call before the first copy.
        for config in configs {
            check_tree(config, &mut Vec::new())?;
        }

        fs::create_dir_all(self.config_dir)?;
        let mut staged = Vec::with_capacity(configs.len());
        for config in configs {
            let dest_name = format!("{}{CONFIG_EXTENSION}", config_name(config));
            let mut counter = 0usize;
            let mut chain = Vec::new();
            let dest = self.stage(config, &dest_name, &dest_name, &mut counter, &mut chain)?;
            tracing::info!(from = %config.display(), to = %dest.display(), "cached config");
            staged.push(dest);
        }
        Ok(staged)
    }

    fn stage(
        &self,
        src: &Path,
        dest_name: &str,
        root_name: &str,
        counter: &mut usize,
        chain: &mut Vec<PathBuf>,
    ) -> Result<PathBuf> {
        chain.push(src.to_path_buf());
        if chain.len() > MAX_INCLUDE_DEPTH {
            return Err(Error::IncludeDepth { chain: chain.clone() });
        }

        let doc = ConfigDocument::read(src)?;
        let mut plan = RewritePlan { results_dir: self.results_dir.clone(), ..Default::default() };

        if let Some(rep) = replacement_source(&doc)? {
            let rep_name = format!("{dest_name}{REPLACEMENT_SUFFIX}");
            fs::copy(&rep, self.config_dir.join(&rep_name))?;
            plan.replacement_file = Some(rep_name);
        }

        for (_, entry) in doc.entries().filter(|(_, e)| e.key_is(KEY_INCLUDE)) {
            if plan.includes.contains_key(&entry.value) {
                continue;
            }
            let include_src = doc.resolve(&entry.value);
            if !include_src.is_file() {
                return Err(Error::MissingFile { what: "include file", path: include_src });
            }
            *counter += 1;
            let include_name = format!("{root_name}{INCLUDE_MARKER}{counter}");
            self.stage(&include_src, &include_name, root_name, counter, chain)?;
            plan.includes.insert(entry.value.clone(), include_name);
        }

        let dest = self.config_dir.join(dest_name);
        fs::copy(src, &dest)?;
        rewrite_config_file(&dest, &plan)?;

        chain.pop();
        Ok(dest)
    }
}

/// Walk the include tree of `config` without writing anything.
fn check_tree(config: &Path, chain: &mut Vec<PathBuf>) -> Result<()> {
    chain.push(config.to_path_buf());
    if chain.len() > MAX_INCLUDE_DEPTH {
        return Err(Error::IncludeDepth { chain: chain.clone() });
    }
    let doc = ConfigDocument::read(config)?;
    replacement_source(&doc)?;
    for (_, entry) in doc.entries().filter(|(_, e)| e.key_is(KEY_INCLUDE)) {
        let include = doc.resolve(&entry.value);
        if !include.is_file() {
            return Err(Error::MissingFile { what: "include file", path: include });
        }
        check_tree(&include, chain)?;
    }
    chain.pop();
    Ok(())
}

/// Resolved `ReplacementFile` of a config, checked for existence.
fn replacement_source(doc: &ConfigDocument) -> Result<Option<PathBuf>> {
    let Some((_, entry)) = doc.first(KEY_REPLACEMENT_FILE) else {
        return Ok(None);
    };
    let path = doc.resolve(&entry.value);
    if !path.is_file() {
        return Err(Error::MissingFile { what: "replacement file", path });
    }
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RESULTS: &str = "../results/";

    #[test]
    fn output_dir_rewrite_changes_only_that_value() {
        let dir = TempDir::new().unwrap();
        let original = "Job: \"fit\"\n  Label: \"x\" # c\n  OutputDir: \"old/path/\"\n\
                        Region: SR\n  Binning: 0,1,2\n";
        let src = dir.path().join("fit.yaml");
        fs::write(&src, original).unwrap();

        let config_dir = dir.path().join("work/configs");
        let staged = Integrator::new(&config_dir, RESULTS).integrate(&[src]).unwrap();
        let rewritten = fs::read_to_string(&staged[0]).unwrap();

        let expected = original.replace("old/path/", RESULTS);
        assert_eq!(rewritten, expected);
        let changed: Vec<_> =
            original.lines().zip(rewritten.lines()).filter(|(a, b)| a != b).collect();
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn unquoted_path_values_gain_quotes() {
        let mut doc = ConfigDocument::parse("c.yaml", "InputFolder: /data/hists % x\n");
        let plan = RewritePlan { results_dir: RESULTS.into(), ..Default::default() };
        rewrite_document(&mut doc, &plan).unwrap();
        assert_eq!(doc.render(), "InputFolder: \"../results/\" % x\n");
    }

    #[test]
    fn replacement_and_include_files_are_staged() {
        let dir = TempDir::new().unwrap();
        let src_dir = dir.path().join("src");
        fs::create_dir_all(src_dir.join("inc")).unwrap();
        fs::write(src_dir.join("rep.txt"), "XXX_A 1\n").unwrap();
        fs::write(src_dir.join("inc/common.yaml"), "OutputDir: elsewhere\nRegion: CR\n").unwrap();
        let src = src_dir.join("fit.yaml");
        fs::write(&src, "ReplacementFile: rep.txt\nINCLUDE: inc/common.yaml\nRegion: SR\n").unwrap();

        let config_dir = dir.path().join("configs");
        let staged = Integrator::new(&config_dir, RESULTS).integrate(&[src]).unwrap();
        assert_eq!(staged, vec![config_dir.join("fit.yaml")]);

        let top = fs::read_to_string(config_dir.join("fit.yaml")).unwrap();
        assert_eq!(
            top,
            "ReplacementFile: fit.yaml_REPLACEMENTFILE\nINCLUDE: fit.yaml_INCLUDE_1\nRegion: SR\n"
        );
        assert_eq!(
            fs::read_to_string(config_dir.join("fit.yaml_REPLACEMENTFILE")).unwrap(),
            "XXX_A 1\n"
        );
        assert_eq!(
            fs::read_to_string(config_dir.join("fit.yaml_INCLUDE_1")).unwrap(),
            "OutputDir: \"../results/\"\nRegion: CR\n"
        );
        assert_eq!(cached_configs(&config_dir).unwrap(), vec![config_dir.join("fit.yaml")]);
    }

    #[test]
    fn missing_replacement_file_fails_before_copy() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("fit.yaml");
        fs::write(&src, "ReplacementFile: nope.txt\n").unwrap();
        let config_dir = dir.path().join("configs");
        let err = Integrator::new(&config_dir, RESULTS).integrate(&[src]).unwrap_err();
        assert!(matches!(err, Error::MissingFile { what: "replacement file", .. }));
        assert!(!config_dir.exists());
    }

    #[test]
    fn missing_include_in_a_later_config_stages_nothing() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        fs::write(&a, "Region: A\n").unwrap();
        fs::write(&b, "Region: B\nINCLUDE: missing.yaml\n").unwrap();

        let config_dir = dir.path().join("configs");
        let integrator = Integrator::new(&config_dir, RESULTS);
        let err = integrator.integrate(&[a.clone(), b.clone()]).unwrap_err();
        assert!(matches!(err, Error::MissingFile { what: "include file", .. }), "{err}");
        assert!(cached_configs(&config_dir).unwrap().is_empty());

        fs::write(dir.path().join("missing.yaml"), "Region: C\n").unwrap();
        let staged = integrator.integrate(&[a, b]).unwrap();
        assert_eq!(staged.len(), 2);
    }

    #[test]
    fn nested_include_is_checked_before_copy() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.yaml");
        fs::write(&a, "INCLUDE: inc.yaml\n").unwrap();
        fs::write(dir.path().join("inc.yaml"), "INCLUDE: gone.yaml\n").unwrap();

        let config_dir = dir.path().join("configs");
        assert!(Integrator::new(&config_dir, RESULTS).integrate(&[a]).is_err());
        assert!(!config_dir.exists());
    }

    #[test]
    fn sibling_files_follow_the_staged_naming() {
        assert!(is_sibling_file("fit.yaml_REPLACEMENTFILE"));
        assert!(is_sibling_file("fit.yaml_INCLUDE_3"));
        assert!(!is_sibling_file("fit_INCLUDE_test.yaml"));
        assert!(!is_sibling_file("fit.yaml_INCLUDE_x"));
        assert!(!is_sibling_file("fit.yaml"));

        let dir = TempDir::new().unwrap();
        for name in ["fit_INCLUDE_test.yaml", "fit_INCLUDE_test.yaml_INCLUDE_1", "b.yaml_REPLACEMENTFILE"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let cached = cached_configs(dir.path()).unwrap();
        assert_eq!(cached, vec![dir.path().join("fit_INCLUDE_test.yaml")]);
    }

    #[test]
    fn name_clashes_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        let a = dir.path().join("a/fit.yaml");
        let b = dir.path().join("b/fit.yaml");
        fs::write(&a, "Region: A\n").unwrap();
        fs::write(&b, "Region: B\n").unwrap();

        let config_dir = dir.path().join("configs");
        let integrator = Integrator::new(&config_dir, RESULTS);
        assert!(integrator.integrate(&[a.clone(), b.clone()]).is_err());

        integrator.integrate(std::slice::from_ref(&a)).unwrap();
        let err = integrator.integrate(&[b]).unwrap_err();
        assert!(err.to_string().contains("clashes"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let p = dir.path().join("c.yaml");
        fs::write(&p, "old").unwrap();
        fs::set_permissions(&p, fs::Permissions::from_mode(0o640)).unwrap();
        write_atomic(&p, "new").unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "new");
        assert_eq!(fs::metadata(&p).unwrap().permissions().mode() & 0o777, 0o640);
    }
}
