//! Work-directory layout and the sticky integrated-mode state.

use std::path::PathBuf;

use tsub_core::{Error, Result};

/// File recording whether integrated mode was ever requested for a work directory.
pub const INTEGRATE_CACHE_FILE: &str = ".integrate.cache";

/// `OutputDir`/`InputFolder` value written into staged configs.
pub const RESULTS_DIR_FROM_CONFIGS: &str = "../results/";

/// Subdirectories of a work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    pub root: PathBuf,
    pub scripts: PathBuf,
    pub logs: PathBuf,
    pub configs: PathBuf,
    pub results: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            scripts: root.join("scripts"),
            logs: root.join("logs"),
            configs: root.join("configs"),
            results: root.join("results"),
            root,
        }
    }

    /// Create the work directory itself; its parent must already exist.
    pub fn ensure_root(&self) -> Result<()> {
        match std::fs::create_dir(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn cache_file(&self) -> PathBuf {
        self.root.join(INTEGRATE_CACHE_FILE)
    }
}

/// Integrated-mode flag of a work directory.
///
/// Loaded once at startup, passed explicitly, persisted once at the end of a
/// successful run. Once integrated, a work directory stays integrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceState {
    pub integrate: bool,
    /// Whether the flag came from an earlier run's cache file.
    pub cached: bool,
}

impl WorkspaceState {
    /// Combine the cache file (if any) with the CLI request.
    pub fn load(work_dir: &WorkDir, requested: bool) -> Result<Self> {
        let path = work_dir.cache_file();
        let cached = if path.is_file() {
            std::fs::read_to_string(&path)?.trim() == "True"
        } else {
            false
        };

        let state = Self { integrate: requested || cached, cached };
        if cached {
            tracing::info!(
                work_dir = %work_dir.root.display(),
                "integrating configs and workspace as saved in cache"
            );
        } else if requested {
            tracing::info!(
                work_dir = %work_dir.root.display(),
                "integrating configs and workspace as requested"
            );
        } else {
            tracing::info!(
                work_dir = %work_dir.root.display(),
                "not integrating configs; keeping config paths consistent is up to you"
            );
        }
        Ok(state)
    }

    pub fn persist(&self, work_dir: &WorkDir) -> Result<()> {
        let text = if self.integrate { "True" } else { "False" };
        std::fs::write(work_dir.cache_file(), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout() {
        let w = WorkDir::new("/w");
        assert_eq!(w.configs, PathBuf::from("/w/configs"));
        assert_eq!(w.cache_file(), PathBuf::from("/w/.integrate.cache"));
    }

    #[test]
    fn integrate_flag_is_sticky() {
        let dir = TempDir::new().unwrap();
        let w = WorkDir::new(dir.path().join("work"));
        w.ensure_root().unwrap();
        w.ensure_root().unwrap();

        let first = WorkspaceState::load(&w, false).unwrap();
        assert_eq!(first, WorkspaceState { integrate: false, cached: false });
        // Nothing is written until persist.
        assert!(!w.cache_file().exists());

        WorkspaceState::load(&w, true).unwrap().persist(&w).unwrap();
        assert_eq!(std::fs::read_to_string(w.cache_file()).unwrap(), "True");

        let later = WorkspaceState::load(&w, false).unwrap();
        assert_eq!(later, WorkspaceState { integrate: true, cached: true });
    }

    #[test]
    fn cache_tolerates_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let w = WorkDir::new(dir.path());
        std::fs::write(w.cache_file(), "True\n").unwrap();
        assert!(WorkspaceState::load(&w, false).unwrap().integrate);
    }

    #[test]
    fn root_requires_existing_parent() {
        let dir = TempDir::new().unwrap();
        let w = WorkDir::new(dir.path().join("missing/work"));
        assert!(w.ensure_root().is_err());
    }
}
