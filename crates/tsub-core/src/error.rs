//! Error types for trexsub

use std::path::PathBuf;

use thiserror::Error;

/// trexsub error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Invalid user input or inconsistent run setup
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed fit config
    #[error("{}:{line}: {message}", path.display())]
    Config {
        /// Config file the problem was found in.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// The same region is declared by two top-level configs of one run.
    #[error("regions {regions:?} in '{}' were already declared by another config", config.display())]
    RegionCollision {
        /// Config that re-declared the regions.
        config: PathBuf,
        /// Colliding region names (sorted).
        regions: Vec<String>,
    },

    /// A referenced file does not exist.
    #[error("cannot find {what} '{}'", path.display())]
    MissingFile {
        /// Kind of file (config, replacement file, include file, ...).
        what: &'static str,
        /// Path that was looked up.
        path: PathBuf,
    },

    /// Config inclusion nested deeper than allowed (usually an include cycle).
    #[error("config inclusion nested too deep (possible cycle): {}", format_chain(chain))]
    IncludeDepth {
        /// Include chain from the top-level config to the offending file.
        chain: Vec<PathBuf>,
    },

    /// An external command could not be run or failed.
    #[error("command `{command}` failed: {message}")]
    Process {
        /// Rendered command line.
        command: String,
        /// Failure description.
        message: String,
    },
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" -> ")
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
