//! Parallel `rsync` of result directories with a bounded worker pool.

use std::fs::{self, File};
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rayon::prelude::*;
use tsub_core::{Error, Result};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BWLIMIT_KBPS: u64 = 50_000;
pub const DEFAULT_RSYNC: &str = "rsync";

/// Directory under the destination receiving one log per transfer.
pub const SYNC_LOG_DIR: &str = ".sync-logs";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub source: String,
    pub destination: PathBuf,
    pub bwlimit_kbps: u64,
    pub exclude: Option<String>,
    pub rsync: String,
    pub workers: NonZeroUsize,
    /// Run the failed subset once more after the first wave.
    pub retry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub dir: String,
    pub success: bool,
    pub attempts: u32,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub outcomes: Vec<TransferOutcome>,
}

impl SyncReport {
    pub fn failed(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

fn join_remote(base: &str, dir: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), dir.trim_matches('/'))
}

/// Argument vector of one transfer (without the program name).
pub fn rsync_args(opts: &SyncOptions, dir: &str) -> Vec<String> {
    let mut args = vec!["-vzraWPe".to_string(), "ssh".to_string()];
    args.push(format!("--bwlimit={}", opts.bwlimit_kbps));
    if let Some(pattern) = &opts.exclude {
        args.push("--exclude".to_string());
        args.push(pattern.clone());
    }
    args.push(join_remote(&opts.source, dir));
    args.push(join_remote(&opts.destination.to_string_lossy(), dir));
    args
}

/// Per-directory log path: `/` in the directory name becomes `_`.
pub fn log_path(opts: &SyncOptions, dir: &str) -> PathBuf {
    let name = dir.trim_matches('/').replace('/', "_");
    opts.destination.join(SYNC_LOG_DIR).join(format!("{name}.log"))
}

fn run_once(opts: &SyncOptions, dir: &str, log: &Path) -> std::io::Result<bool> {
    let args = rsync_args(opts, dir);
    let mut file = File::options().create(true).append(true).open(log)?;
    writeln!(file, "$ {} {}", opts.rsync, args.join(" "))?;
    let stdout = file.try_clone()?;
    let stderr = file.try_clone()?;
    match Command::new(&opts.rsync)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .status()
    {
        Ok(status) => Ok(status.success()),
        Err(e) => {
            writeln!(file, "failed to start {}: {e}", opts.rsync)?;
            Ok(false)
        }
    }
}

/// Transfer one directory. Never fails the caller; problems are recorded in
/// the outcome and its log.
pub fn transfer(opts: &SyncOptions, dir: &str, attempts_so_far: u32) -> TransferOutcome {
    let log_path = log_path(opts, dir);
    let success = match run_once(opts, dir, &log_path) {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(dir, log = %log_path.display(), "cannot write transfer log: {e}");
            false
        }
    };
    if success {
        tracing::info!(dir, "transfer finished");
    } else {
        tracing::warn!(dir, log = %log_path.display(), "transfer failed");
    }
    TransferOutcome { dir: dir.to_string(), success, attempts: attempts_so_far + 1, log_path }
}

/// Sync every directory in `dirs`, at most `opts.workers` at a time.
pub fn sync_directories(opts: &SyncOptions, dirs: &[String]) -> Result<SyncReport> {
    fs::create_dir_all(opts.destination.join(SYNC_LOG_DIR))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.workers.get())
        .build()
        .map_err(|e| Error::Validation(format!("failed to create thread pool: {e}")))?;

    tracing::info!(dirs = dirs.len(), workers = opts.workers.get(), "starting transfers");
    let mut outcomes: Vec<TransferOutcome> =
        pool.install(|| dirs.par_iter().map(|d| transfer(opts, d, 0)).collect());

    if opts.retry {
        let failed: Vec<usize> =
            outcomes.iter().enumerate().filter(|(_, o)| !o.success).map(|(i, _)| i).collect();
        if !failed.is_empty() {
            tracing::info!(failed = failed.len(), "retrying failed transfers");
            let second: Vec<TransferOutcome> = pool.install(|| {
                failed
                    .par_iter()
                    .map(|&i| transfer(opts, &outcomes[i].dir, outcomes[i].attempts))
                    .collect()
            });
            for (i, outcome) in failed.into_iter().zip(second) {
                outcomes[i] = outcome;
            }
        }
    }

    let report = SyncReport { outcomes };
    let failed = report.failed().count();
    tracing::info!(total = dirs.len(), succeeded = dirs.len() - failed, failed, "sync summary");
    for o in report.failed() {
        tracing::warn!(dir = %o.dir, log = %o.log_path.display(), "directory not synced");
    }
    Ok(report)
}

/// Directory names from a list file: one per line, blank lines and `#` comments skipped.
pub fn read_dir_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
