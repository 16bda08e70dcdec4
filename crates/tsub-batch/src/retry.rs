//! Failure triage: find failed jobs in HTCondor error logs and build a reduced
//! argument file that resubmits only those.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tsub_core::Result;

/// Error-log substrings that mark a job as failed.
pub const DEFAULT_SIGNATURES: [&str; 3] = [
    "trex-fitter: command not found",
    "Error in <TFile::TFile>:",
    "ERROR::SampleHist::SmoothSyst",
];

/// Inputs of one triage pass.
#[derive(Debug, Clone)]
pub struct RetryRequest {
    /// Directory holding the `.err` files.
    pub error_dir: PathBuf,
    /// Collected contents of the failed logs.
    pub output_log: PathBuf,
    pub original_args: PathBuf,
    pub new_args: PathBuf,
    /// Action letters the jobs ran with.
    pub steps: String,
    pub extra_signatures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Job fragments (dot-separated log fields) of the failed jobs.
    pub failed_jobs: Vec<String>,
    pub rows_written: usize,
}

/// Job fragment of an error-log name `TRExFitter.<steps>.<cluster>.<proc>.<fragment>.err`.
pub fn job_fragment<'a>(file_name: &'a str, steps: &str) -> Option<&'a str> {
    let rest = file_name.strip_prefix("TRExFitter.")?.strip_prefix(steps)?.strip_prefix('.')?;
    let rest = rest.strip_suffix(".err")?;
    let mut parts = rest.splitn(3, '.');
    let cluster = parts.next()?;
    let process = parts.next()?;
    let fragment = parts.next()?;
    let is_id = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    (is_id(cluster) && is_id(process) && !fragment.is_empty()).then_some(fragment)
}

/// Rows of `args_text` that contain a fragment's fields as a contiguous run of
/// whitespace-separated fields. Each row is returned at most once, in file order.
pub fn select_rows<'a>(args_text: &'a str, fragments: &[String]) -> Vec<&'a str> {
    let wanted: Vec<Vec<&str>> =
        fragments.iter().map(|f| f.split('.').collect::<Vec<_>>()).collect();
    args_text
        .lines()
        .filter(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            wanted.iter().any(|w| !w.is_empty() && fields.windows(w.len()).any(|win| win == w))
        })
        .collect()
}

/// Error-log files containing any of `signatures`, as `(file name, contents)`, sorted by name.
pub fn failed_logs(dir: &Path, signatures: &[String]) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".err") || !entry.file_type()?.is_file() {
            continue;
        }
        let bytes = fs::read(entry.path())?;
        let contents = String::from_utf8_lossy(&bytes).into_owned();
        if signatures.iter().any(|s| contents.contains(s.as_str())) {
            out.push((name, contents));
        }
    }
    out.sort();
    Ok(out)
}

/// Run the whole triage: write the failure log and the reduced argument file.
pub fn triage(req: &RetryRequest) -> Result<RetryReport> {
    let signatures: Vec<String> = DEFAULT_SIGNATURES
        .iter()
        .map(|s| s.to_string())
        .chain(req.extra_signatures.iter().cloned())
        .collect();

    let failed = failed_logs(&req.error_dir, &signatures)?;

    let mut log = fs::File::create(&req.output_log)?;
    let mut failed_jobs = Vec::new();
    for (name, contents) in &failed {
        write!(log, "File: {name}\nContents:\n{contents}\n\n")?;
        match job_fragment(name, &req.steps) {
            Some(fragment) => {
                tracing::info!(job = fragment, "extracted failed job");
                failed_jobs.push(fragment.to_string());
            }
            None => tracing::warn!(file = %name, "failed log does not follow the job naming pattern"),
        }
    }

    let args_text = fs::read_to_string(&req.original_args)?;
    let rows = select_rows(&args_text, &failed_jobs);
    let mut new_args = String::new();
    for row in &rows {
        new_args.push_str(row);
        new_args.push('\n');
    }
    fs::write(&req.new_args, new_args)?;

    if failed_jobs.is_empty() {
        tracing::info!("no failed jobs found");
    } else {
        tracing::info!(
            failed = failed_jobs.len(),
            rows = rows.len(),
            new_args = %req.new_args.display(),
            "wrote retry argument file; copy it over the job table of the work directory to resubmit"
        );
    }

    Ok(RetryReport { failed_jobs, rows_written: rows.len() })
}
