//! trexsub CLI

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use tsub_batch::merge::{DEFAULT_HUPDATE, MergeConfig, run_merge};
use tsub_batch::policy::{DEFAULT_SYST_PER_JOB, SplitRequest};
use tsub_batch::retry::{RetryRequest, triage};
use tsub_batch::submit::DEFAULT_SUBMIT_COMMAND;
use tsub_batch::sync::{
    DEFAULT_BWLIMIT_KBPS, DEFAULT_RSYNC, DEFAULT_WORKERS, SyncOptions, read_dir_list,
    sync_directories,
};

mod submit;

#[derive(Parser)]
#[command(name = "trexsub")]
#[command(about = "trexsub - Fan TRExFitter steps out into HTCondor jobs")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate job table, wrapper script and submit file, then submit
    #[command(group(ArgGroup::new("split").args(["single_reg", "single_np", "nps_per_job"])))]
    Submit {
        /// Directory for scripts and logs (and cached configs and results in integrated mode)
        #[arg(value_name = "WORK_DIR")]
        work_dir: PathBuf,

        /// Root folder of the TRExFitter installation (holds setup.sh)
        #[arg(value_name = "TREX_PATH")]
        trex_path: PathBuf,

        /// TRExFitter action letters, e.g. `n`, `wfp`, `r`, `mwf`.
        ///
        /// `n` and `b` must be submitted on their own. Without actions only the
        /// cached configs are updated.
        #[arg(short, long)]
        actions: Option<String>,

        /// Config file to load (repeatable)
        #[arg(short = 'c', long = "config", value_name = "PATH")]
        configs: Vec<PathBuf>,

        /// Cached config name to run with (integrated mode only, repeatable)
        #[arg(short = 'u', long = "use-config", value_name = "CONFIG")]
        use_configs: Vec<String>,

        /// Extra TRExFitter option `<Option>=<Value>` (repeatable)
        #[arg(short = 'o', long = "option", value_name = "OPT=VALUE", value_parser = parse_option)]
        options: Vec<String>,

        /// Cache configs in the work directory and keep results there (sticky)
        #[arg(long)]
        integrate_everything: bool,

        /// Write all artifacts but do not submit
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Transfer outputs back from worker nodes (no shared filesystem)
        #[arg(short = 't', long)]
        transfer_output: bool,

        /// Requested run time per job in seconds
        #[arg(long, value_name = "SECS")]
        run_time: Option<u64>,

        /// CPUs requested per job
        #[arg(long)]
        cpus: Option<u32>,

        /// HTCondor requirements expression
        #[arg(long, value_name = "EXPR")]
        requirements: Option<String>,

        /// Batch submission command
        #[arg(long, default_value = DEFAULT_SUBMIT_COMMAND)]
        submit_command: String,

        /// Run the `n` action in one job for all regions and systematics
        #[arg(long)]
        single_reg: bool,

        /// Run the `n`/`r` actions in one job for all nuisance parameters
        #[arg(long)]
        single_np: bool,

        /// Nuisance parameters per `n`/`r` job [default: 20]
        #[arg(long, value_name = "NUM_NPS")]
        nps_per_job: Option<NonZeroUsize>,

        /// Run the likelihood scan (`l`) in one job instead of one per step
        #[arg(long)]
        single_scan: bool,
    },

    /// Collect failed jobs from error logs into a reduced argument file
    Retry {
        /// Directory with the `.err` files
        #[arg(short = 'd', long = "error-dir")]
        error_dir: PathBuf,

        /// File receiving the contents of all failed logs
        #[arg(short = 'o', long = "output-log")]
        output_log: PathBuf,

        /// Argument file the jobs were submitted with
        #[arg(short = 'a', long = "args")]
        original_args: PathBuf,

        /// Argument file to write for the resubmission
        #[arg(short = 'n', long = "new-args")]
        new_args: PathBuf,

        /// Action letters of the failed submission
        #[arg(short = 's', long)]
        steps: String,

        /// Additional failure signature (repeatable)
        #[arg(short = 'e', long = "error-signature", value_name = "TEXT")]
        extra_signatures: Vec<String>,
    },

    /// rsync result directories in parallel
    #[command(group(ArgGroup::new("dir_list").args(["dirs", "dirs_file"]).required(true).multiple(true)))]
    Sync {
        /// Source, local or `host:path`
        #[arg(long)]
        source: String,

        /// Local destination directory
        #[arg(long)]
        destination: PathBuf,

        /// Directory to transfer (repeatable)
        #[arg(long = "dir", value_name = "DIR")]
        dirs: Vec<String>,

        /// File listing directories to transfer, one per line
        #[arg(long, value_name = "FILE")]
        dirs_file: Option<PathBuf>,

        /// Parallel transfers
        #[arg(long, default_value_t = NonZeroUsize::new(DEFAULT_WORKERS).unwrap_or(NonZeroUsize::MIN))]
        workers: NonZeroUsize,

        /// Bandwidth limit per transfer in KB/s
        #[arg(long, default_value_t = DEFAULT_BWLIMIT_KBPS)]
        bwlimit: u64,

        /// rsync exclude pattern
        #[arg(long)]
        exclude: Option<String>,

        /// Run failed transfers once more
        #[arg(long)]
        retry: bool,

        /// rsync executable
        #[arg(long, default_value = DEFAULT_RSYNC)]
        rsync: String,
    },

    /// Merge split histogram files with hupdate
    Merge {
        /// YAML merge configuration
        #[arg(long)]
        config: PathBuf,

        /// Systematics set of the configuration to use
        #[arg(long)]
        set: String,

        /// Directory prepended to the input and baseline output files
        #[arg(short = 'd', long)]
        directory: Option<PathBuf>,

        /// hupdate executable
        #[arg(long, default_value = DEFAULT_HUPDATE)]
        hupdate: String,

        /// Print the commands without running them
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_option(s: &str) -> std::result::Result<String, String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.is_empty() => Ok(s.to_string()),
        _ => Err(format!("expected `<Option>=<Value>`, got '{s}'")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    let result = match cli.command {
        Commands::Submit {
            work_dir,
            trex_path,
            actions,
            configs,
            use_configs,
            options,
            integrate_everything,
            dry_run,
            transfer_output,
            run_time,
            cpus,
            requirements,
            submit_command,
            single_reg,
            single_np,
            nps_per_job,
            single_scan,
        } => submit::cmd_submit(submit::SubmitArgs {
            work_dir,
            trex_path,
            actions,
            configs,
            use_configs,
            options,
            integrate_everything,
            dry_run,
            transfer_output,
            run_time,
            cpus,
            requirements,
            submit_command,
            split: SplitRequest {
                split_regions: !single_reg,
                split_systs: !single_np,
                split_scan: !single_scan,
                syst_per_job: nps_per_job
                    .or(NonZeroUsize::new(DEFAULT_SYST_PER_JOB))
                    .unwrap_or(NonZeroUsize::MIN),
            },
        }),
        Commands::Retry { error_dir, output_log, original_args, new_args, steps, extra_signatures } => {
            cmd_retry(RetryRequest {
                error_dir,
                output_log,
                original_args,
                new_args,
                steps,
                extra_signatures,
            })
        }
        Commands::Sync {
            source,
            destination,
            dirs,
            dirs_file,
            workers,
            bwlimit,
            exclude,
            retry,
            rsync,
        } => cmd_sync(
            SyncOptions {
                source,
                destination,
                bwlimit_kbps: bwlimit,
                exclude,
                rsync,
                workers,
                retry,
            },
            dirs,
            dirs_file,
        ),
        Commands::Merge { config, set, directory, hupdate, dry_run } => {
            cmd_merge(&config, &set, directory.as_deref(), &hupdate, dry_run)
        }
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("\x1b[1;31mERROR:\x1b[0m {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_retry(request: RetryRequest) -> Result<i32> {
    if !request.error_dir.is_dir() {
        bail!("error log directory '{}' does not exist", request.error_dir.display());
    }
    let report = triage(&request).with_context(|| {
        format!("failed to triage error logs in '{}'", request.error_dir.display())
    })?;
    println!(
        "{} failed job(s), {} row(s) written to {}",
        report.failed_jobs.len(),
        report.rows_written,
        request.new_args.display()
    );
    Ok(0)
}

fn cmd_sync(opts: SyncOptions, mut dirs: Vec<String>, dirs_file: Option<PathBuf>) -> Result<i32> {
    if let Some(file) = dirs_file {
        dirs.extend(
            read_dir_list(&file)
                .with_context(|| format!("cannot read directory list '{}'", file.display()))?,
        );
    }
    if dirs.is_empty() {
        bail!("no directories to sync");
    }
    let report = sync_directories(&opts, &dirs)?;
    let failed: Vec<&str> = report.failed().map(|o| o.dir.as_str()).collect();
    println!("synced {}/{} directories", dirs.len() - failed.len(), dirs.len());
    if failed.is_empty() {
        Ok(0)
    } else {
        for dir in &failed {
            println!("  failed: {dir}");
        }
        Ok(1)
    }
}

fn cmd_merge(
    config: &Path,
    set: &str,
    directory: Option<&Path>,
    hupdate: &str,
    dry_run: bool,
) -> Result<i32> {
    let mut merge = MergeConfig::from_path(config)?;
    if let Some(dir) = directory {
        merge = merge.with_directory(dir);
    }
    let commands =
        merge.commands(set).with_context(|| format!("invalid merge config '{}'", config.display()))?;
    run_merge(hupdate, &commands, dry_run)?;
    Ok(0)
}
