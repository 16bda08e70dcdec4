//! `trexsub submit`: from configs to a queued HTCondor cluster.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tsub_batch::emit::{ArtifactPaths, JobTable, SubmitDescriptor, WrapperScript, write_artifacts};
use tsub_batch::manifest::Manifest;
use tsub_batch::plan::{build_inventory, plan};
use tsub_batch::policy::{RequestedPolicy, SplitRequest, resolve_policy};
use tsub_batch::select::{StdinPrompt, select_configs};
use tsub_batch::submit::submit_descriptor;
use tsub_batch::workspace::{RESULTS_DIR_FROM_CONFIGS, WorkDir, WorkspaceState};
use tsub_config::{Integrator, ScanMode, cached_configs};
use tsub_core::ActionSet;

pub struct SubmitArgs {
    pub work_dir: PathBuf,
    pub trex_path: PathBuf,
    pub actions: Option<String>,
    pub configs: Vec<PathBuf>,
    pub use_configs: Vec<String>,
    pub options: Vec<String>,
    pub integrate_everything: bool,
    pub dry_run: bool,
    pub transfer_output: bool,
    pub run_time: Option<u64>,
    pub cpus: Option<u32>,
    pub requirements: Option<String>,
    pub submit_command: String,
    pub split: SplitRequest,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("cannot resolve path '{}'", path.display()))
}

/// Run the submission and return the process exit code.
pub fn cmd_submit(args: SubmitArgs) -> Result<i32> {
    // Action letters are validated before anything touches the disk.
    let actions = args.actions.as_deref().map(ActionSet::parse).transpose()?;

    let work_dir = WorkDir::new(absolute(&args.work_dir)?);
    let trex_path = absolute(&args.trex_path)?;
    let configs = args.configs.iter().map(|c| absolute(c)).collect::<Result<Vec<_>>>()?;

    work_dir
        .ensure_root()
        .with_context(|| format!("cannot create work directory '{}'", work_dir.root.display()))?;
    let state = WorkspaceState::load(&work_dir, args.integrate_everything)?;

    let selected = if state.integrate {
        if !configs.is_empty() {
            Integrator::new(&work_dir.configs, RESULTS_DIR_FROM_CONFIGS).integrate(&configs)?;
        }
        let cached = cached_configs(&work_dir.configs)?;
        if cached.is_empty() {
            bail!(
                "no configs cached in '{}'; supply at least one with --config",
                work_dir.configs.display()
            );
        }
        if args.use_configs.is_empty() {
            cached
        } else {
            select_configs(&cached, &args.use_configs, &mut StdinPrompt)?
        }
    } else {
        if configs.is_empty() {
            bail!("at least one config has to be supplied with --config outside integrated mode");
        }
        if !args.use_configs.is_empty() {
            tracing::warn!("--use-config only has an effect in integrated mode; ignoring it");
        }
        configs
    };

    let Some(actions) = actions else {
        tracing::info!("no actions given, only updating configs");
        if !state.integrate {
            tracing::warn!("outside integrated mode a config update has no effect");
        }
        state.persist(&work_dir)?;
        return Ok(0);
    };

    let inventory = build_inventory(&selected, ScanMode::for_actions(&actions))?;
    let requested = RequestedPolicy::new(&actions, args.split);
    let policy = resolve_policy(&requested, &inventory);
    let units = plan(&inventory, &policy)?;
    tracing::info!(actions = %actions, granularity = %policy.granularity, jobs = units.len(), "planned jobs");

    std::fs::create_dir_all(&work_dir.scripts)?;
    std::fs::create_dir_all(&work_dir.logs)?;
    if state.integrate || args.transfer_output {
        std::fs::create_dir_all(&work_dir.results)?;
    }

    let table = JobTable::from_units(&units, policy.granularity)?;
    let script = WrapperScript::new(
        &actions,
        policy.granularity,
        &args.options,
        &trex_path,
        state.integrate.then(|| work_dir.configs.clone()),
    );
    let paths = ArtifactPaths::new(&work_dir.scripts, &actions);
    let mut descriptor = SubmitDescriptor::new(
        &actions,
        policy.granularity,
        &paths.script,
        &paths.job_table,
        &work_dir.logs,
    );
    descriptor.transfer_output_to = args.transfer_output.then(|| work_dir.results.clone());
    descriptor.run_time = args.run_time;
    descriptor.cpus = args.cpus;
    descriptor.requirements = args.requirements.clone();

    write_artifacts(&paths, &table, &script, &descriptor)?;
    let config_names: Vec<String> = selected.iter().map(|c| c.display().to_string()).collect();
    Manifest::collect(&paths, actions.as_str(), &policy, units.len(), &config_names)?
        .write(&paths.manifest)?;

    state.persist(&work_dir)?;

    if args.dry_run {
        tracing::info!(dir = %work_dir.scripts.display(), "dry run, jobs not submitted");
        return Ok(0);
    }
    Ok(submit_descriptor(&args.submit_command, &paths.submit)?)
}
