//! Batch artifacts: job-argument table, worker wrapper script, HTCondor submit file.
//!
//! Which fields exist for a granularity is data ([`GranularitySchema`]); each
//! artifact is a plain record with a single `render` function.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tsub_core::{ActionSet, Error, Granularity, Result};

use crate::plan::WorkUnit;

/// A job-table column, which is also an HTCondor macro name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Config,
    ShortConfig,
    Region,
    Suffix,
    Systematics,
    Step,
}

impl Column {
    /// Name used in the `queue ... from` statement and in `$(...)` references.
    pub fn macro_name(self) -> &'static str {
        match self {
            Self::Config => "Config",
            Self::ShortConfig => "ShortConfig",
            Self::Region => "Region",
            Self::Suffix => "Suffix",
            Self::Systematics => "Systematics",
            Self::Step => "Step",
        }
    }

    /// Shell variable the wrapper script stores the positional argument in.
    pub fn shell_var(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::ShortConfig => "short_config",
            Self::Region => "region",
            Self::Suffix => "suffix",
            Self::Systematics => "systs",
            Self::Step => "step",
        }
    }

    fn value(self, unit: &WorkUnit) -> Option<String> {
        match self {
            Self::Config => Some(unit.config.display().to_string()),
            Self::ShortConfig => Some(unit.short_config.clone()),
            Self::Region => unit.region.clone(),
            Self::Suffix => unit.suffix.clone(),
            Self::Systematics => unit.systematics.clone(),
            Self::Step => unit.step.map(|s| s.to_string()),
        }
    }
}

/// Fields and TRExFitter options of one granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GranularitySchema {
    /// Columns of the job-argument table.
    pub job_file: &'static [Column],
    /// Positional arguments of the wrapper script.
    pub script_args: &'static [Column],
    /// Columns embedded in `.out`/`.err` file names.
    pub log_args: &'static [Column],
    /// TRExFitter option template, referencing wrapper shell variables.
    pub options: &'static [&'static str],
}

impl GranularitySchema {
    pub fn for_granularity(granularity: Granularity) -> Self {
        use Column::*;
        match granularity {
            Granularity::Global => Self {
                job_file: &[Config, ShortConfig],
                script_args: &[Config],
                log_args: &[ShortConfig],
                options: &[],
            },
            Granularity::Region => Self {
                job_file: &[Config, ShortConfig, Region],
                script_args: &[Config, Region],
                log_args: &[ShortConfig, Region],
                options: &["Regions=${region}"],
            },
            Granularity::Syst => Self {
                job_file: &[Config, ShortConfig, Region, Suffix, Systematics],
                script_args: &[Config, Region, Suffix, Systematics],
                log_args: &[ShortConfig, Region, Suffix],
                options: &["Regions=${region}", "Systematics=${systs}", "SaveSuffix=_${suffix}"],
            },
            Granularity::Ranking => Self {
                job_file: &[Config, ShortConfig, Suffix, Systematics],
                script_args: &[Config, Systematics],
                log_args: &[ShortConfig, Suffix],
                options: &["Ranking=${systs}"],
            },
            Granularity::LhScan => Self {
                job_file: &[Config, ShortConfig, Step],
                script_args: &[Config, Step],
                log_args: &[ShortConfig, Step],
                options: &["LHscanStep=${step}"],
            },
        }
    }
}

/// Whitespace-delimited job-argument table; every row has `columns.len()` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
}

impl JobTable {
    pub fn from_units(units: &[WorkUnit], granularity: Granularity) -> Result<Self> {
        let columns = GranularitySchema::for_granularity(granularity).job_file.to_vec();
        let mut rows = Vec::with_capacity(units.len());
        for unit in units {
            let mut row = Vec::with_capacity(columns.len());
            for &col in &columns {
                let Some(value) = col.value(unit) else {
                    return Err(Error::Validation(format!(
                        "work unit for '{}' has no {} field required by granularity {granularity}",
                        unit.short_config,
                        col.macro_name()
                    )));
                };
                if value.is_empty() || value.chars().any(char::is_whitespace) {
                    return Err(Error::Validation(format!(
                        "{} value {value:?} of '{}' cannot be written to a whitespace-delimited \
                         job table",
                        col.macro_name(),
                        unit.short_config
                    )));
                }
                row.push(value);
            }
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&row.join(" "));
            out.push('\n');
        }
        out
    }
}

/// Shell script executed on the worker node for every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperScript {
    pub actions: ActionSet,
    pub positional: Vec<Column>,
    /// Option template followed by user-supplied `OPT=VALUE` options.
    pub options: Vec<String>,
    /// `setup.sh` of the TRExFitter installation.
    pub setup_script: PathBuf,
    /// Directory to `cd` into before running (relative config paths).
    pub workdir: Option<PathBuf>,
    pub executable: String,
}

impl WrapperScript {
    pub fn new(
        actions: &ActionSet,
        granularity: Granularity,
        extra_options: &[String],
        trex_path: &Path,
        workdir: Option<PathBuf>,
    ) -> Self {
        let schema = GranularitySchema::for_granularity(granularity);
        let mut options: Vec<String> = schema.options.iter().map(|s| s.to_string()).collect();
        options.extend(extra_options.iter().cloned());
        Self {
            actions: actions.clone(),
            positional: schema.script_args.to_vec(),
            options,
            setup_script: trex_path.join("setup.sh"),
            workdir,
            executable: "trex-fitter".to_string(),
        }
    }

    pub fn option_string(&self) -> String {
        self.options.join(":")
    }

    pub fn render(&self) -> String {
        let mut s = String::from("#!/bin/bash\n\n");
        for (i, col) in self.positional.iter().enumerate() {
            let n = i + 1;
            let _ = writeln!(
                s,
                "{var}=${{{n}:?{name} should be supplied as parameter {n} but was not!}}",
                var = col.shell_var(),
                name = col.macro_name(),
            );
        }
        s.push('\n');
        if let Some(dir) = &self.workdir {
            let _ = writeln!(s, "cd \"{}\"", dir.display());
        }
        let _ = writeln!(s, "source \"{}\"", self.setup_script.display());
        let _ = writeln!(
            s,
            "{} {} ${{config}} \"{}\"",
            self.executable,
            self.actions,
            self.option_string()
        );
        s.push_str("pwd\nls -l\n");
        s
    }
}

/// HTCondor submit description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitDescriptor {
    pub universe: String,
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub log: PathBuf,
    pub output: PathBuf,
    pub error: PathBuf,
    /// Stage results back into this directory (no shared filesystem).
    pub transfer_output_to: Option<PathBuf>,
    /// Seconds.
    pub run_time: Option<u64>,
    pub cpus: Option<u32>,
    pub requirements: Option<String>,
    pub queue_columns: Vec<Column>,
    pub queue_file: PathBuf,
}

impl SubmitDescriptor {
    /// Descriptor for `granularity` with log names
    /// `TRExFitter.<actions>.$(ClusterId)[.$(ProcId).<log columns>].{log,out,err}`.
    pub fn new(
        actions: &ActionSet,
        granularity: Granularity,
        script: &Path,
        job_table: &Path,
        log_dir: &Path,
    ) -> Self {
        let schema = GranularitySchema::for_granularity(granularity);
        let macro_ref = |c: &Column| format!("$({})", c.macro_name());
        let log_fields: Vec<String> = schema.log_args.iter().map(macro_ref).collect();
        let log_fields = log_fields.join(".");
        let job_log = |ext: &str| {
            log_dir.join(format!("TRExFitter.{actions}.$(ClusterId).$(ProcId).{log_fields}.{ext}"))
        };

        Self {
            universe: "vanilla".to_string(),
            executable: script.to_path_buf(),
            arguments: schema.script_args.iter().map(macro_ref).collect(),
            log: log_dir.join(format!("TRExFitter.{actions}.$(ClusterId).log")),
            output: job_log("out"),
            error: job_log("err"),
            transfer_output_to: None,
            run_time: None,
            cpus: None,
            requirements: None,
            queue_columns: schema.job_file.to_vec(),
            queue_file: job_table.to_path_buf(),
        }
    }

    pub fn render(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "universe = {}", self.universe);
        let _ = writeln!(s, "executable = {}", self.executable.display());
        let _ = writeln!(s, "arguments = {}", self.arguments.join(" "));
        s.push('\n');
        let _ = writeln!(s, "log = {}", self.log.display());
        let _ = writeln!(s, "output = {}", self.output.display());
        let _ = writeln!(s, "error = {}", self.error.display());
        s.push('\n');

        if let Some(dir) = &self.transfer_output_to {
            let _ = writeln!(s, "initialdir = {}", dir.display());
            s.push_str("should_transfer_files = YES\n");
            s.push_str("when_to_transfer_output = ON_EXIT\n\n");
        }

        if let Some(secs) = self.run_time {
            let _ = writeln!(s, "+RequestRuntime = {secs}");
        }
        if let Some(cpus) = self.cpus {
            let _ = writeln!(s, "RequestCpus = {cpus}");
        }
        if let Some(req) = &self.requirements {
            let _ = writeln!(s, "requirements = {req}");
        }
        if self.run_time.is_some() || self.cpus.is_some() || self.requirements.is_some() {
            s.push('\n');
        }

        let cols: Vec<&str> = self.queue_columns.iter().map(|c| c.macro_name()).collect();
        let _ = writeln!(s, "queue {} from {}", cols.join(", "), self.queue_file.display());
        s
    }
}

/// Paths of the artifacts written for one action string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub job_table: PathBuf,
    pub script: PathBuf,
    pub submit: PathBuf,
    pub manifest: PathBuf,
}

impl ArtifactPaths {
    pub fn new(script_dir: &Path, actions: &ActionSet) -> Self {
        Self {
            job_table: script_dir.join(format!("job_arguments_{actions}.txt")),
            script: script_dir.join(format!("script_{actions}.sh")),
            submit: script_dir.join(format!("submit_{actions}.sub")),
            manifest: script_dir.join(format!("manifest_{actions}.json")),
        }
    }
}

/// Write the job table, the wrapper (mode 0755) and the submit file.
pub fn write_artifacts(
    paths: &ArtifactPaths,
    table: &JobTable,
    script: &WrapperScript,
    descriptor: &SubmitDescriptor,
) -> Result<()> {
    std::fs::write(&paths.job_table, table.render())?;
    std::fs::write(&paths.script, script.render())?;
    make_executable(&paths.script)?;
    std::fs::write(&paths.submit, descriptor.render())?;
    tracing::info!(
        job_table = %paths.job_table.display(),
        script = %paths.script.display(),
        submit = %paths.submit.display(),
        jobs = table.rows.len(),
        "wrote batch artifacts"
    );
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(s: &str) -> ActionSet {
        ActionSet::parse(s).unwrap()
    }

    fn unit(region: Option<&str>, suffix: Option<&str>, systs: Option<&str>) -> WorkUnit {
        WorkUnit {
            config: PathBuf::from("/w/configs/fit.yaml"),
            short_config: "fit".into(),
            region: region.map(String::from),
            suffix: suffix.map(String::from),
            systematics: systs.map(String::from),
            step: None,
        }
    }

    #[test]
    fn schema_columns_are_consistent() {
        for g in Granularity::ALL {
            let schema = GranularitySchema::for_granularity(g);
            assert_eq!(schema.job_file[0], Column::Config);
            assert_eq!(schema.script_args[0], Column::Config);
            for col in schema.script_args.iter().chain(schema.log_args) {
                assert!(schema.job_file.contains(col), "{g}: {col:?} missing from job file");
            }
            for opt in schema.options {
                let referenced = schema.script_args.iter().any(|c| opt.contains(c.shell_var()));
                assert!(referenced, "{g}: option {opt} references no positional argument");
            }
        }
    }

    #[test]
    fn job_table_rows_follow_schema() {
        let units = vec![
            unit(Some("SR"), Some("Syst_group_0000"), Some("a,b")),
            unit(Some("SR"), Some("Syst_group_0001"), Some("c")),
        ];
        let table = JobTable::from_units(&units, Granularity::Syst).unwrap();
        assert_eq!(
            table.render(),
            "/w/configs/fit.yaml fit SR Syst_group_0000 a,b\n\
             /w/configs/fit.yaml fit SR Syst_group_0001 c\n"
        );
        assert!(table.rows.iter().all(|r| r.len() == 5));
    }

    #[test]
    fn job_table_rejects_missing_fields_and_whitespace() {
        let err = JobTable::from_units(&[unit(None, None, None)], Granularity::Region).unwrap_err();
        assert!(err.to_string().contains("Region"), "{err}");

        let err =
            JobTable::from_units(&[unit(Some("S R"), None, None)], Granularity::Region).unwrap_err();
        assert!(err.to_string().contains("whitespace"), "{err}");
    }

    #[test]
    fn wrapper_script_for_syst_granularity() {
        let script = WrapperScript::new(
            &actions("n"),
            Granularity::Syst,
            &["Lumi=140".to_string()],
            Path::new("/opt/TRExFitter"),
            Some(PathBuf::from("/w/configs")),
        );
        let expected = "#!/bin/bash\n\n\
            config=${1:?Config should be supplied as parameter 1 but was not!}\n\
            region=${2:?Region should be supplied as parameter 2 but was not!}\n\
            suffix=${3:?Suffix should be supplied as parameter 3 but was not!}\n\
            systs=${4:?Systematics should be supplied as parameter 4 but was not!}\n\
            \n\
            cd \"/w/configs\"\n\
            source \"/opt/TRExFitter/setup.sh\"\n\
            trex-fitter n ${config} \"Regions=${region}:Systematics=${systs}:SaveSuffix=_${suffix}:Lumi=140\"\n\
            pwd\nls -l\n";
        assert_eq!(script.render(), expected);
    }

    #[test]
    fn wrapper_script_global_has_empty_options() {
        let script =
            WrapperScript::new(&actions("wf"), Granularity::Global, &[], Path::new("/t"), None);
        let text = script.render();
        assert!(text.contains("trex-fitter wf ${config} \"\"\n"));
        assert!(!text.contains("cd "));
        assert!(!text.contains("${2"));
    }

    #[test]
    fn wrapper_paths_with_spaces_stay_one_word() {
        let script = WrapperScript::new(
            &actions("wf"),
            Granularity::Global,
            &[],
            Path::new("/home/my user/TRExFitter"),
            Some(PathBuf::from("/w/my run/configs")),
        );
        let text = script.render();
        assert!(text.contains("cd \"/w/my run/configs\"\n"), "{text}");
        assert!(text.contains("source \"/home/my user/TRExFitter/setup.sh\"\n"), "{text}");
    }

    #[test]
    fn submit_descriptor_ranking() {
        let mut d = SubmitDescriptor::new(
            &actions("r"),
            Granularity::Ranking,
            Path::new("/w/scripts/script_r.sh"),
            Path::new("/w/scripts/job_arguments_r.txt"),
            Path::new("/w/logs"),
        );
        d.run_time = Some(14400);
        d.cpus = Some(4);
        d.transfer_output_to = Some(PathBuf::from("/w/results"));

        let expected = "universe = vanilla\n\
            executable = /w/scripts/script_r.sh\n\
            arguments = $(Config) $(Systematics)\n\
            \n\
            log = /w/logs/TRExFitter.r.$(ClusterId).log\n\
            output = /w/logs/TRExFitter.r.$(ClusterId).$(ProcId).$(ShortConfig).$(Suffix).out\n\
            error = /w/logs/TRExFitter.r.$(ClusterId).$(ProcId).$(ShortConfig).$(Suffix).err\n\
            \n\
            initialdir = /w/results\n\
            should_transfer_files = YES\n\
            when_to_transfer_output = ON_EXIT\n\
            \n\
            +RequestRuntime = 14400\n\
            RequestCpus = 4\n\
            \n\
            queue Config, ShortConfig, Suffix, Systematics from /w/scripts/job_arguments_r.txt\n";
        assert_eq!(d.render(), expected);
    }

    #[test]
    fn submit_descriptor_minimal() {
        let d = SubmitDescriptor::new(
            &actions("wf"),
            Granularity::Global,
            Path::new("/s.sh"),
            Path::new("/j.txt"),
            Path::new("/l"),
        );
        let text = d.render();
        assert!(text.ends_with("\nqueue Config, ShortConfig from /j.txt\n"));
        assert!(!text.contains("RequestCpus"));
        assert!(!text.contains("requirements"));
        assert!(!text.contains("initialdir"));
    }

    #[cfg(unix)]
    #[test]
    fn written_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let a = actions("wf");
        let paths = ArtifactPaths::new(dir.path(), &a);
        let table = JobTable::from_units(&[unit(None, None, None)], Granularity::Global).unwrap();
        let script = WrapperScript::new(&a, Granularity::Global, &[], Path::new("/t"), None);
        let d =
            SubmitDescriptor::new(&a, Granularity::Global, &paths.script, &paths.job_table, dir.path());
        write_artifacts(&paths, &table, &script, &d).unwrap();

        let mode = std::fs::metadata(&paths.script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(std::fs::read_to_string(&paths.job_table).unwrap(), "/w/configs/fit.yaml fit\n");
    }
}
