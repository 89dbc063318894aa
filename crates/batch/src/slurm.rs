//! Slurm job scripts
//!
//! Each parameter grid becomes one sbatch script that loads the cluster
//! modules, activates the environment and runs `fcpg pipeline` on it.

use crate::config::{BatchConfig, SlurmConfig};
use crate::discover::param_name;
use crate::error::{BatchError, Result};
use crate::pipeline::FcpgJob;
use fcpg_algorithms::engine::EngineKind;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// One sbatch script
#[derive(Debug, Clone)]
pub struct SlurmJob {
    /// Job name, the parameter grid's file stem
    pub name: String,
    pub job: FcpgJob,
    pub engine: EngineKind,
    /// `key=value` engine options passed with `--opt`
    pub engine_options: Vec<(String, String)>,
    /// Tasks requested with `-n`
    pub cores: usize,
    pub log_dir: PathBuf,
    pub slurm: SlurmConfig,
}

/// Quote a shell word when it contains anything beyond a safe set
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn path_word(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

impl SlurmJob {
    /// The script for `job` under the settings of `config`
    pub fn new(config: &BatchConfig, job: FcpgJob) -> Result<Self> {
        let cores = config.processing.cores.max(1);
        let engine = config.processing.engine;
        let engine_options = match engine {
            EngineKind::Native => vec![("threads".to_string(), cores.to_string())],
            EngineKind::Taudem => vec![
                ("cores".to_string(), config.taudem.cores.to_string()),
                ("mpi_call".to_string(), config.taudem.mpi_call.clone()),
                ("mpi_arg".to_string(), config.taudem.mpi_arg.clone()),
            ],
        };
        Ok(Self {
            name: param_name(&job.param)?,
            job,
            engine,
            engine_options,
            cores,
            log_dir: config.paths.log_dir.clone(),
            slurm: config.slurm.clone(),
        })
    }

    /// The `fcpg pipeline` invocation run by the job
    pub fn command_line(&self) -> String {
        let job = &self.job;
        let mut words = vec![
            shell_quote(&self.slurm.binary),
            "--engine".to_string(),
            self.engine.name().to_string(),
        ];
        for (key, value) in &self.engine_options {
            words.push("--opt".to_string());
            words.push(shell_quote(&format!("{key}={value}")));
        }
        words.extend([
            "pipeline".to_string(),
            "--param".to_string(),
            path_word(&job.param),
            "--fdr".to_string(),
            path_word(&job.fdr),
            "--fac".to_string(),
            path_word(&job.fac),
            "--work-dir".to_string(),
            path_word(&job.work_dir),
            "--output-dir".to_string(),
            path_word(&job.output_dir),
            "--resample-method".to_string(),
            job.resample_method.name().to_string(),
        ]);
        if let Some(format) = job.fdr_format {
            words.push("--fdr-format".to_string());
            words.push(format.name().to_string());
        }
        if let Some(min_accum) = job.min_accum {
            words.push("--min-accum".to_string());
            words.push(min_accum.to_string());
        }
        if let Some(includes_self) = job.fac_includes_self {
            words.push("--fac-includes-self".to_string());
            words.push(includes_self.to_string());
        }
        for (flag, on) in [("--overwrite", job.overwrite), ("--delete-temp", job.delete_temp)] {
            if on {
                words.push(flag.to_string());
            }
        }
        words.join(" ")
    }

    /// The sbatch script
    pub fn render(&self) -> String {
        let slurm = &self.slurm;
        let mut script = String::from("#!/bin/bash\n");
        let mut directive = |d: String| {
            let _ = writeln!(script, "#SBATCH {d}");
        };
        directive(format!("--job-name={}", self.name));
        directive("-c 1".to_string());
        directive(format!("-n {}", self.cores));
        directive(format!("--tasks-per-node={}", slurm.tasks_per_node));
        directive(format!("-o {}/slurm-%A.out", self.log_dir.display()));
        directive(format!("-p {}", slurm.partition));
        directive(format!("--account={}", slurm.account));
        directive(format!("--time={}", slurm.time));
        directive(format!("--mem={}", slurm.memory_mb));
        if let Some(email) = &slurm.email {
            directive("--mail-type=ALL".to_string());
            directive(format!("--mail-user={email}"));
        }
        if slurm.exclusive {
            directive("--exclusive".to_string());
        }

        for module in &slurm.modules {
            let _ = writeln!(script, "module load {module}");
        }
        if let Some(activate) = &slurm.activate {
            let _ = writeln!(script, "{activate}");
        }
        let _ = writeln!(script, "{}", self.command_line());
        script
    }

    /// Write the script to `<dir>/<name>.slurm`
    pub fn write(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.slurm", self.name));
        std::fs::write(&path, self.render())?;
        debug!("Wrote job script {}", path.display());
        Ok(path)
    }
}

/// Hand a script to the scheduler. Returns the scheduler's reply,
/// normally `Submitted batch job <id>`.
pub fn submit(script: impl AsRef<Path>, submit_command: &str) -> Result<String> {
    let script = script.as_ref();
    let output = Command::new(submit_command)
        .arg(script)
        .output()
        .map_err(|e| BatchError::Submission(format!("could not run {submit_command}: {e}")))?;
    if !output.status.success() {
        return Err(BatchError::Submission(format!(
            "{submit_command} {} exited with {}: {}",
            script.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Write and submit one script per job, pausing `slurm.submit_delay_secs`
/// between submissions
pub fn submit_jobs(jobs: &[SlurmJob], script_dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let script_dir = script_dir.as_ref();
    let mut replies = Vec::with_capacity(jobs.len());
    for (i, job) in jobs.iter().enumerate() {
        if i > 0 && job.slurm.submit_delay_secs > 0 {
            std::thread::sleep(Duration::from_secs(job.slurm.submit_delay_secs));
        }
        let path = job.write(script_dir)?;
        info!("Launching batch job for: {}", job.name);
        replies.push(submit(&path, &job.slurm.submit_command)?);
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BatchConfig {
        let mut config = BatchConfig::default();
        config.paths.fdr = Some(PathBuf::from("/data/taufdr1002.tif"));
        config.paths.fac = Some(PathBuf::from("/data/taufac1002.tif"));
        config.paths.work_dir = PathBuf::from("/scratch/work");
        config.paths.output_dir = PathBuf::from("/scratch/my output");
        config.paths.log_dir = PathBuf::from("/scratch/logs");
        config.processing.cores = 4;
        config.processing.engine = EngineKind::Taudem;
        config.processing.accum_threshold = Some(1000.0);
        config.processing.overwrite = true;
        config.taudem.cores = 4;
        config.slurm.account = "hydro".to_string();
        config.slurm.email = Some("hydro@example.com".to_string());
        config.slurm.activate = Some("source activate fcpg".to_string());
        config
    }

    fn slurm_job() -> SlurmJob {
        let config = config();
        let job = FcpgJob::from_config(&config, "/data/params/ppt_01_2020.tif").unwrap();
        SlurmJob::new(&config, job).unwrap()
    }

    #[test]
    fn test_render_script() {
        let script = slurm_job().render();
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[0], "#!/bin/bash");
        assert_eq!(lines[1], "#SBATCH --job-name=ppt_01_2020");
        assert!(lines.contains(&"#SBATCH -n 4"));
        assert!(lines.contains(&"#SBATCH -o /scratch/logs/slurm-%A.out"));
        assert!(lines.contains(&"#SBATCH --account=hydro"));
        assert!(lines.contains(&"#SBATCH --mem=128000"));
        assert!(lines.contains(&"#SBATCH --mail-user=hydro@example.com"));
        assert!(lines.contains(&"#SBATCH --exclusive"));
        assert!(lines.contains(&"module load taudem/5.3.8"));
        assert!(lines.contains(&"source activate fcpg"));

        let command = lines[lines.len() - 1];
        assert!(command.starts_with("fcpg --engine taudem --opt cores=4 --opt mpi_call=mpiexec --opt mpi_arg=-n pipeline"));
        assert!(command.contains("--param /data/params/ppt_01_2020.tif"));
        assert!(command.contains("--output-dir '/scratch/my output'"));
        assert!(command.contains("--min-accum 1000"));
        assert!(command.contains("--overwrite"));
        assert!(!command.contains("--delete-temp"));
        assert!(!command.contains("--fac-includes-self"));

        let mut pinned = slurm_job();
        pinned.job.fac_includes_self = Some(true);
        assert!(pinned.command_line().contains("--fac-includes-self true"));
    }

    #[test]
    fn test_no_email_no_mail_directives() {
        let mut config = config();
        config.slurm.email = None;
        config.slurm.exclusive = false;
        config.processing.engine = EngineKind::Native;
        let job = FcpgJob::from_config(&config, "ppt.tif").unwrap();
        let script = SlurmJob::new(&config, job).unwrap().render();
        assert!(!script.contains("--mail"));
        assert!(!script.contains("--exclusive"));
        assert!(script.contains("fcpg --engine native --opt threads=4 pipeline"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/a/b.tif"), "/a/b.tif");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_write_and_submit() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = slurm_job();
        let path = job.write(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("ppt_01_2020.slurm"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), job.render());

        assert!(submit(&path, "true").is_ok());
        assert!(matches!(submit(&path, "false"), Err(BatchError::Submission(_))));
        assert!(matches!(
            submit(&path, "fcpg-no-such-scheduler"),
            Err(BatchError::Submission(_))
        ));

        job.slurm.submit_command = "true".to_string();
        job.slurm.submit_delay_secs = 0;
        let replies = submit_jobs(&[job.clone(), job], dir.path()).unwrap();
        assert_eq!(replies.len(), 2);
    }
}
