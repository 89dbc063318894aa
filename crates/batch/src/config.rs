//! Batch configuration
//!
//! A batch run is described by a TOML document with four tables:
//!
//! ```toml
//! [paths]
//! input = "params/"        # a directory of .tif grids, or one grid
//! fdr = "taufdr0101.tif"
//! fac = "taufac0101.tif"
//! work_dir = "work"
//! output_dir = "output"
//! log_dir = "logs"
//!
//! [processing]
//! cores = 4
//! accum_threshold = 1000
//! resample_method = "bilinear"
//! engine = "taudem"
//!
//! [taudem]
//! cores = 4
//!
//! [slurm]
//! account = "my_account"
//! email = "me@example.com"
//! ```
//!
//! Every table and every key is optional and falls back to its default.

use crate::error::{BatchError, Result};
use crate::strategy::ProcessingMode;
use fcpg_algorithms::alignment::ResampleMethod;
use fcpg_algorithms::d8::D8Format;
use fcpg_algorithms::engine::{EngineKind, NativeEngine, NativeOptions, TaudemEngine, TaudemOptions, TerrainEngine};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Options handed to the TauDEM engine
    #[serde(default)]
    pub taudem: TaudemOptions,

    #[serde(default)]
    pub slurm: SlurmConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Parameter grid, or a directory searched recursively for `.tif` grids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,

    /// Flow direction grid, named `taufdr<HUC>.tif`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdr: Option<PathBuf>,

    /// Flow accumulation grid matching `fdr`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fac: Option<PathBuf>,

    /// Intermediate files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Finished FCPGs
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Slurm job logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Cores allocated to each job
    #[serde(default = "default_cores")]
    pub cores: usize,

    /// Contributing cell count below which the FCPG is nodata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accum_threshold: Option<f64>,

    /// Method used to put parameter grids on the FDR grid
    #[serde(default = "default_resample_method")]
    pub resample_method: ResampleMethod,

    /// Encoding of the FDR; guessed from its values when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdr_format: Option<D8Format>,

    /// Replace existing FCPGs
    #[serde(default)]
    pub overwrite: bool,

    /// Remove intermediate files once a job finishes
    #[serde(default)]
    pub delete_temp: bool,

    #[serde(default)]
    pub engine: EngineKind,

    /// The FAC grid counts each cell itself, as raw TauDEM `aread8` does.
    /// Follows the FDR encoding when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fac_includes_self: Option<bool>,

    /// Parameter grids processed concurrently in a local run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlurmConfig {
    #[serde(default = "default_account")]
    pub account: String,

    #[serde(default = "default_partition")]
    pub partition: String,

    /// Wall time limit, `HH:MM:SS`
    #[serde(default = "default_time")]
    pub time: String,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    #[serde(default = "default_tasks_per_node")]
    pub tasks_per_node: usize,

    /// Address notified of all job events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Environment modules loaded before the job runs
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,

    /// Shell line that activates the job environment, e.g. `source activate fcpg`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activate: Option<String>,

    /// Request nodes for exclusive use
    #[serde(default = "default_true")]
    pub exclusive: bool,

    /// Pause between submissions
    #[serde(default = "default_submit_delay_secs")]
    pub submit_delay_secs: u64,

    /// `fcpg` executable invoked by the job
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Command that submits a job script
    #[serde(default = "default_submit_command")]
    pub submit_command: String,
}

// Default value functions
fn default_work_dir() -> PathBuf { PathBuf::from("work") }
fn default_output_dir() -> PathBuf { PathBuf::from("output") }
fn default_log_dir() -> PathBuf { PathBuf::from("logs") }
fn default_cores() -> usize { 1 }
fn default_resample_method() -> ResampleMethod { ResampleMethod::Bilinear }
fn default_account() -> String { "your_hpc_account_here".to_string() }
fn default_partition() -> String { "normal".to_string() }
fn default_time() -> String { "01:00:00".to_string() }
fn default_memory_mb() -> u64 { 128_000 }
fn default_tasks_per_node() -> usize { 20 }
fn default_modules() -> Vec<String> { vec!["taudem/5.3.8".to_string()] }
fn default_true() -> bool { true }
fn default_submit_delay_secs() -> u64 { 5 }
fn default_binary() -> String { "fcpg".to_string() }
fn default_submit_command() -> String { "sbatch".to_string() }

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: None,
            fdr: None,
            fac: None,
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            cores: default_cores(),
            accum_threshold: None,
            resample_method: default_resample_method(),
            fdr_format: None,
            overwrite: false,
            delete_temp: false,
            engine: EngineKind::default(),
            fac_includes_self: None,
            jobs: None,
        }
    }
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            partition: default_partition(),
            time: default_time(),
            memory_mb: default_memory_mb(),
            tasks_per_node: default_tasks_per_node(),
            email: None,
            modules: default_modules(),
            activate: None,
            exclusive: true,
            submit_delay_secs: default_submit_delay_secs(),
            binary: default_binary(),
            submit_command: default_submit_command(),
        }
    }
}

impl BatchConfig {
    pub fn from_toml_str(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Read a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|source| BatchError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// How many parameter grids a local run processes at once
    pub fn processing_mode(&self) -> ProcessingMode {
        match self.processing.jobs {
            Some(1) => ProcessingMode::Sequential,
            Some(n) if n > 1 => ProcessingMode::ParallelWith(n),
            _ => ProcessingMode::Parallel,
        }
    }

    /// The configured engine. The native engine gets `processing.cores`
    /// threads, TauDEM gets the `[taudem]` table.
    pub fn build_engine(&self) -> Result<Box<dyn TerrainEngine>> {
        Ok(match self.processing.engine {
            EngineKind::Native => Box::new(NativeEngine::new(NativeOptions {
                threads: Some(self.processing.cores.max(1)),
            })?),
            EngineKind::Taudem => Box::new(TaudemEngine::new(self.taudem.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = BatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, BatchConfig::default());
        assert_eq!(config.processing.resample_method, ResampleMethod::Bilinear);
        assert_eq!(config.slurm.partition, "normal");
        assert_eq!(config.slurm.modules, vec!["taudem/5.3.8".to_string()]);
        assert_eq!(config.taudem.mpi_call, "mpiexec");
        assert_eq!(config.processing_mode(), ProcessingMode::Parallel);
    }

    #[test]
    fn test_partial_tables() {
        let config = BatchConfig::from_toml_str(
            r#"
            [paths]
            input = "params"
            fdr = "taufdr0101.tif"

            [processing]
            engine = "taudem"
            accum_threshold = 1000
            jobs = 1

            [taudem]
            cores = 8
            mpi_call = "srun"

            [slurm]
            email = "hydro@example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.input, Some(PathBuf::from("params")));
        assert_eq!(config.paths.work_dir, PathBuf::from("work"));
        assert_eq!(config.processing.engine, EngineKind::Taudem);
        assert_eq!(config.processing.accum_threshold, Some(1000.0));
        assert_eq!(config.processing_mode(), ProcessingMode::Sequential);
        assert_eq!(config.taudem.cores, 8);
        assert_eq!(config.taudem.mpi_arg, "-n");
        assert_eq!(config.slurm.email.as_deref(), Some("hydro@example.com"));
        assert_eq!(config.slurm.time, "01:00:00");

        let engine = config.build_engine().unwrap();
        assert_eq!(engine.name(), "taudem");
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = BatchConfig::default();
        config.processing.jobs = Some(3);
        config.processing.fdr_format = Some(D8Format::Taudem);
        config.slurm.activate = Some("source activate fcpg".to_string());
        let text = config.to_toml_string().unwrap();
        assert_eq!(BatchConfig::from_toml_str(&text).unwrap(), config);
        assert_eq!(config.processing_mode(), ProcessingMode::ParallelWith(3));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.toml");
        std::fs::write(&path, "[processing]\nengine = \"pysheds\"\n").unwrap();
        match BatchConfig::load(&path) {
            Err(BatchError::Config { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected a config error, got {:?}", other),
        }
    }
}
