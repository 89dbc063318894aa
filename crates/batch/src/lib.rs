//! # FCPG Batch
//!
//! Runs the FCPG pipeline over many parameter grids, either locally on a
//! rayon pool or as one Slurm job per grid.
//!
//! ```no_run
//! use fcpg_batch::{BatchConfig, FcpgJob, run_batch};
//!
//! let config = BatchConfig::load("batch.toml")?;
//! let engine = config.build_engine()?;
//! let jobs = FcpgJob::discover(&config)?;
//! for outcome in run_batch(&jobs, engine.as_ref(), config.processing_mode())? {
//!     println!("{}: {:?}", outcome.param.display(), outcome.result);
//! }
//! # Ok::<(), fcpg_batch::BatchError>(())
//! ```

pub mod config;
pub mod discover;
pub mod error;
pub mod pipeline;
pub mod slurm;
pub mod strategy;

pub use config::{BatchConfig, PathsConfig, ProcessingConfig, SlurmConfig};
pub use discover::{discover_parameter_grids, huc_from_fdr_name, param_name};
pub use error::{BatchError, Result};
pub use pipeline::{run_batch, run_fcpg_pipeline, FcpgJob, JobOutcome, JobStatus};
pub use slurm::{submit, submit_jobs, SlurmJob};
pub use strategy::ProcessingMode;
