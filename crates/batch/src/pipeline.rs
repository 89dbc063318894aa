//! The FCPG pipeline for one parameter grid, and batches of them
//!
//! A job takes a parameter grid through these steps:
//!
//! 1. align every band to the flow direction grid
//! 2. accumulate the parameter down the D8 network
//! 3. accumulate the parameter's nodata mask
//! 4. divide by the contributing cell count, corrected for nodata
//!
//! Intermediates go to the work directory as `<param>_HUC<huc><step>.tif`
//! and the result to `<output_dir>/<param>_HUC<huc>_FCPG.tif`.

use crate::config::BatchConfig;
use crate::discover::{discover_parameter_grids, huc_from_fdr_name, param_name};
use crate::error::{BatchError, Result};
use crate::strategy::ProcessingMode;
use fcpg_algorithms::alignment::{align_raster, ResampleMethod};
use fcpg_algorithms::d8::{identify_format, D8Format};
use fcpg_algorithms::engine::TerrainEngine;
use fcpg_algorithms::fcpg::{make_fcpg, FcpgOptions};
use fcpg_algorithms::mask::binarize_nodata;
use fcpg_algorithms::tools;
use fcpg_core::io::{read_geotiff, read_geotiff_bands, save_bands, save_raster, GeoTiffOptions, Precision};
use fcpg_core::Raster;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One parameter grid to turn into an FCPG
#[derive(Debug, Clone, PartialEq)]
pub struct FcpgJob {
    pub param: PathBuf,
    /// Flow direction grid named `taufdr<HUC>.tif`
    pub fdr: PathBuf,
    pub fac: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Encoding of `fdr`; guessed from its values when `None`
    pub fdr_format: Option<D8Format>,
    pub resample_method: ResampleMethod,
    pub min_accum: Option<f64>,
    /// Whether `fac` counts each cell itself. When `None`, a TauDEM encoded
    /// FDR implies an `aread8` FAC, which does, and an ESRI one a FAC that
    /// does not.
    pub fac_includes_self: Option<bool>,
    pub overwrite: bool,
    pub delete_temp: bool,
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// The FCPG was written to this path
    Completed(PathBuf),
    /// The FCPG already existed and overwriting is off
    Skipped(PathBuf),
}

/// Result of one job in a batch
#[derive(Debug)]
pub struct JobOutcome {
    pub param: PathBuf,
    pub result: Result<JobStatus>,
}

impl JobOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Intermediate files of one job
struct WorkFiles {
    reprojected: PathBuf,
    accumulated: PathBuf,
    nodata: PathBuf,
    nodata_accumulated: PathBuf,
}

impl WorkFiles {
    fn all(&self) -> [&Path; 4] {
        [
            &self.reprojected,
            &self.accumulated,
            &self.nodata,
            &self.nodata_accumulated,
        ]
    }
}

impl FcpgJob {
    /// A job with default processing options
    pub fn new(
        param: impl Into<PathBuf>,
        fdr: impl Into<PathBuf>,
        fac: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            param: param.into(),
            fdr: fdr.into(),
            fac: fac.into(),
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
            fdr_format: None,
            resample_method: ResampleMethod::Bilinear,
            min_accum: None,
            fac_includes_self: None,
            overwrite: false,
            delete_temp: false,
        }
    }

    /// A job for `param` using the paths and options of `config`
    pub fn from_config(config: &BatchConfig, param: impl Into<PathBuf>) -> Result<Self> {
        let fdr = config
            .paths
            .fdr
            .clone()
            .ok_or(BatchError::MissingSetting("paths.fdr"))?;
        let fac = config
            .paths
            .fac
            .clone()
            .ok_or(BatchError::MissingSetting("paths.fac"))?;
        let processing = &config.processing;
        Ok(Self {
            fdr_format: processing.fdr_format,
            resample_method: processing.resample_method,
            min_accum: processing.accum_threshold,
            fac_includes_self: processing.fac_includes_self,
            overwrite: processing.overwrite,
            delete_temp: processing.delete_temp,
            ..Self::new(param, fdr, fac, &config.paths.work_dir, &config.paths.output_dir)
        })
    }

    /// One job per parameter grid found under `paths.input`
    pub fn discover(config: &BatchConfig) -> Result<Vec<Self>> {
        let input = config
            .paths
            .input
            .as_ref()
            .ok_or(BatchError::MissingSetting("paths.input"))?;
        discover_parameter_grids(input)?
            .into_iter()
            .map(|param| Self::from_config(config, param))
            .collect()
    }

    fn stem(&self) -> Result<String> {
        Ok(format!("{}_HUC{}", param_name(&self.param)?, huc_from_fdr_name(&self.fdr)?))
    }

    /// Where the FCPG is written
    pub fn output_path(&self) -> Result<PathBuf> {
        Ok(self.output_dir.join(format!("{}_FCPG.tif", self.stem()?)))
    }

    fn work_files(&self) -> Result<WorkFiles> {
        let stem = self.stem()?;
        let file = |step: &str| self.work_dir.join(format!("{stem}{step}.tif"));
        Ok(WorkFiles {
            reprojected: file("rprj"),
            accumulated: file("accum"),
            nodata: file("nodata"),
            nodata_accumulated: file("accumnodata"),
        })
    }
}

/// Build the FCPG for one parameter grid
pub fn run_fcpg_pipeline(job: &FcpgJob, engine: &dyn TerrainEngine) -> Result<JobStatus> {
    let output = job.output_path()?;
    if output.exists() && !job.overwrite {
        warn!("{} exists and will not be overwritten", output.display());
        return Ok(JobStatus::Skipped(output));
    }
    let started = Instant::now();
    info!("Starting FCPG for {}", job.param.display());
    debug!(
        "fdr={} fac={} work_dir={} engine={}",
        job.fdr.display(),
        job.fac.display(),
        job.work_dir.display(),
        engine.name()
    );

    std::fs::create_dir_all(&job.work_dir)?;
    std::fs::create_dir_all(&job.output_dir)?;
    let work = job.work_files()?;

    let fdr: Raster<u8> = read_geotiff(&job.fdr, None)?;
    let fac: Raster<f64> = read_geotiff(&job.fac, None)?;
    let param = read_geotiff_bands(&job.param)?;
    let fdr_format = job.fdr_format.unwrap_or_else(|| identify_format(&fdr));
    let fac_includes_self = job
        .fac_includes_self
        .unwrap_or(fdr_format == D8Format::Taudem);
    debug!("FDR is {:?}, FAC includes self: {}", fdr_format, fac_includes_self);

    info!("Resampling {} band(s) onto the FDR grid", param.len());
    let aligned = param.try_map(|_, band| align_raster(band, &fdr, job.resample_method))?;
    save_bands(&aligned, &work.reprojected, true, None)?;

    let accum = tools::accumulate_parameter(engine, &fdr, job.fdr_format, &aligned, None)?;
    save_bands(&accum, &work.accumulated, true, None)?;

    let nodata = binarize_nodata(aligned.first());
    let nodata_accum = if nodata.data().iter().any(|&v| v == 1) {
        save_raster(
            &nodata,
            &work.nodata,
            true,
            Some(GeoTiffOptions::with_precision(Precision::UInt8)),
        )?;
        let accumulated = tools::accumulate_flow(engine, &fdr, job.fdr_format, None, Some(&nodata.to_f64()))?;
        save_raster(&accumulated, &work.nodata_accumulated, true, None)?;
        Some(accumulated)
    } else {
        debug!("Parameter has no nodata cells");
        None
    };

    info!("Making FCPG");
    let options = FcpgOptions {
        nodata_accum: nodata_accum.as_ref(),
        min_accum: job.min_accum,
        fac_includes_self,
    };
    let fcpg = make_fcpg(&accum, &fac, &options)?;
    save_bands(&fcpg, &output, job.overwrite, None)?;

    if job.delete_temp {
        for path in work.all() {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Unable to delete temporary file {}: {}", path.display(), e);
                }
            }
        }
    }

    info!(
        "Finished {} in {:.1}s",
        output.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(JobStatus::Completed(output))
}

/// Run every job, scheduling them according to `mode`. A failing job does
/// not stop the others.
pub fn run_batch(jobs: &[FcpgJob], engine: &dyn TerrainEngine, mode: ProcessingMode) -> Result<Vec<JobOutcome>> {
    info!("Running {} FCPG job(s) on {} thread(s)", jobs.len(), mode.threads());
    let outcomes = mode.map(jobs, |job| {
        let result = run_fcpg_pipeline(job, engine);
        if let Err(e) = &result {
            warn!("FCPG for {} failed: {}", job.param.display(), e);
        }
        JobOutcome {
            param: job.param.clone(),
            result,
        }
    })?;
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        warn!("{} of {} job(s) failed", failed, outcomes.len());
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcpg_algorithms::accumulation::accumulate_flow;
    use fcpg_algorithms::engine::NativeEngine;
    use fcpg_core::io::write_geotiff;
    use fcpg_core::GeoTransform;

    struct Fixture {
        dir: tempfile::TempDir,
        job: FcpgJob,
    }

    /// A 1x3 strip draining east with a nodata hole in the middle
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let gt = GeoTransform::new(0.0, 1.0, 1.0, -1.0);

        let mut fdr = Raster::from_vec(vec![1u8, 1, 1], 1, 3).unwrap();
        fdr.set_transform(gt);
        fdr.set_nodata(Some(255));
        let fac = accumulate_flow(&fdr, D8Format::Esri, None, None).unwrap();

        let mut param = Raster::from_vec(vec![2.0, f64::NAN, 4.0], 1, 3).unwrap();
        param.set_transform(gt);
        param.set_nodata(Some(f64::NAN));

        let fdr_path = dir.path().join("taufdr0101.tif");
        let fac_path = dir.path().join("taufac0101.tif");
        let param_path = dir.path().join("precip.tif");
        write_geotiff(&fdr, &fdr_path, Some(GeoTiffOptions::with_precision(Precision::UInt8))).unwrap();
        write_geotiff(&fac, &fac_path, None).unwrap();
        write_geotiff(&param, &param_path, None).unwrap();

        let mut job = FcpgJob::new(
            param_path,
            fdr_path,
            fac_path,
            dir.path().join("work"),
            dir.path().join("out"),
        );
        job.fdr_format = Some(D8Format::Esri);
        job.resample_method = ResampleMethod::Nearest;
        Fixture { dir, job }
    }

    /// The same strip with TauDEM codes and an `aread8` style FAC
    fn taudem_fixture() -> Fixture {
        let Fixture { dir, mut job } = fixture();
        let mut fac = Raster::from_vec(vec![1.0, 2.0, 3.0], 1, 3).unwrap();
        fac.set_transform(GeoTransform::new(0.0, 1.0, 1.0, -1.0));
        fac.set_nodata(Some(-1.0));
        write_geotiff(&fac, &job.fac, None).unwrap();
        job.fdr_format = Some(D8Format::Taudem);
        Fixture { dir, job }
    }

    fn fcpg_values(path: &Path) -> Vec<f64> {
        let r: Raster<f64> = read_geotiff(path, None).unwrap();
        r.data().iter().copied().collect()
    }

    #[test]
    fn test_pipeline_writes_fcpg() {
        let Fixture { dir, job } = fixture();
        let engine = NativeEngine::default();
        let status = run_fcpg_pipeline(&job, &engine).unwrap();

        let expected = dir.path().join("out/precip_HUC0101_FCPG.tif");
        assert_eq!(status, JobStatus::Completed(expected.clone()));
        let values = fcpg_values(&expected);
        assert!((values[0] - 2.0).abs() < 1e-6);
        assert!((values[1] - 2.0).abs() < 1e-6);
        assert!((values[2] - 3.0).abs() < 1e-6);
        assert!(dir.path().join("work/precip_HUC0101accumnodata.tif").exists());

        // a second run leaves the result alone
        assert_eq!(run_fcpg_pipeline(&job, &engine).unwrap(), JobStatus::Skipped(expected));
    }

    #[test]
    fn test_pipeline_threshold_and_cleanup() {
        let Fixture { dir, mut job } = fixture();
        job.min_accum = Some(2.0);
        job.delete_temp = true;
        run_fcpg_pipeline(&job, &NativeEngine::default()).unwrap();

        let values = fcpg_values(&job.output_path().unwrap());
        assert!(values[0].is_nan());
        assert!(values[1].is_nan());
        assert!((values[2] - 3.0).abs() < 1e-6);

        let leftovers = std::fs::read_dir(dir.path().join("work")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_taudem_fac_counts_self() {
        let Fixture { dir: _dir, job } = taudem_fixture();
        run_fcpg_pipeline(&job, &NativeEngine::default()).unwrap();
        let values = fcpg_values(&job.output_path().unwrap());
        assert!((values[0] - 2.0).abs() < 1e-6);
        assert!((values[1] - 2.0).abs() < 1e-6);
        assert!((values[2] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fac_convention_override() {
        let Fixture { dir: _dir, mut job } = taudem_fixture();
        job.fac_includes_self = Some(false);
        run_fcpg_pipeline(&job, &NativeEngine::default()).unwrap();
        // an extra cell in every denominator
        let values = fcpg_values(&job.output_path().unwrap());
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[1] - 1.0).abs() < 1e-6);
        assert!((values[2] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_batch_reports_each_job() {
        let Fixture { dir, job } = fixture();
        let mut broken = job.clone();
        broken.fdr = dir.path().join("fdr_without_huc.tif");
        std::fs::copy(&job.fdr, &broken.fdr).unwrap();

        let jobs = vec![job, broken];
        let outcomes = run_batch(&jobs, &NativeEngine::default(), ProcessingMode::Sequential).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1].result, Err(BatchError::Discovery(_))));
    }

    #[test]
    fn test_jobs_from_config() {
        let mut config = BatchConfig::default();
        assert!(matches!(
            FcpgJob::discover(&config),
            Err(BatchError::MissingSetting("paths.input"))
        ));

        let Fixture { dir, job } = fixture();
        config.paths.input = Some(dir.path().join("precip.tif"));
        config.paths.fdr = Some(job.fdr.clone());
        config.paths.fac = Some(job.fac.clone());
        config.processing.accum_threshold = Some(5.0);
        let jobs = FcpgJob::discover(&config).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].min_accum, Some(5.0));
        assert_eq!(jobs[0].fac_includes_self, None);
        assert_eq!(jobs[0].resample_method, ResampleMethod::Bilinear);
        assert_eq!(jobs[0].work_dir, PathBuf::from("work"));
    }
}
