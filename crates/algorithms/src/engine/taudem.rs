//! TauDEM command-line engine
//!
//! Inputs are written to GeoTIFFs in a temporary directory, the TauDEM
//! tool is launched through MPI and its output is read back. TauDEM's
//! `aread8` counts each cell itself; results are shifted to the
//! self-exclusive FAC convention before they are returned.

use super::{EngineTool, TaudemOptions, TerrainEngine, TAUDEM_OPTION_KEYS};
use crate::accumulation::{adjust_parameter_raster, make_fac_weights};
use crate::d8::{fdr_has_data, D8Format};
use crate::decay::{nearest_d8, zero_nodata_weights, DECAY_BAND_NAME};
use crate::pour_points::PourPoints;
use crate::upslope::ExtremeMode;
use fcpg_core::io::{read_geotiff, write_geotiff, GeoTiffOptions, Precision};
use fcpg_core::{Error, Raster, RasterBands, RasterElement, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::debug;

const ENGINE: &str = "taudem";

/// Out-of-bounds weight written for cells without flow direction
const WEIGHT_NODATA: f64 = -1.0;

#[derive(Debug, Clone, Default)]
pub struct TaudemEngine {
    options: TaudemOptions,
}

fn engine_error(reason: impl Into<String>) -> Error {
    Error::Engine {
        engine: ENGINE,
        reason: reason.into(),
    }
}

/// Scratch directory holding one tool run's files
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("fcpg_taudem").tempdir()?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write<T: RasterElement>(&self, name: &str, raster: &Raster<T>, precision: Precision) -> Result<PathBuf> {
        let path = self.path(name);
        write_geotiff(raster, &path, Some(GeoTiffOptions::with_precision(precision)))?;
        Ok(path)
    }
}

impl TaudemEngine {
    pub fn new(options: TaudemOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TaudemOptions {
        &self.options
    }

    /// `{mpi_call} {mpi_arg} {cores} {tool} {args..}`
    fn command(&self, tool: &str, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.options.mpi_call);
        cmd.arg(&self.options.mpi_arg)
            .arg(self.options.cores.to_string())
            .arg(tool)
            .args(args);
        cmd
    }

    /// Run `tool` and check it produced `output`
    fn run(&self, tool: &str, args: &[OsString], output: &Path) -> Result<()> {
        let mut cmd = self.command(tool, args);
        debug!("Running {:?}", cmd);
        let out = cmd
            .output()
            .map_err(|e| engine_error(format!("cannot launch {}: {e}", self.options.mpi_call)))?;
        if !out.status.success() {
            return Err(engine_error(format!(
                "{tool} exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        if !output.exists() {
            return Err(engine_error(format!("{tool} failed to create {}", output.display())));
        }
        Ok(())
    }

    /// Read a TauDEM output as f64 with NaN nodata
    fn read_output(path: &Path) -> Result<Raster<f64>> {
        let raster: Raster<f64> = read_geotiff(path, None)?;
        let mut out = raster.map(Some(f64::NAN), |v| if raster.is_nodata(v) { f64::NAN } else { v });
        out.set_nodata(Some(f64::NAN));
        Ok(out)
    }

    /// Weighted `aread8`; the result includes each cell's own weight
    fn aread8(&self, ws: &Workspace, fdr_path: &Path, weights: Option<&Raster<f64>>, tag: &str) -> Result<Raster<f64>> {
        let out = ws.path(&format!("fac_{tag}.tif"));
        let mut args: Vec<OsString> = vec!["-p".into(), fdr_path.into(), "-ad8".into(), out.clone().into()];
        if let Some(w) = weights {
            let wpath = ws.write(&format!("weights_{tag}.tif"), w, Precision::Float64)?;
            args.extend([OsString::from("-wg"), wpath.into_os_string()]);
        }
        args.push("-nc".into());
        self.run("aread8", &args, &out)?;
        Self::read_output(&out)
    }

    /// Footprint cleanup: NaN off the FDR data, 0 for in-bounds nodata
    fn mask_to_fdr(raster: &mut Raster<f64>, fdr: &Raster<u8>, format: D8Format) {
        let (rows, cols) = fdr.shape();
        for row in 0..rows {
            for col in 0..cols {
                let v = &mut raster.data_mut()[(row, col)];
                if !fdr_has_data(fdr, format, row, col) {
                    *v = f64::NAN;
                } else if v.is_nan() {
                    *v = 0.0;
                }
            }
        }
    }

    fn weights_with_points(
        weights: Raster<f64>,
        fdr: &Raster<u8>,
        format: D8Format,
        points: Option<&PourPoints>,
    ) -> Result<Raster<f64>> {
        match points {
            Some(points) => {
                let bands = adjust_parameter_raster(&RasterBands::single("weights", weights), fdr, format, points)?;
                Ok(bands.first().clone())
            }
            None => Ok(weights),
        }
    }
}

impl TerrainEngine for TaudemEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn d8_format(&self) -> D8Format {
        D8Format::Taudem
    }

    fn supported_options(&self, _tool: EngineTool) -> &'static [&'static str] {
        TAUDEM_OPTION_KEYS
    }

    fn accumulate_flow(
        &self,
        fdr: &Raster<u8>,
        upstream_pour_points: Option<&PourPoints>,
        weights: Option<&Raster<f64>>,
    ) -> Result<Raster<f64>> {
        let format = self.d8_format();
        let ws = Workspace::new()?;
        let fdr_path = ws.write("fdr.tif", fdr, Precision::UInt8)?;

        let prepared = match (weights, upstream_pour_points) {
            (None, None) => None,
            (Some(w), points) => {
                let w = make_fac_weights(w, fdr, WEIGHT_NODATA)?;
                Some(Self::weights_with_points(w, fdr, format, points)?)
            }
            (None, points) => {
                let ones = fdr.map(Some(0.0), |_| 1.0);
                let w = make_fac_weights(&ones, fdr, WEIGHT_NODATA)?;
                Some(Self::weights_with_points(w, fdr, format, points)?)
            }
        };

        let mut fac = self.aread8(&ws, &fdr_path, prepared.as_ref(), "flow")?;
        Self::mask_to_fdr(&mut fac, fdr, format);
        if weights.is_none() {
            fac.data_mut().iter_mut().filter(|v| !v.is_nan()).for_each(|v| *v -= 1.0);
        }
        Ok(fac)
    }

    fn accumulate_parameter(
        &self,
        fdr: &Raster<u8>,
        parameter: &RasterBands,
        upstream_pour_points: Option<&PourPoints>,
    ) -> Result<RasterBands> {
        let format = self.d8_format();
        parameter.first().ensure_aligned(fdr, "parameter raster and FDR")?;
        let ws = Workspace::new()?;
        let fdr_path = ws.write("fdr.tif", fdr, Precision::UInt8)?;

        let weights = parameter.try_map(|_, band| make_fac_weights(band, fdr, WEIGHT_NODATA))?;
        let weights = match upstream_pour_points {
            Some(points) => adjust_parameter_raster(&weights, fdr, format, points)?,
            None => weights,
        };

        weights.try_map(|i, band| {
            let mut acc = self.aread8(&ws, &fdr_path, Some(band), &i.to_string())?;
            Self::mask_to_fdr(&mut acc, fdr, format);
            Ok(acc)
        })
    }

    fn extreme_upslope_values(
        &self,
        fdr: &Raster<u8>,
        parameter: &Raster<f64>,
        stream_mask: Option<&Raster<f64>>,
        mode: ExtremeMode,
    ) -> Result<Raster<f64>> {
        parameter.ensure_aligned(fdr, "parameter raster and FDR")?;
        let ws = Workspace::new()?;
        let fdr_path = ws.write("fdr.tif", fdr, Precision::UInt8)?;
        let param_path = ws.write("param.tif", parameter, Precision::Float64)?;
        let out = ws.path("extreme.tif");

        let mut args: Vec<OsString> = vec![
            "-p".into(),
            fdr_path.into(),
            "-sa".into(),
            param_path.into(),
            "-ssa".into(),
            out.clone().into(),
        ];
        if mode == ExtremeMode::Min {
            args.push("-min".into());
        }
        args.push("-nc".into());
        self.run("d8flowpathextremeup", &args, &out)?;

        let mut result = Self::read_output(&out)?;
        if let Some(mask) = stream_mask {
            mask.ensure_aligned(fdr, "stream mask and FDR")?;
            for (v, &m) in result.data_mut().iter_mut().zip(mask.data().iter()) {
                if mask.is_nodata(m) {
                    *v = f64::NAN;
                }
            }
        }
        Ok(result)
    }

    fn distance_to_stream(&self, fdr: &Raster<u8>, fac: &Raster<f64>, threshold: f64) -> Result<Raster<f64>> {
        fac.ensure_aligned(fdr, "FAC and FDR")?;
        let ws = Workspace::new()?;
        let fdr_path = ws.write("fdr.tif", fdr, Precision::UInt8)?;
        let fac_path = ws.write("fac.tif", fac, Precision::Float64)?;
        let out = ws.path("dist.tif");

        let args: Vec<OsString> = vec![
            "-p".into(),
            fdr_path.into(),
            "-src".into(),
            fac_path.into(),
            "-dist".into(),
            out.clone().into(),
            "-thresh".into(),
            threshold.to_string().into(),
        ];
        self.run("d8hdisttostrm", &args, &out)?;
        Self::read_output(&out)
    }

    fn decay_accumulation(
        &self,
        dinf: &Raster<f64>,
        decay: &Raster<f64>,
        parameter: Option<&RasterBands>,
        upstream_pour_points: Option<&PourPoints>,
    ) -> Result<RasterBands> {
        decay.ensure_aligned(dinf, "decay grid and D-infinity FDR")?;
        if let Some(p) = parameter {
            p.first().ensure_aligned(dinf, "parameter raster and D-infinity FDR")?;
        }
        let ws = Workspace::new()?;
        let dinf_path = ws.write("dinf.tif", dinf, Precision::Float32)?;
        let decay_path = ws.write("decay.tif", decay, Precision::Float32)?;

        let weights = match (parameter, upstream_pour_points) {
            (Some(p), _) => Some(zero_nodata_weights(p)?),
            (None, Some(_)) => Some(RasterBands::single(DECAY_BAND_NAME, dinf.map(Some(0.0), |_| 1.0))),
            (None, None) => None,
        };
        let weights = match (weights, upstream_pour_points) {
            (Some(w), Some(points)) => Some(adjust_parameter_raster(&w, &nearest_d8(dinf), D8Format::Taudem, points)?),
            (w, _) => w,
        };

        let run_band = |tag: &str, band: Option<&Raster<f64>>| -> Result<Raster<f64>> {
            let out = ws.path(&format!("dsca_{tag}.tif"));
            let mut args: Vec<OsString> = vec![
                "-ang".into(),
                dinf_path.clone().into(),
                "-dm".into(),
                decay_path.clone().into(),
                "-dsca".into(),
                out.clone().into(),
            ];
            if let Some(band) = band {
                let wpath = ws.write(&format!("weights_{tag}.tif"), band, Precision::Float64)?;
                args.extend([OsString::from("-wg"), wpath.into_os_string()]);
            }
            args.push("-nc".into());
            self.run("dinfdecayaccum", &args, &out)?;
            Self::read_output(&out)
        };

        match weights {
            Some(w) => w.try_map(|i, band| run_band(&i.to_string(), Some(band))),
            None => Ok(RasterBands::single(DECAY_BAND_NAME, run_band("decay", None)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(mpi_call: &str) -> TaudemEngine {
        TaudemEngine::new(TaudemOptions {
            mpi_call: mpi_call.to_string(),
            ..Default::default()
        })
    }

    fn fdr() -> Raster<u8> {
        let mut r = Raster::from_vec(vec![1u8, 1, 1], 1, 3).unwrap();
        r.set_nodata(Some(0));
        r
    }

    #[test]
    fn test_command_line() {
        let e = TaudemEngine::new(TaudemOptions {
            cores: 4,
            ..Default::default()
        });
        let cmd = e.command("aread8", &["-p".into(), "fdr.tif".into(), "-nc".into()]);
        assert_eq!(cmd.get_program(), "mpiexec");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-n", "4", "aread8", "-p", "fdr.tif", "-nc"]);
    }

    #[test]
    fn test_missing_launcher_is_engine_error() {
        let err = engine("fcpg-no-such-mpiexec").accumulate_flow(&fdr(), None, None).unwrap_err();
        assert!(matches!(err, Error::Engine { engine: "taudem", .. }));
    }

    #[test]
    fn test_failing_tool_is_engine_error() {
        // `false` runs and exits non-zero without producing output
        let err = engine("false")
            .distance_to_stream(&fdr(), &Raster::filled(1, 3, 0.0), 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::Engine { .. }));
    }

    /// Runs `sh <script> <cores> <tool> <args..>`; the script copies the
    /// `-wg` input to the `-dsca` output
    #[cfg(unix)]
    fn copying_launcher(dir: &Path) -> TaudemEngine {
        let script = dir.join("copy_weights.sh");
        std::fs::write(
            &script,
            "out=\"\"; wg=\"\"\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -dsca) out=\"$2\"; shift ;;\n    -wg) wg=\"$2\"; shift ;;\n  esac\n  shift\ndone\ncp \"$wg\" \"$out\"\n",
        )
        .unwrap();
        TaudemEngine::new(TaudemOptions {
            mpi_call: "sh".to_string(),
            mpi_arg: script.to_string_lossy().into_owned(),
            ..Default::default()
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_decay_weights_zero_parameter_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let dinf = Raster::filled(1, 3, 0.0);
        let decay = Raster::filled(1, 3, 1.0);
        let mut param = Raster::from_vec(vec![2.0, f64::NAN, 4.0], 1, 3).unwrap();
        param.set_nodata(Some(f64::NAN));
        let bands = RasterBands::single("p", param);

        let out = copying_launcher(dir.path())
            .decay_accumulation(&dinf, &decay, Some(&bands), None)
            .unwrap();
        let band = out.first();
        assert_eq!(band.get(0, 0).unwrap(), 2.0);
        assert_eq!(band.get(0, 1).unwrap(), 0.0);
        assert_eq!(band.get(0, 2).unwrap(), 4.0);
    }

    #[test]
    fn test_mask_to_fdr() {
        let mut fdr = fdr();
        fdr.set(0, 2, 0).unwrap();
        let mut fac = Raster::from_vec(vec![f64::NAN, 2.0, 5.0], 1, 3).unwrap();
        TaudemEngine::mask_to_fdr(&mut fac, &fdr, D8Format::Taudem);
        assert_eq!(fac.get(0, 0).unwrap(), 0.0);
        assert_eq!(fac.get(0, 1).unwrap(), 2.0);
        assert!(fac.get(0, 2).unwrap().is_nan());
    }
}
