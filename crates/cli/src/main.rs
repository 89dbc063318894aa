//! FCPG CLI - Flow-conditioned parameter grids

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fcpg_algorithms::alignment::{align_raster, clip, reproject_raster, resample, ClipTarget, ResampleMethod};
use fcpg_algorithms::cascade::{cascade_accumulation, CascadeOptions, UpdateDict};
use fcpg_algorithms::d8::{convert_fdr_formats, d8_to_dinfinity, identify_format, D8Format};
use fcpg_algorithms::decay::make_decay_raster;
use fcpg_algorithms::engine::{parse_option_pairs, EngineKind, NativeOptions, TaudemOptions, TerrainEngine};
use fcpg_algorithms::fcpg::{make_fcpg, FcpgOptions};
use fcpg_algorithms::mask::{
    binarize_categorical_raster, binarize_nodata, mask_streams, spatial_mask, value_mask, ValueMaskParams,
};
use fcpg_algorithms::pour_points::{find_basin_pour_points, find_fac_pour_point, get_pour_point_values, PourPoints};
use fcpg_algorithms::tools;
use fcpg_algorithms::upslope::ExtremeMode;
use fcpg_batch::{run_batch, run_fcpg_pipeline, submit_jobs, BatchConfig, FcpgJob, JobStatus, SlurmJob};
use fcpg_core::io::{read_geotiff, read_geotiff_bands, write_geotiff, write_geotiff_bands, GeoTiffOptions, Precision};
use fcpg_core::vector::{read_geojson, FeatureCollection};
use fcpg_core::{Raster, RasterBands, CRS};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "fcpg")]
#[command(author, version, about = "Flow-conditioned parameter grids", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Terrain engine: native, taudem
    #[arg(short, long, global = true)]
    engine: Option<EngineKind>,

    /// Engine option as key=value, e.g. cores=8 (repeatable)
    #[arg(long = "opt", global = true)]
    opts: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Convert a D8 flow direction grid between ESRI and TauDEM codes
    ConvertFdr {
        /// Input flow direction raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Target encoding: esri, taudem
        #[arg(short, long)]
        to: D8Format,
        /// Input encoding, detected from the values when omitted
        #[arg(short, long)]
        from: Option<D8Format>,
    },
    /// D8 flow directions to D-infinity angles (radians)
    D8ToDinf {
        /// Input flow direction raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Input encoding, detected from the values when omitted
        #[arg(short, long)]
        format: Option<D8Format>,
    },
    /// Flow accumulation (upstream cell count, or weighted sum)
    AccumulateFlow {
        /// Input flow direction raster
        fdr: PathBuf,
        /// Output file
        output: PathBuf,
        /// Weight raster aligned with the FDR
        #[arg(short, long)]
        weights: Option<PathBuf>,
        /// Upstream pour points (JSON) whose values are added downstream
        #[arg(short, long)]
        pour_points: Option<PathBuf>,
        /// FDR encoding, detected from the values when omitted
        #[arg(short, long)]
        format: Option<D8Format>,
    },
    /// Accumulate every band of a parameter grid
    AccumulateParameter {
        /// Input flow direction raster
        fdr: PathBuf,
        /// Parameter raster aligned with the FDR
        param: PathBuf,
        /// Output file
        output: PathBuf,
        /// Upstream pour points (JSON) carrying one value per band
        #[arg(short, long)]
        pour_points: Option<PathBuf>,
        /// FDR encoding, detected from the values when omitted
        #[arg(short, long)]
        format: Option<D8Format>,
    },
    /// Divide a parameter accumulation by the contributing cell count
    MakeFcpg {
        /// Accumulated parameter raster
        accum: PathBuf,
        /// Flow accumulation raster
        fac: PathBuf,
        /// Output file
        output: PathBuf,
        /// Accumulated parameter-nodata mask
        #[arg(short, long)]
        nodata_accum: Option<PathBuf>,
        /// Contributing cell count below which the FCPG is nodata
        #[arg(short, long)]
        min_accum: Option<f64>,
        /// The FAC counts each cell itself (raw TauDEM aread8)
        #[arg(long)]
        fac_includes_self: bool,
    },
    /// Distance along the flow path to the nearest stream cell
    DistanceToStream {
        /// Input flow direction raster
        fdr: PathBuf,
        /// Flow accumulation raster
        fac: PathBuf,
        /// Output file
        output: PathBuf,
        /// Accumulation at which a cell is a stream
        #[arg(short, long)]
        threshold: f64,
        /// FDR encoding, detected from the values when omitted
        #[arg(short, long)]
        format: Option<D8Format>,
    },
    /// Decay multipliers from a distance-to-stream raster
    DecayRaster {
        /// Distance-to-stream raster
        distance: PathBuf,
        /// Output file
        output: PathBuf,
        /// Decay constant
        #[arg(short, long, default_value = "2.0")]
        k: f64,
    },
    /// D-infinity accumulation with per-cell decay
    DecayAccumulation {
        /// D-infinity angle raster
        dinf: PathBuf,
        /// Decay multiplier raster
        decay: PathBuf,
        /// Output file
        output: PathBuf,
        /// Parameter raster to accumulate, cell counts when omitted
        #[arg(short, long)]
        param: Option<PathBuf>,
        /// Upstream pour points (JSON)
        #[arg(long)]
        pour_points: Option<PathBuf>,
    },
    /// Maximum or minimum parameter value upstream of each cell
    ExtremeUpslope {
        /// Input flow direction raster
        fdr: PathBuf,
        /// Parameter raster
        param: PathBuf,
        /// Output file
        output: PathBuf,
        /// Extreme to keep: max, min
        #[arg(short, long, default_value = "max")]
        mode: ExtremeMode,
        /// Stream mask; cells outside it become nodata
        #[arg(short, long)]
        stream_mask: Option<PathBuf>,
        /// FDR encoding, detected from the values when omitted
        #[arg(short, long)]
        format: Option<D8Format>,
    },
    /// Stream mask from a flow accumulation threshold
    MaskStreams {
        /// Flow accumulation raster
        fac: PathBuf,
        /// Output file (1 on streams, nodata elsewhere)
        output: PathBuf,
        /// Accumulation at which a cell is a stream
        #[arg(short, long)]
        threshold: f64,
    },
    /// Keep the cells passing a threshold test
    ValueMask {
        /// Input raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Threshold value
        #[arg(short, long)]
        threshold: f64,
        /// Keep cells below the threshold instead of above
        #[arg(long)]
        less_than: bool,
        /// Keep cells equal to the threshold
        #[arg(long)]
        equals: bool,
        /// With --equals, keep cells not equal to the threshold
        #[arg(long)]
        inverse_equals: bool,
        /// Value written to kept cells
        #[arg(long)]
        in_value: Option<f64>,
        /// Value written to dropped cells
        #[arg(long)]
        out_value: Option<f64>,
    },
    /// 1 where a raster has nodata, 0 elsewhere
    BinarizeNodata {
        /// Input raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
    },
    /// One 0/1 band per category of a categorical raster
    BinarizeCategorical {
        /// Categorical raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Band name for a category as code=name (repeatable)
        #[arg(short, long)]
        name: Vec<String>,
        /// Category code to leave out (repeatable)
        #[arg(short, long)]
        ignore: Vec<i64>,
    },
    /// Keep the cells inside (or outside) polygons
    SpatialMask {
        /// Input raster
        input: PathBuf,
        /// Polygon features (GeoJSON)
        features: PathBuf,
        /// Output file
        output: PathBuf,
        /// Keep cells outside the polygons instead
        #[arg(long)]
        inverse: bool,
    },
    /// Reproject and resample a raster onto another raster's grid
    Align {
        /// Input raster
        input: PathBuf,
        /// Raster whose grid is matched
        template: PathBuf,
        /// Output file
        output: PathBuf,
        /// Resampling method: nearest, bilinear
        #[arg(short, long, default_value = "bilinear")]
        method: ResampleMethod,
    },
    /// Resample a raster onto the grid of another raster in the same CRS
    Resample {
        /// Input raster
        input: PathBuf,
        /// Raster whose grid is matched
        template: PathBuf,
        /// Output file
        output: PathBuf,
        /// Resampling method: nearest, bilinear
        #[arg(short, long, default_value = "nearest")]
        method: ResampleMethod,
    },
    /// Crop a raster to another raster, features or a bounding box
    Clip {
        /// Input raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Clip to the extent of this raster
        #[arg(long, conflicts_with_all = ["features", "bbox"])]
        raster: Option<PathBuf>,
        /// Clip to the bounds of these features (GeoJSON)
        #[arg(long, conflicts_with = "bbox")]
        features: Option<PathBuf>,
        /// Clip to min_x,min_y,max_x,max_y in the raster's CRS
        #[arg(long)]
        bbox: Option<String>,
    },
    /// Reproject a raster to another CRS
    Reproject {
        /// Input raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Target CRS, e.g. EPSG:5070
        #[arg(short, long)]
        crs: CRS,
        /// Output cell size in target units
        #[arg(short, long)]
        resolution: Option<f64>,
        /// Resampling method: nearest, bilinear
        #[arg(short, long, default_value = "nearest")]
        method: ResampleMethod,
    },
    /// Locate outlets from a flow accumulation raster
    PourPoints {
        /// Flow accumulation raster
        fac: PathBuf,
        /// Output pour points (JSON)
        output: PathBuf,
        /// Basin polygons (GeoJSON); one outlet per basin
        #[arg(short, long)]
        basins: Option<PathBuf>,
        /// Basin id attribute
        #[arg(long, default_value = "HUC12")]
        id_field: String,
        /// Dissolve HUC12 basins into HUC4 units first
        #[arg(long)]
        huc4: bool,
        /// Name of the single outlet when no basins are given
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Sample an accumulation at pour points
    PourPointValues {
        /// Pour points (JSON)
        points: PathBuf,
        /// Accumulation raster, one value per band
        accum: PathBuf,
        /// Output pour points with values (JSON)
        output: PathBuf,
    },
    /// Carry flow accumulation from an upstream HUC4 tile into the next one
    Cascade {
        /// Upstream flow accumulation raster
        upstream_fac: PathBuf,
        /// Upstream flow direction raster
        upstream_fdr: PathBuf,
        /// Downstream flow direction raster
        downstream_fdr: PathBuf,
        /// HUC12 watershed boundaries (GeoJSON)
        wbd: PathBuf,
        /// Adjusted downstream flow accumulation
        output: PathBuf,
        /// Upstream HUC4 code
        #[arg(long)]
        from_huc4: String,
        /// Downstream HUC4 code
        #[arg(long)]
        to_huc4: String,
        /// Update dictionary (JSON), merged when it exists
        #[arg(short, long)]
        update_dict: Option<PathBuf>,
        /// HUC12 attribute
        #[arg(long, default_value = "HUC12")]
        huc12_key: String,
        /// Downstream HUC attribute
        #[arg(long, default_value = "ToHUC")]
        to_huc_key: String,
        /// Inject at the cell downstream of each pour point
        #[arg(long)]
        move_downstream: bool,
        /// Divide the injected values by this factor
        #[arg(long)]
        scale_factor: Option<f64>,
        /// FDR encoding, detected from the values when omitted
        #[arg(short, long)]
        format: Option<D8Format>,
    },
    /// Build the FCPG for one parameter grid
    Pipeline {
        /// Parameter raster
        #[arg(long)]
        param: PathBuf,
        /// Flow direction raster named taufdr<HUC>.tif
        #[arg(long)]
        fdr: PathBuf,
        /// Flow accumulation raster
        #[arg(long)]
        fac: PathBuf,
        /// Directory for intermediate files
        #[arg(long)]
        work_dir: PathBuf,
        /// Directory for the FCPG
        #[arg(long)]
        output_dir: PathBuf,
        /// Resampling method: nearest, bilinear
        #[arg(long, default_value = "bilinear")]
        resample_method: ResampleMethod,
        /// FDR encoding, detected from the values when omitted
        #[arg(long)]
        fdr_format: Option<D8Format>,
        /// Contributing cell count below which the FCPG is nodata
        #[arg(long)]
        min_accum: Option<f64>,
        /// Replace an existing FCPG
        #[arg(long)]
        overwrite: bool,
        /// Remove intermediate files afterwards
        #[arg(long)]
        delete_temp: bool,
        /// Whether the FAC counts each cell itself (true for TauDEM aread8);
        /// follows the FDR encoding when omitted
        #[arg(long)]
        fac_includes_self: Option<bool>,
    },
    /// Build FCPGs for every parameter grid in a directory
    Batch {
        /// Batch configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Parameter grid or directory of grids
        #[arg(long)]
        input: Option<PathBuf>,
        /// Flow direction raster named taufdr<HUC>.tif
        #[arg(long)]
        fdr: Option<PathBuf>,
        /// Flow accumulation raster
        #[arg(long)]
        fac: Option<PathBuf>,
        /// Directory for intermediate files and job scripts
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Directory for the FCPGs
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Directory for Slurm logs
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Cores per job
        #[arg(long)]
        cores: Option<usize>,
        /// Contributing cell count below which the FCPG is nodata
        #[arg(long)]
        min_accum: Option<f64>,
        /// Parameter grids processed at once in a local run
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Replace existing FCPGs
        #[arg(long)]
        overwrite: bool,
        /// Remove intermediate files afterwards
        #[arg(long)]
        delete_temp: bool,
        /// Whether the FAC counts each cell itself (true for TauDEM aread8);
        /// follows the FDR encoding when omitted
        #[arg(long)]
        fac_includes_self: Option<bool>,
        /// Write one Slurm job per grid and submit it instead of running locally
        #[arg(long)]
        slurm: bool,
        /// With --slurm, only write the job scripts
        #[arg(long, requires = "slurm")]
        no_submit: bool,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set default subscriber")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_f64(path: &Path) -> Result<Raster<f64>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> =
        read_geotiff(path, None).with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

fn read_u8(path: &Path) -> Result<Raster<u8>> {
    let pb = spinner("Reading flow directions...");
    let raster: Raster<u8> =
        read_geotiff(path, None).with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    Ok(raster)
}

fn read_bands(path: &Path) -> Result<RasterBands> {
    let pb = spinner("Reading raster bands...");
    let bands = read_geotiff_bands(path).with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} band(s)", bands.len());
    Ok(bands)
}

fn read_features(path: &Path) -> Result<FeatureCollection> {
    read_geojson(path).with_context(|| format!("Failed to read features from {}", path.display()))
}

fn read_points(path: Option<&PathBuf>) -> Result<Option<PourPoints>> {
    path.map(|p| PourPoints::read_json(p).with_context(|| format!("Failed to read pour points {}", p.display())))
        .transpose()
}

fn write_result(raster: &Raster<f64>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path, Some(GeoTiffOptions::default())).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn write_result_u8(raster: &Raster<u8>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path, Some(GeoTiffOptions::with_precision(Precision::UInt8)))
        .context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn write_bands(bands: &RasterBands, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff_bands(bands, path, Some(GeoTiffOptions::default())).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_bbox(s: &str) -> Result<(f64, f64, f64, f64)> {
    let parts = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid bounding box: {}", s))?;
    match parts[..] {
        [min_x, min_y, max_x, max_y] if min_x < max_x && min_y < max_y => Ok((min_x, min_y, max_x, max_y)),
        _ => anyhow::bail!("Bounding box must be 'min_x,min_y,max_x,max_y', got: {}", s),
    }
}

fn parse_category_names(pairs: &[String]) -> Result<BTreeMap<i64, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (code, name) = pair
                .split_once('=')
                .with_context(|| format!("Category name must be 'code=name', got: {}", pair))?;
            let code: i64 = code.trim().parse().context("Invalid category code")?;
            Ok((code, name.trim().to_string()))
        })
        .collect()
}

struct EngineArgs {
    kind: Option<EngineKind>,
    options: Vec<(String, String)>,
}

impl EngineArgs {
    fn build(&self) -> Result<Box<dyn TerrainEngine>> {
        let kind = self.kind.unwrap_or_default();
        let engine = kind
            .build(&self.options)
            .with_context(|| format!("Failed to start the {} engine", kind))?;
        info!("Terrain engine: {}", engine.name());
        Ok(engine)
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let engine_args = EngineArgs {
        kind: cli.engine,
        options: parse_option_pairs(&cli.opts).context("Invalid --opt")?,
    };

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let bands = read_bands(&input)?;
            let first = bands.first();
            let (rows, cols) = first.shape();
            let bounds = first.bounds();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, first.len());
            println!("Bands: {}", bands.len());
            println!("Cell size: {}", first.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = first.crs() {
                println!("CRS: {}", crs);
            }
            if let Some(nodata) = first.nodata() {
                println!("NoData: {}", nodata);
            }
            for (label, band) in bands.iter() {
                let stats = band.statistics();
                println!("\nBand {}:", label);
                if let Some(min) = stats.min {
                    println!("  Min: {:.4}", min);
                }
                if let Some(max) = stats.max {
                    println!("  Max: {:.4}", max);
                }
                if let Some(mean) = stats.mean {
                    println!("  Mean: {:.4}", mean);
                }
                println!(
                    "  Valid cells: {} ({:.1}%)",
                    stats.valid_count,
                    100.0 * stats.valid_count as f64 / band.len() as f64
                );
            }
        }

        // ── Flow directions ──────────────────────────────────────────
        Commands::ConvertFdr {
            input,
            output,
            to,
            from,
        } => {
            let fdr = read_u8(&input)?;
            let from = from.unwrap_or_else(|| identify_format(&fdr));
            let start = Instant::now();
            let result = convert_fdr_formats(&fdr, to, Some(from)).context("Failed to convert flow directions")?;
            let elapsed = start.elapsed();
            write_result_u8(&result, &output)?;
            done(&format!("FDR ({} -> {})", from, to), &output, elapsed);
        }

        Commands::D8ToDinf {
            input,
            output,
            format,
        } => {
            let fdr = read_u8(&input)?;
            let start = Instant::now();
            let result = d8_to_dinfinity(&fdr, format).context("Failed to convert to D-infinity")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("D-infinity angles", &output, elapsed);
        }

        // ── Accumulation ─────────────────────────────────────────────
        Commands::AccumulateFlow {
            fdr,
            output,
            weights,
            pour_points,
            format,
        } => {
            let engine = engine_args.build()?;
            let fdr = read_u8(&fdr)?;
            let weights = weights.as_deref().map(read_f64).transpose()?;
            let points = read_points(pour_points.as_ref())?;
            let pb = spinner("Accumulating flow...");
            let start = Instant::now();
            let result = tools::accumulate_flow(engine.as_ref(), &fdr, format, points.as_ref(), weights.as_ref())
                .context("Failed to accumulate flow")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();
            write_result(&result, &output)?;
            done("Flow accumulation", &output, elapsed);
        }

        Commands::AccumulateParameter {
            fdr,
            param,
            output,
            pour_points,
            format,
        } => {
            let engine = engine_args.build()?;
            let fdr = read_u8(&fdr)?;
            let param = read_bands(&param)?;
            let points = read_points(pour_points.as_ref())?;
            let pb = spinner("Accumulating parameter...");
            let start = Instant::now();
            let result = tools::accumulate_parameter(engine.as_ref(), &fdr, format, &param, points.as_ref())
                .context("Failed to accumulate parameter")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();
            write_bands(&result, &output)?;
            done("Parameter accumulation", &output, elapsed);
        }

        Commands::MakeFcpg {
            accum,
            fac,
            output,
            nodata_accum,
            min_accum,
            fac_includes_self,
        } => {
            let accum = read_bands(&accum)?;
            let fac = read_f64(&fac)?;
            let nodata_accum = nodata_accum.as_deref().map(read_f64).transpose()?;
            let start = Instant::now();
            let options = FcpgOptions {
                nodata_accum: nodata_accum.as_ref(),
                min_accum,
                fac_includes_self,
            };
            let result = make_fcpg(&accum, &fac, &options).context("Failed to make FCPG")?;
            let elapsed = start.elapsed();
            write_bands(&result, &output)?;
            done("FCPG", &output, elapsed);
        }

        // ── Decay ────────────────────────────────────────────────────
        Commands::DistanceToStream {
            fdr,
            fac,
            output,
            threshold,
            format,
        } => {
            let engine = engine_args.build()?;
            let fdr = read_u8(&fdr)?;
            let fac = read_f64(&fac)?;
            let pb = spinner("Tracing flow paths to streams...");
            let start = Instant::now();
            let result = tools::distance_to_stream(engine.as_ref(), &fdr, format, &fac, threshold)
                .context("Failed to compute distance to stream")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();
            write_result(&result, &output)?;
            done("Distance to stream", &output, elapsed);
        }

        Commands::DecayRaster { distance, output, k } => {
            let distance = read_f64(&distance)?;
            let start = Instant::now();
            let result = make_decay_raster(&distance, k).context("Failed to make decay raster")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("Decay raster", &output, elapsed);
        }

        Commands::DecayAccumulation {
            dinf,
            decay,
            output,
            param,
            pour_points,
        } => {
            let engine = engine_args.build()?;
            let dinf = read_f64(&dinf)?;
            let decay = read_f64(&decay)?;
            let param = param.as_deref().map(read_bands).transpose()?;
            let points = read_points(pour_points.as_ref())?;
            let pb = spinner("Accumulating with decay...");
            let start = Instant::now();
            let result = tools::decay_accumulation(engine.as_ref(), &dinf, &decay, param.as_ref(), points.as_ref())
                .context("Failed to run decay accumulation")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();
            write_bands(&result, &output)?;
            done("Decay accumulation", &output, elapsed);
        }

        Commands::ExtremeUpslope {
            fdr,
            param,
            output,
            mode,
            stream_mask,
            format,
        } => {
            let engine = engine_args.build()?;
            let fdr = read_u8(&fdr)?;
            let param = read_f64(&param)?;
            let mask = stream_mask.as_deref().map(read_f64).transpose()?;
            let pb = spinner("Finding upslope extremes...");
            let start = Instant::now();
            let result = tools::extreme_upslope_values(engine.as_ref(), &fdr, format, &param, mask.as_ref(), mode)
                .context("Failed to compute upslope values")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();
            write_result(&result, &output)?;
            done(&format!("Upslope {}", mode), &output, elapsed);
        }

        // ── Masks ────────────────────────────────────────────────────
        Commands::MaskStreams {
            fac,
            output,
            threshold,
        } => {
            let fac = read_f64(&fac)?;
            let start = Instant::now();
            let result = mask_streams(&fac, threshold);
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("Stream mask", &output, elapsed);
        }

        Commands::ValueMask {
            input,
            output,
            threshold,
            less_than,
            equals,
            inverse_equals,
            in_value,
            out_value,
        } => {
            if inverse_equals && !equals {
                warn!("--inverse-equals has no effect without --equals");
            }
            let raster = read_f64(&input)?;
            let params = ValueMaskParams {
                threshold,
                greater_than: !less_than,
                equals,
                inverse_equals,
                in_mask_value: in_value,
                out_mask_value: out_value,
            };
            let start = Instant::now();
            let result = value_mask(&raster, &params).context("Failed to apply value mask")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("Value mask", &output, elapsed);
        }

        Commands::BinarizeNodata { input, output } => {
            let raster = read_f64(&input)?;
            let start = Instant::now();
            let result = binarize_nodata(&raster);
            let elapsed = start.elapsed();
            write_result_u8(&result, &output)?;
            done("Nodata mask", &output, elapsed);
        }

        Commands::BinarizeCategorical {
            input,
            output,
            name,
            ignore,
        } => {
            let names = parse_category_names(&name)?;
            let raster = read_f64(&input)?;
            let start = Instant::now();
            let result =
                binarize_categorical_raster(&raster, &names, &ignore).context("Failed to binarize categories")?;
            let elapsed = start.elapsed();
            info!("Categories: {}", result.labels().join(", "));
            write_bands(&result, &output)?;
            done("Category bands", &output, elapsed);
        }

        Commands::SpatialMask {
            input,
            features,
            output,
            inverse,
        } => {
            let raster = read_f64(&input)?;
            let features = read_features(&features)?;
            let start = Instant::now();
            let result = spatial_mask(&raster, &features, inverse).context("Failed to apply spatial mask")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("Spatial mask", &output, elapsed);
        }

        // ── Alignment ────────────────────────────────────────────────
        Commands::Align {
            input,
            template,
            output,
            method,
        } => {
            let bands = read_bands(&input)?;
            let template = read_f64(&template)?;
            let pb = spinner("Aligning...");
            let start = Instant::now();
            let result = bands
                .try_map(|_, band| align_raster(band, &template, method))
                .context("Failed to align raster")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();
            write_bands(&result, &output)?;
            done("Aligned raster", &output, elapsed);
        }

        Commands::Resample {
            input,
            template,
            output,
            method,
        } => {
            let bands = read_bands(&input)?;
            let template = read_f64(&template)?;
            let start = Instant::now();
            let result = bands
                .try_map(|_, band| resample(band, &template, method))
                .context("Failed to resample raster")?;
            let elapsed = start.elapsed();
            write_bands(&result, &output)?;
            done("Resampled raster", &output, elapsed);
        }

        Commands::Clip {
            input,
            output,
            raster,
            features,
            bbox,
        } => {
            let bands = read_bands(&input)?;
            let clip_raster = raster.as_deref().map(read_f64).transpose()?;
            let clip_features = features.as_deref().map(read_features).transpose()?;
            let target = match (&clip_raster, &clip_features, bbox.as_deref()) {
                (Some(r), _, _) => ClipTarget::from_raster(r),
                (None, Some(f), _) => ClipTarget::Features(f),
                (None, None, Some(b)) => ClipTarget::BBox(parse_bbox(b)?),
                (None, None, None) => anyhow::bail!("Give one of --raster, --features or --bbox"),
            };
            let start = Instant::now();
            let result = bands
                .try_map(|_, band| clip(band, target))
                .context("Failed to clip raster")?;
            let elapsed = start.elapsed();
            write_bands(&result, &output)?;
            done("Clipped raster", &output, elapsed);
        }

        Commands::Reproject {
            input,
            output,
            crs,
            resolution,
            method,
        } => {
            let bands = read_bands(&input)?;
            let pb = spinner("Reprojecting...");
            let start = Instant::now();
            let result = bands
                .try_map(|_, band| reproject_raster(band, &crs, resolution, method))
                .context("Failed to reproject raster")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();
            write_bands(&result, &output)?;
            done(&format!("Raster in {}", crs), &output, elapsed);
        }

        // ── Pour points and cascades ─────────────────────────────────
        Commands::PourPoints {
            fac,
            output,
            basins,
            id_field,
            huc4,
            name,
        } => {
            let fac = read_f64(&fac)?;
            let start = Instant::now();
            let points = match basins {
                Some(path) => {
                    let basins = read_features(&path)?;
                    find_basin_pour_points(&fac, &basins, &id_field, huc4).context("Failed to find pour points")?
                }
                None => find_fac_pour_point(&fac, name.as_deref()).context("Failed to find pour point")?,
            };
            let elapsed = start.elapsed();
            points.write_json(&output).context("Failed to write pour points")?;
            info!("Found {} pour point(s)", points.len());
            done("Pour points", &output, elapsed);
        }

        Commands::PourPointValues { points, accum, output } => {
            let points = PourPoints::read_json(&points).context("Failed to read pour points")?;
            let accum = read_bands(&accum)?;
            let start = Instant::now();
            let result = get_pour_point_values(&points, &accum);
            let elapsed = start.elapsed();
            result.write_json(&output).context("Failed to write pour points")?;
            done("Pour point values", &output, elapsed);
        }

        Commands::Cascade {
            upstream_fac,
            upstream_fdr,
            downstream_fdr,
            wbd,
            output,
            from_huc4,
            to_huc4,
            update_dict,
            huc12_key,
            to_huc_key,
            move_downstream,
            scale_factor,
            format,
        } => {
            let up_fac = read_f64(&upstream_fac)?;
            let up_fdr = read_u8(&upstream_fdr)?;
            let down_fdr = read_u8(&downstream_fdr)?;
            let wbd = read_features(&wbd)?;
            let format = format.unwrap_or_else(|| identify_format(&up_fdr));

            let mut options = CascadeOptions::new(from_huc4, to_huc4);
            options.huc12_key = huc12_key;
            options.to_huc_key = to_huc_key;
            options.move_downstream = move_downstream;
            options.scale_factor = scale_factor;

            let pb = spinner("Cascading accumulation...");
            let start = Instant::now();
            let result = cascade_accumulation(&up_fac, &up_fdr, &down_fdr, format, &wbd, &options)
                .context("Failed to cascade accumulation")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();
            info!("Carried {} pour point(s)", result.pour_points.len());

            if let Some(path) = update_dict {
                let mut dict = if path.exists() {
                    UpdateDict::read_json(&path).context("Failed to read update dictionary")?
                } else {
                    UpdateDict::new()
                };
                for (huc, entry) in result.update_dict.iter() {
                    dict.insert(huc, entry.clone()).context("Invalid update dictionary entry")?;
                }
                dict.write_json(&path).context("Failed to write update dictionary")?;
                println!("Update dictionary saved to: {}", path.display());
            }
            write_result(&result.adjusted_fac, &output)?;
            done("Cascaded flow accumulation", &output, elapsed);
        }

        // ── Pipelines ────────────────────────────────────────────────
        Commands::Pipeline {
            param,
            fdr,
            fac,
            work_dir,
            output_dir,
            resample_method,
            fdr_format,
            min_accum,
            overwrite,
            delete_temp,
            fac_includes_self,
        } => {
            let engine = engine_args.build()?;
            let mut job = FcpgJob::new(param, fdr, fac, work_dir, output_dir);
            job.resample_method = resample_method;
            job.fdr_format = fdr_format;
            job.min_accum = min_accum;
            job.overwrite = overwrite;
            job.delete_temp = delete_temp;
            job.fac_includes_self = fac_includes_self;

            let start = Instant::now();
            match run_fcpg_pipeline(&job, engine.as_ref()).context("FCPG pipeline failed")? {
                JobStatus::Completed(path) => done("FCPG", &path, start.elapsed()),
                JobStatus::Skipped(path) => println!("Skipped, {} exists", path.display()),
            }
        }

        Commands::Batch {
            config,
            input,
            fdr,
            fac,
            work_dir,
            output_dir,
            log_dir,
            cores,
            min_accum,
            jobs,
            overwrite,
            delete_temp,
            fac_includes_self,
            slurm,
            no_submit,
        } => {
            let mut config = match config {
                Some(path) => BatchConfig::load(&path)
                    .with_context(|| format!("Failed to load batch configuration {}", path.display()))?,
                None => BatchConfig::default(),
            };
            let paths = &mut config.paths;
            paths.input = input.or(paths.input.take());
            paths.fdr = fdr.or(paths.fdr.take());
            paths.fac = fac.or(paths.fac.take());
            if let Some(dir) = work_dir {
                paths.work_dir = dir;
            }
            if let Some(dir) = output_dir {
                paths.output_dir = dir;
            }
            if let Some(dir) = log_dir {
                paths.log_dir = dir;
            }
            let processing = &mut config.processing;
            if let Some(cores) = cores {
                processing.cores = cores;
            }
            processing.accum_threshold = min_accum.or(processing.accum_threshold);
            processing.jobs = jobs.or(processing.jobs);
            processing.overwrite |= overwrite;
            processing.delete_temp |= delete_temp;
            processing.fac_includes_self = fac_includes_self.or(processing.fac_includes_self);
            if let Some(kind) = engine_args.kind {
                processing.engine = kind;
            }
            let engine_kind = processing.engine;
            if !engine_args.options.is_empty() {
                match engine_kind {
                    EngineKind::Taudem => {
                        config.taudem = TaudemOptions::from_pairs(&engine_args.options)?;
                    }
                    EngineKind::Native => {
                        if let Some(threads) = NativeOptions::from_pairs(&engine_args.options)?.threads {
                            config.processing.cores = threads;
                        }
                    }
                }
            }

            let fcpg_jobs = FcpgJob::discover(&config).context("Failed to set up batch jobs")?;
            println!("The following parameter grids were located:");
            for job in &fcpg_jobs {
                println!("  {}", job.param.display());
            }

            if slurm {
                let scripts = fcpg_jobs
                    .into_iter()
                    .map(|job| SlurmJob::new(&config, job))
                    .collect::<fcpg_batch::Result<Vec<_>>>()?;
                if no_submit {
                    for script in &scripts {
                        let path = script.write(&config.paths.work_dir)?;
                        println!("Job script saved to: {}", path.display());
                    }
                } else {
                    std::fs::create_dir_all(&config.paths.log_dir)
                        .with_context(|| format!("Failed to create {}", config.paths.log_dir.display()))?;
                    for reply in submit_jobs(&scripts, &config.paths.work_dir).context("Failed to submit jobs")? {
                        println!("{}", reply);
                    }
                }
            } else {
                let engine = config.build_engine().context("Failed to start terrain engine")?;
                let mode = config.processing_mode();
                let pb = spinner(&format!("Running {} job(s)...", fcpg_jobs.len()));
                let start = Instant::now();
                let outcomes = run_batch(&fcpg_jobs, engine.as_ref(), mode)?;
                pb.finish_and_clear();

                let mut failed = 0;
                for outcome in &outcomes {
                    match &outcome.result {
                        Ok(JobStatus::Completed(path)) => println!("  done     {}", path.display()),
                        Ok(JobStatus::Skipped(path)) => println!("  skipped  {}", path.display()),
                        Err(e) => {
                            failed += 1;
                            println!("  failed   {}: {}", outcome.param.display(), e);
                        }
                    }
                }
                println!("Processing time: {:.2?}", start.elapsed());
                if failed > 0 {
                    anyhow::bail!("{} of {} job(s) failed", failed, outcomes.len());
                }
            }
        }
    }

    Ok(())
}
