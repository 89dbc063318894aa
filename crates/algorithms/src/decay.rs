//! Distance to stream, decay grids and decayed D-infinity accumulation
//!
//! Decay FCPGs weight each upstream cell by how far its flow path runs
//! before reaching a stream, so near-stream cells count for more.

use crate::accumulation::adjust_parameter_raster;
use crate::d8::{step, D8Format, FlowNetwork};
use crate::maybe_rayon::*;
use crate::pour_points::PourPoints;
use fcpg_core::{Error, Raster, RasterBands, Result};
use ndarray::Array2;
use std::f64::consts::FRAC_PI_4;
use tracing::{debug, warn};

/// Label of a decay accumulation computed without a parameter
pub const DECAY_BAND_NAME: &str = "decay_accumulation";

/// D8 flow-path distance from every cell to the nearest downstream
/// stream cell, in map units.
///
/// Stream cells have `fac >= threshold` and distance 0. Cardinal steps
/// count one cell width (or height), diagonal steps the cell diagonal.
/// Cells whose path never reaches a stream are NaN.
pub fn distance_to_stream(fdr: &Raster<u8>, format: D8Format, fac: &Raster<f64>, threshold: f64) -> Result<Raster<f64>> {
    fac.ensure_aligned(fdr, "FAC and FDR")?;
    let (rows, cols) = fdr.shape();
    let w = fdr.transform().cell_size();
    let h = fdr.transform().cell_height();
    let diagonal = (w * w + h * h).sqrt();
    let step_length = |dir: usize| match dir {
        0 | 4 => w,
        2 | 6 => h,
        _ => diagonal,
    };

    let network = FlowNetwork::from_d8(fdr, format);
    let order = network.topological_order();
    let fac_values: Vec<f64> = fac.data().iter().copied().collect();
    let is_stream = |idx: usize| {
        let v = fac_values[idx];
        !fac.is_nodata(v) && v >= threshold
    };

    let mut dist = vec![f64::NAN; rows * cols];
    let mut streams = 0usize;
    for &idx in order.iter().rev() {
        if is_stream(idx) {
            dist[idx] = 0.0;
            streams += 1;
            continue;
        }
        if let (Some(j), Some(dir)) = (network.receiver(idx), network.direction(idx)) {
            dist[idx] = dist[j] + step_length(dir);
        }
    }
    debug!("Distance to stream: {} stream cells at threshold {}", streams, threshold);
    if streams == 0 {
        warn!("No stream cells at threshold {}; every distance is nodata", threshold);
    }

    let array = Array2::from_shape_vec((rows, cols), dist).map_err(|e| Error::Other(e.to_string()))?;
    fdr.with_data(array, Some(f64::NAN))
}

/// Decay multiplier `exp(-d * cs / cs^k)` for a distance-to-stream grid.
///
/// `k = 2` gives moderate decay, larger values slower decay and smaller
/// values faster decay. Nodata becomes NaN.
pub fn make_decay_raster(distance: &Raster<f64>, k: f64) -> Result<Raster<f64>> {
    let gt = distance.transform();
    if !gt.is_square() {
        warn!(
            "Decay grid on non-square cells ({} x {}); using the cell width",
            gt.cell_size(),
            gt.cell_height()
        );
    }
    let cs = gt.cell_size();
    let denominator = cs.powf(k);

    map_cells(distance, Some(f64::NAN), |row, col| {
        let d = distance.data()[(row, col)];
        if distance.is_nodata(d) {
            f64::NAN
        } else {
            (-d * cs / denominator).exp()
        }
    })
}

/// D-infinity routing: each cell splits its flow between the two
/// neighbours bracketing its angle.
#[derive(Debug, Clone)]
struct DinfNetwork {
    valid: Vec<bool>,
    receivers: Vec<[Option<(usize, f64)>; 2]>,
}

impl DinfNetwork {
    fn from_angles(dinf: &Raster<f64>) -> Self {
        let (rows, cols) = dinf.shape();
        let n = rows * cols;
        let mut valid = vec![false; n];
        let mut angles = vec![f64::NAN; n];
        for ((row, col), &a) in dinf.data().indexed_iter() {
            if !dinf.is_nodata(a) && a.is_finite() {
                valid[row * cols + col] = true;
                angles[row * cols + col] = a.rem_euclid(std::f64::consts::TAU);
            }
        }

        let receivers = (0..n)
            .map(|idx| {
                if !valid[idx] {
                    return [None, None];
                }
                let (row, col) = (idx / cols, idx % cols);
                let sector = angles[idx] / FRAC_PI_4;
                let k = sector.floor() as usize % 8;
                let frac = sector - sector.floor();
                let target = |dir: usize, p: f64| {
                    if p <= 1e-12 {
                        return None;
                    }
                    let (r, c) = step(rows, cols, row, col, dir)?;
                    let j = r * cols + c;
                    valid[j].then_some((j, p))
                };
                [target(k, 1.0 - frac), target((k + 1) % 8, frac)]
            })
            .collect();

        Self { valid, receivers }
    }

    fn topological_order(&self) -> Vec<usize> {
        let n = self.valid.len();
        let mut in_degree = vec![0u32; n];
        for r in &self.receivers {
            for (j, _) in r.iter().flatten() {
                in_degree[*j] += 1;
            }
        }
        let mut stack: Vec<usize> = (0..n).filter(|&i| self.valid[i] && in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(idx) = stack.pop() {
            order.push(idx);
            for (j, _) in self.receivers[idx].iter().flatten() {
                in_degree[*j] -= 1;
                if in_degree[*j] == 0 {
                    stack.push(*j);
                }
            }
        }
        order
    }

    fn accumulate(&self, order: &[usize], weights: &[f64], decay: &[f64]) -> Vec<f64> {
        let mut acc = weights.to_vec();
        let mut visited = vec![false; acc.len()];
        for &idx in order {
            visited[idx] = true;
            let passed = acc[idx] * decay[idx];
            for (j, p) in self.receivers[idx].iter().flatten() {
                acc[*j] += p * passed;
            }
        }
        for (a, seen) in acc.iter_mut().zip(visited) {
            if !seen {
                *a = f64::NAN;
            }
        }
        acc
    }
}

/// Nearest D8 direction of a D-infinity grid, as TauDEM codes
pub(crate) fn nearest_d8(dinf: &Raster<f64>) -> Raster<u8> {
    dinf.map(Some(D8Format::Taudem.nodata()), |a| {
        if dinf.is_nodata(a) || !a.is_finite() {
            D8Format::Taudem.nodata()
        } else {
            let dir = (a.rem_euclid(std::f64::consts::TAU) / FRAC_PI_4).round() as usize % 8;
            D8Format::Taudem.code(dir)
        }
    })
}

/// Parameter bands with nodata cells as zero weight, so gaps add nothing
/// downstream
pub(crate) fn zero_nodata_weights(parameter: &RasterBands) -> Result<RasterBands> {
    parameter.try_map(|_, band| Ok(band.map(None, |v| if band.is_nodata(v) { 0.0 } else { v })))
}

/// Decayed D-infinity accumulation.
///
/// Each cell contributes its weight (the parameter value, or 1 without a
/// parameter) and passes `A(c) * decay(c)` on, split between the two
/// neighbours bracketing its flow angle in proportion to the angular
/// offset. The result includes each cell's own weight. Pour point values
/// are injected at the cell downstream of each point, along the nearest
/// D8 direction.
pub fn decay_accumulation(
    dinf: &Raster<f64>,
    decay: &Raster<f64>,
    parameter: Option<&RasterBands>,
    upstream_pour_points: Option<&PourPoints>,
) -> Result<RasterBands> {
    decay.ensure_aligned(dinf, "decay grid and D-infinity FDR")?;
    if let Some(p) = parameter {
        p.first().ensure_aligned(dinf, "parameter raster and D-infinity FDR")?;
    }

    let mut weights = match parameter {
        Some(p) => zero_nodata_weights(p)?,
        None => RasterBands::single(DECAY_BAND_NAME, dinf.map(Some(0.0), |_| 1.0)),
    };

    if let Some(points) = upstream_pour_points {
        let d8 = nearest_d8(dinf);
        weights = adjust_parameter_raster(&weights, &d8, D8Format::Taudem, points)?;
    }

    let network = DinfNetwork::from_angles(dinf);
    let order = network.topological_order();
    let decay_values: Vec<f64> = decay
        .data()
        .iter()
        .map(|&d| if decay.is_nodata(d) { 0.0 } else { d })
        .collect();
    debug!("Decay accumulation over {} cells, {} band(s)", order.len(), weights.len());

    let bands: Vec<Raster<f64>> = weights
        .bands()
        .par_iter()
        .map(|band| {
            let flat: Vec<f64> = band.data().iter().copied().collect();
            let acc = network.accumulate(&order, &flat, &decay_values);
            let array = Array2::from_shape_vec(dinf.shape(), acc).map_err(|e| Error::Other(e.to_string()))?;
            dinf.with_data(array, Some(f64::NAN))
        })
        .collect::<Result<Vec<_>>>()?;

    RasterBands::from_bands(weights.labels().iter().cloned().zip(bands).collect())
}
