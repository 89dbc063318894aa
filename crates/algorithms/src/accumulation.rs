//! Flow and parameter accumulation over a D8 network
//!
//! Accumulation walks the network in topological order (Kahn's
//! algorithm): a cell is visited only once every cell draining into it
//! has been, then its total is handed to its receiver.
//!
//! Unweighted flow accumulation counts upstream cells *excluding* the
//! cell itself, so a headwater is 0. Weighted and parameter
//! accumulations sum over the cell and its upstream area.

use crate::d8::{find_downstream_coords, identify_format, D8Format, FlowNetwork};
use crate::maybe_rayon::*;
use crate::pour_points::PourPoints;
use fcpg_core::{Algorithm, Error, Raster, RasterBands, Result};
use ndarray::Array2;
use tracing::{debug, warn};

/// Prepare a parameter grid for accumulation.
///
/// Cells outside the FDR data footprint become `out_of_bounds_value`,
/// which is also the output nodata. Parameter nodata inside the
/// footprint becomes 0.
pub fn make_fac_weights(parameter: &Raster<f64>, fdr: &Raster<u8>, out_of_bounds_value: f64) -> Result<Raster<f64>> {
    parameter.ensure_aligned(fdr, "parameter raster and FDR")?;

    let mut out = parameter.clone();
    for (w, &d) in out.data_mut().iter_mut().zip(fdr.data().iter()) {
        if fdr.is_nodata(d) {
            *w = out_of_bounds_value;
        } else if parameter.is_nodata(*w) {
            *w = 0.0;
        }
    }
    out.set_nodata(Some(out_of_bounds_value));
    Ok(out)
}

/// Add `value_of(point)` to the cell one step downstream of each pour point
fn add_downstream<F>(
    band: &mut Raster<f64>,
    fdr: &Raster<u8>,
    format: D8Format,
    points: &PourPoints,
    value_of: F,
) -> Result<()>
where
    F: Fn(usize) -> Result<f64>,
{
    for (i, &(x, y)) in points.coords.iter().enumerate() {
        let target = find_downstream_coords(fdr, format, x, y).and_then(|(dx, dy)| band.cell_at(dx, dy));
        let Some((row, col)) = target else {
            warn!(
                "Cell downstream from pour point {} at ({}, {}) is out of bounds -> skipped",
                points.ids.get(i).map_or("?", String::as_str),
                x,
                y
            );
            continue;
        };
        let add = value_of(i)?;
        let current = band.data()[(row, col)];
        let base = if band.is_nodata(current) { 0.0 } else { current };
        band.data_mut()[(row, col)] = base + add;
    }
    Ok(())
}

fn pour_point_values(points: &PourPoints) -> Result<&[Vec<f64>]> {
    points.values.as_deref().ok_or_else(|| {
        Error::invalid_param(
            "upstream_pour_points",
            format!("{} points", points.len()),
            "pour points carry no values; run get_pour_point_values() first",
        )
    })
}

/// Add each pour point's values to the cell downstream of it.
///
/// Band `i` receives the point's `i`-th value. Points whose downstream
/// cell is off the grid are skipped with a warning.
pub fn adjust_parameter_raster(
    parameter: &RasterBands,
    fdr: &Raster<u8>,
    format: D8Format,
    points: &PourPoints,
) -> Result<RasterBands> {
    points.validate()?;
    let values = pour_point_values(points)?;

    parameter.try_map(|band_index, band| {
        let mut band = band.clone();
        add_downstream(&mut band, fdr, format, points, |i| {
            values[i].get(band_index).copied().ok_or_else(|| {
                Error::invalid_param(
                    "upstream_pour_points",
                    values[i].len(),
                    format!("pour point {i} has no value for band {band_index}"),
                )
            })
        })?;
        Ok(band)
    })
}

/// Sum `weights` over each cell and its upstream area.
///
/// Cells that are not part of the network (nodata, cycles) are NaN.
pub(crate) fn accumulate_cells(network: &FlowNetwork, order: &[usize], weights: &[f64]) -> Vec<f64> {
    let mut acc = weights.to_vec();
    let mut visited = vec![false; network.len()];
    for &idx in order {
        visited[idx] = true;
        if let Some(j) = network.receiver(idx) {
            acc[j] += acc[idx];
        }
    }
    for (a, seen) in acc.iter_mut().zip(visited) {
        if !seen {
            *a = f64::NAN;
        }
    }
    acc
}

fn to_raster(fdr: &Raster<u8>, values: Vec<f64>) -> Result<Raster<f64>> {
    let array = Array2::from_shape_vec(fdr.shape(), values).map_err(|e| Error::Other(e.to_string()))?;
    fdr.with_data(array, Some(f64::NAN))
}

/// Flow accumulation (FAC) from a D8 grid.
///
/// Without `weights` each cell counts the cells upstream of it, excluding
/// itself. With `weights` each cell holds the sum of the weights over
/// itself and its upstream area. Values carried by `upstream_pour_points`
/// (first band) are added at the cell downstream of each point and
/// carried on from there.
pub fn accumulate_flow(
    fdr: &Raster<u8>,
    format: D8Format,
    upstream_pour_points: Option<&PourPoints>,
    weights: Option<&Raster<f64>>,
) -> Result<Raster<f64>> {
    let mut w = match weights {
        Some(weights) => make_fac_weights(weights, fdr, 0.0)?,
        None => fdr.map(Some(0.0), |_| 1.0),
    };
    if let Some(points) = upstream_pour_points {
        points.validate()?;
        let values = pour_point_values(points)?;
        add_downstream(&mut w, fdr, format, points, |i| {
            values[i]
                .first()
                .copied()
                .ok_or_else(|| Error::invalid_param("upstream_pour_points", i, "pour point has no values"))
        })?;
    }

    let network = FlowNetwork::from_d8(fdr, format);
    let order = network.topological_order();
    let flat: Vec<f64> = w.data().iter().copied().collect();
    let mut acc = accumulate_cells(&network, &order, &flat);

    if weights.is_none() {
        acc.iter_mut().for_each(|a| *a -= 1.0);
    }
    debug!("Accumulated flow over {} cells", order.len());
    to_raster(fdr, acc)
}

/// Accumulate every band of a parameter grid over the D8 network.
///
/// Each output cell is the sum of the parameter over the cell and its
/// upstream area. Parameter nodata counts as 0. Bands keep their labels
/// and run in parallel.
pub fn accumulate_parameter(
    fdr: &Raster<u8>,
    format: D8Format,
    parameter: &RasterBands,
    upstream_pour_points: Option<&PourPoints>,
) -> Result<RasterBands> {
    parameter.first().ensure_aligned(fdr, "parameter raster and FDR")?;

    let adjusted;
    let parameter = match upstream_pour_points {
        Some(points) => {
            adjusted = adjust_parameter_raster(parameter, fdr, format, points)?;
            &adjusted
        }
        None => parameter,
    };

    let network = FlowNetwork::from_d8(fdr, format);
    let order = network.topological_order();
    debug!("Accumulating {} parameter band(s)", parameter.len());

    let accumulated: Vec<Raster<f64>> = parameter
        .bands()
        .par_iter()
        .map(|band| {
            let weights = make_fac_weights(band, fdr, 0.0)?;
            let flat: Vec<f64> = weights.data().iter().copied().collect();
            to_raster(fdr, accumulate_cells(&network, &order, &flat))
        })
        .collect::<Result<Vec<_>>>()?;

    RasterBands::from_bands(parameter.labels().iter().cloned().zip(accumulated).collect())
}

/// Parameters for [`FlowAccumulation`]
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulationParams {
    /// D8 encoding of the input, detected when `None`
    pub format: Option<D8Format>,
    pub weights: Option<Raster<f64>>,
    pub upstream_pour_points: Option<PourPoints>,
}

/// Flow accumulation as an [`Algorithm`]
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulation;

impl Algorithm for FlowAccumulation {
    type Input = Raster<u8>;
    type Output = Raster<f64>;
    type Params = FlowAccumulationParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Accumulation"
    }

    fn description(&self) -> &'static str {
        "Count (or weight) the cells upstream of every cell of a D8 grid"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let format = params.format.unwrap_or_else(|| identify_format(&input));
        accumulate_flow(
            &input,
            format,
            params.upstream_pour_points.as_ref(),
            params.weights.as_ref(),
        )
    }
}
