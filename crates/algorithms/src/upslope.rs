//! Extreme upslope values
//!
//! The largest (or smallest) parameter value found anywhere on the flow
//! paths draining into a cell, the cell itself included.

use crate::d8::{D8Format, FlowNetwork};
use fcpg_core::{Error, Raster, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Which extreme to propagate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtremeMode {
    #[default]
    Max,
    Min,
}

impl ExtremeMode {
    fn pick(&self, a: f64, b: f64) -> f64 {
        if a.is_nan() {
            return b;
        }
        if b.is_nan() {
            return a;
        }
        match self {
            ExtremeMode::Max => a.max(b),
            ExtremeMode::Min => a.min(b),
        }
    }
}

impl fmt::Display for ExtremeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtremeMode::Max => f.write_str("max"),
            ExtremeMode::Min => f.write_str("min"),
        }
    }
}

impl FromStr for ExtremeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(ExtremeMode::Max),
            "min" => Ok(ExtremeMode::Min),
            other => Err(Error::invalid_param("mode", other, "expected one of: max, min")),
        }
    }
}

/// Max (or min) of `parameter` over each cell and its upstream area.
///
/// Parameter nodata is skipped. With `stream_mask`, cells where the mask
/// is nodata become NaN. FDR nodata is NaN.
pub fn extreme_upslope_values(
    fdr: &Raster<u8>,
    format: D8Format,
    parameter: &Raster<f64>,
    stream_mask: Option<&Raster<f64>>,
    mode: ExtremeMode,
) -> Result<Raster<f64>> {
    parameter.ensure_aligned(fdr, "parameter raster and FDR")?;
    if let Some(mask) = stream_mask {
        mask.ensure_aligned(fdr, "stream mask and FDR")?;
    }

    let network = FlowNetwork::from_d8(fdr, format);
    let order = network.topological_order();
    let mut values: Vec<f64> = parameter
        .data()
        .iter()
        .map(|&v| if parameter.is_nodata(v) { f64::NAN } else { v })
        .collect();

    let mut visited = vec![false; values.len()];
    for &idx in &order {
        visited[idx] = true;
        if let Some(j) = network.receiver(idx) {
            values[j] = mode.pick(values[j], values[idx]);
        }
    }
    for (v, seen) in values.iter_mut().zip(visited) {
        if !seen {
            *v = f64::NAN;
        }
    }

    if let Some(mask) = stream_mask {
        for (v, &m) in values.iter_mut().zip(mask.data().iter()) {
            if mask.is_nodata(m) {
                *v = f64::NAN;
            }
        }
    }
    debug!("Propagated upslope {} over {} cells", mode, order.len());

    let array = Array2::from_shape_vec(fdr.shape(), values).map_err(|e| Error::Other(e.to_string()))?;
    fdr.with_data(array, Some(f64::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn strip() -> (Raster<u8>, Raster<f64>) {
        let mut fdr = Raster::from_vec(vec![1u8, 1, 1, 1], 1, 4).unwrap();
        fdr.set_nodata(Some(0));
        let mut p = Raster::from_vec(vec![5.0, f64::NAN, 2.0, 3.0], 1, 4).unwrap();
        p.set_nodata(Some(f64::NAN));
        (fdr, p)
    }

    #[test]
    fn test_max_upslope() {
        let (fdr, p) = strip();
        let out = extreme_upslope_values(&fdr, D8Format::Taudem, &p, None, ExtremeMode::Max).unwrap();
        let v: Vec<f64> = out.data().iter().copied().collect();
        assert_eq!(v, vec![5.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_min_upslope_with_mask() {
        let (fdr, p) = strip();
        let mask = Raster::from_vec(vec![f64::NAN, f64::NAN, 1.0, 1.0], 1, 4).unwrap();
        let out = extreme_upslope_values(&fdr, D8Format::Taudem, &p, Some(&mask), ExtremeMode::Min).unwrap();
        assert!(out.get(0, 0).unwrap().is_nan());
        assert!(out.get(0, 1).unwrap().is_nan());
        assert_relative_eq!(out.get(0, 2).unwrap(), 2.0);
        assert_relative_eq!(out.get(0, 3).unwrap(), 2.0);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("MIN".parse::<ExtremeMode>().unwrap(), ExtremeMode::Min);
        assert!("median".parse::<ExtremeMode>().is_err());
    }
}
