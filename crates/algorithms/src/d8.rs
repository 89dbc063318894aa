//! D8 flow direction encodings and the routing network built from them
//!
//! Two encodings are in use:
//!
//! | direction | ESRI | TauDEM |
//! |-----------|------|--------|
//! | E         | 1    | 1      |
//! | SE        | 2    | 8      |
//! | S         | 4    | 7      |
//! | SW        | 8    | 6      |
//! | W         | 16   | 5      |
//! | NW        | 32   | 4      |
//! | N         | 64   | 3      |
//! | NE        | 128  | 2      |
//! | nodata    | 255  | 0      |
//!
//! Internally directions are indexed counter-clockwise from East, which is
//! the TauDEM order shifted by one.

use crate::maybe_rayon::map_cells;
use fcpg_core::{Error, Raster, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_4;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Neighbour offsets `(d_row, d_col)` in direction index order E, NE, N, NW, W, SW, S, SE
pub const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
];

const ESRI_CODES: [u8; 8] = [1, 128, 64, 32, 16, 8, 4, 2];
const TAUDEM_CODES: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

/// A D8 flow direction encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum D8Format {
    Esri,
    Taudem,
}

impl D8Format {
    pub const ALL: [D8Format; 2] = [D8Format::Esri, D8Format::Taudem];

    pub fn name(&self) -> &'static str {
        match self {
            D8Format::Esri => "esri",
            D8Format::Taudem => "taudem",
        }
    }

    /// Codes in direction index order
    pub fn codes(&self) -> &'static [u8; 8] {
        match self {
            D8Format::Esri => &ESRI_CODES,
            D8Format::Taudem => &TAUDEM_CODES,
        }
    }

    pub fn nodata(&self) -> u8 {
        match self {
            D8Format::Esri => 255,
            D8Format::Taudem => 0,
        }
    }

    /// Direction index (0 = E, counter-clockwise) of a code, `None` for
    /// nodata and anything outside the table
    pub fn direction_index(&self, code: u8) -> Option<usize> {
        match self {
            D8Format::Taudem => (1..=8).contains(&code).then(|| (code - 1) as usize),
            D8Format::Esri => ESRI_CODES.iter().position(|&c| c == code),
        }
    }

    pub fn code(&self, direction_index: usize) -> u8 {
        self.codes()[direction_index % 8]
    }
}

impl fmt::Display for D8Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for D8Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "esri" => Ok(D8Format::Esri),
            "taudem" => Ok(D8Format::Taudem),
            other => Err(Error::invalid_param(
                "d8_format",
                other,
                "expected one of: esri, taudem",
            )),
        }
    }
}

/// Guess the encoding of a flow direction grid.
///
/// Any valid value above 8 can only be ESRI. Grids holding only 1-8 are
/// taken to be TauDEM.
pub fn identify_format(fdr: &Raster<u8>) -> D8Format {
    let esri = fdr
        .data()
        .iter()
        .any(|&v| !fdr.is_nodata(v) && v > 8 && v != D8Format::Esri.nodata());
    let format = if esri { D8Format::Esri } else { D8Format::Taudem };
    debug!("Identified D8 format: {}", format);
    format
}

/// Set every code outside `format`'s table to its nodata value
pub fn remove_unexpected_values(fdr: &Raster<u8>, format: D8Format) -> Raster<u8> {
    let nodata = format.nodata();
    fdr.map(Some(nodata), |v| {
        if format.direction_index(v).is_some() {
            v
        } else {
            nodata
        }
    })
}

/// Re-encode a flow direction grid.
///
/// `in_format` overrides detection. Unknown codes become the target's
/// nodata. Matching formats return a cleaned copy.
pub fn convert_fdr_formats(
    fdr: &Raster<u8>,
    out_format: D8Format,
    in_format: Option<D8Format>,
) -> Result<Raster<u8>> {
    let in_format = in_format.unwrap_or_else(|| identify_format(fdr));
    let cleaned = remove_unexpected_values(fdr, in_format);
    if in_format == out_format {
        return Ok(cleaned);
    }
    debug!("Converting D8 grid {} -> {}", in_format, out_format);
    let out_nodata = out_format.nodata();
    map_cells(&cleaned, Some(out_nodata), |row, col| {
        let code = cleaned.data()[(row, col)];
        in_format
            .direction_index(code)
            .map_or(out_nodata, |dir| out_format.code(dir))
    })
}

/// Whether a flow direction grid cell carries data.
///
/// Uses the declared nodata when there is one, otherwise the encoding's
/// nodata code.
pub fn fdr_has_data(fdr: &Raster<u8>, format: D8Format, row: usize, col: usize) -> bool {
    let v = fdr.data()[(row, col)];
    match fdr.nodata() {
        Some(nd) => v != nd,
        None => v != format.nodata(),
    }
}

/// Neighbour `(row, col)` reached by moving one step in direction `dir`
pub(crate) fn step(rows: usize, cols: usize, row: usize, col: usize, dir: usize) -> Option<(usize, usize)> {
    let (dr, dc) = D8_OFFSETS[dir];
    let nr = row as isize + dr;
    let nc = col as isize + dc;
    (nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols).then(|| (nr as usize, nc as usize))
}

/// The cell a cell drains to; `None` for nodata, pits and off-grid flow
pub fn downstream_cell(fdr: &Raster<u8>, format: D8Format, row: usize, col: usize) -> Option<(usize, usize)> {
    let (rows, cols) = fdr.shape();
    let code = *fdr.data().get((row, col))?;
    let dir = format.direction_index(code)?;
    step(rows, cols, row, col, dir)
}

/// Map coordinates one cell downstream of `(x, y)`.
///
/// Moves one cell width (or height) along the flow direction of the cell
/// containing the point. `None` when the point is off the grid or the cell
/// has no direction. The result may lie outside the grid.
pub fn find_downstream_coords(fdr: &Raster<u8>, format: D8Format, x: f64, y: f64) -> Option<(f64, f64)> {
    let (row, col) = fdr.cell_at(x, y)?;
    let dir = format.direction_index(fdr.data()[(row, col)])?;
    let (dr, dc) = D8_OFFSETS[dir];
    let gt = fdr.transform();
    Some((
        x + dc as f64 * gt.cell_size(),
        y - dr as f64 * gt.cell_height(),
    ))
}

/// Convert a D8 grid to D-infinity angles in radians.
///
/// Angles run counter-clockwise from East (0) in steps of π/4. Nodata
/// becomes NaN.
pub fn d8_to_dinfinity(fdr: &Raster<u8>, in_format: Option<D8Format>) -> Result<Raster<f64>> {
    let format = in_format.unwrap_or_else(|| identify_format(fdr));
    map_cells(fdr, Some(f64::NAN), |row, col| {
        format
            .direction_index(fdr.data()[(row, col)])
            .map_or(f64::NAN, |dir| dir as f64 * FRAC_PI_4)
    })
}

/// D8 routing as flat index arrays.
///
/// `receiver[i]` is the downstream cell of `i`, if it has one with data.
/// Cells without a direction are `valid = false` and never route flow.
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    rows: usize,
    cols: usize,
    valid: Vec<bool>,
    receiver: Vec<Option<usize>>,
    direction: Vec<Option<u8>>,
}

impl FlowNetwork {
    pub fn from_d8(fdr: &Raster<u8>, format: D8Format) -> Self {
        let (rows, cols) = fdr.shape();
        let n = rows * cols;
        let mut valid = vec![false; n];
        let mut direction = vec![None; n];

        for ((row, col), &code) in fdr.data().indexed_iter() {
            let idx = row * cols + col;
            if fdr.is_nodata(code) {
                continue;
            }
            if let Some(dir) = format.direction_index(code) {
                valid[idx] = true;
                direction[idx] = Some(dir as u8);
            }
        }

        let receiver = (0..n)
            .map(|idx| {
                let dir = direction[idx]? as usize;
                let (r, c) = step(rows, cols, idx / cols, idx % cols, dir)?;
                let j = r * cols + c;
                valid[j].then_some(j)
            })
            .collect();

        Self {
            rows,
            cols,
            valid,
            receiver,
            direction,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        self.valid[idx]
    }

    pub fn receiver(&self, idx: usize) -> Option<usize> {
        self.receiver[idx]
    }

    /// Direction index of the cell, if it has one
    pub fn direction(&self, idx: usize) -> Option<usize> {
        self.direction[idx].map(usize::from)
    }

    /// Valid cells ordered so every cell comes after all cells draining
    /// into it (Kahn's algorithm).
    ///
    /// Cells caught in a flow cycle are left out.
    pub fn topological_order(&self) -> Vec<usize> {
        let n = self.len();
        let mut in_degree = vec![0u32; n];
        for idx in 0..n {
            if let Some(j) = self.receiver[idx] {
                in_degree[j] += 1;
            }
        }

        let mut stack: Vec<usize> = (0..n)
            .filter(|&i| self.valid[i] && in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(idx) = stack.pop() {
            order.push(idx);
            if let Some(j) = self.receiver[idx] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    stack.push(j);
                }
            }
        }

        let valid_count = self.valid.iter().filter(|v| **v).count();
        if order.len() < valid_count {
            tracing::warn!(
                "{} cell(s) are part of flow cycles and were skipped",
                valid_count - order.len()
            );
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fcpg_core::GeoTransform;

    fn esri_fdr() -> Raster<u8> {
        // E  SE  S
        // N  255 SW
        let mut r = Raster::from_vec(vec![1, 2, 4, 64, 255, 8], 2, 3).unwrap();
        r.set_nodata(Some(255));
        r.set_transform(GeoTransform::new(0.0, 20.0, 10.0, -10.0));
        r
    }

    #[test]
    fn test_identify_format() {
        assert_eq!(identify_format(&esri_fdr()), D8Format::Esri);
        let tau = Raster::from_vec(vec![1u8, 8, 7, 3, 0, 6], 2, 3).unwrap();
        assert_eq!(identify_format(&tau), D8Format::Taudem);
    }

    #[test]
    fn test_convert_esri_to_taudem() {
        let tau = convert_fdr_formats(&esri_fdr(), D8Format::Taudem, None).unwrap();
        assert_eq!(tau.data().iter().copied().collect::<Vec<_>>(), vec![1, 8, 7, 3, 0, 6]);
        assert_eq!(tau.nodata(), Some(0));

        let back = convert_fdr_formats(&tau, D8Format::Esri, Some(D8Format::Taudem)).unwrap();
        assert_eq!(back.data(), esri_fdr().data());
        assert_eq!(back.nodata(), Some(255));
    }

    #[test]
    fn test_convert_same_format_removes_unexpected() {
        let mut fdr = esri_fdr();
        fdr.set(0, 0, 3).unwrap();
        let out = convert_fdr_formats(&fdr, D8Format::Esri, Some(D8Format::Esri)).unwrap();
        assert_eq!(out.get(0, 0).unwrap(), 255);
        assert_eq!(out.get(0, 1).unwrap(), 2);
    }

    #[test]
    fn test_downstream_cell() {
        let fdr = esri_fdr();
        assert_eq!(downstream_cell(&fdr, D8Format::Esri, 0, 0), Some((0, 1)));
        assert_eq!(downstream_cell(&fdr, D8Format::Esri, 0, 1), Some((1, 2)));
        // N off the top edge
        assert_eq!(downstream_cell(&fdr, D8Format::Esri, 1, 0), Some((0, 0)));
        assert_eq!(downstream_cell(&fdr, D8Format::Esri, 1, 1), None);
        assert_eq!(downstream_cell(&fdr, D8Format::Esri, 1, 2), None);
    }

    #[test]
    fn test_find_downstream_coords() {
        let fdr = esri_fdr();
        // row 1, col 0 drains north
        let (x, y) = fdr.pixel_to_geo(0, 1);
        let (dx, dy) = find_downstream_coords(&fdr, D8Format::Esri, x, y).unwrap();
        assert_relative_eq!(dx, 5.0);
        assert_relative_eq!(dy, 15.0);
        // row 0, col 1 drains south-east
        let (x, y) = fdr.pixel_to_geo(1, 0);
        let (dx, dy) = find_downstream_coords(&fdr, D8Format::Esri, x, y).unwrap();
        assert_relative_eq!(dx, 25.0);
        assert_relative_eq!(dy, 5.0);
        assert!(find_downstream_coords(&fdr, D8Format::Esri, -5.0, 5.0).is_none());
    }

    #[test]
    fn test_d8_to_dinfinity() {
        let dinf = d8_to_dinfinity(&esri_fdr(), None).unwrap();
        assert_relative_eq!(dinf.get(0, 0).unwrap(), 0.0);
        assert_relative_eq!(dinf.get(0, 1).unwrap(), 7.0 * FRAC_PI_4);
        assert_relative_eq!(dinf.get(1, 0).unwrap(), 2.0 * FRAC_PI_4);
        assert!(dinf.get(1, 1).unwrap().is_nan());
    }

    #[test]
    fn test_topological_order_upstream_first() {
        // 1x4 strip flowing east
        let fdr = Raster::from_vec(vec![1u8, 1, 1, 1], 1, 4).unwrap();
        let net = FlowNetwork::from_d8(&fdr, D8Format::Taudem);
        let order = net.topological_order();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(net.receiver(3), None);
    }

    #[test]
    fn test_cycle_is_skipped() {
        // E then W: two cells draining into each other
        let fdr = Raster::from_vec(vec![1u8, 5], 1, 2).unwrap();
        let net = FlowNetwork::from_d8(&fdr, D8Format::Taudem);
        assert!(net.topological_order().is_empty());
    }

    #[test]
    fn test_cycle_beside_outlet_keeps_outlet() {
        // Cells 0 and 1 form a cycle, cell 2 drains east off the grid
        let fdr = Raster::from_vec(vec![1u8, 5, 1], 1, 3).unwrap();
        let net = FlowNetwork::from_d8(&fdr, D8Format::Taudem);
        assert_eq!(net.topological_order(), vec![2]);

        // A cell draining into a cycle is still ordered, the cycle is not
        let fdr = Raster::from_vec(vec![1u8, 1, 5], 1, 3).unwrap();
        let net = FlowNetwork::from_d8(&fdr, D8Format::Taudem);
        assert_eq!(net.topological_order(), vec![0]);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("ESRI".parse::<D8Format>().unwrap(), D8Format::Esri);
        assert!("arcgis".parse::<D8Format>().is_err());
    }
}
