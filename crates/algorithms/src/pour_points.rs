//! Pour points: basin outlets and the accumulation values they carry
//!
//! A [`PourPoints`] set is how accumulated values cross from one raster to
//! the next. Locate outlets on an upstream FAC, sample the upstream
//! accumulations there, then inject them into the downstream grid.

use crate::alignment::reproject_features;
use crate::mask::spatial_mask;
use fcpg_core::vector::FeatureCollection;
use fcpg_core::{Error, Raster, RasterBands, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// HUC12 attribute name, the one basin field that gets HUC4 dissolving
pub const HUC12_FIELD: &str = "HUC12";

/// Pour point locations with optional per-band values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PourPoints {
    pub ids: Vec<String>,
    /// Map coordinates `(x, y)`, one per id
    pub coords: Vec<(f64, f64)>,
    /// One value per band for each point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Vec<f64>>>,
}

impl PourPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: impl Into<String>, coord: (f64, f64)) {
        self.ids.push(id.into());
        self.coords.push(coord);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Attach values, one `Vec` per point
    pub fn with_values(mut self, values: Vec<Vec<f64>>) -> Result<Self> {
        if values.len() != self.len() {
            return Err(Error::invalid_param(
                "values",
                values.len(),
                format!("expected one entry per pour point ({})", self.len()),
            ));
        }
        self.values = Some(values);
        Ok(self)
    }

    /// `(id, coord, values)` for every point
    pub fn iter(&self) -> impl Iterator<Item = (&str, (f64, f64), Option<&[f64]>)> {
        self.ids.iter().zip(&self.coords).enumerate().map(move |(i, (id, &c))| {
            let values = self.values.as_ref().and_then(|v| v.get(i)).map(Vec::as_slice);
            (id.as_str(), c, values)
        })
    }

    /// Error unless ids, coords and values line up
    pub fn validate(&self) -> Result<()> {
        if self.ids.len() != self.coords.len() {
            return Err(Error::invalid_param(
                "pour_points",
                format!("{} ids / {} coords", self.ids.len(), self.coords.len()),
                "ids and coords must have the same length",
            ));
        }
        if let Some(values) = &self.values {
            if values.len() != self.ids.len() {
                return Err(Error::invalid_param(
                    "pour_points",
                    format!("{} ids / {} values", self.ids.len(), values.len()),
                    "values must have one entry per id",
                ));
            }
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let points: PourPoints = serde_json::from_str(s)?;
        points.validate()?;
        Ok(points)
    }

    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Centres of the cells holding the maximum valid value, in row-major order
pub(crate) fn max_cells(raster: &Raster<f64>) -> Vec<(usize, usize)> {
    let max = raster
        .data()
        .iter()
        .copied()
        .filter(|v| !raster.is_nodata(*v))
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return Vec::new();
    }
    raster
        .data()
        .indexed_iter()
        .filter(|(_, v)| **v == max)
        .map(|(idx, _)| idx)
        .collect()
}

fn max_cell_coords(fac: &Raster<f64>, what: &str) -> Result<(f64, f64)> {
    let (row, col) = max_cells(fac)
        .first()
        .copied()
        .ok_or_else(|| Error::Algorithm(format!("{what} has no valid FAC cells")))?;
    Ok(fac.pixel_to_geo(col, row))
}

/// The single outlet of a FAC raster: the centre of its maximum cell
pub fn find_fac_pour_point(fac: &Raster<f64>, basin_name: Option<&str>) -> Result<PourPoints> {
    let name = basin_name.unwrap_or("0");
    let mut points = PourPoints::new();
    points.push(name, max_cell_coords(fac, "raster")?);
    Ok(points)
}

/// One outlet per basin: the maximum FAC cell inside each basin.
///
/// When `use_huc4` is set and `id_field` is `HUC12`, basins are first
/// dissolved to their HUC4 (first four digits). Otherwise they are
/// dissolved on `id_field` itself.
pub fn find_basin_pour_points(
    fac: &Raster<f64>,
    basins: &FeatureCollection,
    id_field: &str,
    use_huc4: bool,
) -> Result<PourPoints> {
    basins.require_field(id_field)?;

    let reprojected;
    let basins = match (fac.crs(), basins.crs.as_ref()) {
        (Some(target), Some(source)) if !source.is_equivalent(target) => {
            reprojected = reproject_features(basins, target)?;
            &reprojected
        }
        _ => basins,
    };

    let dissolved = if use_huc4 && id_field == HUC12_FIELD {
        basins.dissolve_by(id_field, |id| crate::cascade::huc4(id).to_string())?
    } else {
        basins.dissolve(id_field)?
    };
    debug!("Finding pour points for {} basins", dissolved.len());

    let (min_x, min_y, max_x, max_y) = fac.bounds();
    let mut points = PourPoints::new();
    for basin in dissolved.iter() {
        let id = basin.property_string(id_field).unwrap_or_default();
        let single: FeatureCollection = FeatureCollection {
            features: vec![basin.clone()],
            crs: dissolved.crs.clone(),
        };

        if let Some(b) = single.bounds() {
            let enclosed = b.min().x >= min_x && b.min().y >= min_y && b.max().x <= max_x && b.max().y <= max_y;
            if !enclosed {
                warn!(
                    "Basin {}={} is not completely enclosed by the FAC raster; some areas may be missing",
                    id_field, id
                );
            }
        }

        let masked = spatial_mask(fac, &single, false)?;
        points.push(id.clone(), max_cell_coords(&masked, &format!("basin {id}"))?);
    }
    Ok(points)
}

/// Sample every band at every pour point.
///
/// Points off the raster, or on nodata, get NaN. Any values already on
/// `points` are replaced.
pub fn get_pour_point_values(points: &PourPoints, accumulation: &RasterBands) -> PourPoints {
    let values = points
        .coords
        .iter()
        .map(|&(x, y)| {
            accumulation
                .bands()
                .iter()
                .map(|band| {
                    band.cell_at(x, y)
                        .map(|(r, c)| band.data()[(r, c)])
                        .filter(|v| !band.is_nodata(*v))
                        .unwrap_or(f64::NAN)
                })
                .collect()
        })
        .collect();

    PourPoints {
        ids: points.ids.clone(),
        coords: points.coords.clone(),
        values: Some(values),
    }
}
