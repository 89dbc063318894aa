//! Point sampling and grid resampling

use crate::maybe_rayon::map_cells;
use fcpg_core::{Error, GeoTransform, Raster, RasterElement, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resampling method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    /// Value of the cell containing the sample point
    #[default]
    Nearest,
    /// Distance-weighted mean of the four surrounding cell centres
    Bilinear,
}

impl ResampleMethod {
    pub const NAMES: [&'static str; 2] = ["nearest", "bilinear"];

    pub fn name(&self) -> &'static str {
        match self {
            ResampleMethod::Nearest => "nearest",
            ResampleMethod::Bilinear => "bilinear",
        }
    }
}

impl fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResampleMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResampleMethod::Nearest),
            "bilinear" => Ok(ResampleMethod::Bilinear),
            other => Err(Error::invalid_param(
                "resample_method",
                other,
                format!("expected one of: {}", Self::NAMES.join(", ")),
            )),
        }
    }
}

/// Valid value of the cell containing `(x, y)`
fn sample_nearest<T: RasterElement>(raster: &Raster<T>, x: f64, y: f64) -> Option<f64> {
    let (row, col) = raster.cell_at(x, y)?;
    let v = raster.data()[(row, col)];
    if raster.is_nodata(v) {
        None
    } else {
        v.as_f64()
    }
}

/// Sample a raster at a map coordinate.
///
/// `None` outside the grid or on nodata. Bilinear falls back to nearest
/// when any of the four surrounding cells is nodata. Edge cells are
/// clamped so the outer half-cell still interpolates.
pub fn sample_at<T: RasterElement>(raster: &Raster<T>, x: f64, y: f64, method: ResampleMethod) -> Option<f64> {
    let nearest = sample_nearest(raster, x, y)?;
    if method == ResampleMethod::Nearest {
        return Some(nearest);
    }

    let (rows, cols) = raster.shape();
    let (colf, rowf) = raster.geo_to_pixel(x, y);
    let u = (colf - 0.5).clamp(0.0, (cols - 1) as f64);
    let v = (rowf - 0.5).clamp(0.0, (rows - 1) as f64);
    let c0 = u.floor() as usize;
    let r0 = v.floor() as usize;
    let c1 = (c0 + 1).min(cols - 1);
    let r1 = (r0 + 1).min(rows - 1);
    let fx = u - c0 as f64;
    let fy = v - r0 as f64;

    let data = raster.data();
    let mut corners = [0.0; 4];
    for (slot, &(r, c)) in corners.iter_mut().zip(&[(r0, c0), (r0, c1), (r1, c0), (r1, c1)]) {
        let value = data[(r, c)];
        if raster.is_nodata(value) {
            return Some(nearest);
        }
        *slot = value.as_f64()?;
    }

    let top = corners[0] * (1.0 - fx) + corners[1] * fx;
    let bottom = corners[2] * (1.0 - fx) + corners[3] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Sample `raster` at every cell centre of `template`'s grid.
///
/// Cells without a sample become `raster`'s nodata (or the type default).
pub(crate) fn sample_onto<T, U>(raster: &Raster<T>, template: &Raster<U>, method: ResampleMethod) -> Result<Raster<T>>
where
    T: RasterElement,
    U: RasterElement,
{
    let nodata = raster.nodata().unwrap_or_else(T::default_nodata);
    let mut out = map_cells(template, Some(nodata), |row, col| {
        let (x, y) = template.pixel_to_geo(col, row);
        sample_at(raster, x, y, method)
            .and_then(T::from_f64)
            .unwrap_or(nodata)
    })?;
    if template.crs().is_none() {
        out.set_crs(raster.crs().cloned());
    }
    Ok(out)
}

/// Resample to the shape of `match_raster` while keeping this raster's
/// own extent.
///
/// Cell sizes change so `match_raster.rows() x match_raster.cols()`
/// cells cover the original bounds.
pub fn resample<T, U>(raster: &Raster<T>, match_raster: &Raster<U>, method: ResampleMethod) -> Result<Raster<T>>
where
    T: RasterElement,
    U: RasterElement,
{
    let (rows, cols) = match_raster.shape();
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }
    let (min_x, min_y, max_x, max_y) = raster.bounds();
    let transform = GeoTransform::new(
        min_x,
        max_y,
        (max_x - min_x) / cols as f64,
        -(max_y - min_y) / rows as f64,
    );

    let mut template: Raster<T> = Raster::new(rows, cols);
    template.set_transform(transform);
    template.set_crs(raster.crs().cloned());
    sample_onto(raster, &template, method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> Raster<f64> {
        // 2x2, values increase to the east
        let mut r = Raster::from_vec(vec![0.0, 10.0, 0.0, 10.0], 2, 2).unwrap();
        r.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("Bilinear".parse::<ResampleMethod>().unwrap(), ResampleMethod::Bilinear);
        let err = "cubic".parse::<ResampleMethod>().unwrap_err();
        assert!(err.to_string().contains("nearest, bilinear"));
    }

    #[test]
    fn test_bilinear_midpoint() {
        let r = ramp();
        let v = sample_at(&r, 1.0, 1.5, ResampleMethod::Bilinear).unwrap();
        assert_relative_eq!(v, 5.0);
        let v = sample_at(&r, 1.0, 1.5, ResampleMethod::Nearest).unwrap();
        assert_relative_eq!(v, 10.0);
    }

    #[test]
    fn test_bilinear_falls_back_on_nodata() {
        let mut r = ramp();
        r.set(1, 1, f64::NAN).unwrap();
        let v = sample_at(&r, 0.75, 1.25, ResampleMethod::Bilinear).unwrap();
        assert_relative_eq!(v, 0.0);
        assert!(sample_at(&r, 1.5, 0.5, ResampleMethod::Bilinear).is_none());
    }

    #[test]
    fn test_outside_is_none() {
        assert!(sample_at(&ramp(), 5.0, 5.0, ResampleMethod::Nearest).is_none());
    }

    #[test]
    fn test_resample_keeps_extent() {
        let r = ramp();
        let template: Raster<f64> = Raster::new(4, 4);
        let out = resample(&r, &template, ResampleMethod::Nearest).unwrap();
        assert_eq!(out.shape(), (4, 4));
        assert_eq!(out.bounds(), r.bounds());
        assert_relative_eq!(out.cell_size(), 0.5);
        assert_relative_eq!(out.get(0, 0).unwrap(), 0.0);
        assert_relative_eq!(out.get(3, 3).unwrap(), 10.0);
    }
}
