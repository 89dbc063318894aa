//! Value, nodata, categorical and spatial masks
//!
//! Masks prepare inputs for accumulation: stream cells from a FAC,
//! 0/1 nodata grids for the nodata correction, one 0/1 band per land
//! cover class, and basin footprints.

use crate::alignment::reproject_features;
use crate::maybe_rayon::map_cells;
use fcpg_core::vector::FeatureCollection;
use fcpg_core::{Error, Raster, RasterBands, RasterElement, Result};
use geo::{BoundingRect, Intersects};
use geo_types::{Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Parameters for [`value_mask`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMaskParams {
    /// Value the cells are compared against
    pub threshold: f64,
    /// Keep cells above the threshold, otherwise below it
    pub greater_than: bool,
    /// Keep cells equal to the threshold instead of comparing
    pub equals: bool,
    /// With `equals`, keep cells *not* equal to the threshold
    pub inverse_equals: bool,
    /// Value written to kept cells, their own value when `None`
    pub in_mask_value: Option<f64>,
    /// Value written to dropped cells, the raster nodata when `None`
    pub out_mask_value: Option<f64>,
}

impl Default for ValueMaskParams {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            greater_than: true,
            equals: false,
            inverse_equals: false,
            in_mask_value: None,
            out_mask_value: None,
        }
    }
}

impl ValueMaskParams {
    pub fn greater_than(threshold: f64) -> Self {
        Self {
            threshold,
            ..Default::default()
        }
    }

    pub fn less_than(threshold: f64) -> Self {
        Self {
            threshold,
            greater_than: false,
            ..Default::default()
        }
    }

    pub fn equal_to(threshold: f64) -> Self {
        Self {
            threshold,
            equals: true,
            ..Default::default()
        }
    }

    fn keeps(&self, v: f64) -> bool {
        match (self.equals, self.inverse_equals) {
            (true, false) => v == self.threshold,
            (true, true) => v != self.threshold,
            (false, _) if self.greater_than => v > self.threshold,
            (false, _) => v < self.threshold,
        }
    }
}

/// Mask a raster by comparing every cell to a threshold.
///
/// Kept cells get `in_mask_value` (or keep their value), dropped cells get
/// `out_mask_value` (or nodata). Nodata cells stay nodata. The output
/// nodata is the input's nodata as `f64`, NaN when there is none.
pub fn value_mask<T: RasterElement>(raster: &Raster<T>, params: &ValueMaskParams) -> Result<Raster<f64>> {
    if params.equals && T::is_float() {
        warn!(
            "Applying an equality mask to a floating point raster (threshold {}) is ill-advised",
            params.threshold
        );
    }
    let nodata = raster.nodata().and_then(|v| v.as_f64()).unwrap_or(f64::NAN);
    let out_value = params.out_mask_value.unwrap_or(nodata);

    map_cells(raster, Some(nodata), |row, col| {
        let v = raster.data()[(row, col)];
        if raster.is_nodata(v) {
            return nodata;
        }
        let Some(v) = v.as_f64() else {
            return nodata;
        };
        if params.keeps(v) {
            params.in_mask_value.unwrap_or(v)
        } else {
            out_value
        }
    })
}

/// Keep FAC cells at or above `threshold`; everything else becomes NaN
pub fn mask_streams(fac: &Raster<f64>, threshold: f64) -> Raster<f64> {
    fac.map(Some(f64::NAN), |v| {
        if !fac.is_nodata(v) && v >= threshold {
            v
        } else {
            f64::NAN
        }
    })
}

/// 1 where the raster has nodata, 0 where it has a value
pub fn binarize_nodata<T: RasterElement>(raster: &Raster<T>) -> Raster<u8> {
    raster.map(None, |v| u8::from(raster.is_nodata(v)))
}

/// Split a categorical raster into one 0/1 band per category.
///
/// Bands are in ascending category order and labelled by `names` when
/// the category has an entry, by the category code otherwise. Categories
/// in `ignore` get no band. Nodata is not a category.
pub fn binarize_categorical_raster<T: RasterElement>(
    categorical: &Raster<T>,
    names: &BTreeMap<i64, String>,
    ignore: &[i64],
) -> Result<RasterBands> {
    if T::is_float() {
        return Err(Error::invalid_param(
            "categorical",
            "float raster",
            "categorical rasters must hold integers",
        ));
    }

    let categories: Vec<(i64, T)> = categorical
        .unique_values()
        .into_iter()
        .filter_map(|v| Some((v.as_f64()? as i64, v)))
        .filter(|(code, _)| !ignore.contains(code))
        .collect();
    if categories.is_empty() {
        return Err(Error::Algorithm("no categories left to binarize".into()));
    }
    debug!("Binarizing {} categories", categories.len());

    let bands = categories
        .into_iter()
        .map(|(code, value)| {
            let label = names.get(&code).cloned().unwrap_or_else(|| code.to_string());
            let band = categorical.map(None, |v| if v == value { 1.0 } else { 0.0 });
            (label, band)
        })
        .collect();
    RasterBands::from_bands(bands)
}

/// Cells whose footprint touches any polygon (all-touched rasterisation)
fn touched_cells<T: RasterElement>(raster: &Raster<T>, polygons: &[Polygon<f64>]) -> Result<Raster<u8>> {
    let boxes: Vec<Option<Rect<f64>>> = polygons.iter().map(|p| p.bounding_rect()).collect();
    let gt = *raster.transform();

    map_cells(raster, None, |row, col| {
        let (x0, y0) = gt.pixel_to_geo_corner(col, row);
        let (x1, y1) = gt.pixel_to_geo_corner(col + 1, row + 1);
        let cell = Rect::new((x0, y0), (x1, y1));
        let touched = polygons.iter().zip(&boxes).any(|(poly, bbox)| {
            bbox.is_some_and(|b| b.intersects(&cell)) && poly.intersects(&cell.to_polygon())
        });
        u8::from(touched)
    })
}

/// Set every cell not touching `features` to nodata.
///
/// With `inverse`, cells touching the features are the ones set to
/// nodata. Features in another CRS are reprojected to the raster's first.
pub fn spatial_mask<T: RasterElement>(raster: &Raster<T>, features: &FeatureCollection, inverse: bool) -> Result<Raster<T>> {
    let reprojected;
    let features = match (raster.crs(), features.crs.as_ref()) {
        (Some(target), Some(source)) if !source.is_equivalent(target) => {
            reprojected = reproject_features(features, target)?;
            &reprojected
        }
        _ => features,
    };

    let polygons: Vec<Polygon<f64>> = features.iter().flat_map(|f| f.polygons()).collect();
    if polygons.is_empty() {
        warn!("Spatial mask has no polygons; every cell is outside the mask");
    }
    let touched = touched_cells(raster, &polygons)?;
    let nodata = raster.nodata().unwrap_or_else(T::default_nodata);

    let mut out = raster.clone();
    out.set_nodata(Some(nodata));
    for (v, &t) in out.data_mut().iter_mut().zip(touched.data().iter()) {
        if (t == 1) == inverse {
            *v = nodata;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fcpg_core::vector::Feature;
    use fcpg_core::GeoTransform;
    use geo_types::{polygon, Geometry};

    fn fac() -> Raster<f64> {
        let mut r = Raster::from_vec(vec![0.0, 1.0, 5.0, -9999.0, 10.0, 2.0], 2, 3).unwrap();
        r.set_nodata(Some(-9999.0));
        r
    }

    #[test]
    fn test_value_mask_greater_than() {
        let out = value_mask(&fac(), &ValueMaskParams::greater_than(1.5)).unwrap();
        let v: Vec<f64> = out.data().iter().copied().collect();
        assert_eq!(v, vec![-9999.0, -9999.0, 5.0, -9999.0, 10.0, 2.0]);
        assert_eq!(out.nodata(), Some(-9999.0));
    }

    #[test]
    fn test_value_mask_in_out_values() {
        let params = ValueMaskParams {
            in_mask_value: Some(1.0),
            out_mask_value: Some(0.0),
            ..ValueMaskParams::less_than(3.0)
        };
        let out = value_mask(&fac(), &params).unwrap();
        let v: Vec<f64> = out.data().iter().copied().collect();
        assert_eq!(v, vec![1.0, 1.0, 0.0, -9999.0, 0.0, 1.0]);
    }

    #[test]
    fn test_value_mask_equals_on_integers() {
        let mut r = Raster::from_vec(vec![1u8, 2, 3, 2], 2, 2).unwrap();
        r.set_nodata(Some(255));
        let out = value_mask(&r, &ValueMaskParams::equal_to(2.0)).unwrap();
        assert_eq!(out.get(0, 1).unwrap(), 2.0);
        assert_eq!(out.get(0, 0).unwrap(), 255.0);

        let inverse = ValueMaskParams {
            inverse_equals: true,
            ..ValueMaskParams::equal_to(2.0)
        };
        let out = value_mask(&r, &inverse).unwrap();
        assert_eq!(out.get(0, 0).unwrap(), 1.0);
        assert_eq!(out.get(0, 1).unwrap(), 255.0);
    }

    #[test]
    fn test_mask_streams() {
        let out = mask_streams(&fac(), 5.0);
        assert!(out.get(0, 0).unwrap().is_nan());
        assert!(out.get(1, 0).unwrap().is_nan());
        assert_relative_eq!(out.get(0, 2).unwrap(), 5.0);
        assert_relative_eq!(out.get(1, 1).unwrap(), 10.0);
    }

    #[test]
    fn test_binarize_nodata() {
        let out = binarize_nodata(&fac());
        let v: Vec<u8> = out.data().iter().copied().collect();
        assert_eq!(v, vec![0, 0, 0, 1, 0, 0]);

        let nan = Raster::from_vec(vec![f64::NAN, 1.0], 1, 2).unwrap();
        assert_eq!(binarize_nodata(&nan).get(0, 0).unwrap(), 1);
    }

    #[test]
    fn test_binarize_categorical() {
        let mut cats = Raster::from_vec(vec![3i32, 1, 1, 7, 3, 0], 2, 3).unwrap();
        cats.set_nodata(Some(0));
        let mut names = BTreeMap::new();
        names.insert(3, "forest".to_string());

        let bands = binarize_categorical_raster(&cats, &names, &[7]).unwrap();
        assert_eq!(bands.labels(), &["1".to_string(), "forest".to_string()]);
        let forest = bands.band_by_label("forest").unwrap();
        let v: Vec<f64> = forest.data().iter().copied().collect();
        assert_eq!(v, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_binarize_categorical_rejects_float() {
        let r = Raster::from_vec(vec![1.0f64, 2.0], 1, 2).unwrap();
        let err = binarize_categorical_raster(&r, &BTreeMap::new(), &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_spatial_mask_all_touched() {
        let mut r = Raster::filled(3, 3, 1.0f64);
        r.set_transform(GeoTransform::new(0.0, 3.0, 1.0, -1.0));
        let mut fc = FeatureCollection::new();
        // clips a corner of the centre cell only
        fc.push(Feature::new(Geometry::Polygon(polygon![
            (x: -1.0, y: 1.8), (x: 1.2, y: 1.8), (x: 1.2, y: 4.0), (x: -1.0, y: 4.0)
        ])));

        let out = spatial_mask(&r, &fc, false).unwrap();
        assert_relative_eq!(out.get(0, 0).unwrap(), 1.0);
        assert_relative_eq!(out.get(1, 1).unwrap(), 1.0);
        assert!(out.get(2, 2).unwrap().is_nan());

        let inv = spatial_mask(&r, &fc, true).unwrap();
        assert!(inv.get(1, 1).unwrap().is_nan());
        assert_relative_eq!(inv.get(2, 2).unwrap(), 1.0);
    }
}
