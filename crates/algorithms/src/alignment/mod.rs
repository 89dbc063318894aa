//! Grid alignment: resampling, clipping and reprojection
//!
//! Every accumulation tool requires its inputs on the same grid as the
//! flow direction raster. [`align_raster`] is the one-stop way to get
//! there from an arbitrary parameter grid.

mod projection;
mod resample;

pub use projection::{reproject_features, CoordTransform};
pub use resample::{resample, sample_at, ResampleMethod};

use crate::maybe_rayon::map_cells;
use fcpg_core::vector::FeatureCollection;
use fcpg_core::{Error, GeoTransform, Raster, RasterElement, Result, CRS};
use resample::sample_onto;
use tracing::debug;

/// What to clip a raster to
#[derive(Debug, Clone, Copy)]
pub enum ClipTarget<'a> {
    /// The extent of another raster
    Raster {
        bounds: (f64, f64, f64, f64),
        crs: Option<&'a CRS>,
    },
    /// The bounding box of a feature collection
    Features(&'a FeatureCollection),
    /// A `(min_x, min_y, max_x, max_y)` box in the raster's CRS
    BBox((f64, f64, f64, f64)),
}

impl<'a> ClipTarget<'a> {
    pub fn from_raster<T: RasterElement>(raster: &'a Raster<T>) -> Self {
        ClipTarget::Raster {
            bounds: raster.bounds(),
            crs: raster.crs(),
        }
    }

    /// Bounds expressed in `crs`
    fn bounds_in(&self, crs: Option<&CRS>) -> Result<(f64, f64, f64, f64)> {
        let (bounds, source) = match self {
            ClipTarget::Raster { bounds, crs } => (*bounds, *crs),
            ClipTarget::Features(features) => {
                let rect = features
                    .bounds()
                    .ok_or_else(|| Error::Algorithm("cannot clip to an empty feature collection".into()))?;
                (
                    (rect.min().x, rect.min().y, rect.max().x, rect.max().y),
                    features.crs.as_ref(),
                )
            }
            ClipTarget::BBox(bounds) => return Ok(*bounds),
        };
        match (source, crs) {
            (Some(from), Some(to)) if !from.is_equivalent(to) => {
                Ok(CoordTransform::new(from, to)?.transform_bounds(bounds))
            }
            _ => Ok(bounds),
        }
    }
}

/// Crop a raster to the cells whose centres fall inside the target box
pub fn clip<T: RasterElement>(raster: &Raster<T>, target: ClipTarget<'_>) -> Result<Raster<T>> {
    let (min_x, min_y, max_x, max_y) = target.bounds_in(raster.crs())?;
    let gt = raster.transform();
    if !gt.is_north_up() {
        return Err(Error::Algorithm("clip requires a north-up raster".into()));
    }
    let (rows, cols) = raster.shape();

    let first_col = ((min_x - gt.origin_x) / gt.cell_size() - 0.5).ceil().max(0.0);
    let last_col = ((max_x - gt.origin_x) / gt.cell_size() - 0.5).floor();
    let first_row = ((gt.origin_y - max_y) / gt.cell_height() - 0.5).ceil().max(0.0);
    let last_row = ((gt.origin_y - min_y) / gt.cell_height() - 0.5).floor();

    let last_col = last_col.min(cols as f64 - 1.0);
    let last_row = last_row.min(rows as f64 - 1.0);
    if last_col < first_col || last_row < first_row {
        return Err(Error::Algorithm(format!(
            "clip box ({min_x}, {min_y}, {max_x}, {max_y}) does not overlap the raster"
        )));
    }

    let (row, col) = (first_row as usize, first_col as usize);
    let out_rows = last_row as usize - row + 1;
    let out_cols = last_col as usize - col + 1;
    debug!("Clipping to window ({row}, {col}) of {out_rows}x{out_cols}");
    raster.crop(row, col, out_rows, out_cols)
}

/// Reproject a raster by inverse mapping onto a north-up grid in `target`.
///
/// `resolution` defaults to the square cell size that keeps the cell
/// count of the source.
pub fn reproject_raster<T: RasterElement>(
    raster: &Raster<T>,
    target: &CRS,
    resolution: Option<f64>,
    method: ResampleMethod,
) -> Result<Raster<T>> {
    let source = raster
        .crs()
        .ok_or_else(|| Error::CrsMismatch("Unknown".to_string(), target.identifier()))?;
    if source.is_equivalent(target) {
        return Ok(raster.clone());
    }
    if let Some(res) = resolution {
        if !(res.is_finite() && res > 0.0) {
            return Err(Error::invalid_param("resolution", res, "must be positive"));
        }
    }

    let forward = CoordTransform::new(source, target)?;
    let inverse = forward.inverse();
    let (min_x, min_y, max_x, max_y) = forward.transform_bounds(raster.bounds());
    let width = max_x - min_x;
    let height = max_y - min_y;
    let res = resolution.unwrap_or_else(|| (width * height / raster.len().max(1) as f64).sqrt());

    let cols = ((width / res).ceil() as usize).max(1);
    let rows = ((height / res).ceil() as usize).max(1);
    debug!(
        "Reprojecting {} -> {}: {}x{} cells of {}",
        source.identifier(),
        target.identifier(),
        rows,
        cols,
        res
    );

    let mut template: Raster<T> = Raster::new(rows, cols);
    template.set_transform(GeoTransform::new(min_x, max_y, res, -res));
    template.set_crs(Some(target.clone()));

    let nodata = raster.nodata().unwrap_or_else(T::default_nodata);
    map_cells(&template, Some(nodata), |row, col| {
        let (x, y) = template.pixel_to_geo(col, row);
        let (sx, sy) = inverse.transform(x, y);
        sample_at(raster, sx, sy, method)
            .and_then(T::from_f64)
            .unwrap_or(nodata)
    })
}

/// Put a raster on exactly the grid of `match_raster`.
///
/// Reprojects first when the CRS differ, then samples the result at each
/// cell centre of the match grid. The output is always aligned with
/// `match_raster`.
pub fn align_raster<T, U>(raster: &Raster<T>, match_raster: &Raster<U>, method: ResampleMethod) -> Result<Raster<T>>
where
    T: RasterElement,
    U: RasterElement,
{
    let reprojected;
    let source = match (raster.crs(), match_raster.crs()) {
        (Some(from), Some(to)) if !from.is_equivalent(to) => {
            reprojected = reproject_raster(raster, to, Some(match_raster.cell_size()), method)?;
            &reprojected
        }
        _ => raster,
    };

    if source.is_aligned_with(match_raster) {
        let mut out = source.clone();
        if out.crs().is_none() {
            out.set_crs(match_raster.crs().cloned());
        }
        return Ok(out);
    }
    sample_onto(source, match_raster, method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fcpg_core::vector::Feature;
    use geo_types::{polygon, Geometry};

    fn grid(rows: usize, cols: usize, cell: f64, origin: (f64, f64)) -> Raster<f64> {
        let data = (0..rows * cols).map(|v| v as f64).collect();
        let mut r = Raster::from_vec(data, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(origin.0, origin.1, cell, -cell));
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn test_clip_bbox() {
        let r = grid(4, 4, 10.0, (0.0, 40.0));
        let out = clip(&r, ClipTarget::BBox((10.0, 10.0, 30.0, 30.0))).unwrap();
        assert_eq!(out.shape(), (2, 2));
        assert_relative_eq!(out.get(0, 0).unwrap(), 5.0);
        assert_relative_eq!(out.transform().origin_x, 10.0);
        assert_relative_eq!(out.transform().origin_y, 30.0);
    }

    #[test]
    fn test_clip_features() {
        let r = grid(4, 4, 10.0, (0.0, 40.0));
        let mut fc = FeatureCollection::new();
        fc.push(Feature::new(Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0), (x: 18.0, y: 0.0), (x: 18.0, y: 18.0), (x: 0.0, y: 18.0)
        ])));
        let out = clip(&r, ClipTarget::Features(&fc)).unwrap();
        assert_eq!(out.shape(), (2, 2));
        assert_relative_eq!(out.get(0, 0).unwrap(), 8.0);
    }

    #[test]
    fn test_clip_disjoint_fails() {
        let r = grid(4, 4, 10.0, (0.0, 40.0));
        assert!(clip(&r, ClipTarget::BBox((100.0, 100.0, 200.0, 200.0))).is_err());
    }

    #[test]
    fn test_align_shifted_grid() {
        let src = grid(4, 4, 10.0, (0.0, 40.0));
        let target = grid(2, 2, 20.0, (5.0, 35.0));
        let out = align_raster(&src, &target, ResampleMethod::Nearest).unwrap();
        assert!(out.is_aligned_with(&target));
        // centre of target (0, 0) is (15, 25) -> source cell (1, 1)
        assert_relative_eq!(out.get(0, 0).unwrap(), 5.0);
    }

    #[test]
    fn test_align_already_aligned_is_copy() {
        let src = grid(3, 3, 1.0, (0.0, 3.0));
        let out = align_raster(&src, &src, ResampleMethod::Bilinear).unwrap();
        assert_eq!(out.data(), src.data());
    }

    #[test]
    fn test_reproject_requires_crs() {
        let src = grid(2, 2, 1.0, (0.0, 2.0));
        let err = reproject_raster(&src, &CRS::wgs84(), None, ResampleMethod::Nearest).unwrap_err();
        assert!(matches!(err, Error::CrsMismatch(..)));
    }

    #[test]
    fn test_reproject_geographic_to_albers() {
        let mut src = grid(10, 10, 0.1, (-96.5, 40.5));
        src.set_crs(Some(CRS::wgs84()));
        let out = reproject_raster(&src, &CRS::conus_albers(), Some(1000.0), ResampleMethod::Nearest).unwrap();
        assert_eq!(out.crs(), Some(&CRS::conus_albers()));
        assert_relative_eq!(out.cell_size(), 1000.0);

        // the source centre lands back on the middle of the source grid
        let t = CoordTransform::new(&CRS::wgs84(), &CRS::conus_albers()).unwrap();
        let (x, y) = t.transform(-96.04, 40.04);
        let (row, col) = out.cell_at(x, y).unwrap();
        assert_relative_eq!(out.get(row, col).unwrap(), 44.0);
    }

    #[test]
    fn test_reproject_to_albers_proj_string() {
        let mut src = grid(10, 10, 0.1, (-96.5, 40.5));
        src.set_crs(Some(CRS::wgs84()));
        let albers = CRS::from_proj(
            "+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=23 +lon_0=-96 +x_0=0 +y_0=0 +ellps=GRS80 +datum=NAD83 +units=m +no_defs",
        );
        let by_proj = reproject_raster(&src, &albers, Some(1000.0), ResampleMethod::Nearest).unwrap();
        let by_epsg = reproject_raster(&src, &CRS::conus_albers(), Some(1000.0), ResampleMethod::Nearest).unwrap();
        assert!(by_proj.is_aligned_with(&by_epsg));
        assert_eq!(by_proj.shape(), by_epsg.shape());

        let t = CoordTransform::new(&CRS::wgs84(), &albers).unwrap();
        let (x, y) = t.transform(-96.0, 23.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, 0.0, epsilon = 1e-6);
    }
}
