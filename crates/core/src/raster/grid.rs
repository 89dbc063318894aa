//! Main Raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

/// A georeferenced 2D raster grid.
///
/// `Raster<T>` stores values of type `T` in a row-major grid together with
/// its transform, CRS and nodata value. Flow direction grids are usually
/// `Raster<u8>` and accumulations `Raster<f64>`.
///
/// # Example
///
/// ```ignore
/// use fcpg_core::Raster;
///
/// let mut fac: Raster<f64> = Raster::new(100, 100);
/// fac.set(10, 20, 42.0)?;
/// let value = fac.get(10, 20)?;
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Create a zeroed raster of another type on the same grid.
    ///
    /// The nodata value is not carried over since it belongs to `T`.
    pub fn with_same_meta<U: RasterElement>(&self, rows: usize, cols: usize) -> Raster<U> {
        Raster {
            data: Array2::zeros((rows, cols)),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    /// Same shape and metadata, filled with a value
    pub fn like(&self, fill_value: T) -> Self {
        Self {
            data: Array2::from_elem(self.data.dim(), fill_value),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: self.nodata,
        }
    }

    /// Replace the data while keeping transform and CRS.
    ///
    /// The new array must have the same shape.
    pub fn with_data<U: RasterElement>(&self, data: Array2<U>, nodata: Option<U>) -> Result<Raster<U>> {
        if data.dim() != self.shape() {
            let (er, ec) = self.shape();
            let (ar, ac) = data.dim();
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        Ok(Raster {
            data,
            transform: self.transform,
            crs: self.crs.clone(),
            nodata,
        })
    }

    /// Element-wise conversion that keeps transform and CRS.
    ///
    /// Nodata cells (including NaN) are passed to `f` like any other value;
    /// the closure decides what they become.
    pub fn map<U: RasterElement, F>(&self, nodata: Option<U>, f: F) -> Raster<U>
    where
        F: Fn(T) -> U,
    {
        Raster {
            data: self.data.mapv(f),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata,
        }
    }

    /// Convert to `f64`, turning nodata into NaN
    pub fn to_f64(&self) -> Raster<f64> {
        let nodata = self.nodata;
        self.map(Some(f64::NAN), |v| {
            if v.is_nodata(nodata) {
                f64::NAN
            } else {
                v.as_f64().unwrap_or(f64::NAN)
            }
        })
    }

    // Dimensions

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            }),
        }
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.data.view_mut()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    /// Consume the raster and return the underlying array
    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    /// Copy out the window of `rows x cols` cells starting at `(row, col)`
    pub fn crop(&self, row: usize, col: usize, rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 || row + rows > self.rows() || col + cols > self.cols() {
            return Err(Error::IndexOutOfBounds {
                row: row + rows,
                col: col + cols,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        Ok(Self {
            data: self.data.slice(s![row..row + rows, col..col + cols]).to_owned(),
            transform: self.transform.window(row, col),
            crs: self.crs.clone(),
            nodata: self.nodata,
        })
    }

    // Metadata

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Cell width in map units
    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size()
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    /// Whether `other` has the same shape and cell lattice.
    ///
    /// CRS is compared only when both rasters declare one.
    pub fn is_aligned_with<U: RasterElement>(&self, other: &Raster<U>) -> bool {
        let crs_ok = match (self.crs(), other.crs()) {
            (Some(a), Some(b)) => a.is_equivalent(b),
            _ => true,
        };
        self.shape() == other.shape() && self.transform.same_grid(other.transform()) && crs_ok
    }

    /// Error unless `other` is aligned with this raster
    pub fn ensure_aligned<U: RasterElement>(&self, other: &Raster<U>, what: &str) -> Result<()> {
        if self.is_aligned_with(other) {
            return Ok(());
        }
        Err(Error::AlignmentMismatch(format!(
            "{what}: {}x{} grid at ({}, {}) does not match {}x{} grid at ({}, {})",
            other.rows(),
            other.cols(),
            other.transform.origin_x,
            other.transform.origin_y,
            self.rows(),
            self.cols(),
            self.transform.origin_x,
            self.transform.origin_y,
        )))
    }

    // Coordinate conversion

    /// Map coordinates of a cell centre
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform.pixel_to_geo(col, row)
    }

    /// Fractional pixel coordinates of a map coordinate
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        self.transform.geo_to_pixel(x, y)
    }

    /// The `(row, col)` of the cell containing a map coordinate, if any
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (col, row) = self.transform.geo_to_pixel(x, y);
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        (row < self.rows() && col < self.cols()).then_some((row, col))
    }

    // Value checks

    /// Check if a value is no-data
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Check if cell at (row, col) contains no-data
    pub fn is_nodata_at(&self, row: usize, col: usize) -> Result<bool> {
        let value = self.get(row, col)?;
        Ok(self.is_nodata(value))
    }

    /// Minimum, maximum and mean over valid cells
    pub fn statistics(&self) -> RasterStatistics<T> {
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        let mut sum: f64 = 0.0;
        let mut count: usize = 0;

        for &value in self.data.iter().filter(|v| !self.is_nodata(**v)) {
            if min.map_or(true, |m| value < m) {
                min = Some(value);
            }
            if max.map_or(true, |m| value > m) {
                max = Some(value);
            }
            if let Some(v) = value.as_f64() {
                sum += v;
                count += 1;
            }
        }

        RasterStatistics {
            min,
            max,
            mean: (count > 0).then(|| sum / count as f64),
            valid_count: count,
            nodata_count: self.len() - count,
        }
    }

    /// Distinct valid values in ascending order
    pub fn unique_values(&self) -> Vec<T> {
        let mut values: Vec<T> = self
            .data
            .iter()
            .copied()
            .filter(|v| !self.is_nodata(*v))
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup();
        values
    }
}

/// Basic statistics for a raster
#[derive(Debug, Clone)]
pub struct RasterStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_3x4() -> Raster<f64> {
        let mut r = Raster::from_vec((0..12).map(|v| v as f64).collect(), 3, 4).unwrap();
        r.set_transform(GeoTransform::new(100.0, 50.0, 10.0, -10.0));
        r
    }

    #[test]
    fn test_raster_access() {
        let mut raster: Raster<f32> = Raster::new(10, 10);
        raster.set(5, 5, 42.0).unwrap();
        assert_eq!(raster.get(5, 5).unwrap(), 42.0);
        assert!(raster.set(10, 0, 1.0).is_err());
    }

    #[test]
    fn test_cell_at() {
        let r = grid_3x4();
        assert_eq!(r.cell_at(105.0, 45.0), Some((0, 0)));
        assert_eq!(r.cell_at(139.9, 20.1), Some((2, 3)));
        assert_eq!(r.cell_at(140.1, 45.0), None);
        assert_eq!(r.cell_at(99.0, 45.0), None);
    }

    #[test]
    fn test_statistics_skip_nodata() {
        let mut r = grid_3x4();
        r.set_nodata(Some(0.0));
        r.set(1, 1, f64::NAN).unwrap();
        let stats = r.statistics();
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(11.0));
        assert_eq!(stats.valid_count, 10);
        assert_eq!(stats.nodata_count, 2);
    }

    #[test]
    fn test_alignment() {
        let a = grid_3x4();
        let b: Raster<u8> = a.with_same_meta(3, 4);
        assert!(a.is_aligned_with(&b));

        let mut c = a.clone();
        c.set_transform(GeoTransform::new(105.0, 50.0, 10.0, -10.0));
        assert!(!a.is_aligned_with(&c));
        assert!(a.ensure_aligned(&c, "parameter").is_err());
        assert!(!a.is_aligned_with(&Raster::<f64>::new(3, 3)));
    }

    #[test]
    fn test_map_keeps_metadata() {
        let a = grid_3x4();
        let b = a.map(Some(255u8), |v| if v > 5.0 { 1 } else { 0 });
        assert!(a.is_aligned_with(&b));
        assert_eq!(b.get(2, 3).unwrap(), 1);
        assert_eq!(b.nodata(), Some(255));
    }

    #[test]
    fn test_crop() {
        let a = grid_3x4();
        let c = a.crop(1, 2, 2, 2).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.get(0, 0).unwrap(), 6.0);
        assert_eq!(c.transform().origin_x, 120.0);
        assert_eq!(c.transform().origin_y, 40.0);
        assert!(a.crop(2, 2, 2, 2).is_err());
    }

    #[test]
    fn test_unique_values_sorted() {
        let r = Raster::from_vec(vec![3u8, 1, 3, 2, 255, 1], 2, 3).unwrap();
        let mut r = r;
        r.set_nodata(Some(255));
        assert_eq!(r.unique_values(), vec![1, 2, 3]);
    }
}
