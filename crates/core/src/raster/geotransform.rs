//! Affine geotransformation for rasters

use serde::{Deserialize, Serialize};

/// Tolerance, in fractions of a cell, when comparing two grids.
const ALIGN_TOLERANCE: f64 = 1e-6;

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and map coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// Hydrologic grids are north-up, so the rotation terms are 0 and
/// `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Cell size in X
    pub pixel_width: f64,
    /// Cell size in Y, negative for north-up grids
    pub pixel_height: f64,
    pub row_rotation: f64,
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a north-up GeoTransform
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Create from GDAL coefficient order
    /// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    /// Convert to GDAL coefficient order
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the centre of a cell
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.fractional_to_geo(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Map coordinates of the top-left corner of a cell
    pub fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        self.fractional_to_geo(col as f64, row as f64)
    }

    /// Map coordinates of fractional pixel coordinates
    pub fn fractional_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Convert map coordinates to fractional pixel coordinates.
    ///
    /// Use `.floor()` to get the containing cell.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;

        if det.abs() < 1e-12 {
            return (f64::NAN, f64::NAN);
        }

        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;

        (col, row)
    }

    /// Cell width in map units
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Cell height in map units, always positive
    pub fn cell_height(&self) -> f64 {
        self.pixel_height.abs()
    }

    /// Whether cells are square within tolerance
    pub fn is_square(&self) -> bool {
        (self.cell_size() - self.cell_height()).abs() <= ALIGN_TOLERANCE * self.cell_size()
    }

    pub fn is_north_up(&self) -> bool {
        self.row_rotation.abs() < 1e-10
            && self.col_rotation.abs() < 1e-10
            && self.pixel_height < 0.0
    }

    /// Whether two transforms describe the same grid lattice.
    ///
    /// Cell sizes must match and origins must agree to within a
    /// millionth of a cell.
    pub fn same_grid(&self, other: &GeoTransform) -> bool {
        let tol_x = ALIGN_TOLERANCE * self.cell_size().max(f64::MIN_POSITIVE);
        let tol_y = ALIGN_TOLERANCE * self.cell_height().max(f64::MIN_POSITIVE);
        (self.pixel_width - other.pixel_width).abs() <= tol_x
            && (self.pixel_height - other.pixel_height).abs() <= tol_y
            && (self.origin_x - other.origin_x).abs() <= tol_x
            && (self.origin_y - other.origin_y).abs() <= tol_y
            && (self.row_rotation - other.row_rotation).abs() <= tol_x
            && (self.col_rotation - other.col_rotation).abs() <= tol_y
    }

    /// Bounding box `(min_x, min_y, max_x, max_y)` of a grid of the given size
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let (x0, y0) = self.pixel_to_geo_corner(0, 0);
        let (x1, y1) = self.pixel_to_geo_corner(width, 0);
        let (x2, y2) = self.pixel_to_geo_corner(0, height);
        let (x3, y3) = self.pixel_to_geo_corner(width, height);

        let min_x = x0.min(x1).min(x2).min(x3);
        let max_x = x0.max(x1).max(x2).max(x3);
        let min_y = y0.min(y1).min(y2).min(y3);
        let max_y = y0.max(y1).max(y2).max(y3);

        (min_x, min_y, max_x, max_y)
    }

    /// Transform of the window starting at `(row, col)` of this grid
    pub fn window(&self, row: usize, col: usize) -> GeoTransform {
        let (x, y) = self.pixel_to_geo_corner(col, row);
        GeoTransform {
            origin_x: x,
            origin_y: y,
            ..*self
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cell_centre_maps_back_into_cell() {
        let gt = GeoTransform::new(500_000.0, 4_200_000.0, 30.0, -30.0);

        let (x, y) = gt.pixel_to_geo(7, 3);
        let (col, row) = gt.geo_to_pixel(x, y);

        assert_relative_eq!(col, 7.5, epsilon = 1e-9);
        assert_relative_eq!(row, 3.5, epsilon = 1e-9);
    }

    #[test]
    fn test_bounds() {
        let gt = GeoTransform::new(0.0, 100.0, 2.0, -1.0);
        let (min_x, min_y, max_x, max_y) = gt.bounds(10, 20);

        assert_relative_eq!(min_x, 0.0);
        assert_relative_eq!(min_y, 80.0);
        assert_relative_eq!(max_x, 20.0);
        assert_relative_eq!(max_y, 100.0);
    }

    #[test]
    fn test_same_grid_tolerates_float_noise() {
        let a = GeoTransform::new(100.0, 200.0, 30.0, -30.0);
        let b = GeoTransform::new(100.0 + 1e-9, 200.0, 30.0, -30.0);
        let c = GeoTransform::new(115.0, 200.0, 30.0, -30.0);
        assert!(a.same_grid(&b));
        assert!(!a.same_grid(&c));
    }

    #[test]
    fn test_window_shifts_origin() {
        let gt = GeoTransform::new(0.0, 100.0, 10.0, -10.0);
        let w = gt.window(2, 3);
        assert_relative_eq!(w.origin_x, 30.0);
        assert_relative_eq!(w.origin_y, 80.0);
        assert_relative_eq!(w.pixel_width, 10.0);
    }

    #[test]
    fn test_gdal_order() {
        let gt = GeoTransform::from_gdal([1.0, 2.0, 0.0, 3.0, 0.0, -2.0]);
        assert_eq!(gt.to_gdal(), [1.0, 2.0, 0.0, 3.0, 0.0, -2.0]);
        assert!(gt.is_north_up());
    }
}
