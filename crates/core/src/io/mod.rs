//! I/O for GeoTIFF rasters and GeoJSON features

mod geotiff;

pub use geotiff::{
    read_geotiff, read_geotiff_bands, read_geotiff_from_buffer, save_bands, save_raster,
    write_geotiff, write_geotiff_bands, write_geotiff_to_buffer, GeoTiffOptions, Precision,
};

use crate::error::{Error, Result};
use std::path::Path;

/// Suffixes accepted for raster files
pub const RASTER_SUFFIXES: &[&str] = &["tif", "tiff"];

/// Error unless `path` ends in one of `allowed` (case-insensitive)
pub fn check_suffix(path: &Path, allowed: &'static [&'static str]) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if allowed.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(Error::UnsupportedFormat {
            found: path.display().to_string(),
            expected: allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_suffix() {
        assert!(check_suffix(Path::new("a/fdr.tif"), RASTER_SUFFIXES).is_ok());
        assert!(check_suffix(Path::new("a/fdr.TIFF"), RASTER_SUFFIXES).is_ok());
        assert!(matches!(
            check_suffix(Path::new("a/fdr.nc"), RASTER_SUFFIXES),
            Err(Error::UnsupportedFormat { .. })
        ));
        assert!(check_suffix(Path::new("noext"), RASTER_SUFFIXES).is_err());
    }
}
