//! Raster data structures and operations

mod bands;
mod element;
mod geotransform;
mod grid;

pub use bands::RasterBands;
pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::{Raster, RasterStatistics};
