//! # FCPG Core
//!
//! Core types and I/O for the FCPG hydrologic toolkit.
//!
//! This crate provides:
//! - `Raster<T>`: Generic georeferenced raster grid
//! - `RasterBands`: Labelled stack of bands sharing one grid (f(x, y, t) parameters)
//! - `GeoTransform`: Affine transformation for georeferencing
//! - `CRS`: Coordinate Reference System handling
//! - GeoTIFF and GeoJSON I/O

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterBands, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterBands, RasterElement};
    pub use crate::vector::{Feature, FeatureCollection};
    pub use crate::Algorithm;
}

/// Core trait for grid tools.
///
/// Tools are pure functions that transform input rasters according to parameters.
pub trait Algorithm {
    /// Input type for the tool
    type Input;
    /// Output type for the tool
    type Output;
    /// Parameters controlling tool behavior
    type Params: Default;
    /// Error type for tool execution
    type Error: std::error::Error;

    /// Returns the tool name
    fn name(&self) -> &'static str;

    /// Returns a description of what the tool does
    fn description(&self) -> &'static str;

    /// Execute the tool
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
