//! # FCPG Algorithms
//!
//! Hydrologic tools for building flow-conditioned parameter grids.
//!
//! ## Modules
//!
//! - **d8**: ESRI/TauDEM flow direction encodings, conversion, D-infinity angles
//! - **accumulation**: Flow and parameter accumulation with pour point injection
//! - **fcpg**: Accumulated parameter divided by upstream cell count
//! - **decay**: Distance to stream, decay grids, decayed D-infinity accumulation
//! - **upslope**: Max/min parameter value upstream of each cell
//! - **mask**: Value, stream, nodata, categorical and polygon masks
//! - **alignment**: Resampling, clipping, reprojection and grid alignment
//! - **pour_points**: Basin outlets and the values they carry
//! - **cascade**: Carrying accumulations from one HUC tile to the next
//! - **engine** / **tools**: Native and TauDEM backends behind one interface

pub mod accumulation;
pub mod alignment;
pub mod cascade;
pub mod d8;
pub mod decay;
pub mod engine;
pub mod fcpg;
pub mod mask;
mod maybe_rayon;
pub mod pour_points;
pub mod tools;
pub mod upslope;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::accumulation::{
        accumulate_flow, accumulate_parameter, adjust_parameter_raster, make_fac_weights, FlowAccumulation,
        FlowAccumulationParams,
    };
    pub use crate::alignment::{align_raster, clip, reproject_raster, resample, ClipTarget, ResampleMethod};
    pub use crate::cascade::{cascade_accumulation, CascadeOptions, UpdateDict};
    pub use crate::d8::{convert_fdr_formats, d8_to_dinfinity, identify_format, D8Format};
    pub use crate::decay::{decay_accumulation, distance_to_stream, make_decay_raster};
    pub use crate::engine::{EngineKind, NativeEngine, TaudemEngine, TerrainEngine};
    pub use crate::fcpg::{make_fcpg, FcpgOptions};
    pub use crate::mask::{
        binarize_categorical_raster, binarize_nodata, mask_streams, spatial_mask, value_mask, ValueMaskParams,
    };
    pub use crate::pour_points::{find_basin_pour_points, find_fac_pour_point, get_pour_point_values, PourPoints};
    pub use crate::upslope::{extreme_upslope_values, ExtremeMode};
    pub use fcpg_core::prelude::*;
}
