//! Terrain engines
//!
//! A [`TerrainEngine`] runs the flow-routing tools. Each engine expects
//! its own D8 encoding (see [`TerrainEngine::d8_format`]); the wrappers in
//! [`crate::tools`] convert FDRs before handing them over, so engine
//! methods can assume their input is already in that encoding.

mod native;
mod options;
mod taudem;

pub use native::NativeEngine;
pub use options::{parse_option_pairs, NativeOptions, TaudemOptions, NATIVE_OPTION_KEYS, TAUDEM_OPTION_KEYS};
pub use taudem::TaudemEngine;

use crate::d8::D8Format;
use crate::pour_points::PourPoints;
use crate::upslope::ExtremeMode;
use fcpg_core::{Error, Raster, RasterBands, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tools an engine provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineTool {
    AccumulateFlow,
    AccumulateParameter,
    ExtremeUpslopeValues,
    DistanceToStream,
    DecayAccumulation,
}

impl EngineTool {
    pub const ALL: [EngineTool; 5] = [
        EngineTool::AccumulateFlow,
        EngineTool::AccumulateParameter,
        EngineTool::ExtremeUpslopeValues,
        EngineTool::DistanceToStream,
        EngineTool::DecayAccumulation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EngineTool::AccumulateFlow => "accumulate_flow",
            EngineTool::AccumulateParameter => "accumulate_parameter",
            EngineTool::ExtremeUpslopeValues => "extreme_upslope_values",
            EngineTool::DistanceToStream => "distance_to_stream",
            EngineTool::DecayAccumulation => "decay_accumulation",
        }
    }
}

impl fmt::Display for EngineTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flow-routing backend.
///
/// FDR arguments are in [`d8_format`](TerrainEngine::d8_format). Outputs
/// follow the crate conventions: FAC is self-exclusive, nodata is NaN.
pub trait TerrainEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// D8 encoding this engine reads
    fn d8_format(&self) -> D8Format;

    /// Option keys this engine understands for `tool`
    fn supported_options(&self, tool: EngineTool) -> &'static [&'static str];

    fn accumulate_flow(
        &self,
        fdr: &Raster<u8>,
        upstream_pour_points: Option<&PourPoints>,
        weights: Option<&Raster<f64>>,
    ) -> Result<Raster<f64>>;

    fn accumulate_parameter(
        &self,
        fdr: &Raster<u8>,
        parameter: &RasterBands,
        upstream_pour_points: Option<&PourPoints>,
    ) -> Result<RasterBands>;

    fn extreme_upslope_values(
        &self,
        fdr: &Raster<u8>,
        parameter: &Raster<f64>,
        stream_mask: Option<&Raster<f64>>,
        mode: ExtremeMode,
    ) -> Result<Raster<f64>>;

    fn distance_to_stream(&self, fdr: &Raster<u8>, fac: &Raster<f64>, threshold: f64) -> Result<Raster<f64>>;

    fn decay_accumulation(
        &self,
        dinf: &Raster<f64>,
        decay: &Raster<f64>,
        parameter: Option<&RasterBands>,
        upstream_pour_points: Option<&PourPoints>,
    ) -> Result<RasterBands>;
}

/// Available engines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Native,
    Taudem,
}

impl EngineKind {
    pub const NAMES: [&'static str; 2] = ["native", "taudem"];

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "native" => Ok(EngineKind::Native),
            "taudem" => Ok(EngineKind::Taudem),
            other => Err(Error::invalid_param(
                "engine",
                other,
                format!("expected one of: {}", Self::NAMES.join(", ")),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Native => "native",
            EngineKind::Taudem => "taudem",
        }
    }

    /// Build the engine from `key=value` option pairs
    pub fn build(&self, options: &[(String, String)]) -> Result<Box<dyn TerrainEngine>> {
        Ok(match self {
            EngineKind::Native => Box::new(NativeEngine::new(NativeOptions::from_pairs(options)?)?),
            EngineKind::Taudem => Box::new(TaudemEngine::new(TaudemOptions::from_pairs(options)?)),
        })
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}
