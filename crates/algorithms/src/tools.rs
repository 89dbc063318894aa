//! Engine-backed tools
//!
//! Each wrapper brings the flow direction grid into the encoding the
//! engine reads, then calls the engine.

use crate::d8::{convert_fdr_formats, identify_format, D8Format};
use crate::engine::TerrainEngine;
use crate::pour_points::PourPoints;
use crate::upslope::ExtremeMode;
use fcpg_core::{Raster, RasterBands, Result};
use std::borrow::Cow;
use tracing::{debug, info};

/// `fdr` in the engine's encoding, converted only when needed
fn fdr_for<'a>(engine: &dyn TerrainEngine, fdr: &'a Raster<u8>, in_format: Option<D8Format>) -> Result<Cow<'a, Raster<u8>>> {
    let from = in_format.unwrap_or_else(|| identify_format(fdr));
    let to = engine.d8_format();
    if from == to {
        Ok(Cow::Borrowed(fdr))
    } else {
        debug!("Converting FDR from {} to {} for the {} engine", from, to, engine.name());
        Ok(Cow::Owned(convert_fdr_formats(fdr, to, Some(from))?))
    }
}

/// Flow accumulation (self-exclusive cell counts, or weighted sums)
pub fn accumulate_flow(
    engine: &dyn TerrainEngine,
    fdr: &Raster<u8>,
    in_format: Option<D8Format>,
    upstream_pour_points: Option<&PourPoints>,
    weights: Option<&Raster<f64>>,
) -> Result<Raster<f64>> {
    let fdr = fdr_for(engine, fdr, in_format)?;
    info!("Accumulating flow with the {} engine", engine.name());
    engine.accumulate_flow(&fdr, upstream_pour_points, weights)
}

/// Parameter accumulation, one output band per input band
pub fn accumulate_parameter(
    engine: &dyn TerrainEngine,
    fdr: &Raster<u8>,
    in_format: Option<D8Format>,
    parameter: &RasterBands,
    upstream_pour_points: Option<&PourPoints>,
) -> Result<RasterBands> {
    let fdr = fdr_for(engine, fdr, in_format)?;
    info!(
        "Accumulating {} parameter band(s) with the {} engine",
        parameter.len(),
        engine.name()
    );
    engine.accumulate_parameter(&fdr, parameter, upstream_pour_points)
}

pub fn extreme_upslope_values(
    engine: &dyn TerrainEngine,
    fdr: &Raster<u8>,
    in_format: Option<D8Format>,
    parameter: &Raster<f64>,
    stream_mask: Option<&Raster<f64>>,
    mode: ExtremeMode,
) -> Result<Raster<f64>> {
    let fdr = fdr_for(engine, fdr, in_format)?;
    engine.extreme_upslope_values(&fdr, parameter, stream_mask, mode)
}

pub fn distance_to_stream(
    engine: &dyn TerrainEngine,
    fdr: &Raster<u8>,
    in_format: Option<D8Format>,
    fac: &Raster<f64>,
    threshold: f64,
) -> Result<Raster<f64>> {
    let fdr = fdr_for(engine, fdr, in_format)?;
    engine.distance_to_stream(&fdr, fac, threshold)
}

/// D-infinity grids carry no D8 encoding and are passed through
pub fn decay_accumulation(
    engine: &dyn TerrainEngine,
    dinf: &Raster<f64>,
    decay: &Raster<f64>,
    parameter: Option<&RasterBands>,
    upstream_pour_points: Option<&PourPoints>,
) -> Result<RasterBands> {
    engine.decay_accumulation(dinf, decay, parameter, upstream_pour_points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NativeEngine, NativeOptions};
    use approx::assert_relative_eq;

    #[test]
    fn test_taudem_fdr_is_converted_for_native_engine() {
        // TauDEM codes: E E S / . . S / . . 0
        let mut fdr = Raster::from_vec(vec![1u8, 1, 7, 1, 1, 7, 1, 1, 0], 3, 3).unwrap();
        fdr.set_nodata(Some(0));
        let engine = NativeEngine::new(NativeOptions::default()).unwrap();

        let fac = accumulate_flow(&engine, &fdr, Some(D8Format::Taudem), None, None).unwrap();
        assert_relative_eq!(fac.get(0, 2).unwrap(), 2.0);
        assert_relative_eq!(fac.get(1, 2).unwrap(), 5.0);
        assert!(fac.get(2, 2).unwrap().is_nan());
    }

    #[test]
    fn test_matching_format_is_borrowed() {
        let fdr = Raster::from_vec(vec![1u8, 16, 64], 1, 3).unwrap();
        let engine = NativeEngine::default();
        assert!(matches!(fdr_for(&engine, &fdr, None).unwrap(), Cow::Borrowed(_)));
    }
}
