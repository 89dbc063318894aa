//! In-process engine

use super::{EngineTool, NativeOptions, TerrainEngine, NATIVE_OPTION_KEYS};
use crate::d8::D8Format;
use crate::pour_points::PourPoints;
use crate::upslope::ExtremeMode;
use crate::{accumulation, decay, upslope};
use fcpg_core::{Raster, RasterBands, Result};

/// Runs the algorithms of this crate directly, on an optional dedicated
/// rayon pool
#[derive(Debug)]
pub struct NativeEngine {
    options: NativeOptions,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl NativeEngine {
    pub fn new(options: NativeOptions) -> Result<Self> {
        #[cfg(feature = "parallel")]
        let pool = match options.threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| fcpg_core::Error::Engine {
                        engine: "native",
                        reason: format!("cannot build a {n}-thread pool: {e}"),
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            options,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    pub fn options(&self) -> &NativeOptions {
        &self.options
    }

    #[cfg(feature = "parallel")]
    fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        f()
    }
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self {
            options: NativeOptions::default(),
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }
}

impl TerrainEngine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn d8_format(&self) -> D8Format {
        D8Format::Esri
    }

    fn supported_options(&self, _tool: EngineTool) -> &'static [&'static str] {
        NATIVE_OPTION_KEYS
    }

    fn accumulate_flow(
        &self,
        fdr: &Raster<u8>,
        upstream_pour_points: Option<&PourPoints>,
        weights: Option<&Raster<f64>>,
    ) -> Result<Raster<f64>> {
        accumulation::accumulate_flow(fdr, self.d8_format(), upstream_pour_points, weights)
    }

    fn accumulate_parameter(
        &self,
        fdr: &Raster<u8>,
        parameter: &RasterBands,
        upstream_pour_points: Option<&PourPoints>,
    ) -> Result<RasterBands> {
        let format = self.d8_format();
        self.install(|| accumulation::accumulate_parameter(fdr, format, parameter, upstream_pour_points))
    }

    fn extreme_upslope_values(
        &self,
        fdr: &Raster<u8>,
        parameter: &Raster<f64>,
        stream_mask: Option<&Raster<f64>>,
        mode: ExtremeMode,
    ) -> Result<Raster<f64>> {
        upslope::extreme_upslope_values(fdr, self.d8_format(), parameter, stream_mask, mode)
    }

    fn distance_to_stream(&self, fdr: &Raster<u8>, fac: &Raster<f64>, threshold: f64) -> Result<Raster<f64>> {
        decay::distance_to_stream(fdr, self.d8_format(), fac, threshold)
    }

    fn decay_accumulation(
        &self,
        dinf: &Raster<f64>,
        decay: &Raster<f64>,
        parameter: Option<&RasterBands>,
        upstream_pour_points: Option<&PourPoints>,
    ) -> Result<RasterBands> {
        self.install(|| decay::decay_accumulation(dinf, decay, parameter, upstream_pour_points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_native_accumulates_esri_codes() {
        // 1x3 strip draining east in ESRI codes
        let mut fdr = Raster::from_vec(vec![1u8, 1, 1], 1, 3).unwrap();
        fdr.set_nodata(Some(255));
        let engine = NativeEngine::new(NativeOptions { threads: Some(1) }).unwrap();
        let fac = engine.accumulate_flow(&fdr, None, None).unwrap();
        assert_relative_eq!(fac.get(0, 2).unwrap(), 2.0);

        let p = RasterBands::single("p", Raster::filled(1, 3, 2.0));
        let acc = engine.accumulate_parameter(&fdr, &p, None).unwrap();
        assert_relative_eq!(acc.first().get(0, 2).unwrap(), 6.0);
    }
}
