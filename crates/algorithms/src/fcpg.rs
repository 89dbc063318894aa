//! Flow-conditioned parameter grids
//!
//! An FCPG is the mean of a parameter over each cell and its upstream
//! area: the accumulated parameter divided by the number of contributing
//! cells. With the self-exclusive FAC convention that count is `fac + 1`.

use fcpg_core::{Raster, RasterBands, Result};
use tracing::{debug, warn};

/// Band label of a single-band FCPG
pub const FCPG_BAND_NAME: &str = "FCPG";

/// Options for [`make_fcpg`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FcpgOptions<'a> {
    /// Accumulated count of parameter-nodata cells, subtracted from the
    /// contributing cell count. Its nodata counts as 0.
    pub nodata_accum: Option<&'a Raster<f64>>,
    /// Cells whose contributing count is below this become NaN
    pub min_accum: Option<f64>,
    /// The FAC already counts each cell itself (raw TauDEM `aread8`)
    pub fac_includes_self: bool,
}

/// Divide a parameter accumulation by the contributing cell count.
///
/// Every band of `param_accum` is divided by the same denominator. A
/// single-band result is labelled `FCPG`; multi-band results keep their
/// labels. Output nodata is NaN.
pub fn make_fcpg(param_accum: &RasterBands, fac: &Raster<f64>, options: &FcpgOptions<'_>) -> Result<RasterBands> {
    param_accum.first().ensure_aligned(fac, "parameter accumulation and FAC")?;
    if let Some(nd) = options.nodata_accum {
        nd.ensure_aligned(fac, "nodata accumulation and FAC")?;
    }

    let offset = if options.fac_includes_self { 0.0 } else { 1.0 };
    let denominator = fac.map(Some(f64::NAN), |v| if fac.is_nodata(v) { f64::NAN } else { v + offset });
    let denominator = match options.nodata_accum {
        Some(nd) => {
            debug!("Correcting contributing area for parameter nodata");
            let mut corrected = denominator;
            for (d, &n) in corrected.data_mut().iter_mut().zip(nd.data().iter()) {
                let n = if nd.is_nodata(n) { 0.0 } else { n };
                *d -= n;
                if *d == 0.0 {
                    *d = f64::NAN;
                }
            }
            corrected
        }
        None => denominator,
    };

    let valid = denominator.data().iter().copied().filter(|v| !v.is_nan());
    let (negative, zero, min) = valid.fold((0usize, 0usize, f64::INFINITY), |(n, z, m), v| {
        (n + usize::from(v < 0.0), z + usize::from(v == 0.0), m.min(v))
    });
    if negative > 0 {
        warn!("Negative accumulation values in {} cells (minimum {})", negative, min);
    }
    if zero > 0 {
        warn!("Zero accumulation values in {} cells", zero);
    }

    let min_accum = options.min_accum;
    let fcpg = param_accum.try_map(|_, band| {
        let mut out = band.map(Some(f64::NAN), |v| if band.is_nodata(v) { f64::NAN } else { v });
        for (v, &d) in out.data_mut().iter_mut().zip(denominator.data().iter()) {
            let too_small = min_accum.is_some_and(|m| d < m);
            *v = if d.is_nan() || d == 0.0 || too_small {
                f64::NAN
            } else {
                *v / d
            };
        }
        Ok(out)
    })?;

    if fcpg.len() == 1 {
        fcpg.relabel(vec![FCPG_BAND_NAME.to_string()])
    } else {
        Ok(fcpg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn raster(values: Vec<f64>) -> Raster<f64> {
        let mut r = Raster::from_vec(values, 1, 4).unwrap();
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn test_mean_over_upstream_area() {
        let accum = RasterBands::single("precip", raster(vec![2.0, 6.0, 12.0, f64::NAN]));
        let fac = raster(vec![0.0, 1.0, 2.0, 3.0]);
        let out = make_fcpg(&accum, &fac, &FcpgOptions::default()).unwrap();

        assert_eq!(out.labels(), &[FCPG_BAND_NAME.to_string()]);
        let band = out.first();
        assert_relative_eq!(band.get(0, 0).unwrap(), 2.0);
        assert_relative_eq!(band.get(0, 1).unwrap(), 3.0);
        assert_relative_eq!(band.get(0, 2).unwrap(), 4.0);
        assert!(band.get(0, 3).unwrap().is_nan());
    }

    #[test]
    fn test_nodata_correction_and_min_accum() {
        let accum = RasterBands::single("p", raster(vec![2.0, 6.0, 12.0, 8.0]));
        let fac = raster(vec![0.0, 1.0, 2.0, 3.0]);
        let nodata_accum = raster(vec![1.0, 0.0, 1.0, f64::NAN]);
        let options = FcpgOptions {
            nodata_accum: Some(&nodata_accum),
            min_accum: Some(2.0),
            fac_includes_self: false,
        };
        let band = make_fcpg(&accum, &fac, &options).unwrap().first().clone();

        // 1 - 1 = 0 contributing cells
        assert!(band.get(0, 0).unwrap().is_nan());
        // 2 contributing cells, at the threshold
        assert_relative_eq!(band.get(0, 1).unwrap(), 3.0);
        assert_relative_eq!(band.get(0, 2).unwrap(), 6.0);
        // nodata in the nodata accumulation counts as 0
        assert_relative_eq!(band.get(0, 3).unwrap(), 2.0);
    }

    #[test]
    fn test_fac_includes_self() {
        let accum = RasterBands::single("p", raster(vec![2.0, 6.0, 12.0, 8.0]));
        let fac = raster(vec![1.0, 2.0, 3.0, 4.0]);
        let options = FcpgOptions {
            fac_includes_self: true,
            ..Default::default()
        };
        let band = make_fcpg(&accum, &fac, &options).unwrap().first().clone();
        assert_relative_eq!(band.get(0, 1).unwrap(), 3.0);
    }

    #[test]
    fn test_multi_band_keeps_labels() {
        let accum = RasterBands::from_bands(vec![
            ("jan".to_string(), raster(vec![1.0; 4])),
            ("feb".to_string(), raster(vec![2.0; 4])),
        ])
        .unwrap();
        let fac = raster(vec![0.0; 4]);
        let out = make_fcpg(&accum, &fac, &FcpgOptions::default()).unwrap();
        assert_eq!(out.labels(), &["jan".to_string(), "feb".to_string()]);
        assert_relative_eq!(out.band(1).unwrap().get(0, 0).unwrap(), 2.0);
    }
}
