//! Labelled stacks of bands sharing one grid

use crate::error::{Error, Result};
use crate::raster::Raster;

/// An ordered stack of `f64` bands on a common grid.
///
/// Parameter grids that vary over time or category (`f(x, y, t)`) are
/// carried as one band per label, e.g. a month or a land cover class.
/// Accumulation tools operate on every band and keep the labels.
#[derive(Debug, Clone)]
pub struct RasterBands {
    labels: Vec<String>,
    bands: Vec<Raster<f64>>,
}

impl RasterBands {
    /// A single-band stack
    pub fn single(label: impl Into<String>, band: Raster<f64>) -> Self {
        Self {
            labels: vec![label.into()],
            bands: vec![band],
        }
    }

    /// Build from labelled bands; all bands must share a grid.
    pub fn from_bands(bands: Vec<(String, Raster<f64>)>) -> Result<Self> {
        if bands.is_empty() {
            return Err(Error::invalid_param("bands", 0, "at least one band is required"));
        }
        let (labels, bands): (Vec<_>, Vec<_>) = bands.into_iter().unzip();
        let first = &bands[0];
        for (label, band) in labels.iter().zip(&bands).skip(1) {
            first.ensure_aligned(band, &format!("band '{label}'"))?;
        }
        Ok(Self { labels, bands })
    }

    /// Append a band, which must be aligned with the existing ones
    pub fn push(&mut self, label: impl Into<String>, band: Raster<f64>) -> Result<()> {
        let label = label.into();
        self.bands[0].ensure_aligned(&band, &format!("band '{label}'"))?;
        self.labels.push(label);
        self.bands.push(band);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    /// Always false: a stack has at least one band
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn bands(&self) -> &[Raster<f64>] {
        &self.bands
    }

    /// The first band, used as the grid template
    pub fn first(&self) -> &Raster<f64> {
        &self.bands[0]
    }

    pub fn band(&self, index: usize) -> Option<&Raster<f64>> {
        self.bands.get(index)
    }

    pub fn band_by_label(&self, label: &str) -> Option<&Raster<f64>> {
        self.labels
            .iter()
            .position(|l| l == label)
            .and_then(|i| self.bands.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Raster<f64>)> {
        self.labels.iter().map(String::as_str).zip(self.bands.iter())
    }

    /// Apply `f` to every band, keeping labels
    pub fn try_map<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(usize, &Raster<f64>) -> Result<Raster<f64>>,
    {
        let bands = self
            .bands
            .iter()
            .enumerate()
            .map(|(i, b)| f(i, b))
            .collect::<Result<Vec<_>>>()?;
        Self::from_bands(self.labels.iter().cloned().zip(bands).collect())
    }

    /// Rename every band to a single label scheme
    pub fn relabel(mut self, labels: Vec<String>) -> Result<Self> {
        if labels.len() != self.bands.len() {
            return Err(Error::invalid_param(
                "labels",
                labels.len(),
                format!("expected {} labels", self.bands.len()),
            ));
        }
        self.labels = labels;
        Ok(self)
    }

    pub fn into_bands(self) -> Vec<(String, Raster<f64>)> {
        self.labels.into_iter().zip(self.bands).collect()
    }
}

impl From<Raster<f64>> for RasterBands {
    fn from(band: Raster<f64>) -> Self {
        Self::single("1", band)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;

    #[test]
    fn test_bands_must_share_grid() {
        let a: Raster<f64> = Raster::filled(4, 4, 1.0);
        let mut b: Raster<f64> = Raster::filled(4, 4, 2.0);
        b.set_transform(GeoTransform::new(10.0, 0.0, 1.0, -1.0));

        assert!(RasterBands::from_bands(vec![("jan".into(), a.clone()), ("feb".into(), b)]).is_err());

        let mut stack = RasterBands::single("jan", a.clone());
        stack.push("feb", a.like(3.0)).unwrap();
        assert_eq!(stack.labels(), &["jan".to_string(), "feb".to_string()]);
        assert_eq!(stack.band_by_label("feb").unwrap().get(0, 0).unwrap(), 3.0);
    }

    #[test]
    fn test_try_map_keeps_labels() {
        let stack = RasterBands::single("precip", Raster::filled(2, 2, 2.0));
        let doubled = stack.try_map(|_, b| Ok(b.map(b.nodata(), |v| v * 2.0))).unwrap();
        assert_eq!(doubled.labels()[0], "precip");
        assert_eq!(doubled.first().get(1, 1).unwrap(), 4.0);
    }

    #[test]
    fn test_empty_stack_rejected() {
        assert!(RasterBands::from_bands(Vec::new()).is_err());
    }
}
