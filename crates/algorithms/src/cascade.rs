//! Cascading accumulations across HUC tiles
//!
//! Large domains are processed one HUC4 at a time. The outlets of an
//! upstream tile are found on its FAC, their values are written to an
//! update dictionary (JSON, keyed by upstream HUC), and the downstream
//! tile's weight grid is adjusted before it is accumulated.

use crate::accumulation::accumulate_flow;
use crate::d8::{D8Format, D8_OFFSETS};
use crate::mask::spatial_mask;
use crate::pour_points::{max_cells, PourPoints, HUC12_FIELD};
use fcpg_core::vector::FeatureCollection;
use fcpg_core::{Error, Raster, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Update dictionary variable holding upstream FAC values
pub const MAX_UPSTREAM_FAC: &str = "maxUpstreamFAC";
/// Update dictionary variable holding TauDEM flow directions at the pour points
pub const FDR_VAR: &str = "FDR";
/// WBD attribute naming the downstream HUC12 of each unit
pub const TO_HUC_FIELD: &str = "ToHUC";

/// HUC4 code of a longer HUC code (its first four characters)
pub fn huc4(huc: &str) -> &str {
    huc.get(..4).unwrap_or(huc)
}

/// HUC12 units of `from_huc4` that drain into `to_huc4`
pub fn make_pour_basins(
    wbd: &FeatureCollection,
    from_huc4: &str,
    to_huc4: &str,
    huc12_key: &str,
    to_huc_key: &str,
) -> Result<FeatureCollection> {
    wbd.require_field(huc12_key)?;
    wbd.require_field(to_huc_key)?;

    let features = wbd
        .iter()
        .filter(|f| {
            let from = f.property_string(huc12_key);
            let to = f.property_string(to_huc_key);
            matches!((from, to), (Some(a), Some(b)) if huc4(&a) == from_huc4 && huc4(&b) == to_huc4)
        })
        .cloned()
        .collect();
    Ok(FeatureCollection {
        features,
        crs: wbd.crs.clone(),
    })
}

/// Pour points where the upstream tile drains out through `pour_basins`.
///
/// Inside each basin the cells with the maximum FAC are candidates. A
/// candidate is a pour point when its downstream cell is off the grid, is
/// FAC nodata, or does not exist (pit). A basin with no such candidate
/// falls back to its single maximum cell. Duplicates are removed. Each
/// point carries its FAC value as its only value.
pub fn find_pour_points(
    pour_basins: &FeatureCollection,
    upstream_fac: &Raster<f64>,
    upstream_fdr: &Raster<u8>,
    format: D8Format,
) -> Result<PourPoints> {
    upstream_fac.ensure_aligned(upstream_fdr, "upstream FAC and FDR")?;
    let (rows, cols) = upstream_fac.shape();

    let mut found: Vec<(String, (usize, usize), f64)> = Vec::new();
    for (i, basin) in pour_basins.iter().enumerate() {
        let id = basin
            .property_string(HUC12_FIELD)
            .or_else(|| basin.id.clone())
            .unwrap_or_else(|| i.to_string());
        let single = FeatureCollection {
            features: vec![basin.clone()],
            crs: pour_basins.crs.clone(),
        };
        let masked = spatial_mask(upstream_fac, &single, false)?;
        let candidates = max_cells(&masked);
        let Some(&(r0, c0)) = candidates.first() else {
            warn!("Basin {} does not overlap the upstream FAC", id);
            continue;
        };
        let w = masked.data()[(r0, c0)];

        let outlets: Vec<(usize, usize)> = candidates
            .iter()
            .copied()
            .filter(|&(r, c)| {
                let Some(dir) = format.direction_index(upstream_fdr.data()[(r, c)]) else {
                    return true;
                };
                let (dr, dc) = D8_OFFSETS[dir];
                let (nr, nc) = (r as isize + dr, c as isize + dc);
                if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                    return true;
                }
                upstream_fac.is_nodata(upstream_fac.data()[(nr as usize, nc as usize)])
            })
            .collect();

        match (outlets.is_empty(), candidates.len()) {
            (false, _) => found.extend(outlets.into_iter().map(|cell| (id.clone(), cell, w))),
            (true, 1) => found.push((id, (r0, c0), w)),
            (true, n) => warn!("Pour point not located in basin {} ({} candidate cells)", id, n),
        }
    }

    let mut points = PourPoints::new();
    let mut values = Vec::new();
    let mut seen = Vec::new();
    for (id, (r, c), w) in found {
        if seen.contains(&(r, c)) {
            continue;
        }
        seen.push((r, c));
        points.push(id, upstream_fac.pixel_to_geo(c, r));
        values.push(vec![w]);
    }
    debug!("Located {} pour point(s) in {} basin(s)", points.len(), pour_basins.len());
    points.with_values(values)
}

/// Values carried from one upstream HUC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Names of the variables in `values`
    pub vars: Vec<String>,
    #[serde(flatten)]
    pub values: BTreeMap<String, Vec<f64>>,
    /// Where to inject when the outlet differs from the pour point
    #[serde(rename = "outletX", default, skip_serializing_if = "Option::is_none")]
    pub outlet_x: Option<Vec<f64>>,
    #[serde(rename = "outletY", default, skip_serializing_if = "Option::is_none")]
    pub outlet_y: Option<Vec<f64>>,
}

impl UpdateEntry {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn var(&self, name: &str) -> Option<&[f64]> {
        self.values.get(name).map(Vec::as_slice)
    }

    fn validate(&self, huc: &str) -> Result<()> {
        let n = self.x.len();
        let bad = |what: &str, len: usize| {
            Error::invalid_param("update_dict", huc.to_string(), format!("{what} has {len} entries, expected {n}"))
        };
        if self.y.len() != n {
            return Err(bad("y", self.y.len()));
        }
        match (&self.outlet_x, &self.outlet_y) {
            (Some(ox), Some(oy)) => {
                if ox.len() != n {
                    return Err(bad("outletX", ox.len()));
                }
                if oy.len() != n {
                    return Err(bad("outletY", oy.len()));
                }
            }
            (None, None) => {}
            _ => {
                return Err(Error::invalid_param(
                    "update_dict",
                    huc.to_string(),
                    "outletX and outletY must be given together",
                ))
            }
        }
        for var in &self.vars {
            match self.values.get(var) {
                Some(v) if v.len() == n => {}
                Some(v) => return Err(bad(var, v.len())),
                None => {
                    return Err(Error::invalid_param(
                        "update_dict",
                        huc.to_string(),
                        format!("variable {var} is listed but missing"),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Coordinates values are injected at, before any downstream move
    fn injection_coords(&self) -> Vec<(f64, f64)> {
        match (&self.outlet_x, &self.outlet_y) {
            (Some(ox), Some(oy)) => ox.iter().copied().zip(oy.iter().copied()).collect(),
            _ => self.x.iter().copied().zip(self.y.iter().copied()).collect(),
        }
    }
}

/// Upstream HUC → carried values, stored as JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateDict(BTreeMap<String, UpdateEntry>);

impl UpdateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, huc: &str) -> Option<&UpdateEntry> {
        self.0.get(huc)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UpdateEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn insert(&mut self, huc: impl Into<String>, entry: UpdateEntry) -> Result<()> {
        let huc = huc.into();
        entry.validate(&huc)?;
        self.0.insert(huc, entry);
        Ok(())
    }

    /// Add (or replace) one variable of an upstream HUC
    pub fn update_var(&mut self, huc: &str, var: &str, values: Vec<f64>) -> Result<()> {
        let entry = self
            .0
            .get_mut(huc)
            .ok_or_else(|| Error::invalid_param("huc", huc.to_string(), "not in the update dictionary"))?;
        if values.len() != entry.len() {
            return Err(Error::invalid_param(
                "values",
                values.len(),
                format!("expected one value per pour point ({})", entry.len()),
            ));
        }
        if !entry.vars.iter().any(|v| v == var) {
            entry.vars.push(var.to_string());
            entry.vars.sort();
        }
        entry.values.insert(var.to_string(), values);
        Ok(())
    }

    /// Pour points of every entry carrying `var`, with that variable as
    /// their single value
    pub fn pour_points(&self, var: &str) -> Result<PourPoints> {
        let mut points = PourPoints::new();
        let mut values = Vec::new();
        for (huc, entry) in self.iter() {
            let Some(v) = entry.var(var) else { continue };
            for (i, coord) in entry.injection_coords().into_iter().enumerate() {
                points.push(format!("{huc}:{i}"), coord);
                values.push(vec![v[i]]);
            }
        }
        points.with_values(values)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let dict: UpdateDict = serde_json::from_str(s)?;
        for (huc, entry) in dict.iter() {
            entry.validate(huc)?;
        }
        Ok(dict)
    }

    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Record the pour points of `from_huc` in the update dictionary at `path`.
///
/// The first value of each point becomes `maxUpstreamFAC`. With `replace`
/// any existing file is discarded; otherwise the entry is merged into it.
pub fn create_update_dict(
    points: &PourPoints,
    from_huc: &str,
    path: impl AsRef<Path>,
    replace: bool,
    outlets: Option<&[(f64, f64)]>,
) -> Result<UpdateDict> {
    let path = path.as_ref();
    points.validate()?;
    let values = points.values.as_deref().ok_or_else(|| {
        Error::invalid_param("pour_points", points.len(), "pour points carry no values")
    })?;
    let fac = values
        .iter()
        .map(|v| v.first().copied().unwrap_or(f64::NAN))
        .collect();

    let mut entry = UpdateEntry {
        x: points.coords.iter().map(|c| c.0).collect(),
        y: points.coords.iter().map(|c| c.1).collect(),
        vars: vec![MAX_UPSTREAM_FAC.to_string()],
        values: BTreeMap::from([(MAX_UPSTREAM_FAC.to_string(), fac)]),
        ..Default::default()
    };
    if let Some(outlets) = outlets {
        entry.outlet_x = Some(outlets.iter().map(|c| c.0).collect());
        entry.outlet_y = Some(outlets.iter().map(|c| c.1).collect());
    }

    let mut dict = if path.exists() && !replace {
        debug!("Merging into update dictionary {}", path.display());
        UpdateDict::read_json(path)?
    } else {
        UpdateDict::new()
    };
    dict.insert(from_huc, entry)?;
    dict.write_json(path)?;
    Ok(dict)
}

/// Add a variable to an existing update dictionary file
pub fn update_dict_file(path: impl AsRef<Path>, huc: &str, var: &str, values: Vec<f64>) -> Result<UpdateDict> {
    let path = path.as_ref();
    let mut dict = UpdateDict::read_json(path)?;
    dict.update_var(huc, var, values)?;
    dict.write_json(path)?;
    Ok(dict)
}

/// Inject the `var` values of every upstream HUC into a downstream grid.
///
/// Values land on the cell containing each pour point (or its outlet).
/// With `move_downstream` they land one cell further along the stored
/// TauDEM direction (`FDR` variable), using the grid's cell size. With
/// `scale_factor` the grid and the injected values are divided by it.
/// Points off the grid or on FDR nodata are skipped with a warning.
pub fn adjust_downstream(
    weights: &Raster<f64>,
    update_dict: &UpdateDict,
    downstream_fdr: &Raster<u8>,
    var: &str,
    move_downstream: bool,
    scale_factor: Option<f64>,
) -> Result<Raster<f64>> {
    weights.ensure_aligned(downstream_fdr, "weight grid and downstream FDR")?;
    if let Some(s) = scale_factor {
        if s == 0.0 || !s.is_finite() {
            return Err(Error::invalid_param("scale_factor", s, "must be finite and non-zero"));
        }
    }

    let mut out = weights.clone();
    if let Some(s) = scale_factor {
        for v in out.data_mut().iter_mut() {
            if !weights.is_nodata(*v) {
                *v /= s;
            }
        }
    }

    let gt = *weights.transform();
    for (huc, entry) in update_dict.iter() {
        let Some(values) = entry.var(var) else { continue };
        let coords = entry.injection_coords();
        let coords: Vec<(f64, f64)> = if move_downstream {
            let fdr = entry.var(FDR_VAR).ok_or_else(|| {
                Error::invalid_param("update_dict", huc.to_string(), "FDR not in upstream variables")
            })?;
            coords
                .iter()
                .zip(fdr)
                .map(|(&(x, y), &code)| {
                    match D8Format::Taudem.direction_index(code as u8) {
                        Some(dir) => {
                            let (dr, dc) = D8_OFFSETS[dir];
                            (x + dc as f64 * gt.cell_size(), y - dr as f64 * gt.cell_height())
                        }
                        None => (x, y),
                    }
                })
                .collect()
        } else {
            coords
        };

        for (&(x, y), &value) in coords.iter().zip(values) {
            let value = scale_factor.map_or(value, |s| value / s);
            match out.cell_at(x, y) {
                Some((r, c)) if !downstream_fdr.is_nodata(downstream_fdr.data()[(r, c)]) => {
                    let current = out.data()[(r, c)];
                    let base = if out.is_nodata(current) { 0.0 } else { current };
                    out.data_mut()[(r, c)] = base + value;
                }
                _ => warn!(
                    "Update point ({}, {}) from HUC {} misses the downstream grid -> skipped",
                    x, y, huc
                ),
            }
        }
    }
    Ok(out)
}

/// Settings for one HUC4 → HUC4 cascade step
#[derive(Debug, Clone)]
pub struct CascadeOptions {
    pub from_huc4: String,
    pub to_huc4: String,
    pub huc12_key: String,
    pub to_huc_key: String,
    pub move_downstream: bool,
    pub scale_factor: Option<f64>,
}

impl CascadeOptions {
    pub fn new(from_huc4: impl Into<String>, to_huc4: impl Into<String>) -> Self {
        Self {
            from_huc4: from_huc4.into(),
            to_huc4: to_huc4.into(),
            huc12_key: HUC12_FIELD.to_string(),
            to_huc_key: TO_HUC_FIELD.to_string(),
            move_downstream: false,
            scale_factor: None,
        }
    }
}

/// Everything a cascade step produces
#[derive(Debug, Clone)]
pub struct CascadeOutput {
    pub pour_points: PourPoints,
    pub update_dict: UpdateDict,
    /// Downstream FAC including the upstream contribution
    pub adjusted_fac: Raster<f64>,
}

/// One full cascade step from an upstream HUC4 tile into its downstream
/// neighbour.
///
/// Both FDRs must share `format`. The adjusted FAC uses the same
/// self-exclusive convention as [`accumulate_flow`].
pub fn cascade_accumulation(
    upstream_fac: &Raster<f64>,
    upstream_fdr: &Raster<u8>,
    downstream_fdr: &Raster<u8>,
    format: D8Format,
    basins: &FeatureCollection,
    options: &CascadeOptions,
) -> Result<CascadeOutput> {
    let pour_basins = make_pour_basins(
        basins,
        &options.from_huc4,
        &options.to_huc4,
        &options.huc12_key,
        &options.to_huc_key,
    )?;
    if pour_basins.is_empty() {
        return Err(Error::Algorithm(format!(
            "no {} units drain from HUC4 {} to {}",
            options.huc12_key, options.from_huc4, options.to_huc4
        )));
    }
    info!(
        "Cascading HUC4 {} -> {} through {} unit(s)",
        options.from_huc4,
        options.to_huc4,
        pour_basins.len()
    );

    let points = find_pour_points(&pour_basins, upstream_fac, upstream_fdr, format)?;
    let values = points.values.as_deref().unwrap_or_default();

    // moved points land on a fresh cell, so the outlet itself is added
    let offset = if options.move_downstream { 1.0 } else { 0.0 };
    let fac: Vec<f64> = values.iter().map(|v| v[0] + offset).collect();
    let fdr_codes: Vec<f64> = points
        .coords
        .iter()
        .map(|&(x, y)| {
            upstream_fdr
                .cell_at(x, y)
                .and_then(|(r, c)| format.direction_index(upstream_fdr.data()[(r, c)]))
                .map_or(f64::from(D8Format::Taudem.nodata()), |dir| f64::from(D8Format::Taudem.code(dir)))
        })
        .collect();

    let mut dict = UpdateDict::new();
    dict.insert(
        options.from_huc4.clone(),
        UpdateEntry {
            x: points.coords.iter().map(|c| c.0).collect(),
            y: points.coords.iter().map(|c| c.1).collect(),
            vars: vec![FDR_VAR.to_string(), MAX_UPSTREAM_FAC.to_string()],
            values: BTreeMap::from([(MAX_UPSTREAM_FAC.to_string(), fac), (FDR_VAR.to_string(), fdr_codes)]),
            ..Default::default()
        },
    )?;

    let ones = downstream_fdr.map(Some(f64::NAN), |_| 1.0);
    let weights = adjust_downstream(
        &ones,
        &dict,
        downstream_fdr,
        MAX_UPSTREAM_FAC,
        options.move_downstream,
        options.scale_factor,
    )?;
    let mut adjusted = accumulate_flow(downstream_fdr, format, None, Some(&weights))?;
    let unit = options.scale_factor.map_or(1.0, |s| 1.0 / s);
    for v in adjusted.data_mut().iter_mut() {
        if !v.is_nan() {
            *v -= unit;
        }
    }

    Ok(CascadeOutput {
        pour_points: points,
        update_dict: dict,
        adjusted_fac: adjusted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fcpg_core::vector::Feature;
    use fcpg_core::GeoTransform;
    use geo_types::{polygon, Geometry};

    fn tile(origin_x: f64) -> (Raster<u8>, Raster<f64>) {
        let transform = GeoTransform::new(origin_x, 1.0, 1.0, -1.0);
        let mut fdr = Raster::from_vec(vec![1u8, 1, 1], 1, 3).unwrap();
        fdr.set_transform(transform);
        fdr.set_nodata(Some(0));
        let fac = accumulate_flow(&fdr, D8Format::Taudem, None, None).unwrap();
        (fdr, fac)
    }

    fn wbd() -> FeatureCollection {
        let unit = |huc: &str, to: &str, x0: f64| {
            Feature::new(Geometry::Polygon(polygon![
                (x: x0, y: 0.0), (x: x0 + 3.0, y: 0.0), (x: x0 + 3.0, y: 1.0), (x: x0, y: 1.0)
            ]))
            .with_property("HUC12", huc)
            .with_property("ToHUC", to)
        };
        let mut wbd = FeatureCollection::new();
        wbd.push(unit("010100000001", "010200000001", 0.0));
        wbd.push(unit("010200000001", "010300000001", 3.0));
        wbd
    }

    #[test]
    fn test_huc4() {
        assert_eq!(huc4("010203040506"), "0102");
        assert_eq!(huc4("01"), "01");
    }

    #[test]
    fn test_make_pour_basins() {
        let basins = make_pour_basins(&wbd(), "0101", "0102", "HUC12", "ToHUC").unwrap();
        assert_eq!(basins.len(), 1);
        assert!(make_pour_basins(&wbd(), "0101", "0103", "HUC12", "ToHUC").unwrap().is_empty());
        assert!(make_pour_basins(&wbd(), "0101", "0102", "HUC12", "TOHUC").is_err());
    }

    #[test]
    fn test_find_pour_points_off_grid_outlet() {
        let (fdr, fac) = tile(0.0);
        let basins = make_pour_basins(&wbd(), "0101", "0102", "HUC12", "ToHUC").unwrap();
        let points = find_pour_points(&basins, &fac, &fdr, D8Format::Taudem).unwrap();
        assert_eq!(points.coords, vec![(2.5, 0.5)]);
        assert_relative_eq!(points.values.unwrap()[0][0], 2.0);
    }

    #[test]
    fn test_update_dict_json_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0102.json");
        let points = PourPoints {
            ids: vec!["a".into()],
            coords: vec![(2.5, 0.5)],
            values: Some(vec![vec![2.0]]),
        };
        create_update_dict(&points, "0101", &path, true, None).unwrap();
        let dict = update_dict_file(&path, "0101", "precip", vec![7.5]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"maxUpstreamFAC\""));
        assert!(!text.contains("outletX"));
        assert_eq!(dict.get("0101").unwrap().vars, vec![MAX_UPSTREAM_FAC.to_string(), "precip".to_string()]);
        assert_eq!(UpdateDict::read_json(&path).unwrap(), dict);

        // merge keeps the other HUC, replace drops it
        let merged = create_update_dict(&points, "0100", &path, false, None).unwrap();
        assert_eq!(merged.len(), 2);
        let replaced = create_update_dict(&points, "0100", &path, true, None).unwrap();
        assert_eq!(replaced.len(), 1);
    }

    #[test]
    fn test_update_var_length_mismatch() {
        let mut dict = UpdateDict::new();
        dict.insert("0101", UpdateEntry {
            x: vec![0.5],
            y: vec![0.5],
            ..Default::default()
        })
        .unwrap();
        assert!(dict.update_var("0101", "p", vec![1.0, 2.0]).is_err());
        assert!(dict.update_var("9999", "p", vec![1.0]).is_err());
    }

    #[test]
    fn test_adjust_downstream_in_place_and_outlet() {
        let (fdr, _) = tile(3.0);
        let ones = fdr.map(Some(f64::NAN), |_| 1.0);
        let mut dict = UpdateDict::new();
        dict.insert("0101", UpdateEntry {
            x: vec![3.5],
            y: vec![0.5],
            vars: vec!["p".into()],
            values: BTreeMap::from([("p".to_string(), vec![10.0])]),
            ..Default::default()
        })
        .unwrap();
        let out = adjust_downstream(&ones, &dict, &fdr, "p", false, None).unwrap();
        assert_relative_eq!(out.get(0, 0).unwrap(), 11.0);

        let mut entry = dict.get("0101").unwrap().clone();
        entry.outlet_x = Some(vec![4.5]);
        entry.outlet_y = Some(vec![0.5]);
        dict.insert("0101", entry).unwrap();
        let out = adjust_downstream(&ones, &dict, &fdr, "p", false, Some(2.0)).unwrap();
        assert_relative_eq!(out.get(0, 0).unwrap(), 0.5);
        assert_relative_eq!(out.get(0, 1).unwrap(), 5.5);

        assert!(adjust_downstream(&ones, &dict, &fdr, "p", true, None).is_err());
    }

    #[test]
    fn test_cascade_accumulation_moves_outlet_downstream() {
        let (up_fdr, up_fac) = tile(0.0);
        let (down_fdr, _) = tile(3.0);
        let mut options = CascadeOptions::new("0101", "0102");
        options.move_downstream = true;

        let out = cascade_accumulation(&up_fac, &up_fdr, &down_fdr, D8Format::Taudem, &wbd(), &options).unwrap();
        assert_eq!(out.pour_points.len(), 1);
        let fac: Vec<f64> = out.adjusted_fac.data().iter().copied().collect();
        // three upstream cells drain into the first downstream cell
        assert_eq!(fac, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_cascade_without_pour_basins() {
        let (up_fdr, up_fac) = tile(0.0);
        let (down_fdr, _) = tile(3.0);
        let options = CascadeOptions::new("0101", "0109");
        let err = cascade_accumulation(&up_fac, &up_fdr, &down_fdr, D8Format::Taudem, &wbd(), &options).unwrap_err();
        assert!(matches!(err, Error::Algorithm(_)));
    }
}
