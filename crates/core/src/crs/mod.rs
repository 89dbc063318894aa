//! Coordinate Reference System handling

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EPSG code of WGS84 geographic coordinates
pub const EPSG_WGS84: u32 = 4326;
/// EPSG code of NAD83 / CONUS Albers Equal Area
pub const EPSG_CONUS_ALBERS: u32 = 5070;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    wkt: Option<String>,
    epsg: Option<u32>,
    proj: Option<String>,
}

/// Families of CRS the toolkit can transform between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsFamily {
    /// Longitude/latitude on WGS84
    Geographic,
    /// Transverse Mercator UTM zone on WGS84
    Utm { zone: u8, north: bool },
    /// NAD83 CONUS Albers Equal Area
    ConusAlbers,
}

impl CRS {
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
            proj: None,
        }
    }

    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
            proj: None,
        }
    }

    pub fn from_proj(proj: impl Into<String>) -> Self {
        Self {
            wkt: None,
            epsg: None,
            proj: Some(proj.into()),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(EPSG_WGS84)
    }

    /// NAD83 CONUS Albers (EPSG:5070), the default for US hydrography
    pub fn conus_albers() -> Self {
        Self::from_epsg(EPSG_CONUS_ALBERS)
    }

    /// WGS84 UTM zone, EPSG 326xx (north) or 327xx (south)
    pub fn utm(zone: u8, north: bool) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(Error::invalid_param("zone", zone, "UTM zones run from 1 to 60"));
        }
        let base = if north { 32600 } else { 32700 };
        Ok(Self::from_epsg(base + zone as u32))
    }

    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    pub fn proj(&self) -> Option<&str> {
        self.proj.as_deref()
    }

    /// The transformable family of this CRS, if it is one we know.
    ///
    /// PROJ strings are recognised for `+proj=longlat`, `+proj=utm` and the
    /// NAD83 CONUS Albers parameters of EPSG:5070 written as `+proj=aea`.
    pub fn family(&self) -> Option<CrsFamily> {
        if let Some(code) = self.epsg {
            return match code {
                EPSG_WGS84 => Some(CrsFamily::Geographic),
                EPSG_CONUS_ALBERS => Some(CrsFamily::ConusAlbers),
                32601..=32660 => Some(CrsFamily::Utm {
                    zone: (code - 32600) as u8,
                    north: true,
                }),
                32701..=32760 => Some(CrsFamily::Utm {
                    zone: (code - 32700) as u8,
                    north: false,
                }),
                _ => None,
            };
        }
        let params = ProjParams::parse(self.proj.as_deref()?);
        match params.get("proj")? {
            "longlat" | "latlong" => Some(CrsFamily::Geographic),
            "utm" => {
                let zone = params.get("zone")?.parse::<u8>().ok()?;
                Some(CrsFamily::Utm {
                    zone,
                    north: !params.has("south"),
                })
            }
            "aea" if params.is_conus_albers() => Some(CrsFamily::ConusAlbers),
            _ => None,
        }
    }

    /// Whether coordinates are in degrees
    pub fn is_geographic(&self) -> bool {
        matches!(self.family(), Some(CrsFamily::Geographic))
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.family(), other.family()) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.proj, &other.proj) {
            return a == b;
        }
        false
    }

    /// A short identifier such as `EPSG:5070`
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(proj) = &self.proj {
            return proj.clone();
        }
        if let Some(wkt) = &self.wkt {
            let end = wkt.char_indices().nth(50).map_or(wkt.len(), |(i, _)| i);
            return format!("WKT:{}", &wkt[..end]);
        }
        "Unknown".to_string()
    }
}

/// `+key=value` tokens of a PROJ string
struct ProjParams<'a>(Vec<(&'a str, Option<&'a str>)>);

impl<'a> ProjParams<'a> {
    fn parse(proj: &'a str) -> Self {
        Self(
            proj.split_whitespace()
                .filter_map(|t| t.strip_prefix('+'))
                .map(|t| match t.split_once('=') {
                    Some((k, v)) => (k, Some(v)),
                    None => (t, None),
                })
                .collect(),
        )
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.0.iter().find(|(k, _)| *k == key).and_then(|(_, v)| *v)
    }

    fn has(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| *k == key)
    }

    /// Numeric parameter, `default` when absent
    fn number(&self, key: &str, default: f64) -> Option<f64> {
        match self.get(key) {
            Some(v) => v.parse().ok(),
            None => Some(default),
        }
    }

    /// Standard parallels 29.5/45.5, origin (23, -96), no false origin,
    /// GRS80 ellipsoid (NAD83 datum) in metres.
    fn is_conus_albers(&self) -> bool {
        let expected = [
            ("lat_1", 29.5, f64::NAN),
            ("lat_2", 45.5, f64::NAN),
            ("lat_0", 23.0, f64::NAN),
            ("lon_0", -96.0, f64::NAN),
            ("x_0", 0.0, 0.0),
            ("y_0", 0.0, 0.0),
        ];
        let parameters_match = expected.iter().all(|&(key, value, default)| {
            self.number(key, default)
                .is_some_and(|v| (v - value).abs() < 1e-9)
        });
        let datum = self.get("datum").map(str::to_ascii_uppercase);
        let ellps = self.get("ellps").map(str::to_ascii_uppercase);
        let on_grs80 = match (datum.as_deref(), ellps.as_deref()) {
            (Some("NAD83"), None | Some("GRS80")) => true,
            (None, Some("GRS80")) => true,
            _ => false,
        };
        let in_metres = self.get("units").map_or(true, |u| u == "m");
        parameters_match && on_grs80 && in_metres
    }
}

impl FromStr for CRS {
    type Err = Error;

    /// Parses `EPSG:5070`, a bare EPSG number, a PROJ string or WKT
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let code = s
            .strip_prefix("EPSG:")
            .or_else(|| s.strip_prefix("epsg:"))
            .unwrap_or(s);
        if let Ok(code) = code.parse::<u32>() {
            return Ok(Self::from_epsg(code));
        }
        if s.starts_with('+') {
            return Ok(Self::from_proj(s));
        }
        if s.contains('[') {
            return Ok(Self::from_wkt(s));
        }
        Err(Error::invalid_param(
            "crs",
            s,
            "expected EPSG:<code>, a PROJ string or WKT",
        ))
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg() {
        let crs: CRS = "EPSG:5070".parse().unwrap();
        assert_eq!(crs.epsg(), Some(5070));
        assert_eq!(crs.identifier(), "EPSG:5070");
        assert_eq!(crs.family(), Some(CrsFamily::ConusAlbers));
        assert!("not a crs".parse::<CRS>().is_err());
    }

    #[test]
    fn test_utm_family() {
        let north = CRS::utm(13, true).unwrap();
        assert_eq!(north.epsg(), Some(32613));
        assert_eq!(north.family(), Some(CrsFamily::Utm { zone: 13, north: true }));

        let south = CRS::from_proj("+proj=utm +zone=19 +south +datum=WGS84");
        assert_eq!(south.family(), Some(CrsFamily::Utm { zone: 19, north: false }));
        assert!(CRS::utm(61, true).is_err());
    }

    #[test]
    fn test_albers_proj_string() {
        let albers = CRS::from_proj(
            "+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=23 +lon_0=-96 +x_0=0 +y_0=0 +ellps=GRS80 +datum=NAD83 +units=m +no_defs",
        );
        assert_eq!(albers.family(), Some(CrsFamily::ConusAlbers));
        assert!(albers.is_equivalent(&CRS::conus_albers()));
        assert!(!albers.is_geographic());

        let shifted = CRS::from_proj("+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=23 +lon_0=-100 +datum=NAD83");
        assert_eq!(shifted.family(), None);
        let other_datum = CRS::from_proj("+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=23 +lon_0=-96 +datum=NAD27");
        assert_eq!(other_datum.family(), None);
    }

    #[test]
    fn test_equivalence_across_representations() {
        assert!(CRS::from_epsg(4326).is_equivalent(&CRS::wgs84()));
        assert!(CRS::from_proj("+proj=longlat +datum=WGS84").is_equivalent(&CRS::wgs84()));
        assert!(!CRS::wgs84().is_equivalent(&CRS::conus_albers()));
        assert!(CRS::wgs84().is_geographic());
    }
}
