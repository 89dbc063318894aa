//! Pure-Rust coordinate transforms between WGS84, UTM and CONUS Albers
//! (Snyder 1987, USGS Prof. Paper 1395).
//!
//! Every transform goes through WGS84 longitude/latitude. NAD83 and WGS84
//! are treated as the same datum, which is within a metre or two over CONUS.

use fcpg_core::crs::CrsFamily;
use fcpg_core::vector::FeatureCollection;
use fcpg_core::{Error, Result, CRS};
use geo::MapCoords;
use geo_types::Coord;

// ── WGS84 ellipsoid constants ────────────────────────────────────────────

const A: f64 = 6_378_137.0; // semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563; // flattening
const E2: f64 = 2.0 * F - F * F; // eccentricity squared
const E_PRIME2: f64 = E2 / (1.0 - E2); // second eccentricity squared
const K0: f64 = 0.9996; // UTM scale factor
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

// ── GRS80 and EPSG:5070 parameters ───────────────────────────────────────

const GRS80_A: f64 = 6_378_137.0;
const GRS80_F: f64 = 1.0 / 298.257_222_101;
const ALBERS_LAT1: f64 = 29.5;
const ALBERS_LAT2: f64 = 45.5;
const ALBERS_LAT0: f64 = 23.0;
const ALBERS_LON0: f64 = -96.0;

/// Number of points sampled along each edge when transforming a bounding box
const EDGE_SAMPLES: usize = 21;

/// A transform between two known CRS families
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordTransform {
    from: CrsFamily,
    to: CrsFamily,
}

impl CoordTransform {
    /// Build a transform, failing with [`Error::CrsMismatch`] when either
    /// side is outside the supported families
    pub fn new(from: &CRS, to: &CRS) -> Result<Self> {
        match (from.family(), to.family()) {
            (Some(from), Some(to)) => Ok(Self { from, to }),
            _ => Err(Error::CrsMismatch(from.identifier(), to.identifier())),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    pub fn inverse(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }

    /// Transform one coordinate pair
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_identity() {
            return (x, y);
        }
        let (lon, lat) = to_geographic(self.from, x, y);
        from_geographic(self.to, lon, lat)
    }

    /// Envelope of a `(min_x, min_y, max_x, max_y)` box after transforming.
    ///
    /// Edges are densified so curved edges in the target are covered.
    pub fn transform_bounds(&self, bounds: (f64, f64, f64, f64)) -> (f64, f64, f64, f64) {
        if self.is_identity() {
            return bounds;
        }
        let (min_x, min_y, max_x, max_y) = bounds;
        let mut out = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);

        for i in 0..EDGE_SAMPLES {
            let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
            let x = min_x + t * (max_x - min_x);
            let y = min_y + t * (max_y - min_y);
            for (px, py) in [(x, min_y), (x, max_y), (min_x, y), (max_x, y)] {
                let (tx, ty) = self.transform(px, py);
                out.0 = out.0.min(tx);
                out.1 = out.1.min(ty);
                out.2 = out.2.max(tx);
                out.3 = out.3.max(ty);
            }
        }
        out
    }
}

fn to_geographic(family: CrsFamily, x: f64, y: f64) -> (f64, f64) {
    match family {
        CrsFamily::Geographic => (x, y),
        CrsFamily::Utm { zone, north } => utm_to_wgs84(x, y, zone, north),
        CrsFamily::ConusAlbers => Albers::conus().inverse(x, y),
    }
}

fn from_geographic(family: CrsFamily, lon: f64, lat: f64) -> (f64, f64) {
    match family {
        CrsFamily::Geographic => (lon, lat),
        CrsFamily::Utm { zone, north } => wgs84_to_utm(lon, lat, zone, north),
        CrsFamily::ConusAlbers => Albers::conus().forward(lon, lat),
    }
}

/// Reproject the coordinates of every feature to `target`.
///
/// Features without a CRS cannot be placed and give [`Error::CrsMismatch`].
pub fn reproject_features(features: &FeatureCollection, target: &CRS) -> Result<FeatureCollection> {
    let source = features
        .crs
        .as_ref()
        .ok_or_else(|| Error::CrsMismatch("Unknown".to_string(), target.identifier()))?;
    if source.is_equivalent(target) {
        return Ok(features.clone());
    }
    let transform = CoordTransform::new(source, target)?;

    let mut out = features.clone();
    for feature in &mut out.features {
        if let Some(geometry) = feature.geometry.take() {
            feature.geometry = Some(geometry.map_coords(|c| {
                let (x, y) = transform.transform(c.x, c.y);
                Coord { x, y }
            }));
        }
    }
    out.crs = Some(target.clone());
    Ok(out)
}

// ── Transverse Mercator (Snyder pp. 61-64) ──────────────────────────────

fn central_meridian(zone: u8) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

/// WGS84 (longitude, latitude) in degrees to UTM (easting, northing) in metres
pub(crate) fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u8, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a_coeff = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a_coeff * a_coeff;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    // Snyder eq. 8-9
    let easting = K0
        * n
        * (a_coeff
            + (1.0 - t + c) * a2 * a_coeff / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
        + FALSE_EASTING;

    // Snyder eq. 8-10
    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    let northing = if north {
        northing
    } else {
        northing + FALSE_NORTHING_SOUTH
    };

    (easting, northing)
}

/// UTM (easting, northing) in metres to WGS84 (longitude, latitude) in degrees
pub(crate) fn utm_to_wgs84(easting: f64, northing: f64, zone: u8, north: bool) -> (f64, f64) {
    let x = easting - FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    let e4 = E2 * E2;
    let e6 = e4 * E2;

    // Footpoint latitude, Snyder eqs. 7-19 and 3-26
    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - E2).sqrt()) / (1.0 + (1.0 - E2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();

    // Snyder eqs. 8-20 to 8-25
    let c1 = E_PRIME2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let n1 = A / (1.0 - E2 * sin1 * sin1).sqrt();
    let r1 = A * (1.0 - E2) / (1.0 - E2 * sin1 * sin1).powf(1.5);
    let d = x / (n1 * K0);
    let d2 = d * d;
    let d4 = d2 * d2;
    let d6 = d4 * d2;

    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * E_PRIME2 - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1) * d4 * d
                / 120.0)
            / cos1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Meridional arc from the equator to `lat` (radians), Snyder eq. 3-21
fn meridional_arc(lat: f64) -> f64 {
    let e2 = E2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    A * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

// ── Albers Equal-Area Conic (Snyder pp. 98-103) ─────────────────────────

/// Ellipsoidal Albers projection constants
#[derive(Debug, Clone, Copy)]
struct Albers {
    a: f64,
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
    lon0: f64,
}

impl Albers {
    fn conus() -> Self {
        Self::new(
            GRS80_A,
            GRS80_F,
            ALBERS_LAT1,
            ALBERS_LAT2,
            ALBERS_LAT0,
            ALBERS_LON0,
        )
    }

    fn new(a: f64, f: f64, lat1: f64, lat2: f64, lat0: f64, lon0: f64) -> Self {
        let e2 = 2.0 * f - f * f;
        let e = e2.sqrt();
        let (phi1, phi2, phi0) = (lat1.to_radians(), lat2.to_radians(), lat0.to_radians());

        let m1 = albers_m(phi1, e2);
        let m2 = albers_m(phi2, e2);
        let q0 = albers_q(phi0, e, e2);
        let q1 = albers_q(phi1, e, e2);
        let q2 = albers_q(phi2, e, e2);

        // Snyder eqs. 14-14, 14-13, 14-12a
        let n = (m1 * m1 - m2 * m2) / (q2 - q1);
        let c = m1 * m1 + n * q1;
        let rho0 = a * (c - n * q0).sqrt() / n;

        Self {
            a,
            e,
            e2,
            n,
            c,
            rho0,
            lon0: lon0.to_radians(),
        }
    }

    fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let q = albers_q(lat_deg.to_radians(), self.e, self.e2);
        let rho = self.a * (self.c - self.n * q).sqrt() / self.n;
        let theta = self.n * (lon_deg.to_radians() - self.lon0);
        (rho * theta.sin(), self.rho0 - rho * theta.cos())
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        // Snyder eqs. 14-10, 14-11, 14-19
        let dy = self.rho0 - y;
        let rho = (x * x + dy * dy).sqrt();
        let theta = x.atan2(dy);
        let q = (self.c - rho * rho * self.n * self.n / (self.a * self.a)) / self.n;
        let lon = self.lon0 + theta / self.n;

        // Snyder eq. 3-16, iterated
        let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
        for _ in 0..15 {
            let sin = phi.sin();
            let one_minus = 1.0 - self.e2 * sin * sin;
            let delta = one_minus * one_minus / (2.0 * phi.cos())
                * (q / (1.0 - self.e2) - sin / one_minus
                    + (1.0 / (2.0 * self.e)) * ((1.0 - self.e * sin) / (1.0 + self.e * sin)).ln());
            phi += delta;
            if delta.abs() < 1e-12 {
                break;
            }
        }

        (lon.to_degrees(), phi.to_degrees())
    }
}

/// Snyder eq. 14-15
fn albers_m(phi: f64, e2: f64) -> f64 {
    let sin = phi.sin();
    phi.cos() / (1.0 - e2 * sin * sin).sqrt()
}

/// Snyder eq. 3-12
fn albers_q(phi: f64, e: f64, e2: f64) -> f64 {
    let sin = phi.sin();
    (1.0 - e2)
        * (sin / (1.0 - e2 * sin * sin)
            - (1.0 / (2.0 * e)) * ((1.0 - e * sin) / (1.0 + e * sin)).ln())
}
