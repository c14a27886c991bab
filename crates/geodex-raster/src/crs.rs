//! Coordinate reference systems and the transformations between them.
//!
//! Reference systems are identified by EPSG code. Only a small set of
//! transformations is implemented natively:
//! - identity (same code, or WGS84 and NAD83 which agree at raster precision)
//! - WGS84 geographic ↔ Web Mercator
//!
//! Any other pair fails with [`RasterError::Reprojection`], which the
//! directory scan treats as "skip this file".

use crate::{RasterError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// WGS84 semi-major axis used by Web Mercator, in meters.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator projection (arctan(sinh(π))).
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Number of points sampled along each edge when reprojecting bounds.
const DENSIFY_POINTS: usize = 21;

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// WGS84 geographic (degrees).
    pub const WGS84: Crs = Crs { epsg: 4326 };
    /// NAD83 geographic (degrees).
    pub const NAD83: Crs = Crs { epsg: 4269 };
    /// Web Mercator (meters).
    pub const WEB_MERCATOR: Crs = Crs { epsg: 3857 };

    pub const fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg, 4326 | 4269)
    }

    /// Codes that describe the same coordinate space.
    fn canonical(&self) -> u32 {
        match self.epsg {
            4269 => 4326,
            // Legacy Google code for Web Mercator
            900913 => 3857,
            code => code,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = RasterError;

    /// Accepts `EPSG:4326`, `epsg:4326`, `CRS:84` or a bare code.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_uppercase();
        if normalized == "CRS:84" {
            return Ok(Crs::WGS84);
        }
        let code = normalized.strip_prefix("EPSG:").unwrap_or(&normalized);
        code.parse::<u32>()
            .map(Crs::from_epsg)
            .map_err(|_| RasterError::UnsupportedCrs(s.to_string()))
    }
}

impl TryFrom<String> for Crs {
    type Error = RasterError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transformation {
    Identity,
    GeographicToMercator,
    MercatorToGeographic,
}

/// Point and bounds transformation between two reference systems.
#[derive(Debug, Clone, Copy)]
pub struct Reprojector {
    from: Crs,
    to: Crs,
    kind: Transformation,
}

impl Reprojector {
    /// Build a transformation, failing if the pair is unsupported.
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let kind = match (from.canonical(), to.canonical()) {
            (a, b) if a == b => Transformation::Identity,
            (4326, 3857) => Transformation::GeographicToMercator,
            (3857, 4326) => Transformation::MercatorToGeographic,
            _ => {
                return Err(RasterError::Reprojection {
                    from,
                    to,
                    reason: "no transformation available".to_string(),
                })
            }
        };
        Ok(Self { from, to, kind })
    }

    pub fn source_crs(&self) -> Crs {
        self.from
    }

    pub fn target_crs(&self) -> Crs {
        self.to
    }

    pub fn is_identity(&self) -> bool {
        self.kind == Transformation::Identity
    }

    /// The transformation in the opposite direction.
    pub fn inverse(&self) -> Self {
        let kind = match self.kind {
            Transformation::Identity => Transformation::Identity,
            Transformation::GeographicToMercator => Transformation::MercatorToGeographic,
            Transformation::MercatorToGeographic => Transformation::GeographicToMercator,
        };
        Self {
            from: self.to,
            to: self.from,
            kind,
        }
    }

    /// Transform a single point.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let (tx, ty) = match self.kind {
            Transformation::Identity => (x, y),
            Transformation::GeographicToMercator => {
                if y.abs() > MERCATOR_MAX_LAT {
                    return Err(self.failure(format!("latitude {y} outside Web Mercator range")));
                }
                let lon = x.to_radians();
                let lat = y.to_radians();
                (
                    EARTH_RADIUS_M * lon,
                    EARTH_RADIUS_M * (PI / 4.0 + lat / 2.0).tan().ln(),
                )
            }
            Transformation::MercatorToGeographic => {
                let lon = (x / EARTH_RADIUS_M).to_degrees();
                let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
                (lon, lat)
            }
        };

        if !tx.is_finite() || !ty.is_finite() {
            return Err(self.failure(format!("({x}, {y}) maps to a non-finite coordinate")));
        }
        Ok((tx, ty))
    }

    /// Transform bounds `(minx, maxx, miny, maxy)`.
    ///
    /// Each edge is densified so curved edges in the target space are
    /// enclosed by the result.
    pub fn transform_bounds(
        &self,
        minx: f64,
        maxx: f64,
        miny: f64,
        maxy: f64,
    ) -> Result<(f64, f64, f64, f64)> {
        if self.is_identity() {
            return Ok((minx, maxx, miny, maxy));
        }

        let mut out = (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
        let steps = (DENSIFY_POINTS - 1) as f64;
        for i in 0..DENSIFY_POINTS {
            let t = i as f64 / steps;
            let x = minx + t * (maxx - minx);
            let y = miny + t * (maxy - miny);
            for (px, py) in [(x, miny), (x, maxy), (minx, y), (maxx, y)] {
                let (tx, ty) = self.transform(px, py)?;
                out.0 = out.0.min(tx);
                out.1 = out.1.max(tx);
                out.2 = out.2.min(ty);
                out.3 = out.3.max(ty);
            }
        }
        Ok(out)
    }

    fn failure(&self, reason: String) -> RasterError {
        RasterError::Reprojection {
            from: self.from,
            to: self.to,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_crs() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("epsg:3857".parse::<Crs>().unwrap(), Crs::WEB_MERCATOR);
        assert_eq!("CRS:84".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("32618".parse::<Crs>().unwrap(), Crs::from_epsg(32618));
        assert!("EPSG:abc".parse::<Crs>().is_err());
        assert_eq!(Crs::WEB_MERCATOR.to_string(), "EPSG:3857");
    }

    #[test]
    fn test_mercator_round_trip() {
        let forward = Reprojector::new(Crs::WGS84, Crs::WEB_MERCATOR).unwrap();
        let (x, y) = forward.transform(-122.3321, 47.6062).unwrap();
        assert_relative_eq!(x, -13_617_947.08, max_relative = 1e-6);
        assert_relative_eq!(y, 6_041_588.82, max_relative = 1e-6);

        let (lon, lat) = forward.inverse().transform(x, y).unwrap();
        assert_relative_eq!(lon, -122.3321, epsilon = 1e-9);
        assert_relative_eq!(lat, 47.6062, epsilon = 1e-9);
    }

    #[test]
    fn test_equivalent_codes_are_identity() {
        let r = Reprojector::new(Crs::NAD83, Crs::WGS84).unwrap();
        assert!(r.is_identity());
        assert_eq!(r.transform(1.5, 2.5).unwrap(), (1.5, 2.5));
    }

    #[test]
    fn test_unsupported_pair_fails() {
        let err = Reprojector::new(Crs::from_epsg(32618), Crs::WGS84).unwrap_err();
        assert!(matches!(err, RasterError::Reprojection { .. }));
    }

    #[test]
    fn test_polar_latitude_fails() {
        let r = Reprojector::new(Crs::WGS84, Crs::WEB_MERCATOR).unwrap();
        assert!(r.transform(0.0, 89.0).is_err());
        assert!(r.transform_bounds(0.0, 1.0, 80.0, 90.0).is_err());
    }

    #[test]
    fn test_transform_bounds_encloses_corners() {
        let r = Reprojector::new(Crs::WGS84, Crs::WEB_MERCATOR).unwrap();
        let (minx, maxx, miny, maxy) = r.transform_bounds(10.0, 11.0, 50.0, 51.0).unwrap();
        for (lon, lat) in [(10.0, 50.0), (11.0, 51.0), (10.5, 50.5)] {
            let (x, y) = r.transform(lon, lat).unwrap();
            assert!(x >= minx && x <= maxx);
            assert!(y >= miny && y <= maxy);
        }
    }
}
