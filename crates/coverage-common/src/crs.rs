//! Coordinate reference system codes and the transforms between them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CatalogError, CatalogResult};
use crate::BoundingBox;

/// Earth radius used by the spherical Web Mercator projection, in meters.
const WEB_MERCATOR_RADIUS: f64 = 6378137.0;

/// Well-known horizontal CRS codes supported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 Geographic (lat/lon in degrees)
    Epsg4326,
    /// Web Mercator (meters)
    Epsg3857,
    /// NAD83 Geographic
    Epsg4269,
}

impl CrsCode {
    /// Resolve a numeric SRID as stored in extent records.
    pub fn from_srid(srid: i32) -> CatalogResult<Self> {
        match srid {
            4326 => Ok(CrsCode::Epsg4326),
            3857 | 900913 => Ok(CrsCode::Epsg3857),
            4269 => Ok(CrsCode::Epsg4269),
            other => Err(CatalogError::UnsupportedSrid(other)),
        }
    }

    /// Numeric SRID for this code.
    pub fn srid(&self) -> i32 {
        match self {
            CrsCode::Epsg4326 => 4326,
            CrsCode::Epsg3857 => 3857,
            CrsCode::Epsg4269 => 4269,
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsCode::Epsg4326 | CrsCode::Epsg4269)
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.srid())
    }
}

/// A point transform between two supported CRS.
///
/// The catalog only ever needs to move footprints between the table CRS and
/// a coverage CRS, so the transform set is closed: identity between
/// geographic codes (NAD83 and WGS84 are treated as coincident at catalog
/// precision), and spherical Web Mercator in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsTransform {
    Identity,
    GeographicToMercator,
    MercatorToGeographic,
}

impl CrsTransform {
    /// Build the transform from `source` to `target`.
    pub fn between(source: CrsCode, target: CrsCode) -> Self {
        match (source.is_geographic(), target.is_geographic()) {
            (true, false) => CrsTransform::GeographicToMercator,
            (false, true) => CrsTransform::MercatorToGeographic,
            _ => CrsTransform::Identity,
        }
    }

    /// The transform going the other way.
    pub fn inverse(&self) -> Self {
        match self {
            CrsTransform::Identity => CrsTransform::Identity,
            CrsTransform::GeographicToMercator => CrsTransform::MercatorToGeographic,
            CrsTransform::MercatorToGeographic => CrsTransform::GeographicToMercator,
        }
    }

    /// Transform a single point.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            CrsTransform::Identity => (x, y),
            CrsTransform::GeographicToMercator => {
                let lat = y.clamp(-85.05112878, 85.05112878);
                let mx = WEB_MERCATOR_RADIUS * x.to_radians();
                let my = WEB_MERCATOR_RADIUS
                    * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0)
                        .tan()
                        .ln();
                (mx, my)
            }
            CrsTransform::MercatorToGeographic => {
                let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
                let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                (lon, lat)
            }
        }
    }

    /// Transform a bounding box corner-wise.
    ///
    /// Both supported projections are axis-aligned and monotonic per axis,
    /// so corner transforms bound the image exactly.
    pub fn apply_bbox(&self, bbox: &BoundingBox) -> BoundingBox {
        let (x0, y0) = self.apply(bbox.min_x, bbox.min_y);
        let (x1, y1) = self.apply(bbox.max_x, bbox.max_y);
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_srid() {
        assert_eq!(CrsCode::from_srid(4326).unwrap(), CrsCode::Epsg4326);
        assert_eq!(CrsCode::from_srid(900913).unwrap(), CrsCode::Epsg3857);
        assert!(CrsCode::from_srid(99999).is_err());
    }

    #[test]
    fn test_mercator_roundtrip() {
        let fwd = CrsTransform::between(CrsCode::Epsg4326, CrsCode::Epsg3857);
        let inv = fwd.inverse();

        let (mx, my) = fwd.apply(-122.4, 37.8);
        let (lon, lat) = inv.apply(mx, my);
        assert!((lon + 122.4).abs() < 1e-9);
        assert!((lat - 37.8).abs() < 1e-9);
    }

    #[test]
    fn test_identity_between_geographic() {
        let t = CrsTransform::between(CrsCode::Epsg4326, CrsCode::Epsg4269);
        assert_eq!(t, CrsTransform::Identity);
        assert_eq!(t.apply(10.0, 20.0), (10.0, 20.0));
    }

    #[test]
    fn test_bbox_transform_keeps_orientation() {
        let fwd = CrsTransform::GeographicToMercator;
        let b = fwd.apply_bbox(&BoundingBox::new(-10.0, -10.0, 10.0, 10.0));
        assert!(b.min_x < 0.0 && b.max_x > 0.0);
        assert!((b.min_x + b.max_x).abs() < 1e-6);
    }
}
