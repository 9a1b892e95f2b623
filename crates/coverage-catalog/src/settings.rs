//! Shared per-query read parameters.

use chrono::{DateTime, Utc};
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use coverage_common::{BoundingBox, CrsCode, CrsTransform};

/// A per-sample transformation applied to decoded rasters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    /// Linear rescale: `v * gain + offset`.
    Scale { gain: f64, offset: f64 },
    /// Replace a sentinel value with NaN.
    NodataToNan { nodata: f32 },
}

impl Operation {
    /// Apply to one sample.
    pub fn apply(&self, v: f32) -> f32 {
        match *self {
            Operation::Scale { gain, offset } => (v as f64 * gain + offset) as f32,
            Operation::NodataToNan { nodata } => {
                if v == nodata {
                    f32::NAN
                } else {
                    v
                }
            }
        }
    }
}

/// Read parameters shared by every entry produced for one query.
///
/// Structural equality and hashing (floats compared bit-exactly) make two
/// settings built from the same query parameters interchangeable, which is
/// what lets the pool canonicalize entries across queries.
#[derive(Debug)]
pub struct CoverageSettings {
    /// CRS the catalog table operates in (request CRS).
    pub table_crs: CrsCode,
    /// CRS of the coverage grids this settings object applies to.
    pub coverage_crs: CrsCode,
    /// Spatial clip in table CRS, if the query carries one.
    pub area: Option<BoundingBox>,
    /// Requested pixel size in table CRS units, if the query carries one.
    pub resolution: Option<(f64, f64)>,
    /// Post-decode sample operation, if any.
    pub operation: Option<Operation>,
    /// Format string for rendering instants in messages and paths.
    pub date_format: String,
    transform: OnceLock<CrsTransform>,
}

impl CoverageSettings {
    pub fn new(table_crs: CrsCode, coverage_crs: CrsCode) -> Self {
        Self {
            table_crs,
            coverage_crs,
            area: None,
            resolution: None,
            operation: None,
            date_format: "%Y-%m-%dT%H:%M:%SZ".to_string(),
            transform: OnceLock::new(),
        }
    }

    pub fn with_area(mut self, area: BoundingBox) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_resolution(mut self, x: f64, y: f64) -> Self {
        self.resolution = Some((x, y));
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Transform from the coverage CRS into the table CRS, built once.
    pub fn transform(&self) -> CrsTransform {
        *self
            .transform
            .get_or_init(|| CrsTransform::between(self.coverage_crs, self.table_crs))
    }

    /// Render an instant with the configured date format.
    pub fn format_time(&self, t: DateTime<Utc>) -> String {
        t.format(&self.date_format).to_string()
    }
}

impl PartialEq for CoverageSettings {
    fn eq(&self, other: &Self) -> bool {
        fn bbox_bits(b: &BoundingBox) -> [u64; 4] {
            [
                b.min_x.to_bits(),
                b.min_y.to_bits(),
                b.max_x.to_bits(),
                b.max_y.to_bits(),
            ]
        }
        fn op_bits(op: &Operation) -> (u8, u64, u64) {
            match *op {
                Operation::Scale { gain, offset } => (0, gain.to_bits(), offset.to_bits()),
                Operation::NodataToNan { nodata } => (1, nodata.to_bits() as u64, 0),
            }
        }
        self.table_crs == other.table_crs
            && self.coverage_crs == other.coverage_crs
            && self.area.as_ref().map(bbox_bits) == other.area.as_ref().map(bbox_bits)
            && self.resolution.map(|(x, y)| (x.to_bits(), y.to_bits()))
                == other.resolution.map(|(x, y)| (x.to_bits(), y.to_bits()))
            && self.operation.as_ref().map(op_bits) == other.operation.as_ref().map(op_bits)
            && self.date_format == other.date_format
    }
}

impl Eq for CoverageSettings {}

impl Hash for CoverageSettings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table_crs.hash(state);
        self.coverage_crs.hash(state);
        if let Some(area) = &self.area {
            area.min_x.to_bits().hash(state);
            area.min_y.to_bits().hash(state);
            area.max_x.to_bits().hash(state);
            area.max_y.to_bits().hash(state);
        }
        if let Some((x, y)) = self.resolution {
            x.to_bits().hash(state);
            y.to_bits().hash(state);
        }
        if let Some(op) = &self.operation {
            match *op {
                Operation::Scale { gain, offset } => {
                    0u8.hash(state);
                    gain.to_bits().hash(state);
                    offset.to_bits().hash(state);
                }
                Operation::NodataToNan { nodata } => {
                    1u8.hash(state);
                    nodata.to_bits().hash(state);
                }
            }
        }
        self.date_format.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(s: &CoverageSettings) -> u64 {
        let mut h = DefaultHasher::new();
        s.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_structural_equality() {
        let a = CoverageSettings::new(CrsCode::Epsg4326, CrsCode::Epsg4326)
            .with_area(BoundingBox::new(0.0, 0.0, 10.0, 10.0))
            .with_resolution(0.5, 0.5);
        let b = CoverageSettings::new(CrsCode::Epsg4326, CrsCode::Epsg4326)
            .with_area(BoundingBox::new(0.0, 0.0, 10.0, 10.0))
            .with_resolution(0.5, 0.5);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = CoverageSettings::new(CrsCode::Epsg4326, CrsCode::Epsg4326)
            .with_area(BoundingBox::new(0.0, 0.0, 10.0, 10.0))
            .with_resolution(0.25, 0.5);
        assert_ne!(a, c);
    }

    #[test]
    fn test_transform_cached() {
        let s = CoverageSettings::new(CrsCode::Epsg3857, CrsCode::Epsg4326);
        assert_eq!(s.transform(), CrsTransform::GeographicToMercator);
        assert_eq!(s.transform(), CrsTransform::GeographicToMercator);
    }

    #[test]
    fn test_operations() {
        let scale = Operation::Scale {
            gain: 2.0,
            offset: 1.0,
        };
        assert_eq!(scale.apply(3.0), 7.0);

        let nodata = Operation::NodataToNan { nodata: -999.0 };
        assert!(nodata.apply(-999.0).is_nan());
        assert_eq!(nodata.apply(5.0), 5.0);
    }
}
