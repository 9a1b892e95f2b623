//! Backing-store seam for the coverage catalog.
//!
//! The catalog consumes rows through one capability trait,
//! [`DataConnection`], with three implementations: an in-process PostgreSQL
//! backend, a remote HTTP backend speaking the same row shapes as JSON, and
//! an in-memory backend for tests and embedding. Which one a deployment gets
//! is a [`config::ConnectionConfig`] decision, not a type-level one.

pub mod config;
pub mod memory;
pub mod postgres;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coverage_common::{BoundingBox, CatalogResult, TimeRange};

pub use config::{ConnectionConfig, ConnectionMode};
pub use memory::MemoryConnection;
pub use postgres::PostgresConnection;
pub use remote::RemoteConnection;

/// Filter window for coverage queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryWindow {
    /// Time window; unbounded ends widen the match.
    pub time: TimeRange,
    /// Geographic filter, if any, expressed in the CRS of `srid`.
    pub bbox: Option<BoundingBox>,
    /// SRID the bbox is expressed in.
    pub srid: i32,
    /// Skip coverages flagged as hidden.
    pub visible_only: bool,
}

impl QueryWindow {
    /// Window matching everything visible.
    pub fn all() -> Self {
        Self {
            time: TimeRange::unbounded(),
            bbox: None,
            srid: 4326,
            visible_only: true,
        }
    }
}

/// One coverage slice as described by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageRow {
    /// Owning series name.
    pub series: String,
    /// Stored filename/identifier (without extension).
    pub filename: String,
    /// 1-based slice index within the file.
    pub slice_index: u32,
    /// 1-based band index; 0 selects all bands.
    pub band: u32,
    /// Inclusive slice start; `None` = unbounded.
    pub start_time: Option<DateTime<Utc>>,
    /// Exclusive slice end; `None` = unbounded.
    pub end_time: Option<DateTime<Utc>>,
    /// Identifier of the spatial extent record.
    pub extent_id: String,
    /// Hidden slices are skipped when the window filters on visibility.
    pub visible: bool,
}

/// Grid geometry description referenced by coverage rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtentRow {
    pub id: String,
    pub width: usize,
    pub height: usize,
    /// Vertical slice count when the extent is three-dimensional.
    pub depth: Option<usize>,
    /// Affine grid-to-CRS coefficients: x' = sx*i + shx*j + tx.
    pub scale_x: f64,
    pub shear_x: f64,
    pub translate_x: f64,
    pub shear_y: f64,
    pub scale_y: f64,
    pub translate_y: f64,
    pub horizontal_srid: i32,
    pub vertical_srid: Option<i32>,
    /// Vertical ordinates, one per slice; possibly irregular spacing.
    pub vertical_ordinates: Vec<f64>,
}

impl ExtentRow {
    /// Axis-aligned bounds of the grid footprint in its horizontal CRS.
    pub fn bounds(&self) -> BoundingBox {
        let (w, h) = (self.width as f64, self.height as f64);
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (i, j) in [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)] {
            let x = self.scale_x * i + self.shear_x * j + self.translate_x;
            let y = self.shear_y * i + self.scale_y * j + self.translate_y;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        BoundingBox::new(min_x, min_y, max_x, max_y)
    }
}

/// Layer description row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerRow {
    pub name: String,
    pub thematic: Option<String>,
    pub procedure: Option<String>,
    /// Nominal seconds between acquisitions.
    pub period_seconds: Option<i64>,
    /// Name of the fallback layer, if any.
    pub fallback: Option<String>,
}

/// Series description row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRow {
    pub layer: String,
    pub name: String,
    pub format: String,
    pub root: String,
    pub subdirectory: String,
    pub extension: String,
    pub host: Option<String>,
}

/// Capability interface over the backing store.
///
/// `coverage_rows` MUST return rows ordered by ascending end time (unbounded
/// ends last) with series name as the tie-breaker; the catalog's
/// deduplication is a single linear scan that relies on that adjacency and
/// validates it defensively.
#[async_trait]
pub trait DataConnection: Send + Sync {
    /// Coverage slices for a layer inside the window, end-time ascending.
    async fn coverage_rows(
        &self,
        layer: &str,
        window: &QueryWindow,
    ) -> CatalogResult<Vec<CoverageRow>>;

    /// Resolve a spatial extent identifier.
    async fn extent(&self, id: &str) -> CatalogResult<ExtentRow>;

    /// Layer description by name.
    async fn layer(&self, name: &str) -> CatalogResult<LayerRow>;

    /// Series belonging to a layer.
    async fn series_for_layer(&self, layer: &str) -> CatalogResult<Vec<SeriesRow>>;

    /// Distinct slice start times for a layer, ascending.
    async fn distinct_times(&self, layer: &str) -> CatalogResult<Vec<DateTime<Utc>>>;

    /// Distinct vertical ordinates available for a layer, ascending.
    async fn distinct_elevations(&self, layer: &str) -> CatalogResult<Vec<f64>>;
}

/// Compare two rows by the store ordering contract: end time ascending with
/// unbounded ends last, then series name.
pub fn row_order(a: &CoverageRow, b: &CoverageRow) -> std::cmp::Ordering {
    match (a.end_time, b.end_time) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.series.cmp(&b.series)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.series.cmp(&b.series),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(series: &str, end: Option<DateTime<Utc>>) -> CoverageRow {
        CoverageRow {
            series: series.to_string(),
            filename: "f".to_string(),
            slice_index: 1,
            band: 0,
            start_time: None,
            end_time: end,
            extent_id: "e".to_string(),
            visible: true,
        }
    }

    #[test]
    fn test_row_order_unbounded_last() {
        let t = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        let mut rows = vec![row("b", None), row("a", Some(t)), row("a", None)];
        rows.sort_by(row_order);

        assert_eq!(rows[0].end_time, Some(t));
        assert!(rows[1].end_time.is_none());
        assert_eq!(rows[1].series, "a");
        assert_eq!(rows[2].series, "b");
    }

    #[test]
    fn test_extent_bounds_fold_negative_scale() {
        let extent = ExtentRow {
            id: "e".to_string(),
            width: 360,
            height: 180,
            depth: None,
            scale_x: 1.0,
            shear_x: 0.0,
            translate_x: -180.0,
            shear_y: 0.0,
            scale_y: -1.0,
            translate_y: 90.0,
            horizontal_srid: 4326,
            vertical_srid: None,
            vertical_ordinates: Vec::new(),
        };
        let bounds = extent.bounds();
        assert_eq!(bounds.min_x, -180.0);
        assert_eq!(bounds.max_x, 180.0);
        assert_eq!(bounds.min_y, -90.0);
        assert_eq!(bounds.max_y, 90.0);
    }
}
