//! In-process store implementation.
//!
//! Holds the same row shapes as the database backend in plain vectors.
//! Used by the integration tests and by embedders that assemble a catalog
//! programmatically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use coverage_common::{CatalogError, CatalogResult, TimeRange};

use crate::{row_order, CoverageRow, DataConnection, ExtentRow, LayerRow, QueryWindow, SeriesRow};

/// Mutable in-memory store.
#[derive(Default)]
pub struct MemoryConnection {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    layers: HashMap<String, LayerRow>,
    series: Vec<SeriesRow>,
    extents: HashMap<String, ExtentRow>,
    coverages: Vec<CoverageRow>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer.
    pub fn insert_layer(&self, layer: LayerRow) {
        self.inner
            .write()
            .unwrap()
            .layers
            .insert(layer.name.clone(), layer);
    }

    /// Register a series.
    pub fn insert_series(&self, series: SeriesRow) {
        self.inner.write().unwrap().series.push(series);
    }

    /// Register a spatial extent.
    pub fn insert_extent(&self, extent: ExtentRow) {
        self.inner
            .write()
            .unwrap()
            .extents
            .insert(extent.id.clone(), extent);
    }

    /// Register a coverage slice.
    pub fn insert_coverage(&self, row: CoverageRow) {
        self.inner.write().unwrap().coverages.push(row);
    }
}

#[async_trait]
impl DataConnection for MemoryConnection {
    async fn coverage_rows(
        &self,
        layer: &str,
        window: &QueryWindow,
    ) -> CatalogResult<Vec<CoverageRow>> {
        let inner = self.inner.read().unwrap();
        let series_names: Vec<&str> = inner
            .series
            .iter()
            .filter(|s| s.layer == layer)
            .map(|s| s.name.as_str())
            .collect();

        let mut rows: Vec<CoverageRow> = inner
            .coverages
            .iter()
            .filter(|c| series_names.contains(&c.series.as_str()))
            .filter(|c| !window.visible_only || c.visible)
            .filter(|c| {
                let range = TimeRange {
                    start: c.start_time,
                    end: c.end_time,
                };
                range.intersects(&window.time)
            })
            .filter(|c| match &window.bbox {
                // Same predicate as the SQL backend: the extent's bounds
                // must overlap the request box, and a row whose extent is
                // unknown never matches.
                Some(bbox) => inner
                    .extents
                    .get(&c.extent_id)
                    .map_or(false, |extent| extent.bounds().intersects(bbox)),
                None => true,
            })
            .cloned()
            .collect();

        // Same contract as the SQL backend: end time ascending, nulls last.
        rows.sort_by(row_order);
        Ok(rows)
    }

    async fn extent(&self, id: &str) -> CatalogResult<ExtentRow> {
        self.inner
            .read()
            .unwrap()
            .extents
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::ExtentNotFound(id.to_string()))
    }

    async fn layer(&self, name: &str) -> CatalogResult<LayerRow> {
        self.inner
            .read()
            .unwrap()
            .layers
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::LayerNotFound(name.to_string()))
    }

    async fn series_for_layer(&self, layer: &str) -> CatalogResult<Vec<SeriesRow>> {
        let mut rows: Vec<SeriesRow> = self
            .inner
            .read()
            .unwrap()
            .series
            .iter()
            .filter(|s| s.layer == layer)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn distinct_times(&self, layer: &str) -> CatalogResult<Vec<DateTime<Utc>>> {
        let rows = self.coverage_rows(layer, &QueryWindow::all()).await?;
        let mut times: Vec<DateTime<Utc>> = rows.iter().filter_map(|r| r.start_time).collect();
        times.sort();
        times.dedup();
        Ok(times)
    }

    async fn distinct_elevations(&self, layer: &str) -> CatalogResult<Vec<f64>> {
        let rows = self.coverage_rows(layer, &QueryWindow::all()).await?;
        let inner = self.inner.read().unwrap();

        let mut ordinates = Vec::new();
        for row in &rows {
            if let Some(extent) = inner.extents.get(&row.extent_id) {
                ordinates.extend_from_slice(&extent.vertical_ordinates);
            }
        }
        ordinates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        ordinates.dedup();
        Ok(ordinates)
    }
}
