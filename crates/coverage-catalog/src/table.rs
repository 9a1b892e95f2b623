//! Query-driven entry selection.
//!
//! The table holds the current query parameters (layer, time window, area,
//! resolution) and turns them into the minimal set of catalog entries:
//! candidate rows from the store, interned geometries, a linear
//! deduplication pass over same-time-cell runs, and mosaic assembly.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::{debug, info};

use coverage_common::{
    BoundingBox, CatalogError, CatalogResult, CrsCode, Layer, NamingConvention, SeriesSpec,
    TimeRange,
};
use coverage_store::{row_order, CoverageRow, DataConnection, LayerRow, QueryWindow};

use crate::config::CatalogConfig;
use crate::entry::{CoverageEntry, CoverageInput};
use crate::format::FormatRegistry;
use crate::geometry::GridGeometryModel;
use crate::mosaic::MosaicAssembler;
use crate::pool::CoveragePool;
use crate::settings::{CoverageSettings, Operation};

/// Mutable query parameters and per-layer caches.
struct TableState {
    layer_name: Option<String>,
    layer: Option<Arc<Layer>>,
    time: TimeRange,
    area: Option<BoundingBox>,
    resolution: Option<(f64, f64)>,
    operation: Option<Operation>,
    geometries: LruCache<String, Arc<GridGeometryModel>>,
    available_times: Option<Vec<DateTime<Utc>>>,
    available_elevations: Option<Vec<f64>>,
}

/// Snapshot of the parameters one `entries` call runs with.
#[derive(Clone)]
struct QuerySnapshot {
    layer_name: String,
    time: TimeRange,
    area: Option<BoundingBox>,
    resolution: Option<(f64, f64)>,
    operation: Option<Operation>,
}

/// The catalog's query surface.
///
/// Setters adjust the current query; [`CoverageCatalogTable::entries`]
/// resolves it. One table serves many concurrent queries: parameters are
/// snapshotted at the start of each call, so a setter racing an `entries`
/// call affects either the whole call or none of it.
pub struct CoverageCatalogTable {
    connection: Arc<dyn DataConnection>,
    pool: Arc<CoveragePool>,
    formats: FormatRegistry,
    assembler: MosaicAssembler,
    table_crs: CrsCode,
    state: Mutex<TableState>,
}

impl CoverageCatalogTable {
    pub fn new(
        connection: Arc<dyn DataConnection>,
        formats: FormatRegistry,
        config: &CatalogConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.geometry_cache_entries.max(1))
            .expect("max(1) is non-zero");
        Self {
            connection,
            pool: Arc::new(CoveragePool::new(config)),
            formats,
            assembler: MosaicAssembler::new(config.pyramid),
            table_crs: CrsCode::Epsg4326,
            state: Mutex::new(TableState {
                layer_name: None,
                layer: None,
                time: TimeRange::unbounded(),
                area: None,
                resolution: None,
                operation: None,
                geometries: LruCache::new(capacity),
                available_times: None,
                available_elevations: None,
            }),
        }
    }

    /// CRS queries are expressed in.
    pub fn with_crs(mut self, crs: CrsCode) -> Self {
        self.table_crs = crs;
        self
    }

    pub fn pool(&self) -> &Arc<CoveragePool> {
        &self.pool
    }

    /// Select the layer subsequent queries run against.
    pub fn set_layer(&self, name: impl Into<String>) {
        let mut state = self.lock_state();
        let name = name.into();
        if state.layer_name.as_deref() != Some(name.as_str()) {
            state.layer = None;
            state.available_times = None;
            state.available_elevations = None;
        }
        state.layer_name = Some(name);
    }

    pub fn set_time(&self, time: TimeRange) {
        self.lock_state().time = time;
    }

    pub fn set_area(&self, area: Option<BoundingBox>) {
        self.lock_state().area = area;
    }

    /// Requested pixel size in table-CRS units.
    pub fn set_resolution(&self, resolution: Option<(f64, f64)>) {
        self.lock_state().resolution = resolution;
    }

    pub fn set_operation(&self, operation: Option<Operation>) {
        self.lock_state().operation = operation;
    }

    /// Distinct slice start times of the current layer, cached per layer.
    pub async fn available_times(&self) -> CatalogResult<Vec<DateTime<Utc>>> {
        let layer_name = self.require_layer()?;
        if let Some(times) = &self.lock_state().available_times {
            return Ok(times.clone());
        }
        let times = self.connection.distinct_times(&layer_name).await?;
        self.lock_state().available_times = Some(times.clone());
        Ok(times)
    }

    /// Distinct vertical ordinates of the current layer, cached per layer.
    pub async fn available_elevations(&self) -> CatalogResult<Vec<f64>> {
        let layer_name = self.require_layer()?;
        if let Some(elevations) = &self.lock_state().available_elevations {
            return Ok(elevations.clone());
        }
        let elevations = self.connection.distinct_elevations(&layer_name).await?;
        self.lock_state().available_elevations = Some(elevations.clone());
        Ok(elevations)
    }

    /// Resolve the current query to the minimal set of entries.
    ///
    /// Walks the layer's fallback chain until one layer yields entries.
    /// Within each same-time-cell run, redundant detail levels are dropped:
    /// with a requested resolution the coarsest entry that still satisfies
    /// it wins, otherwise the finest survives. Compatible adjacent tiles are
    /// then merged into mosaic pyramids.
    pub async fn entries(&self) -> CatalogResult<Vec<Arc<CoverageEntry>>> {
        let snapshot = self.snapshot()?;
        self.resolve(&snapshot).await
    }

    /// The single entry closest to the query: smallest temporal midpoint
    /// distance, ties broken by spatial center distance.
    ///
    /// Selection and ranking run against one snapshot, so a setter racing
    /// this call cannot rank candidates fetched under different parameters.
    pub async fn entry(&self) -> CatalogResult<Option<Arc<CoverageEntry>>> {
        let snapshot = self.snapshot()?;
        let entries = self.resolve(&snapshot).await?;
        Ok(entries.into_iter().min_by(|a, b| {
            proximity(a, &snapshot)
                .partial_cmp(&proximity(b, &snapshot))
                .unwrap_or(Ordering::Equal)
        }))
    }

    async fn resolve(&self, snapshot: &QuerySnapshot) -> CatalogResult<Vec<Arc<CoverageEntry>>> {
        let layer = self.layer(&snapshot.layer_name).await?;

        for layer in layer.fallback_chain()? {
            let selected = self.entries_for_layer(&layer, snapshot).await?;
            if !selected.is_empty() {
                debug!(
                    layer = %layer.name,
                    entries = selected.len(),
                    "query resolved"
                );
                return Ok(selected);
            }
        }
        Ok(Vec::new())
    }

    async fn entries_for_layer(
        &self,
        layer: &Arc<Layer>,
        snapshot: &QuerySnapshot,
    ) -> CatalogResult<Vec<Arc<CoverageEntry>>> {
        let window = QueryWindow {
            time: snapshot.time,
            bbox: snapshot.area,
            srid: self.table_crs.srid(),
            visible_only: true,
        };
        let rows = self.connection.coverage_rows(&layer.name, &window).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        for pair in rows.windows(2) {
            if row_order(&pair[0], &pair[1]) == Ordering::Greater {
                return Err(CatalogError::UnorderedRows(pair[1].filename.clone()));
            }
        }

        let mut settings_by_srid: HashMap<i32, Arc<CoverageSettings>> = HashMap::new();
        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(self.build_entry(layer, row, snapshot, &mut settings_by_srid).await?);
        }

        // Dedup redundant detail inside each same-time-cell run, then hand
        // each run to the mosaic assembler.
        let mut selected = Vec::new();
        let mut start = 0;
        while start < entries.len() {
            let mut end = start + 1;
            while end < entries.len() && entries[end].same_time_cell(&entries[start]) {
                end += 1;
            }
            let kept = dedup_run(&entries[start..end], snapshot.resolution);
            // Assembly emits one entry per pyramid level; the same detail
            // rule then keeps a single level per mosaic.
            let assembled = self.assembler.assemble(kept, &self.pool)?;
            selected.extend(dedup_run(&assembled, snapshot.resolution));
            start = end;
        }
        Ok(selected)
    }

    async fn build_entry(
        &self,
        layer: &Arc<Layer>,
        row: &CoverageRow,
        snapshot: &QuerySnapshot,
        settings_by_srid: &mut HashMap<i32, Arc<CoverageSettings>>,
    ) -> CatalogResult<Arc<CoverageEntry>> {
        let series = layer
            .get_series(&row.series)
            .ok_or_else(|| CatalogError::SeriesNotFound(row.series.clone()))?;
        let format = self.formats.get(&series.format)?;
        let geometry = self.geometry(&row.extent_id).await?;

        let settings = match settings_by_srid.entry(geometry.horizontal_srid()) {
            std::collections::hash_map::Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            std::collections::hash_map::Entry::Vacant(vacant) => {
                let mut settings =
                    CoverageSettings::new(self.table_crs, geometry.crs());
                settings.area = snapshot.area;
                settings.resolution = snapshot.resolution;
                settings.operation = snapshot.operation;
                Arc::clone(vacant.insert(Arc::new(settings)))
            }
        };

        let entry = CoverageEntry::new(
            Arc::clone(series),
            format,
            CoverageInput::File(row.filename.clone()),
            row.slice_index,
            row.band,
            TimeRange {
                start: row.start_time,
                end: row.end_time,
            },
            geometry,
            settings,
        )?;
        Ok(self.pool.unique(entry))
    }

    /// Interned geometry for an extent id.
    async fn geometry(&self, extent_id: &str) -> CatalogResult<Arc<GridGeometryModel>> {
        if let Some(geometry) = self.lock_state().geometries.get(extent_id) {
            return Ok(Arc::clone(geometry));
        }
        let row = self.connection.extent(extent_id).await?;
        let geometry = Arc::new(GridGeometryModel::from_extent(&row)?);
        self.lock_state()
            .geometries
            .put(extent_id.to_string(), Arc::clone(&geometry));
        Ok(geometry)
    }

    /// Cached layer model, loading layer and series rows on first use.
    async fn layer(&self, name: &str) -> CatalogResult<Arc<Layer>> {
        if let Some(layer) = &self.lock_state().layer {
            if layer.name == name {
                return Ok(Arc::clone(layer));
            }
        }
        let layer = self.load_layer(name).await?;
        self.lock_state().layer = Some(Arc::clone(&layer));
        Ok(layer)
    }

    /// Load a layer and its whole fallback chain from the store.
    ///
    /// The chain is fetched front to back, then built back to front so each
    /// layer can hold an `Arc` to its already-built fallback. A repeated
    /// name in the chain is a configuration fault.
    async fn load_layer(&self, name: &str) -> CatalogResult<Arc<Layer>> {
        let mut chain: Vec<(LayerRow, Vec<SeriesSpec>)> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut next = Some(name.to_string());

        while let Some(current) = next {
            if !seen.insert(current.clone()) {
                return Err(CatalogError::FallbackCycle(current));
            }
            let row = self.connection.layer(&current).await?;
            let series = self
                .connection
                .series_for_layer(&current)
                .await?
                .into_iter()
                .map(|s| {
                    let mut naming = NamingConvention::new(s.root, s.subdirectory, s.extension);
                    if let Some(host) = s.host {
                        naming = naming.with_host(host);
                    }
                    SeriesSpec {
                        name: s.name,
                        format: s.format,
                        naming,
                    }
                })
                .collect();
            next = row.fallback.clone();
            chain.push((row, series));
        }

        let mut built: Option<Arc<Layer>> = None;
        for (row, series) in chain.into_iter().rev() {
            let mut builder = Layer::builder(&row.name);
            if let Some(thematic) = row.thematic {
                builder = builder.thematic(thematic);
            }
            if let Some(procedure) = row.procedure {
                builder = builder.procedure(procedure);
            }
            if let Some(seconds) = row.period_seconds {
                builder = builder.period(chrono::Duration::seconds(seconds));
            }
            if let Some(fallback) = built.take() {
                builder = builder.fallback(fallback);
            }
            for spec in series {
                builder = builder.series(spec);
            }
            built = Some(builder.build()?);
        }

        let layer = built.ok_or_else(|| CatalogError::LayerNotFound(name.to_string()))?;
        info!(layer = %layer.name, "loaded layer model");
        Ok(layer)
    }

    fn snapshot(&self) -> CatalogResult<QuerySnapshot> {
        let state = self.lock_state();
        let layer_name = state
            .layer_name
            .clone()
            .ok_or_else(|| CatalogError::Config("no layer selected".to_string()))?;
        Ok(QuerySnapshot {
            layer_name,
            time: state.time,
            area: state.area,
            resolution: state.resolution,
            operation: state.operation,
        })
    }

    fn require_layer(&self) -> CatalogResult<String> {
        self.lock_state()
            .layer_name
            .clone()
            .ok_or_else(|| CatalogError::Config("no layer selected".to_string()))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TableState> {
        self.state.lock().expect("table state poisoned")
    }
}

/// Drop redundant detail levels within one same-time-cell run.
///
/// Pairwise comparable entries collapse to one: with a requested pixel size
/// the coarsest entry that still satisfies it, otherwise the finest.
/// Incomparable entries (different footprints, bands, mixed per-axis
/// detail) all survive.
fn dedup_run(
    run: &[Arc<CoverageEntry>],
    resolution: Option<(f64, f64)>,
) -> Vec<Arc<CoverageEntry>> {
    let mut kept: Vec<Arc<CoverageEntry>> = Vec::new();
    'candidates: for entry in run {
        let mut index = 0;
        while index < kept.len() {
            match kept[index].compare_detail(entry) {
                Some(ordering) => {
                    if prefer_existing(&kept[index], entry, resolution, ordering) {
                        continue 'candidates;
                    }
                    kept.remove(index);
                }
                None => index += 1,
            }
        }
        kept.push(Arc::clone(entry));
    }
    kept
}

/// Choose between two redundant entries; `ordering` compares the detail of
/// `existing` against `candidate`.
fn prefer_existing(
    existing: &Arc<CoverageEntry>,
    candidate: &Arc<CoverageEntry>,
    resolution: Option<(f64, f64)>,
    ordering: Ordering,
) -> bool {
    match ordering {
        Ordering::Equal => true,
        Ordering::Greater => match resolution {
            // Existing is finer; a satisfied coarser candidate replaces it.
            Some(requested) => !candidate.satisfies_resolution(requested),
            None => true,
        },
        Ordering::Less => match resolution {
            // Existing is coarser; it survives only while it satisfies.
            Some(requested) => existing.satisfies_resolution(requested),
            None => false,
        },
    }
}

/// Temporal-then-spatial distance of an entry from the query.
fn proximity(entry: &Arc<CoverageEntry>, snapshot: &QuerySnapshot) -> (f64, f64) {
    let temporal = match (snapshot.time.midpoint(), entry.time.midpoint()) {
        (Some(wanted), Some(actual)) => (actual - wanted).num_seconds().abs() as f64,
        _ => 0.0,
    };
    let spatial = match snapshot.area {
        Some(area) => {
            let (ax, ay) = area.center();
            let bounds = entry.settings.transform().apply_bbox(&entry.geometry.bounds());
            let (bx, by) = bounds.center();
            ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
        }
        None => 0.0,
    };
    (temporal, spatial)
}
