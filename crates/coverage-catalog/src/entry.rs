//! Catalog entries and their decoded coverages.
//!
//! An entry is the immutable description of one readable slice: source,
//! format, time range, geometry, and the query settings it was built for.
//! The decoded raster is memoized through an explicit slot with three
//! states: never decoded, resident, or evicted with a weak handle that can
//! be promoted while some reader still holds the raster.

use std::cmp::Ordering;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use coverage_common::{CatalogError, CatalogResult, Raster, ReadError, ReadResult, Series, TimeRange};
use tracing::debug;

use crate::format::{DecodeInput, DecodeRequest, Format};
use crate::geometry::{GeometryKey, GridGeometryModel};
use crate::mosaic::TileManager;
use crate::pool::CoveragePool;
use crate::region::{compute_read_region, Envelope, ReadRegion};
use crate::settings::CoverageSettings;

/// Where an entry's samples come from.
#[derive(Debug, Clone)]
pub enum CoverageInput {
    /// A stored filename, resolved through the series' naming convention.
    File(String),
    /// A mosaic assembled from several tiles.
    Tiled(Arc<TileManager>),
}

impl CoverageInput {
    /// Stable identity string for keys and messages.
    pub fn id(&self) -> String {
        match self {
            CoverageInput::File(filename) => filename.clone(),
            CoverageInput::Tiled(manager) => manager.id().to_string(),
        }
    }
}

/// Value identity of an entry: two entries with equal keys are
/// interchangeable and the pool canonicalizes them to one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    series: String,
    input: String,
    slice_index: u32,
    band: u32,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    geometry: GeometryKey,
    settings: Arc<CoverageSettings>,
}

#[cfg(test)]
impl EntryKey {
    /// Key with a distinct input identity and placeholder everything else.
    pub(crate) fn for_tests(input: &str) -> Self {
        use crate::affine::Affine2D;
        use coverage_common::CrsCode;

        let geometry =
            GridGeometryModel::new(1, 1, None, Affine2D::identity(), Vec::new(), 4326, None);
        Self {
            series: "test".to_string(),
            input: input.to_string(),
            slice_index: 1,
            band: 0,
            start: None,
            end: None,
            geometry: geometry.key(),
            settings: Arc::new(CoverageSettings::new(CrsCode::Epsg4326, CrsCode::Epsg4326)),
        }
    }
}

/// A decoded coverage: the raster plus the footprint it covers.
#[derive(Debug)]
pub struct Coverage {
    pub raster: Raster,
    pub envelope: Envelope,
    entry: Weak<CoverageEntry>,
}

impl Coverage {
    /// The entry this coverage was decoded for, while it is still alive.
    pub fn entry(&self) -> Option<Arc<CoverageEntry>> {
        self.entry.upgrade()
    }

    /// Source-data footprint tracked by the memory budget.
    pub fn size_bytes(&self) -> u64 {
        self.raster.size_bytes()
    }
}

/// Memoization state of an entry's raster.
#[derive(Debug)]
enum RasterSlot {
    /// Never decoded, or decode failed.
    Empty,
    /// Decoded and counted against the pool budget.
    Resident(Arc<Coverage>),
    /// Dropped from the budget; promotable while a reader keeps it alive.
    Evicted(Weak<Coverage>),
}

/// One readable slice of a coverage.
#[derive(Debug)]
pub struct CoverageEntry {
    pub series: Arc<Series>,
    pub format: Arc<Format>,
    pub input: CoverageInput,
    /// 1-based slice index within the source.
    pub slice_index: u32,
    /// 1-based band; 0 selects all bands.
    pub band: u32,
    /// Validity range of the slice, half-open.
    pub time: TimeRange,
    pub geometry: Arc<GridGeometryModel>,
    pub settings: Arc<CoverageSettings>,
    slot: Mutex<RasterSlot>,
}

impl CoverageEntry {
    /// Build an entry, rejecting inverted time ranges and empty footprints.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        series: Arc<Series>,
        format: Arc<Format>,
        input: CoverageInput,
        slice_index: u32,
        band: u32,
        time: TimeRange,
        geometry: Arc<GridGeometryModel>,
        settings: Arc<CoverageSettings>,
    ) -> CatalogResult<Arc<Self>> {
        if time.is_inverted() {
            return Err(CatalogError::InvertedTimeRange {
                coverage: input.id(),
            });
        }
        if geometry.is_empty() {
            return Err(CatalogError::EmptyGeometry(input.id()));
        }
        Ok(Arc::new(Self {
            series,
            format,
            input,
            slice_index,
            band,
            time,
            geometry,
            settings,
            slot: Mutex::new(RasterSlot::Empty),
        }))
    }

    /// Value identity for canonicalization and in-flight decode tracking.
    pub fn key(&self) -> EntryKey {
        EntryKey {
            series: self.series.name.clone(),
            input: self.input.id(),
            slice_index: self.slice_index,
            band: self.band,
            start: self.time.start,
            end: self.time.end,
            geometry: self.geometry.key(),
            settings: Arc::clone(&self.settings),
        }
    }

    /// Stored filename, when the entry reads a single file.
    pub fn filename(&self) -> Option<&str> {
        match &self.input {
            CoverageInput::File(filename) => Some(filename),
            CoverageInput::Tiled(_) => None,
        }
    }

    /// The pixel window this entry's settings select, or `None` when the
    /// query does not touch this entry.
    pub fn read_region(&self) -> Option<ReadRegion> {
        compute_read_region(
            &self.geometry,
            self.settings.transform(),
            self.settings.area.as_ref(),
            self.settings.resolution,
            self.time,
        )
    }

    /// Native pixel size in table-CRS units.
    pub fn resolution(&self) -> (f64, f64) {
        let footprint = self.settings.transform().apply_bbox(&self.geometry.bounds());
        (
            footprint.width() / self.geometry.width() as f64,
            footprint.height() / self.geometry.height() as f64,
        )
    }

    /// True when this entry's native detail meets a requested pixel size:
    /// at least one source pixel per requested pixel on both axes.
    pub fn satisfies_resolution(&self, requested: (f64, f64)) -> bool {
        let (rx, ry) = self.resolution();
        rx <= requested.0 * (1.0 + 1e-9) && ry <= requested.1 * (1.0 + 1e-9)
    }

    /// True when both entries land in the same bounded time cell.
    ///
    /// Rows sort by ascending end time, so equal bounded ends mean the
    /// entries were adjacent in the scan. Unbounded ends never form a
    /// cell: such entries are never deduplicated against each other.
    pub fn same_time_cell(&self, other: &Self) -> bool {
        self.time.end.is_some()
            && self.time.end == other.time.end
            && self.time.start == other.time.start
    }

    /// Detail comparison for deduplication.
    ///
    /// `Some(Less)` when `self` carries strictly less detail than `other`
    /// on both axes, `Some(Greater)` for the reverse, `Some(Equal)` for the
    /// same grid. `None` when the two are not redundant: different time
    /// cell, band, layer, CRS, or footprint, or mixed per-axis detail.
    pub fn compare_detail(&self, other: &Self) -> Option<Ordering> {
        if !self.same_time_cell(other) || self.band != other.band {
            return None;
        }
        if self.geometry.horizontal_srid() != other.geometry.horizontal_srid() {
            return None;
        }
        let (self_layer, other_layer) = (self.series.layer()?, other.series.layer()?);
        if self_layer.name != other_layer.name {
            return None;
        }

        let (a, b) = (self.geometry.bounds(), other.geometry.bounds());
        let (px, py) = self.geometry.resolution();
        let (qx, qy) = other.geometry.resolution();
        let tolerance = px.max(py).max(qx).max(qy) * 0.5;
        if !a.approx_eq(&b, tolerance) {
            return None;
        }

        let w = self.geometry.width().cmp(&other.geometry.width());
        let h = self.geometry.height().cmp(&other.geometry.height());
        match (w, h) {
            (Ordering::Equal, Ordering::Equal) => Some(Ordering::Equal),
            (Ordering::Greater, Ordering::Less) | (Ordering::Less, Ordering::Greater) => None,
            _ if w != Ordering::Greater && h != Ordering::Greater => Some(Ordering::Less),
            _ => Some(Ordering::Greater),
        }
    }

    /// Request cancellation of this entry's in-flight decode, if any.
    pub fn abort(&self) {
        self.format.abort(&self.key());
    }

    /// Drop the resident raster from the budget, keeping a weak handle.
    pub(crate) fn demote(&self) {
        let mut slot = self.slot.lock().expect("raster slot poisoned");
        if let RasterSlot::Resident(coverage) = &*slot {
            *slot = RasterSlot::Evicted(Arc::downgrade(coverage));
        }
    }

    /// The decoded coverage, reading and decoding it on first use.
    ///
    /// Returns `Ok(None)` when the query selects nothing from this entry or
    /// the decode was aborted. A decode that fails with resource exhaustion
    /// is retried once after flushing the pool.
    pub async fn coverage(
        self: &Arc<Self>,
        pool: &CoveragePool,
    ) -> CatalogResult<Option<Arc<Coverage>>> {
        if let Some(coverage) = self.cached(pool) {
            return Ok(Some(coverage));
        }
        let Some(region) = self.read_region() else {
            return Ok(None);
        };

        // One decode per format at a time; re-check the slot once the lock
        // is ours in case a racing task decoded the same entry.
        let _decode = self.format.lock().lock().await;
        if let Some(coverage) = self.cached(pool) {
            return Ok(Some(coverage));
        }

        let guard = self.format.begin(self.key());
        let result = match self.decode(&region, guard.cancel_flag()).await {
            Err(ReadError::ResourceExhausted { width, height }) if !guard.cancelled() => {
                debug!(width, height, "decode exhausted memory, flushing pool");
                pool.flush();
                self.decode(&region, guard.cancel_flag()).await
            }
            other => other,
        };
        if guard.cancelled() {
            return Ok(None);
        }
        let mut raster = result?;
        drop(guard);

        self.validate_size(&region, &raster)?;
        if let Some(operation) = self.settings.operation {
            raster.map_in_place(|v| operation.apply(v));
        }

        let coverage = Arc::new(Coverage {
            raster,
            envelope: region.envelope,
            entry: Arc::downgrade(self),
        });
        *self.slot.lock().expect("raster slot poisoned") =
            RasterSlot::Resident(Arc::clone(&coverage));
        pool.add_memory_usage(self, &coverage);
        Ok(Some(coverage))
    }

    /// Memoized coverage, promoting an evicted one that is still alive.
    fn cached(self: &Arc<Self>, pool: &CoveragePool) -> Option<Arc<Coverage>> {
        let promoted;
        let coverage = {
            let mut slot = self.slot.lock().expect("raster slot poisoned");
            match &*slot {
                RasterSlot::Resident(coverage) => {
                    promoted = false;
                    Arc::clone(coverage)
                }
                RasterSlot::Evicted(weak) => {
                    let coverage = weak.upgrade()?;
                    *slot = RasterSlot::Resident(Arc::clone(&coverage));
                    promoted = true;
                    coverage
                }
                RasterSlot::Empty => return None,
            }
        };
        if promoted {
            // Back under the budget; account for it again.
            pool.add_memory_usage(self, &coverage);
        }
        Some(coverage)
    }

    async fn decode(&self, region: &ReadRegion, cancel: &AtomicBool) -> ReadResult<Raster> {
        match &self.input {
            CoverageInput::File(filename) => {
                let input = match self.series.uri(filename) {
                    Some(uri) => DecodeInput::Uri(uri),
                    None => DecodeInput::Path(self.series.file_path(filename)),
                };
                let request = DecodeRequest {
                    input,
                    region: *region,
                    slice_index: self.slice_index,
                    band: self.band,
                    variable: self.format.kind.variable().map(str::to_string),
                };
                self.format.decoder().decode(&request, cancel).await
            }
            CoverageInput::Tiled(manager) => manager.read(region, cancel).await,
        }
    }

    /// Decoded dimensions must match the subsampled window exactly, and a
    /// headerless format's declared grid must match the entry's geometry.
    fn validate_size(&self, region: &ReadRegion, raster: &Raster) -> ReadResult<()> {
        if let Some((width, height)) = self.format.kind.declared_dimensions() {
            if width != self.geometry.width() || height != self.geometry.height() {
                return Err(ReadError::SizeMismatch {
                    declared_width: width,
                    declared_height: height,
                    actual_width: self.geometry.width(),
                    actual_height: self.geometry.height(),
                });
            }
        }
        let expected_width = region.rect.width / region.subsampling.0;
        let expected_height = region.rect.height / region.subsampling.1;
        if raster.width != expected_width || raster.height != expected_height {
            return Err(ReadError::SizeMismatch {
                declared_width: expected_width,
                declared_height: expected_height,
                actual_width: raster.width,
                actual_height: raster.height,
            });
        }
        Ok(())
    }
}
