//! Entry canonicalization and the resident-raster memory budget.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::config::CatalogConfig;
use crate::entry::{Coverage, CoverageEntry, EntryKey};

/// Prune dead interned weak handles after this many inserts.
const PRUNE_INTERVAL: usize = 128;

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Canonicalization lookups that found a live entry.
    pub canonical_hits: u64,
    /// Lookups that admitted a new entry.
    pub canonical_misses: u64,
    /// Rasters demoted to stay under the budget.
    pub evictions: u64,
    /// Full flushes.
    pub flushes: u64,
    /// Bytes currently counted against the budget.
    pub resident_bytes: u64,
    /// Rasters currently counted against the budget.
    pub resident_count: usize,
}

#[derive(Debug, Default)]
struct Counters {
    canonical_hits: AtomicU64,
    canonical_misses: AtomicU64,
    evictions: AtomicU64,
    flushes: AtomicU64,
}

struct TrackedRaster {
    key: EntryKey,
    entry: Weak<CoverageEntry>,
    bytes: u64,
}

#[derive(Default)]
struct MemoryTracker {
    total: u64,
    /// Newest first; eviction takes from the back.
    recent: VecDeque<TrackedRaster>,
}

#[derive(Default)]
struct InternTable {
    map: HashMap<EntryKey, Weak<CoverageEntry>>,
    inserts_since_prune: usize,
}

/// Canonical home of catalog entries and their decoded rasters.
///
/// Entries are interned by value identity, so every query touching the same
/// slice shares one instance and therefore one decoded raster. Resident
/// raster bytes are bounded: when the budget is exceeded the oldest rasters
/// are demoted to weak handles, which frees them as soon as no reader holds
/// them while letting concurrent readers keep what they already have.
pub struct CoveragePool {
    interned: Mutex<InternTable>,
    memory: Mutex<MemoryTracker>,
    threshold: u64,
    counters: Counters,
}

impl CoveragePool {
    pub fn new(config: &CatalogConfig) -> Self {
        Self::with_threshold_bytes(config.memory_threshold_bytes())
    }

    /// Pool with an explicit byte budget.
    pub fn with_threshold_bytes(threshold: u64) -> Self {
        Self {
            interned: Mutex::new(InternTable::default()),
            memory: Mutex::new(MemoryTracker::default()),
            threshold,
            counters: Counters::default(),
        }
    }

    /// Canonical instance for an entry: the already-interned live entry
    /// with the same value identity, or `entry` itself after interning it.
    pub fn unique(&self, entry: Arc<CoverageEntry>) -> Arc<CoverageEntry> {
        let key = entry.key();
        let mut table = self.interned.lock().expect("intern table poisoned");

        if let Some(existing) = table.map.get(&key).and_then(Weak::upgrade) {
            self.counters.canonical_hits.fetch_add(1, Ordering::Relaxed);
            return existing;
        }

        table.map.insert(key, Arc::downgrade(&entry));
        table.inserts_since_prune += 1;
        if table.inserts_since_prune >= PRUNE_INTERVAL {
            table.map.retain(|_, weak| weak.strong_count() > 0);
            table.inserts_since_prune = 0;
        }
        self.counters
            .canonical_misses
            .fetch_add(1, Ordering::Relaxed);
        entry
    }

    /// Count a freshly decoded (or promoted) raster against the budget,
    /// demoting the oldest residents once the budget is exceeded.
    ///
    /// The newest raster is never demoted here: evicting what a caller just
    /// decoded would only force an immediate re-decode.
    pub fn add_memory_usage(&self, entry: &Arc<CoverageEntry>, coverage: &Arc<Coverage>) {
        let key = entry.key();
        let bytes = coverage.size_bytes();
        let mut tracker = self.memory.lock().expect("memory tracker poisoned");

        if let Some(index) = tracker.recent.iter().position(|t| t.key == key) {
            let old = tracker.recent.remove(index).expect("index in bounds");
            tracker.total -= old.bytes;
        }

        tracker.recent.push_front(TrackedRaster {
            key,
            entry: Arc::downgrade(entry),
            bytes,
        });
        tracker.total += bytes;

        while tracker.total > self.threshold && tracker.recent.len() > 1 {
            let oldest = tracker.recent.pop_back().expect("len checked above");
            tracker.total -= oldest.bytes;
            if let Some(entry) = oldest.entry.upgrade() {
                entry.demote();
            }
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(bytes = oldest.bytes, "demoted raster over memory budget");
        }
    }

    /// Demote every tracked raster and reset the budget.
    pub fn flush(&self) {
        let mut tracker = self.memory.lock().expect("memory tracker poisoned");
        for tracked in tracker.recent.drain(..) {
            if let Some(entry) = tracked.entry.upgrade() {
                entry.demote();
            }
        }
        tracker.total = 0;
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters and residency.
    pub fn stats(&self) -> PoolStats {
        let tracker = self.memory.lock().expect("memory tracker poisoned");
        PoolStats {
            canonical_hits: self.counters.canonical_hits.load(Ordering::Relaxed),
            canonical_misses: self.counters.canonical_misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            resident_bytes: tracker.total,
            resident_count: tracker.recent.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine2D;
    use crate::entry::CoverageInput;
    use crate::format::{DecodeRequest, Format, FormatKind, RasterDecoder};
    use crate::geometry::GridGeometryModel;
    use crate::settings::CoverageSettings;
    use async_trait::async_trait;
    use coverage_common::{
        CrsCode, Layer, NamingConvention, Raster, ReadResult, Series, SeriesSpec, TimeRange,
    };
    use std::sync::atomic::AtomicBool;

    struct FillDecoder(f32);

    #[async_trait]
    impl RasterDecoder for FillDecoder {
        async fn decode(&self, request: &DecodeRequest, _: &AtomicBool) -> ReadResult<Raster> {
            let width = request.region.rect.width / request.region.subsampling.0;
            let height = request.region.rect.height / request.region.subsampling.1;
            Ok(Raster::new(width, height, 1, 4, vec![self.0; width * height]))
        }
    }

    fn series() -> Arc<Series> {
        let layer = Layer::builder("SST")
            .series(SeriesSpec {
                name: "sst-daily".to_string(),
                format: "raw".to_string(),
                naming: NamingConvention::new("/data", "sst", "bin"),
            })
            .build()
            .unwrap();
        Arc::clone(layer.get_series("sst-daily").unwrap())
    }

    fn entry(filename: &str, size: usize) -> Arc<CoverageEntry> {
        let geometry = Arc::new(GridGeometryModel::new(
            size,
            size,
            None,
            Affine2D::scale_offset(
                360.0 / size as f64,
                -180.0 / size as f64,
                -180.0,
                90.0,
            ),
            Vec::new(),
            4326,
            None,
        ));
        CoverageEntry::new(
            series(),
            Arc::new(Format::new(
                "raw",
                "application/octet-stream",
                FormatKind::Standard,
                Arc::new(FillDecoder(1.0)),
            )),
            CoverageInput::File(filename.to_string()),
            1,
            0,
            TimeRange::unbounded(),
            geometry,
            Arc::new(CoverageSettings::new(CrsCode::Epsg4326, CrsCode::Epsg4326)),
        )
        .unwrap()
    }

    #[test]
    fn test_unique_canonicalizes_equal_entries() {
        let pool = CoveragePool::with_threshold_bytes(u64::MAX);
        let first = pool.unique(entry("20190601", 128));
        let second = pool.unique(entry("20190601", 128));
        let other = pool.unique(entry("20190602", 128));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));

        let stats = pool.stats();
        assert_eq!(stats.canonical_hits, 1);
        assert_eq!(stats.canonical_misses, 2);
    }

    #[test]
    fn test_dead_interned_entry_replaced() {
        let pool = CoveragePool::with_threshold_bytes(u64::MAX);
        {
            let _dropped = pool.unique(entry("20190601", 128));
        }
        // The weak handle is dead; a fresh entry takes its place.
        let fresh = pool.unique(entry("20190601", 128));
        assert_eq!(pool.stats().canonical_misses, 2);
        assert!(Arc::ptr_eq(&fresh, &pool.unique(Arc::clone(&fresh))));
    }

    #[tokio::test]
    async fn test_budget_demotes_oldest() {
        // Each 128x128 f32 raster costs 64 KiB; budget fits one and a half.
        let pool = CoveragePool::with_threshold_bytes(96 * 1024);
        let first = entry("20190601", 128);
        let second = entry("20190602", 128);

        let held = first.coverage(&pool).await.unwrap().unwrap();
        second.coverage(&pool).await.unwrap().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.resident_count, 1);
        assert_eq!(stats.resident_bytes, 64 * 1024);

        // The demoted raster survives while `held` keeps it alive.
        let again = first.coverage(&pool).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[tokio::test]
    async fn test_readd_same_entry_does_not_double_count() {
        let pool = CoveragePool::with_threshold_bytes(u64::MAX);
        let entry = entry("20190601", 128);

        entry.coverage(&pool).await.unwrap().unwrap();
        let held = entry.coverage(&pool).await.unwrap().unwrap();
        entry.demote();
        // Promotion re-registers the same raster under the same key.
        entry.coverage(&pool).await.unwrap().unwrap();
        drop(held);

        let stats = pool.stats();
        assert_eq!(stats.resident_count, 1);
        assert_eq!(stats.resident_bytes, 64 * 1024);
    }

    #[tokio::test]
    async fn test_flush_demotes_everything() {
        let pool = CoveragePool::with_threshold_bytes(u64::MAX);
        let first = entry("20190601", 128);
        let second = entry("20190602", 128);
        first.coverage(&pool).await.unwrap().unwrap();
        second.coverage(&pool).await.unwrap().unwrap();

        pool.flush();
        let stats = pool.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.resident_bytes, 0);
        assert_eq!(stats.resident_count, 0);
    }
}
