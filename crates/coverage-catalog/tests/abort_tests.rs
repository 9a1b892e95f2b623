//! Decode cancellation behavior.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coverage_catalog::{
    Affine2D, CatalogConfig, CoverageEntry, CoverageInput, CoveragePool, DecodeRequest, Format,
    FormatKind, GridGeometryModel, RasterDecoder,
};
use coverage_common::{
    CrsCode, Layer, NamingConvention, Raster, ReadError, ReadResult, SeriesSpec, TimeRange,
};
use coverage_catalog::CoverageSettings;

/// Decoder that spins until cancelled (or a generous timeout elapses).
struct SlowDecoder {
    started: Arc<AtomicBool>,
}

#[async_trait]
impl RasterDecoder for SlowDecoder {
    async fn decode(&self, request: &DecodeRequest, cancel: &AtomicBool) -> ReadResult<Raster> {
        self.started.store(true, Ordering::SeqCst);
        for _ in 0..2_000 {
            if cancel.load(Ordering::SeqCst) {
                return Err(ReadError::Io("decode aborted".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let width = request.region.rect.width;
        let height = request.region.rect.height;
        Ok(Raster::new(width, height, 1, 4, vec![0.0; width * height]))
    }
}

/// Returns the layer alongside the entry: the series holds only a weak
/// back reference, so the caller keeps the layer alive.
fn slow_entry(started: Arc<AtomicBool>) -> (Arc<Layer>, Arc<CoverageEntry>) {
    let layer = Layer::builder("SST")
        .series(SeriesSpec {
            name: "sst-daily".to_string(),
            format: "raw".to_string(),
            naming: NamingConvention::new("/data", "sst", "bin"),
        })
        .build()
        .unwrap();
    let series = Arc::clone(layer.get_series("sst-daily").unwrap());

    let geometry = Arc::new(GridGeometryModel::new(
        128,
        128,
        None,
        Affine2D::scale_offset(0.25, -0.25, -16.0, 16.0),
        Vec::new(),
        4326,
        None,
    ));
    let entry = CoverageEntry::new(
        series,
        Arc::new(Format::new(
            "raw",
            "application/octet-stream",
            FormatKind::Standard,
            Arc::new(SlowDecoder { started }),
        )),
        CoverageInput::File("slow".to_string()),
        1,
        0,
        TimeRange::unbounded(),
        geometry,
        Arc::new(CoverageSettings::new(CrsCode::Epsg4326, CrsCode::Epsg4326)),
    )
    .unwrap();
    (layer, entry)
}

#[tokio::test]
async fn test_abort_turns_decode_into_empty_result() {
    let started = Arc::new(AtomicBool::new(false));
    let (_layer, entry) = slow_entry(Arc::clone(&started));
    let pool = Arc::new(CoveragePool::new(&CatalogConfig::default()));

    let reader = {
        let entry = Arc::clone(&entry);
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { entry.coverage(&pool).await })
    };

    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    entry.abort();

    // Cancellation is not an error: the read reports an empty result.
    let result = reader.await.unwrap();
    assert!(matches!(result, Ok(None)));
}

#[tokio::test]
async fn test_abort_without_inflight_decode_is_harmless() {
    let started = Arc::new(AtomicBool::new(false));
    let (_layer, entry) = slow_entry(Arc::clone(&started));
    let pool = CoveragePool::new(&CatalogConfig::default());

    // Nothing in flight; the next decode proceeds normally.
    entry.abort();

    let reader = {
        let entry = Arc::clone(&entry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            entry.abort();
        })
    };

    let result = entry.coverage(&pool).await;
    reader.await.unwrap();
    // Either the decode finished first or the abort emptied it; never an
    // error either way.
    assert!(matches!(result, Ok(_)));
}
