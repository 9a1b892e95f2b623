//! Shared scaffolding for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use coverage_catalog::{
    CatalogConfig, CoverageCatalogTable, DecodeRequest, Format, FormatKind, FormatRegistry,
    RasterDecoder,
};
use coverage_common::{Raster, ReadError, ReadResult};
use coverage_store::DataConnection;

/// Decoder that fills every read with the last digit of the input name and
/// counts how often it runs.
pub struct DigitDecoder {
    pub calls: AtomicUsize,
}

impl DigitDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RasterDecoder for DigitDecoder {
    async fn decode(&self, request: &DecodeRequest, cancel: &AtomicBool) -> ReadResult<Raster> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.load(Ordering::SeqCst) {
            return Err(ReadError::Io("decode aborted".to_string()));
        }
        let value = request
            .input
            .id()
            .chars()
            .rev()
            .find(|c| c.is_ascii_digit())
            .and_then(|c| c.to_digit(10))
            .unwrap_or(0) as f32;
        let width = request.region.rect.width / request.region.subsampling.0;
        let height = request.region.rect.height / request.region.subsampling.1;
        Ok(Raster::new(width, height, 1, 4, vec![value; width * height]))
    }
}

/// Registry mapping the fixture `raw` format onto `decoder`.
pub fn raw_registry(decoder: Arc<dyn RasterDecoder>) -> FormatRegistry {
    let mut registry = FormatRegistry::new();
    registry.register(Format::new(
        "raw",
        "application/octet-stream",
        FormatKind::Standard,
        decoder,
    ));
    registry
}

/// Table over a store with the default configuration.
pub fn table(
    connection: Arc<dyn DataConnection>,
    decoder: Arc<dyn RasterDecoder>,
) -> CoverageCatalogTable {
    CoverageCatalogTable::new(connection, raw_registry(decoder), &CatalogConfig::default())
}

/// Table with pyramid overviews enabled down to 64 pixels.
pub fn table_with_small_pyramids(
    connection: Arc<dyn DataConnection>,
    decoder: Arc<dyn RasterDecoder>,
) -> CoverageCatalogTable {
    let mut config = CatalogConfig::default();
    config.pyramid.min_dimension = 64;
    CoverageCatalogTable::new(connection, raw_registry(decoder), &config)
}
