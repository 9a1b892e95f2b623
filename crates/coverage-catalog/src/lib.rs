//! Grid-coverage catalog and tiled-mosaic resolution engine.
//!
//! This crate resolves a spatio-temporal-resolution query against a catalog
//! of raster coverages into the minimal set of entries to read:
//!
//! ```text
//! Caller
//!   │  layer + time window + bbox + resolution
//!   ▼
//! CoverageCatalogTable::entries()
//!   │
//!   ├─► DataConnection: candidate rows, end-time ascending
//!   │
//!   ├─► GridGeometryModel interning (one instance per spatial footprint)
//!   │
//!   ├─► resolution dedup (single linear pass over same-cell runs)
//!   │
//!   └─► MosaicAssembler: merge same-time adjacent tiles into pyramids
//!            │
//!            ▼
//!       Vec<Arc<CoverageEntry>>
//!            │  entry.coverage().await
//!            ▼
//!       per-format decode lock ─► RasterDecoder ─► CoveragePool budget
//! ```
//!
//! Decoded rasters are memoized per entry through an explicit
//! resident/evicted slot; [`CoveragePool`] canonicalizes value-equal entries
//! and bounds aggregate resident raster memory.

pub mod affine;
pub mod config;
pub mod entry;
pub mod format;
pub mod geometry;
pub mod mosaic;
pub mod pool;
pub mod region;
pub mod settings;
pub mod table;

pub use affine::Affine2D;
pub use config::{CatalogConfig, PyramidSettings};
pub use entry::{Coverage, CoverageEntry, CoverageInput, EntryKey};
pub use format::{DecodeInput, DecodeRequest, Format, FormatKind, FormatRegistry, RasterDecoder};
pub use geometry::GridGeometryModel;
pub use mosaic::{MosaicAssembler, Tile, TileManager};
pub use pool::{CoveragePool, PoolStats};
pub use region::{Envelope, PixelRect, ReadRegion, MIN_SIZE};
pub use settings::{CoverageSettings, Operation};
pub use table::CoverageCatalogTable;
