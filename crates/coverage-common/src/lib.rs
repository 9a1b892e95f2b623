//! Common types shared across the coverage-catalog workspace.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod layer;
pub mod raster;
pub mod time;

pub use bbox::BoundingBox;
pub use crs::{CrsCode, CrsTransform};
pub use error::{CatalogError, CatalogResult, ReadError, ReadResult};
pub use layer::{DerivedModel, Layer, LayerBuilder, NamingConvention, Series, SeriesSpec};
pub use raster::Raster;
pub use time::TimeRange;
