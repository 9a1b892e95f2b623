//! Error taxonomy for the coverage catalog.
//!
//! Two categories are kept apart on purpose: configuration/record
//! inconsistencies surface as [`CatalogError`] from selection and entry
//! construction, while decode failures surface as [`ReadError`] from the
//! read path. Cancellation is not an error in either category; an aborted
//! read reports an empty result instead.

use thiserror::Error;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Result type alias for decode operations.
pub type ReadResult<T> = Result<T, ReadError>;

/// Configuration and record-inconsistency errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("layer not found: {0}")]
    LayerNotFound(String),

    #[error("series not found: {0}")]
    SeriesNotFound(String),

    #[error("duplicate series name '{series}' in layer '{layer}'")]
    DuplicateSeries { layer: String, series: String },

    #[error("ambiguous series selection for layer '{layer}': {candidates:?}")]
    AmbiguousSeries {
        layer: String,
        candidates: Vec<String>,
    },

    #[error("no decoder registered for format: {0}")]
    NoDecoder(String),

    #[error("malformed coverage record '{record}': {message}")]
    MalformedRecord { record: String, message: String },

    #[error("coverage '{0}' has an empty grid geometry")]
    EmptyGeometry(String),

    #[error("inverted time range for coverage '{coverage}'")]
    InvertedTimeRange { coverage: String },

    #[error("spatial extent not found: {0}")]
    ExtentNotFound(String),

    #[error("unsupported spatial reference: SRID {0}")]
    UnsupportedSrid(i32),

    #[error("store returned rows out of end-time order near '{0}'")]
    UnorderedRows(String),

    #[error("layer fallback chain contains a cycle at '{0}'")]
    FallbackCycle(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Decode failures crossing a catalog-level call.
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// Decode-path errors.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read coverage data: {0}")]
    Io(String),

    /// Declared grid size disagrees with what the decoder produced.
    #[error("declared size {declared_width}x{declared_height} does not match decoded size {actual_width}x{actual_height}")]
    SizeMismatch {
        declared_width: usize,
        declared_height: usize,
        actual_width: usize,
        actual_height: usize,
    },

    #[error("malformed {format} stream: {message}")]
    MalformedStream { format: String, message: String },

    /// Out of memory while materializing the raster. The read path retries
    /// once after flushing the pool before letting this propagate.
    #[error("resource exhaustion while materializing a {width}x{height} raster")]
    ResourceExhausted { width: usize, height: usize },
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        ReadError::Io(err.to_string())
    }
}
