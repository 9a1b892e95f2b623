//! Data formats, raster decoders, and per-format decode serialization.
//!
//! Each format owns one async decode lock: readers for the same format are
//! pooled resources, so at most one decode per format runs at a time. While
//! a decode is in flight its cancellation flag is published under the
//! entry's key, letting any task abort it without holding the decode lock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use coverage_common::{CatalogError, CatalogResult, Raster, ReadResult};

use crate::entry::EntryKey;
use crate::region::ReadRegion;

/// Payload layout of a format.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatKind {
    /// Self-describing container; the decoder reads dimensions from it.
    Standard,
    /// Headerless samples; dimensions and sample width are declared by the
    /// catalog and validated against the stream length after decoding.
    Raw {
        width: usize,
        height: usize,
        bytes_per_sample: usize,
    },
    /// NetCDF container; decodes one named variable.
    NetCdf { variable: String },
}

impl FormatKind {
    /// NetCDF variable the format decodes, when it names one.
    pub fn variable(&self) -> Option<&str> {
        match self {
            FormatKind::NetCdf { variable } => Some(variable),
            _ => None,
        }
    }

    /// Grid dimensions a headerless format declares.
    pub fn declared_dimensions(&self) -> Option<(usize, usize)> {
        match self {
            FormatKind::Raw { width, height, .. } => Some((*width, *height)),
            _ => None,
        }
    }
}

/// Where the payload lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DecodeInput {
    Path(PathBuf),
    Uri(String),
}

impl DecodeInput {
    /// Stable identity string, used in entry keys and log messages.
    pub fn id(&self) -> String {
        match self {
            DecodeInput::Path(p) => p.to_string_lossy().into_owned(),
            DecodeInput::Uri(u) => u.clone(),
        }
    }
}

impl fmt::Display for DecodeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// One decode: source, window, slice and band selection.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub input: DecodeInput,
    pub region: ReadRegion,
    /// 1-based slice index within the source.
    pub slice_index: u32,
    /// 1-based band index; 0 decodes all bands.
    pub band: u32,
    /// NetCDF variable to decode, when the format names one.
    pub variable: Option<String>,
}

/// A raster decoder for one format.
///
/// Implementations poll `cancel` between I/O chunks and return early with
/// whatever error is convenient when it flips; the caller translates an
/// aborted decode into an empty result, so the error value is never seen.
#[async_trait]
pub trait RasterDecoder: Send + Sync {
    async fn decode(&self, request: &DecodeRequest, cancel: &AtomicBool) -> ReadResult<Raster>;
}

/// A registered data format: metadata, decoder, and decode serialization.
pub struct Format {
    /// Format name as stored in series records.
    pub name: String,
    /// MIME type advertised for the format.
    pub mime: String,
    pub kind: FormatKind,
    decoder: Arc<dyn RasterDecoder>,
    lock: tokio::sync::Mutex<()>,
    inflight: Mutex<HashMap<EntryKey, Arc<AtomicBool>>>,
}

impl Format {
    pub fn new(
        name: impl Into<String>,
        mime: impl Into<String>,
        kind: FormatKind,
        decoder: Arc<dyn RasterDecoder>,
    ) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            kind,
            decoder,
            lock: tokio::sync::Mutex::new(()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn decoder(&self) -> &Arc<dyn RasterDecoder> {
        &self.decoder
    }

    /// The format's decode lock. Held for the duration of one decode.
    pub fn lock(&self) -> &tokio::sync::Mutex<()> {
        &self.lock
    }

    /// Publish a cancellation flag for an in-flight decode.
    ///
    /// The flag stays visible to [`Format::abort`] until the returned guard
    /// drops. Callers must hold the decode lock when beginning a decode.
    pub fn begin(self: &Arc<Self>, key: EntryKey) -> InflightGuard {
        let flag = Arc::new(AtomicBool::new(false));
        self.inflight
            .lock()
            .expect("inflight map poisoned")
            .insert(key.clone(), Arc::clone(&flag));
        InflightGuard {
            format: Arc::clone(self),
            key,
            flag,
        }
    }

    /// Request cancellation of the decode registered under `key`.
    ///
    /// A no-op when no decode for that key is in flight.
    pub fn abort(&self, key: &EntryKey) {
        if let Some(flag) = self.inflight.lock().expect("inflight map poisoned").get(key) {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Format")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Keeps a decode's cancellation flag published while the decode runs.
pub struct InflightGuard {
    format: Arc<Format>,
    key: EntryKey,
    flag: Arc<AtomicBool>,
}

impl InflightGuard {
    /// The flag decoders poll.
    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.flag
    }

    /// True when an abort was requested.
    pub fn cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.format
            .inflight
            .lock()
            .expect("inflight map poisoned")
            .remove(&self.key);
    }
}

/// Formats known to the catalog, looked up by series format name.
#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: HashMap<String, Arc<Format>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, format: Format) {
        self.formats.insert(format.name.clone(), Arc::new(format));
    }

    /// Resolve a format by name.
    pub fn get(&self, name: &str) -> CatalogResult<Arc<Format>> {
        self.formats
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NoDecoder(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopDecoder;

    #[async_trait]
    impl RasterDecoder for NoopDecoder {
        async fn decode(&self, _: &DecodeRequest, _: &AtomicBool) -> ReadResult<Raster> {
            Ok(Raster::new(1, 1, 1, 4, vec![0.0]))
        }
    }

    fn format() -> Arc<Format> {
        Arc::new(Format::new(
            "netcdf",
            "application/x-netcdf",
            FormatKind::NetCdf {
                variable: "sst".to_string(),
            },
            Arc::new(NoopDecoder),
        ))
    }

    fn key(name: &str) -> EntryKey {
        EntryKey::for_tests(name)
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = FormatRegistry::new();
        registry.register(Format::new(
            "raw",
            "application/octet-stream",
            FormatKind::Raw {
                width: 8,
                height: 8,
                bytes_per_sample: 2,
            },
            Arc::new(NoopDecoder),
        ));

        assert!(registry.get("raw").is_ok());
        let err = registry.get("grib2").unwrap_err();
        assert!(matches!(err, CatalogError::NoDecoder(_)));
    }

    #[test]
    fn test_kind_payload_accessors() {
        assert_eq!(format().kind.variable(), Some("sst"));
        assert_eq!(FormatKind::Standard.variable(), None);
        assert_eq!(FormatKind::Standard.declared_dimensions(), None);

        let raw = FormatKind::Raw {
            width: 8,
            height: 4,
            bytes_per_sample: 2,
        };
        assert_eq!(raw.declared_dimensions(), Some((8, 4)));
        assert_eq!(raw.variable(), None);
    }

    #[test]
    fn test_abort_reaches_inflight_decode() {
        let format = format();
        let guard = format.begin(key("a"));
        assert!(!guard.cancelled());

        format.abort(&key("a"));
        assert!(guard.cancelled());

        // A different key is untouched.
        let other = format.begin(key("b"));
        format.abort(&key("a"));
        assert!(!other.cancelled());
    }

    #[test]
    fn test_abort_after_guard_drop_is_noop() {
        let format = format();
        {
            let _guard = format.begin(key("a"));
        }
        // Flag is gone; nothing to set, nothing to panic over.
        format.abort(&key("a"));
        let fresh = format.begin(key("a"));
        assert!(!fresh.cancelled());
    }
}
