//! Layers and their series.
//!
//! A layer is a named collection of series; each series pairs a file/URL
//! naming convention with a data format. Series hold a back reference to
//! their owning layer, so the pair is built in one step through
//! [`Arc::new_cyclic`] and both sides stay immutable afterwards.

use chrono::Duration;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::error::{CatalogError, CatalogResult};

/// A named collection of coverage series.
#[derive(Debug)]
pub struct Layer {
    /// Layer name, unique within the catalog.
    pub name: String,
    /// Thematic tag (e.g. "Sea Surface Temperature").
    pub thematic: Option<String>,
    /// Acquisition procedure tag.
    pub procedure: Option<String>,
    /// Nominal time between successive acquisitions.
    pub period: Option<Duration>,
    /// Layer consulted when this one has no data for a query window.
    pub fallback: Option<Arc<Layer>>,
    /// Optional derived-model attachment.
    pub derived: Option<DerivedModel>,
    series: Vec<Arc<Series>>,
}

/// A model derived from a layer's data (e.g. an anomaly product).
#[derive(Debug, Clone)]
pub struct DerivedModel {
    pub name: String,
    /// Operation applied when materializing the derived product.
    pub operation: Option<String>,
}

/// One series within a layer: a naming convention plus a format name.
#[derive(Debug)]
pub struct Series {
    layer: Weak<Layer>,
    /// Series name, unique within its layer.
    pub name: String,
    /// Name of the format the series' files are stored in.
    pub format: String,
    /// How filenames map to local paths and remote URIs.
    pub naming: NamingConvention,
}

impl Series {
    /// The owning layer. `None` only while the layer itself is being dropped.
    pub fn layer(&self) -> Option<Arc<Layer>> {
        self.layer.upgrade()
    }

    /// Local file path for a stored filename.
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.naming.file_path(filename)
    }

    /// Remote URI for a stored filename, when a host is configured.
    pub fn uri(&self, filename: &str) -> Option<String> {
        self.naming.uri(filename)
    }
}

/// File/URL composition rules for a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConvention {
    /// Local root directory.
    pub root: PathBuf,
    /// Subdirectory below the root (may be empty).
    pub subdirectory: String,
    /// Filename extension without the dot.
    pub extension: String,
    /// Optional remote host for URI composition.
    pub host: Option<String>,
    /// URI scheme used with `host`.
    pub scheme: String,
}

impl NamingConvention {
    pub fn new(
        root: impl Into<PathBuf>,
        subdirectory: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            subdirectory: subdirectory.into(),
            extension: extension.into(),
            host: None,
            scheme: "https".to_string(),
        }
    }

    /// Attach a remote host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    fn relative(&self, filename: &str) -> String {
        let name = if self.extension.is_empty() {
            filename.to_string()
        } else {
            format!("{}.{}", filename, self.extension)
        };
        if self.subdirectory.is_empty() {
            name
        } else {
            format!("{}/{}", self.subdirectory.trim_end_matches('/'), name)
        }
    }

    /// Compose a local file path.
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.root.join(self.relative(filename))
    }

    /// Compose a remote URI, if a host is configured.
    pub fn uri(&self, filename: &str) -> Option<String> {
        self.host
            .as_ref()
            .map(|host| format!("{}://{}/{}", self.scheme, host, self.relative(filename)))
    }
}

/// Specification for one series, consumed by [`LayerBuilder`].
#[derive(Debug, Clone)]
pub struct SeriesSpec {
    pub name: String,
    pub format: String,
    pub naming: NamingConvention,
}

impl Layer {
    /// Start building a layer.
    pub fn builder(name: impl Into<String>) -> LayerBuilder {
        LayerBuilder::new(name)
    }

    /// The series belonging to this layer.
    pub fn series(&self) -> &[Arc<Series>] {
        &self.series
    }

    /// Find a series by name.
    pub fn get_series(&self, name: &str) -> Option<&Arc<Series>> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Walk the fallback chain starting at this layer, rejecting cycles.
    ///
    /// The returned list starts with `self`. A repeated layer name anywhere
    /// in the chain is a configuration fault, not a traversal detail.
    pub fn fallback_chain(self: &Arc<Layer>) -> CatalogResult<Vec<Arc<Layer>>> {
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut current = Some(Arc::clone(self));

        while let Some(layer) = current {
            if !seen.insert(layer.name.clone()) {
                return Err(CatalogError::FallbackCycle(layer.name.clone()));
            }
            current = layer.fallback.clone();
            chain.push(layer);
        }

        Ok(chain)
    }
}

/// Builds a [`Layer`] and its [`Series`] in one shot.
///
/// Series need a reference to their owning layer, which would otherwise
/// force a mutable post-construction setter; `build` ties the knot with
/// `Arc::new_cyclic` instead.
#[derive(Debug, Default)]
pub struct LayerBuilder {
    name: String,
    thematic: Option<String>,
    procedure: Option<String>,
    period: Option<Duration>,
    fallback: Option<Arc<Layer>>,
    derived: Option<DerivedModel>,
    series: Vec<SeriesSpec>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn thematic(mut self, thematic: impl Into<String>) -> Self {
        self.thematic = Some(thematic.into());
        self
    }

    pub fn procedure(mut self, procedure: impl Into<String>) -> Self {
        self.procedure = Some(procedure.into());
        self
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    pub fn fallback(mut self, layer: Arc<Layer>) -> Self {
        self.fallback = Some(layer);
        self
    }

    pub fn derived(mut self, derived: DerivedModel) -> Self {
        self.derived = Some(derived);
        self
    }

    pub fn series(mut self, spec: SeriesSpec) -> Self {
        self.series.push(spec);
        self
    }

    /// Build the immutable layer, validating series-name uniqueness.
    pub fn build(self) -> CatalogResult<Arc<Layer>> {
        let mut names = std::collections::HashSet::new();
        for spec in &self.series {
            if !names.insert(spec.name.as_str()) {
                return Err(CatalogError::DuplicateSeries {
                    layer: self.name.clone(),
                    series: spec.name.clone(),
                });
            }
        }

        let Self {
            name,
            thematic,
            procedure,
            period,
            fallback,
            derived,
            series,
        } = self;

        Ok(Arc::new_cyclic(|weak: &Weak<Layer>| Layer {
            name,
            thematic,
            procedure,
            period,
            fallback,
            derived,
            series: series
                .into_iter()
                .map(|spec| {
                    Arc::new(Series {
                        layer: weak.clone(),
                        name: spec.name,
                        format: spec.format,
                        naming: spec.naming,
                    })
                })
                .collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> SeriesSpec {
        SeriesSpec {
            name: name.to_string(),
            format: "netcdf".to_string(),
            naming: NamingConvention::new("/data", "sst", "nc"),
        }
    }

    #[test]
    fn test_series_back_reference() {
        let layer = Layer::builder("SST").series(spec("sst-1km")).build().unwrap();
        let series = layer.get_series("sst-1km").unwrap();
        assert_eq!(series.layer().unwrap().name, "SST");
    }

    #[test]
    fn test_duplicate_series_rejected() {
        let err = Layer::builder("SST")
            .series(spec("a"))
            .series(spec("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateSeries { .. }));
    }

    #[test]
    fn test_naming_convention_paths() {
        let naming = NamingConvention::new("/data", "sst/daily", "nc").with_host("data.example.org");
        assert_eq!(
            naming.file_path("20190601"),
            PathBuf::from("/data/sst/daily/20190601.nc")
        );
        assert_eq!(
            naming.uri("20190601").unwrap(),
            "https://data.example.org/sst/daily/20190601.nc"
        );
    }

    #[test]
    fn test_fallback_chain() {
        let coarse = Layer::builder("SST-4km").build().unwrap();
        let fine = Layer::builder("SST-1km")
            .fallback(Arc::clone(&coarse))
            .build()
            .unwrap();

        let chain = fine.fallback_chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name, "SST-1km");
        assert_eq!(chain[1].name, "SST-4km");
    }

    #[test]
    fn test_fallback_cycle_rejected() {
        // A cycle cannot be built from immutable layers directly, but a
        // chain that repeats a name is rejected the same way.
        let a = Layer::builder("A").build().unwrap();
        let shadow = Layer::builder("A").fallback(a).build().unwrap();
        let err = shadow.fallback_chain().unwrap_err();
        assert!(matches!(err, CatalogError::FallbackCycle(_)));
    }
}
