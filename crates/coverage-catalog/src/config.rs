//! Catalog configuration.

use serde::{Deserialize, Serialize};

use coverage_common::{CatalogError, CatalogResult};

/// Pyramid generation parameters for mosaicked coverages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PyramidSettings {
    /// Stop emitting overview levels once either mosaic dimension would
    /// drop below this many pixels.
    pub min_dimension: usize,
    /// Scale factor between consecutive pyramid levels.
    pub downscale_factor: usize,
}

impl Default for PyramidSettings {
    fn default() -> Self {
        Self {
            min_dimension: 512,
            downscale_factor: 2,
        }
    }
}

/// Catalog-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Aggregate resident-raster budget, in MiB.
    pub memory_threshold_mb: u64,
    /// Number of interned geometries kept in the LRU cache.
    pub geometry_cache_entries: usize,
    /// Mosaic pyramid parameters.
    pub pyramid: PyramidSettings,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            memory_threshold_mb: 128,
            geometry_cache_entries: 256,
            pyramid: PyramidSettings::default(),
        }
    }
}

impl CatalogConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("COVERAGE_CATALOG_MEMORY_MB") {
            if let Ok(n) = val.parse() {
                config.memory_threshold_mb = n;
            }
        }

        if let Ok(val) = std::env::var("COVERAGE_CATALOG_GEOMETRY_CACHE") {
            if let Ok(n) = val.parse() {
                config.geometry_cache_entries = n;
            }
        }

        if let Ok(val) = std::env::var("COVERAGE_CATALOG_PYRAMID_MIN_DIMENSION") {
            if let Ok(n) = val.parse() {
                config.pyramid.min_dimension = n;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CatalogResult<()> {
        if self.memory_threshold_mb == 0 {
            return Err(CatalogError::Config(
                "memory_threshold_mb must be > 0".to_string(),
            ));
        }
        if self.geometry_cache_entries == 0 {
            return Err(CatalogError::Config(
                "geometry_cache_entries must be > 0".to_string(),
            ));
        }
        if self.pyramid.downscale_factor < 2 {
            return Err(CatalogError::Config(
                "pyramid downscale_factor must be >= 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Memory budget in bytes.
    pub fn memory_threshold_bytes(&self) -> u64 {
        self.memory_threshold_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = CatalogConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_threshold_bytes(), 128 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = CatalogConfig::default();
        config.memory_threshold_mb = 0;
        assert!(config.validate().is_err());

        let mut config = CatalogConfig::default();
        config.pyramid.downscale_factor = 1;
        assert!(config.validate().is_err());
    }
}
