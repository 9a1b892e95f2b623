//! Decoded raster payload.

use serde::{Deserialize, Serialize};

/// A decoded raster: sample values in row-major order plus metadata.
///
/// Values are held as `f32` regardless of the on-disk sample type; the
/// original sample width is kept so the pool can estimate the decode cost
/// rather than the in-memory footprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Number of bands interleaved per pixel.
    pub bands: usize,
    /// Bytes per sample in the source format (1, 2, 4, ...).
    pub bytes_per_sample: usize,
    /// Sample values, row-major, band-interleaved.
    pub data: Vec<f32>,
    /// Value marking missing data, if the format declares one.
    pub fill_value: Option<f32>,
}

impl Raster {
    /// Create a raster, checking that the buffer matches the declared shape.
    pub fn new(
        width: usize,
        height: usize,
        bands: usize,
        bytes_per_sample: usize,
        data: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(data.len(), width * height * bands);
        Self {
            width,
            height,
            bands,
            bytes_per_sample,
            data,
            fill_value: None,
        }
    }

    /// Attach a fill value.
    pub fn with_fill_value(mut self, fill: f32) -> Self {
        self.fill_value = Some(fill);
        self
    }

    /// Estimated source-data footprint in bytes.
    ///
    /// This is the figure the memory budget tracks: width x height x sample
    /// width, matching what a reader materializes before conversion.
    pub fn size_bytes(&self) -> u64 {
        (self.width as u64) * (self.height as u64) * (self.bytes_per_sample as u64)
    }

    /// Sample value at (column, row) in band `band`.
    pub fn sample(&self, i: usize, j: usize, band: usize) -> Option<f32> {
        if i >= self.width || j >= self.height || band >= self.bands {
            return None;
        }
        Some(self.data[(j * self.width + i) * self.bands + band])
    }

    /// Apply a per-sample function in place.
    pub fn map_in_place<F: Fn(f32) -> f32>(&mut self, f: F) {
        for v in &mut self.data {
            *v = f(*v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_estimate_uses_sample_width() {
        let r = Raster::new(100, 50, 1, 2, vec![0.0; 5000]);
        assert_eq!(r.size_bytes(), 100 * 50 * 2);
    }

    #[test]
    fn test_sample_access() {
        let mut data = vec![0.0; 4 * 3];
        data[2 * 4 + 1] = 7.5; // col 1, row 2
        let r = Raster::new(4, 3, 1, 4, data);
        assert_eq!(r.sample(1, 2, 0), Some(7.5));
        assert_eq!(r.sample(4, 0, 0), None);
    }
}
