//! Synthetic grid generators with predictable, verifiable values.

use coverage_common::Raster;

/// Grid where each cell is `col * 1000 + row`, row-major.
///
/// Makes read/window/subsample verification trivial: the value tells you
/// exactly which source cell it came from.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[0], 0.0); // col=0, row=0
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0); // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Sea-surface-temperature-like gradient in degrees Celsius.
///
/// Warm (about 30) at the equator row, cold (about -2) at the poles.
pub fn create_sst_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        let latitude_factor = {
            let centered = (row as f32 / height.max(1) as f32 - 0.5).abs() * 2.0;
            1.0 - centered
        };
        for _ in 0..width {
            data.push(-2.0 + latitude_factor * 32.0);
        }
    }
    data
}

/// Raster filled with a constant value, 4 bytes per sample.
pub fn constant_raster(width: usize, height: usize, value: f32) -> Raster {
    Raster::new(width, height, 1, 4, vec![value; width * height])
}

/// Raster carrying the [`create_test_grid`] pattern.
pub fn pattern_raster(width: usize, height: usize) -> Raster {
    Raster::new(width, height, 1, 4, create_test_grid(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_pattern() {
        let grid = create_test_grid(4, 3);
        assert_eq!(grid[2 * 4 + 3], 3003.0); // col 3, row 2
    }

    #[test]
    fn test_sst_range() {
        let grid = create_sst_grid(8, 16);
        for v in &grid {
            assert!(*v >= -2.0 && *v <= 30.0 + 1e-3);
        }
        // Equator rows are warmer than pole rows.
        assert!(grid[8 * 8] > grid[0]);
    }

    #[test]
    fn test_pattern_raster_samples() {
        let raster = pattern_raster(6, 6);
        assert_eq!(raster.sample(5, 2, 0), Some(5002.0));
    }
}
