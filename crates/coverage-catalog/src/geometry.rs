//! Immutable grid geometry: size, grid-to-CRS transform, vertical axis.

use nalgebra::DMatrix;
use std::sync::OnceLock;

use coverage_common::{BoundingBox, CatalogError, CatalogResult, CrsCode};
use coverage_store::ExtentRow;

use crate::affine::Affine2D;
use crate::region::PixelRect;

/// Spatial, vertical and temporal grid geometry of a coverage.
///
/// One instance is shared by every entry with the same footprint; the
/// catalog interns models by [`GridGeometryModel::key`]. Immutable after
/// construction; the geographic bounds are computed lazily and cached.
#[derive(Debug)]
pub struct GridGeometryModel {
    width: usize,
    height: usize,
    depth: Option<usize>,
    affine: Affine2D,
    vertical_ordinates: Vec<f64>,
    horizontal_srid: i32,
    vertical_srid: Option<i32>,
    bounds: OnceLock<BoundingBox>,
}

/// Structural identity of a geometry, used for interning and entry keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeometryKey {
    size: (usize, usize, Option<usize>),
    affine: [u64; 6],
    ordinates: Vec<u64>,
    horizontal_srid: i32,
    vertical_srid: Option<i32>,
}

impl GridGeometryModel {
    /// Create a geometry.
    ///
    /// # Panics
    ///
    /// An empty grid range, or a vertical-ordinate array whose length
    /// disagrees with `depth`, is a programming error: callers validate
    /// records before constructing geometries.
    pub fn new(
        width: usize,
        height: usize,
        depth: Option<usize>,
        affine: Affine2D,
        vertical_ordinates: Vec<f64>,
        horizontal_srid: i32,
        vertical_srid: Option<i32>,
    ) -> Self {
        assert!(width > 0 && height > 0, "grid range must not be empty");
        if let Some(depth) = depth {
            assert_eq!(
                vertical_ordinates.len(),
                depth,
                "vertical ordinate count must match the vertical grid range"
            );
        }
        Self {
            width,
            height,
            depth,
            affine,
            vertical_ordinates,
            horizontal_srid,
            vertical_srid,
            bounds: OnceLock::new(),
        }
    }

    /// Build from a store extent record, validating it first.
    pub fn from_extent(row: &ExtentRow) -> CatalogResult<Self> {
        if row.width == 0 || row.height == 0 {
            return Err(CatalogError::EmptyGeometry(row.id.clone()));
        }
        if let Some(depth) = row.depth {
            if row.vertical_ordinates.len() != depth {
                return Err(CatalogError::MalformedRecord {
                    record: row.id.clone(),
                    message: format!(
                        "{} vertical ordinates for depth {}",
                        row.vertical_ordinates.len(),
                        depth
                    ),
                });
            }
        }
        // Reject SRIDs the transform layer cannot handle up front.
        CrsCode::from_srid(row.horizontal_srid)?;

        Ok(Self::new(
            row.width,
            row.height,
            row.depth,
            Affine2D::new(
                row.scale_x,
                row.shear_x,
                row.translate_x,
                row.shear_y,
                row.scale_y,
                row.translate_y,
            ),
            row.vertical_ordinates.clone(),
            row.horizontal_srid,
            row.vertical_srid,
        ))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    pub fn affine(&self) -> &Affine2D {
        &self.affine
    }

    pub fn vertical_ordinates(&self) -> &[f64] {
        &self.vertical_ordinates
    }

    pub fn horizontal_srid(&self) -> i32 {
        self.horizontal_srid
    }

    pub fn vertical_srid(&self) -> Option<i32> {
        self.vertical_srid
    }

    /// Horizontal CRS code.
    pub fn crs(&self) -> CrsCode {
        // Validated at construction; the fallback only guards hand-built
        // test geometries with exotic SRIDs.
        CrsCode::from_srid(self.horizontal_srid).unwrap_or(CrsCode::Epsg4326)
    }

    /// Geographic bounding box of the full grid, in the horizontal CRS.
    pub fn bounds(&self) -> BoundingBox {
        *self.bounds.get_or_init(|| {
            self.affine
                .transform_rect(0.0, 0.0, self.width as f64, self.height as f64)
        })
    }

    /// True iff the geographic footprint is empty.
    pub fn is_empty(&self) -> bool {
        self.bounds().is_empty()
    }

    /// Pixel size along each CRS axis.
    pub fn resolution(&self) -> (f64, f64) {
        self.affine.pixel_size()
    }

    /// Homogeneous grid-to-CRS matrix of size `(dimensions+1)^2`.
    ///
    /// The horizontal block is the affine re-based to `clip` at the given
    /// subsampling. The third row, when `dimensions >= 3`, carries a
    /// vertical scale/offset from the ordinate interval around
    /// `vertical_index`: the interval toward the next slice, or the single
    /// adjacent interval at the upper boundary. With fewer than two
    /// ordinates the vertical scale is zero.
    pub fn grid_to_crs(
        &self,
        clip: Option<PixelRect>,
        subsampling: (usize, usize),
        dimensions: usize,
        vertical_index: usize,
    ) -> DMatrix<f64> {
        assert!(dimensions >= 2, "at least two horizontal dimensions");
        let n = dimensions + 1;
        let mut m = DMatrix::<f64>::identity(n, n);

        let (origin_x, origin_y) = match clip {
            Some(rect) => (rect.x as f64, rect.y as f64),
            None => (0.0, 0.0),
        };
        let windowed = self.affine.windowed(
            origin_x,
            origin_y,
            subsampling.0.max(1) as f64,
            subsampling.1.max(1) as f64,
        );

        m[(0, 0)] = windowed.scale_x;
        m[(0, 1)] = windowed.shear_x;
        m[(0, n - 1)] = windowed.translate_x;
        m[(1, 0)] = windowed.shear_y;
        m[(1, 1)] = windowed.scale_y;
        m[(1, n - 1)] = windowed.translate_y;

        if dimensions >= 3 {
            let (scale, offset) = self.vertical_interval(vertical_index);
            m[(2, 2)] = scale;
            m[(2, n - 1)] = offset;
        }

        m
    }

    /// Vertical (scale, offset) for a slice index.
    fn vertical_interval(&self, vertical_index: usize) -> (f64, f64) {
        let z = &self.vertical_ordinates;
        match z.len() {
            0 => (0.0, 0.0),
            1 => (0.0, z[0]),
            len => {
                let k = vertical_index.min(len - 1);
                let scale = if k + 1 < len {
                    z[k + 1] - z[k]
                } else {
                    z[k] - z[k - 1]
                };
                (scale, z[k])
            }
        }
    }

    /// 0-based index of the vertical ordinate nearest to `z`.
    ///
    /// `None` for non-finite `z` or when the geometry has no vertical axis.
    /// Ties keep the first ordinate scanned.
    pub fn altitude_index(&self, z: f64) -> Option<usize> {
        if !z.is_finite() || self.vertical_ordinates.is_empty() {
            return None;
        }
        let mut best = 0;
        let mut best_delta = f64::INFINITY;
        for (index, ordinate) in self.vertical_ordinates.iter().enumerate() {
            let delta = (ordinate - z).abs();
            if delta < best_delta {
                best = index;
                best_delta = delta;
            }
        }
        Some(best)
    }

    /// Structural identity for interning.
    pub fn key(&self) -> GeometryKey {
        GeometryKey {
            size: (self.width, self.height, self.depth),
            affine: self.affine.key(),
            ordinates: self
                .vertical_ordinates
                .iter()
                .map(|v| v.to_bits())
                .collect(),
            horizontal_srid: self.horizontal_srid,
            vertical_srid: self.vertical_srid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry_3d() -> GridGeometryModel {
        GridGeometryModel::new(
            512,
            256,
            Some(4),
            Affine2D::scale_offset(0.25, -0.25, -180.0, 90.0),
            vec![0.0, 10.0, 25.0, 50.0],
            4326,
            Some(5714),
        )
    }

    #[test]
    fn test_bounds_cached() {
        let g = geometry_3d();
        let b = g.bounds();
        assert!((b.min_x + 180.0).abs() < 1e-12);
        assert!((b.max_x + 52.0).abs() < 1e-12);
        assert!((b.max_y - 90.0).abs() < 1e-12);
        assert!((b.min_y - 26.0).abs() < 1e-12);
        assert!(!g.is_empty());
    }

    #[test]
    fn test_grid_to_crs_full_grid() {
        let g = geometry_3d();
        let m = g.grid_to_crs(None, (1, 1), 2, 0);
        assert_eq!(m.nrows(), 3);
        assert_eq!(m[(0, 0)], 0.25);
        assert_eq!(m[(1, 1)], -0.25);
        assert_eq!(m[(0, 2)], -180.0);
        assert_eq!(m[(1, 2)], 90.0);
    }

    #[test]
    fn test_grid_to_crs_windowed_and_vertical() {
        let g = geometry_3d();
        let clip = PixelRect::new(64, 32, 128, 128);
        let m = g.grid_to_crs(Some(clip), (2, 2), 3, 1);

        assert_eq!(m.nrows(), 4);
        assert_eq!(m[(0, 0)], 0.5); // 0.25 * 2
        assert_eq!(m[(0, 3)], -180.0 + 64.0 * 0.25);
        assert_eq!(m[(1, 3)], 90.0 - 32.0 * 0.25);
        // Interval between ordinates 1 and 2.
        assert_eq!(m[(2, 2)], 15.0);
        assert_eq!(m[(2, 3)], 10.0);
    }

    #[test]
    fn test_vertical_interval_at_boundary() {
        let g = geometry_3d();
        let m = g.grid_to_crs(None, (1, 1), 3, 3);
        // Last slice uses the single adjacent interval below it.
        assert_eq!(m[(2, 2)], 25.0);
        assert_eq!(m[(2, 3)], 50.0);
    }

    #[test]
    fn test_vertical_scale_zero_with_single_ordinate() {
        let g = GridGeometryModel::new(
            16,
            16,
            Some(1),
            Affine2D::identity(),
            vec![5.0],
            4326,
            None,
        );
        let m = g.grid_to_crs(None, (1, 1), 3, 0);
        assert_eq!(m[(2, 2)], 0.0);
        assert_eq!(m[(2, 3)], 5.0);
    }

    #[test]
    fn test_altitude_index() {
        let g = geometry_3d();
        assert_eq!(g.altitude_index(9.0), Some(1));
        assert_eq!(g.altitude_index(-100.0), Some(0));
        assert_eq!(g.altitude_index(1000.0), Some(3));
        // Tie at 5.0 between ordinates 0.0 and 10.0: first scanned wins.
        assert_eq!(g.altitude_index(5.0), Some(0));
        assert_eq!(g.altitude_index(f64::NAN), None);
        assert_eq!(g.altitude_index(f64::INFINITY), None);
    }

    #[test]
    #[should_panic(expected = "vertical ordinate count")]
    fn test_ordinate_length_mismatch_panics() {
        GridGeometryModel::new(
            8,
            8,
            Some(3),
            Affine2D::identity(),
            vec![0.0, 1.0],
            4326,
            None,
        );
    }

    #[test]
    fn test_interning_key_equality() {
        let a = geometry_3d();
        let b = geometry_3d();
        assert_eq!(a.key(), b.key());

        let c = GridGeometryModel::new(
            512,
            256,
            Some(4),
            Affine2D::scale_offset(0.5, -0.5, -180.0, 90.0),
            vec![0.0, 10.0, 25.0, 50.0],
            4326,
            Some(5714),
        );
        assert_ne!(a.key(), c.key());
    }
}
