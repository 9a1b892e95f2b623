//! Immutable 2-D affine transforms.
//!
//! Grid-to-CRS transforms are shared by every entry using the same spatial
//! footprint, so they are value types with copy-on-write helpers rather than
//! matrices mutated in place.

use coverage_common::BoundingBox;

/// An affine transform from grid (column, row) to CRS (x, y):
///
/// ```text
/// x = scale_x * i + shear_x * j + translate_x
/// y = shear_y * i + scale_y * j + translate_y
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine2D {
    pub scale_x: f64,
    pub shear_x: f64,
    pub translate_x: f64,
    pub shear_y: f64,
    pub scale_y: f64,
    pub translate_y: f64,
}

impl Affine2D {
    pub fn new(
        scale_x: f64,
        shear_x: f64,
        translate_x: f64,
        shear_y: f64,
        scale_y: f64,
        translate_y: f64,
    ) -> Self {
        Self {
            scale_x,
            shear_x,
            translate_x,
            shear_y,
            scale_y,
            translate_y,
        }
    }

    /// Axis-aligned transform: per-axis scale plus offset.
    pub fn scale_offset(scale_x: f64, scale_y: f64, translate_x: f64, translate_y: f64) -> Self {
        Self::new(scale_x, 0.0, translate_x, 0.0, scale_y, translate_y)
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// Apply to a point.
    pub fn apply(&self, i: f64, j: f64) -> (f64, f64) {
        (
            self.scale_x * i + self.shear_x * j + self.translate_x,
            self.shear_y * i + self.scale_y * j + self.translate_y,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.scale_x * self.scale_y - self.shear_x * self.shear_y
    }

    /// Inverse transform; `None` for singular transforms.
    pub fn inverse(&self) -> Option<Affine2D> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_sx = self.scale_y / det;
        let inv_shx = -self.shear_x / det;
        let inv_shy = -self.shear_y / det;
        let inv_sy = self.scale_x / det;
        Some(Affine2D {
            scale_x: inv_sx,
            shear_x: inv_shx,
            translate_x: -(inv_sx * self.translate_x + inv_shx * self.translate_y),
            shear_y: inv_shy,
            scale_y: inv_sy,
            translate_y: -(inv_shy * self.translate_x + inv_sy * self.translate_y),
        })
    }

    /// Transform re-based to a clipped, subsampled pixel window.
    ///
    /// A point `(i', j')` in window coordinates maps like the source point
    /// `(origin_x + i' * step_x, origin_y + j' * step_y)` under `self`.
    pub fn windowed(&self, origin_x: f64, origin_y: f64, step_x: f64, step_y: f64) -> Affine2D {
        let (tx, ty) = self.apply(origin_x, origin_y);
        Affine2D {
            scale_x: self.scale_x * step_x,
            shear_x: self.shear_x * step_y,
            translate_x: tx,
            shear_y: self.shear_y * step_x,
            scale_y: self.scale_y * step_y,
            translate_y: ty,
        }
    }

    /// Image of an axis-aligned grid rectangle, as a bounding box.
    ///
    /// All four corners are transformed so shear and axis flips are handled.
    pub fn transform_rect(&self, x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
        let corners = [
            self.apply(x, y),
            self.apply(x + width, y),
            self.apply(x, y + height),
            self.apply(x + width, y + height),
        ];
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (cx, cy) in corners {
            min_x = min_x.min(cx);
            min_y = min_y.min(cy);
            max_x = max_x.max(cx);
            max_y = max_y.max(cy);
        }
        BoundingBox::new(min_x, min_y, max_x, max_y)
    }

    /// Pixel size along each axis (length of the column/row basis vectors).
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            (self.scale_x * self.scale_x + self.shear_y * self.shear_y).sqrt(),
            (self.shear_x * self.shear_x + self.scale_y * self.scale_y).sqrt(),
        )
    }

    /// Bit-exact key for interning and hashing.
    pub fn key(&self) -> [u64; 6] {
        [
            self.scale_x.to_bits(),
            self.shear_x.to_bits(),
            self.translate_x.to_bits(),
            self.shear_y.to_bits(),
            self.scale_y.to_bits(),
            self.translate_y.to_bits(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_inverse_roundtrip() {
        let t = Affine2D::scale_offset(0.25, -0.25, -180.0, 90.0);
        let (x, y) = t.apply(100.0, 40.0);
        assert!((x - (-155.0)).abs() < 1e-12);
        assert!((y - 80.0).abs() < 1e-12);

        let inv = t.inverse().unwrap();
        let (i, j) = inv.apply(x, y);
        assert!((i - 100.0).abs() < 1e-9);
        assert!((j - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let t = Affine2D::scale_offset(0.0, 1.0, 0.0, 0.0);
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_windowed_matches_composition() {
        let t = Affine2D::scale_offset(0.5, -0.5, 10.0, 20.0);
        let w = t.windowed(8.0, 6.0, 2.0, 2.0);

        // Window pixel (3, 4) is source pixel (8 + 3*2, 6 + 4*2).
        let direct = t.apply(8.0 + 6.0, 6.0 + 8.0);
        let via_window = w.apply(3.0, 4.0);
        assert!((direct.0 - via_window.0).abs() < 1e-12);
        assert!((direct.1 - via_window.1).abs() < 1e-12);
    }

    #[test]
    fn test_transform_rect_with_flip() {
        // Negative y-scale: row 0 is the northern edge.
        let t = Affine2D::scale_offset(1.0, -1.0, 0.0, 10.0);
        let bbox = t.transform_rect(0.0, 0.0, 10.0, 10.0);
        assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_pixel_size() {
        let t = Affine2D::scale_offset(0.25, -0.5, 0.0, 0.0);
        let (sx, sy) = t.pixel_size();
        assert!((sx - 0.25).abs() < 1e-12);
        assert!((sy - 0.5).abs() < 1e-12);
    }
}
