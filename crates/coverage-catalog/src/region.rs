//! Pixel-space read windows derived from CRS-space requests.

use coverage_common::{BoundingBox, CrsTransform, TimeRange};

use crate::geometry::GridGeometryModel;

/// Smallest read window edge, in pixels. Reads below this size cost as much
/// in decoder setup as the transfer itself, so windows are padded up to it
/// (or to the full grid when the grid is smaller).
pub const MIN_SIZE: usize = 64;

/// Tolerance for snapping fractional pixel coordinates to cell boundaries.
const PIXEL_EPS: f64 = 1e-6;

/// A rectangle in pixel coordinates, origin at the grid's upper-left cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub fn max_x(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn max_y(&self) -> usize {
        self.y + self.height
    }

    /// True when the two rects share any cell.
    pub fn intersects(&self, other: &PixelRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.max_x()
            && self.max_x() > other.x
            && self.y < other.max_y()
            && self.max_y() > other.y
    }
}

/// Spatio-temporal footprint of a (possibly clipped) read, in request CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub bbox: BoundingBox,
    pub time: TimeRange,
}

/// A resolved read: which pixels to fetch, at which step, covering what.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadRegion {
    /// Window in source pixel coordinates, aligned to `subsampling`.
    pub rect: PixelRect,
    /// Pixel step per axis; 1 reads every pixel.
    pub subsampling: (usize, usize),
    /// Footprint of `rect` in the request CRS, plus the slice's time range.
    pub envelope: Envelope,
}

/// Derive the pixel window a request needs from a coverage.
///
/// `to_request` moves coordinates from the coverage CRS into the request
/// CRS. `clip` and `resolution` are in request-CRS units. Returns `None`
/// when the request selects nothing from this coverage: empty footprint,
/// disjoint or degenerate clip, or a singular grid transform.
pub fn compute_read_region(
    geometry: &GridGeometryModel,
    to_request: CrsTransform,
    clip: Option<&BoundingBox>,
    resolution: Option<(f64, f64)>,
    time: TimeRange,
) -> Option<ReadRegion> {
    let footprint = to_request.apply_bbox(&geometry.bounds());
    if footprint.is_empty() {
        return None;
    }
    let target = match clip {
        Some(clip) => footprint.intersection(clip)?,
        None => footprint,
    };

    let width = geometry.width();
    let height = geometry.height();
    let subsampling = subsampling_steps(width, height, &footprint, resolution);

    // Back-project the selected window into pixel space.
    let coverage_bbox = to_request.inverse().apply_bbox(&target);
    let inverse = geometry.affine().inverse()?;
    let pixels = inverse.transform_rect(
        coverage_bbox.min_x,
        coverage_bbox.min_y,
        coverage_bbox.width(),
        coverage_bbox.height(),
    );

    // Snap to whole cells, keeping every partially covered pixel.
    let x0 = (pixels.min_x + PIXEL_EPS).floor().clamp(0.0, width as f64) as usize;
    let y0 = (pixels.min_y + PIXEL_EPS).floor().clamp(0.0, height as f64) as usize;
    let x1 = (pixels.max_x - PIXEL_EPS).ceil().clamp(0.0, width as f64) as usize;
    let y1 = (pixels.max_y - PIXEL_EPS).ceil().clamp(0.0, height as f64) as usize;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let (x, w) = shape_axis(x0, x1 - x0, width, subsampling.0);
    let (y, h) = shape_axis(y0, y1 - y0, height, subsampling.1);
    let rect = PixelRect::new(x, y, w, h);

    let covered = geometry
        .affine()
        .transform_rect(x as f64, y as f64, w as f64, h as f64);
    Some(ReadRegion {
        rect,
        subsampling,
        envelope: Envelope {
            bbox: to_request.apply_bbox(&covered),
            time,
        },
    })
}

/// Pixel step per axis for a requested pixel size.
///
/// One source pixel per requested pixel, clamped so the step never reduces
/// the full grid below [`MIN_SIZE`] pixels per axis.
fn subsampling_steps(
    width: usize,
    height: usize,
    footprint: &BoundingBox,
    resolution: Option<(f64, f64)>,
) -> (usize, usize) {
    match resolution {
        Some((rx, ry)) if rx > 0.0 && ry > 0.0 => {
            let max_x = (width / MIN_SIZE).max(1);
            let max_y = (height / MIN_SIZE).max(1);
            let sx = ((width as f64 / footprint.width()) * rx).floor() as usize;
            let sy = ((height as f64 / footprint.height()) * ry).floor() as usize;
            (sx.clamp(1, max_x), sy.clamp(1, max_y))
        }
        _ => (1, 1),
    }
}

/// Pad one axis of a window to the minimum read size, clamp it to the grid,
/// and align its extent to the subsampling step.
fn shape_axis(start: usize, extent: usize, grid: usize, step: usize) -> (usize, usize) {
    let min_size = MIN_SIZE.min(grid);
    let mut start = start;
    let mut extent = extent.min(grid);

    if extent < min_size {
        // Grow symmetrically around the original window.
        start = start.saturating_sub((min_size - extent) / 2);
        extent = min_size;
    }
    if start + extent > grid {
        start = grid - extent;
    }

    // Align the extent down to a whole number of steps; if that drops it
    // below the minimum, take one more step (the clamp on `step` guarantees
    // the grid can hold it).
    let mut aligned = (extent / step) * step;
    if aligned < min_size {
        aligned += step;
    }
    let aligned = aligned.min(grid);
    if start + aligned > grid {
        start = grid - aligned;
    }
    (start, aligned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine2D;
    use coverage_common::TimeRange;

    fn global_quarter_degree() -> GridGeometryModel {
        GridGeometryModel::new(
            1440,
            720,
            None,
            Affine2D::scale_offset(0.25, -0.25, -180.0, 90.0),
            Vec::new(),
            4326,
            None,
        )
    }

    #[test]
    fn test_unclipped_read_covers_grid() {
        let g = global_quarter_degree();
        let region =
            compute_read_region(&g, CrsTransform::Identity, None, None, TimeRange::unbounded())
                .unwrap();

        assert_eq!(region.rect, PixelRect::new(0, 0, 1440, 720));
        assert_eq!(region.subsampling, (1, 1));
        assert!(region.envelope.bbox.approx_eq(&g.bounds(), 1e-9));
    }

    #[test]
    fn test_clip_selects_window() {
        let g = global_quarter_degree();
        let clip = BoundingBox::new(-130.0, 20.0, -60.0, 55.0);
        let region = compute_read_region(
            &g,
            CrsTransform::Identity,
            Some(&clip),
            None,
            TimeRange::unbounded(),
        )
        .unwrap();

        // -130° is pixel 200, -60° is pixel 480; 55° is row 140, 20° row 280.
        assert_eq!(region.rect, PixelRect::new(200, 140, 280, 140));
        // Covered footprint contains the clip.
        assert!(region.envelope.bbox.min_x <= clip.min_x);
        assert!(region.envelope.bbox.max_y >= clip.max_y);
    }

    #[test]
    fn test_disjoint_clip_selects_nothing() {
        let g = GridGeometryModel::new(
            100,
            100,
            None,
            Affine2D::scale_offset(0.1, -0.1, 0.0, 10.0),
            Vec::new(),
            4326,
            None,
        );
        let clip = BoundingBox::new(50.0, 50.0, 60.0, 60.0);
        assert!(compute_read_region(
            &g,
            CrsTransform::Identity,
            Some(&clip),
            None,
            TimeRange::unbounded()
        )
        .is_none());

        let empty = BoundingBox::new(5.0, 5.0, 5.0, 9.0);
        assert!(compute_read_region(
            &g,
            CrsTransform::Identity,
            Some(&empty),
            None,
            TimeRange::unbounded()
        )
        .is_none());
    }

    #[test]
    fn test_small_window_padded_to_min_size() {
        let g = global_quarter_degree();
        let clip = BoundingBox::new(0.0, 0.0, 1.0, 1.0); // 4x4 pixels
        let region = compute_read_region(
            &g,
            CrsTransform::Identity,
            Some(&clip),
            None,
            TimeRange::unbounded(),
        )
        .unwrap();

        assert_eq!(region.rect.width, MIN_SIZE);
        assert_eq!(region.rect.height, MIN_SIZE);
        // Still inside the grid and still covering the clip.
        assert!(region.rect.max_x() <= 1440);
        assert!(region.rect.max_y() <= 720);
        assert!(region.envelope.bbox.min_x <= 0.0);
        assert!(region.envelope.bbox.max_x >= 1.0);
    }

    #[test]
    fn test_grid_smaller_than_min_size() {
        let g = GridGeometryModel::new(
            32,
            32,
            None,
            Affine2D::scale_offset(1.0, -1.0, 0.0, 32.0),
            Vec::new(),
            4326,
            None,
        );
        let region =
            compute_read_region(&g, CrsTransform::Identity, None, None, TimeRange::unbounded())
                .unwrap();
        assert_eq!(region.rect, PixelRect::new(0, 0, 32, 32));
    }

    #[test]
    fn test_subsampling_from_resolution() {
        let g = global_quarter_degree();
        // One-degree request pixels over a quarter-degree grid: step 4.
        let region = compute_read_region(
            &g,
            CrsTransform::Identity,
            None,
            Some((1.0, 1.0)),
            TimeRange::unbounded(),
        )
        .unwrap();
        assert_eq!(region.subsampling, (4, 4));
        // Extent stays a multiple of the step.
        assert_eq!(region.rect.width % 4, 0);
        assert_eq!(region.rect.height % 4, 0);
    }

    #[test]
    fn test_subsampling_clamped_by_min_size() {
        let g = global_quarter_degree();
        // Absurdly coarse request: step limited to height / MIN_SIZE.
        let region = compute_read_region(
            &g,
            CrsTransform::Identity,
            None,
            Some((90.0, 90.0)),
            TimeRange::unbounded(),
        )
        .unwrap();
        assert_eq!(region.subsampling, (1440 / MIN_SIZE, 720 / MIN_SIZE));
    }

    #[test]
    fn test_fine_resolution_keeps_full_detail() {
        let g = global_quarter_degree();
        let region = compute_read_region(
            &g,
            CrsTransform::Identity,
            None,
            Some((0.01, 0.01)),
            TimeRange::unbounded(),
        )
        .unwrap();
        assert_eq!(region.subsampling, (1, 1));
    }

    #[test]
    fn test_pixel_rect_intersection() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(5, 5, 10, 10);
        let c = PixelRect::new(10, 0, 5, 5);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c)); // edge-adjacent, no shared cell
        assert!(!a.intersects(&PixelRect::new(2, 2, 0, 5)));
    }
}
