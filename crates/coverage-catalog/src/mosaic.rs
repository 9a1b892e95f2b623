//! Tile-to-mosaic assembly.
//!
//! Adjacent coverages that share a time range, a format, a CRS, and a pixel
//! grid are merged into one logical mosaic entry backed by a [`TileManager`],
//! plus a pyramid of coarser overview entries over the same tiles. Selection
//! then treats the mosaic like any other entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use coverage_common::{CatalogResult, Raster, ReadError, ReadResult, Series};
use tracing::debug;

use crate::affine::Affine2D;
use crate::config::PyramidSettings;
use crate::entry::{CoverageEntry, CoverageInput};
use crate::format::{DecodeInput, DecodeRequest, Format};
use crate::geometry::GridGeometryModel;
use crate::pool::CoveragePool;
use crate::region::{Envelope, PixelRect, ReadRegion};

/// Pixel offsets must land within this distance of a whole cell for two
/// coverages to share a mosaic grid.
const ALIGNMENT_EPS: f64 = 1e-6;

/// Relative pixel-size tolerance for grid compatibility.
const SCALE_EPS: f64 = 1e-9;

/// One component coverage of a mosaic.
#[derive(Debug)]
pub struct Tile {
    pub series: Arc<Series>,
    pub format: Arc<Format>,
    pub filename: String,
    pub slice_index: u32,
    pub band: u32,
    /// Position of the tile in full-resolution mosaic pixel space.
    pub placement: PixelRect,
    pub geometry: Arc<GridGeometryModel>,
}

/// Reads a window of a mosaic by decoding the tiles it touches.
#[derive(Debug)]
pub struct TileManager {
    id: String,
    width: usize,
    height: usize,
    /// Full-resolution pixels per pixel of the entry this manager backs.
    /// 1 for the base mosaic, `downscale_factor^level` for overviews.
    scale: usize,
    tiles: Vec<Tile>,
}

impl TileManager {
    pub fn new(id: String, width: usize, height: usize, scale: usize, tiles: Vec<Tile>) -> Self {
        Self {
            id,
            width,
            height,
            scale,
            tiles,
        }
    }

    /// Stable mosaic identity; equal tile sets yield equal ids.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Read a window, given in the backed entry's pixel space.
    ///
    /// Cells no tile covers come back as NaN. Every tile shares the backing
    /// entry's format and the caller holds that format's lock, so tile
    /// decoders are invoked directly rather than re-entering the lock.
    pub async fn read(&self, region: &ReadRegion, cancel: &AtomicBool) -> ReadResult<Raster> {
        let (sub_x, sub_y) = region.subsampling;
        let out_width = region.rect.width / sub_x;
        let out_height = region.rect.height / sub_y;

        // The window in full-resolution mosaic pixels.
        let full_rect = PixelRect::new(
            region.rect.x * self.scale,
            region.rect.y * self.scale,
            region.rect.width * self.scale,
            region.rect.height * self.scale,
        );

        let mut decoded: Vec<(&Tile, Raster)> = Vec::new();
        for tile in &self.tiles {
            if cancel.load(Ordering::SeqCst) {
                return Err(ReadError::Io("mosaic read aborted".to_string()));
            }
            if !tile.placement.intersects(&full_rect) {
                continue;
            }
            let raster = self.decode_tile(tile, region.envelope, cancel).await?;
            decoded.push((tile, raster));
        }

        let mut data = vec![f32::NAN; out_width * out_height];
        let mut bytes_per_sample = 4;
        for (tile, raster) in &decoded {
            bytes_per_sample = raster.bytes_per_sample;
            blit(
                &mut data,
                out_width,
                out_height,
                &full_rect,
                (sub_x * self.scale, sub_y * self.scale),
                tile.placement,
                raster,
            );
        }

        debug!(
            mosaic = %self.id,
            tiles = decoded.len(),
            width = out_width,
            height = out_height,
            "assembled mosaic window"
        );
        Ok(Raster::new(out_width, out_height, 1, bytes_per_sample, data))
    }

    async fn decode_tile(
        &self,
        tile: &Tile,
        envelope: Envelope,
        cancel: &AtomicBool,
    ) -> ReadResult<Raster> {
        let input = match tile.series.uri(&tile.filename) {
            Some(uri) => DecodeInput::Uri(uri),
            None => DecodeInput::Path(tile.series.file_path(&tile.filename)),
        };
        let request = DecodeRequest {
            input,
            region: ReadRegion {
                rect: PixelRect::new(0, 0, tile.geometry.width(), tile.geometry.height()),
                subsampling: (1, 1),
                envelope: Envelope {
                    bbox: tile.geometry.bounds(),
                    time: envelope.time,
                },
            },
            slice_index: tile.slice_index,
            band: tile.band,
            variable: tile.format.kind.variable().map(str::to_string),
        };
        tile.format.decoder().decode(&request, cancel).await
    }
}

/// Copy a tile's samples into the output window at the given step.
fn blit(
    data: &mut [f32],
    out_width: usize,
    out_height: usize,
    full_rect: &PixelRect,
    step: (usize, usize),
    placement: PixelRect,
    raster: &Raster,
) {
    for j in 0..out_height {
        let my = full_rect.y + j * step.1;
        if my < placement.y || my >= placement.max_y() {
            continue;
        }
        for i in 0..out_width {
            let mx = full_rect.x + i * step.0;
            if mx < placement.x || mx >= placement.max_x() {
                continue;
            }
            if let Some(v) = raster.sample(mx - placement.x, my - placement.y, 0) {
                data[j * out_width + i] = v;
            }
        }
    }
}

/// Groups compatible entries into mosaics and emits pyramid entries.
#[derive(Debug, Clone, Default)]
pub struct MosaicAssembler {
    pyramid: PyramidSettings,
}

impl MosaicAssembler {
    pub fn new(pyramid: PyramidSettings) -> Self {
        Self { pyramid }
    }

    /// Replace mosaickable runs of `entries` with mosaic pyramid entries.
    ///
    /// Entries that do not join a mosaic pass through unchanged. Mosaic
    /// entries are canonicalized through the pool so repeated queries share
    /// one instance per pyramid level.
    pub fn assemble(
        &self,
        entries: Vec<Arc<CoverageEntry>>,
        pool: &CoveragePool,
    ) -> CatalogResult<Vec<Arc<CoverageEntry>>> {
        let mut remaining = entries;
        let mut output = Vec::new();

        while let Some(reference) = remaining.first().cloned() {
            let mut tiles_entries = vec![Arc::clone(&reference)];
            remaining.remove(0);
            remaining.retain(|candidate| {
                if can_mosaic(&reference, candidate)
                    && no_overlap(&reference, &tiles_entries, candidate)
                {
                    tiles_entries.push(Arc::clone(candidate));
                    false
                } else {
                    true
                }
            });

            if tiles_entries.len() < 2 {
                output.push(reference);
                continue;
            }
            output.extend(self.build_pyramid(&reference, &tiles_entries, pool)?);
        }

        Ok(output)
    }

    fn build_pyramid(
        &self,
        reference: &Arc<CoverageEntry>,
        members: &[Arc<CoverageEntry>],
        pool: &CoveragePool,
    ) -> CatalogResult<Vec<Arc<CoverageEntry>>> {
        let grid = MosaicGrid::from_members(reference, members);

        let mut filenames: Vec<&str> = members
            .iter()
            .filter_map(|m| m.filename())
            .collect();
        filenames.sort_unstable();
        let base_id = format!(
            "mosaic:{}:{}",
            reference.series.name,
            filenames.join(",")
        );

        let mut output = Vec::new();
        let factor = self.pyramid.downscale_factor;
        let mut scale = 1usize;
        loop {
            let width = grid.width / scale;
            let height = grid.height / scale;
            if scale > 1 && width.min(height) < self.pyramid.min_dimension {
                break;
            }

            let manager = Arc::new(TileManager::new(
                format!("{}:L{}", base_id, scale),
                grid.width,
                grid.height,
                scale,
                grid.tiles(members),
            ));
            let geometry = Arc::new(GridGeometryModel::new(
                width,
                height,
                reference.geometry.depth(),
                grid.affine_at(scale),
                reference.geometry.vertical_ordinates().to_vec(),
                reference.geometry.horizontal_srid(),
                reference.geometry.vertical_srid(),
            ));
            let entry = CoverageEntry::new(
                Arc::clone(&reference.series),
                Arc::clone(&reference.format),
                CoverageInput::Tiled(manager),
                reference.slice_index,
                reference.band,
                reference.time,
                geometry,
                Arc::clone(&reference.settings),
            )?;
            output.push(pool.unique(entry));

            scale *= factor;
            if grid.width / scale == 0 || grid.height / scale == 0 {
                break;
            }
        }

        debug!(
            mosaic = %base_id,
            tiles = members.len(),
            levels = output.len(),
            "assembled mosaic pyramid"
        );
        Ok(output)
    }
}

/// Full-resolution mosaic grid derived from member geometries.
struct MosaicGrid {
    width: usize,
    height: usize,
    scale_x: f64,
    scale_y: f64,
    origin_x: f64,
    origin_y: f64,
}

impl MosaicGrid {
    fn from_members(reference: &Arc<CoverageEntry>, members: &[Arc<CoverageEntry>]) -> Self {
        let scale_x = reference.geometry.affine().scale_x;
        let scale_y = reference.geometry.affine().scale_y;

        let mut union = members[0].geometry.bounds();
        for member in &members[1..] {
            union = union.union(&member.geometry.bounds());
        }

        let origin_x = if scale_x > 0.0 { union.min_x } else { union.max_x };
        let origin_y = if scale_y > 0.0 { union.min_y } else { union.max_y };
        let width = (union.width() / scale_x.abs()).round() as usize;
        let height = (union.height() / scale_y.abs()).round() as usize;

        Self {
            width,
            height,
            scale_x,
            scale_y,
            origin_x,
            origin_y,
        }
    }

    fn affine_at(&self, scale: usize) -> Affine2D {
        Affine2D::scale_offset(
            self.scale_x * scale as f64,
            self.scale_y * scale as f64,
            self.origin_x,
            self.origin_y,
        )
    }

    fn tiles(&self, members: &[Arc<CoverageEntry>]) -> Vec<Tile> {
        members
            .iter()
            .filter_map(|member| {
                let filename = member.filename()?;
                let affine = member.geometry.affine();
                let x = ((affine.translate_x - self.origin_x) / self.scale_x).round() as usize;
                let y = ((affine.translate_y - self.origin_y) / self.scale_y).round() as usize;
                Some(Tile {
                    series: Arc::clone(&member.series),
                    format: Arc::clone(&member.format),
                    filename: filename.to_string(),
                    slice_index: member.slice_index,
                    band: member.band,
                    placement: PixelRect::new(
                        x,
                        y,
                        member.geometry.width(),
                        member.geometry.height(),
                    ),
                    geometry: Arc::clone(&member.geometry),
                })
            })
            .collect()
    }
}

/// Grid compatibility between a mosaic reference and a candidate.
fn can_mosaic(reference: &CoverageEntry, candidate: &CoverageEntry) -> bool {
    if candidate.filename().is_none() || reference.filename().is_none() {
        return false;
    }
    if reference.time != candidate.time || reference.band != candidate.band {
        return false;
    }
    // Tiles are decoded under the reference entry's format lock, so every
    // member must share that format.
    if reference.format.name != candidate.format.name {
        return false;
    }

    let a = reference.geometry.affine();
    let b = candidate.geometry.affine();
    if reference.geometry.horizontal_srid() != candidate.geometry.horizontal_srid() {
        return false;
    }
    // Rotated grids never mosaic.
    if a.shear_x != 0.0 || a.shear_y != 0.0 || b.shear_x != 0.0 || b.shear_y != 0.0 {
        return false;
    }
    let scale_match = |p: f64, q: f64| (p - q).abs() <= p.abs() * SCALE_EPS;
    if !scale_match(a.scale_x, b.scale_x) || !scale_match(a.scale_y, b.scale_y) {
        return false;
    }

    // Offsets must land on whole cells of the reference grid.
    let dx = (b.translate_x - a.translate_x) / a.scale_x;
    let dy = (b.translate_y - a.translate_y) / a.scale_y;
    (dx - dx.round()).abs() <= ALIGNMENT_EPS && (dy - dy.round()).abs() <= ALIGNMENT_EPS
}

/// Reject candidates whose footprint overlaps a tile already in the group.
fn no_overlap(
    reference: &Arc<CoverageEntry>,
    members: &[Arc<CoverageEntry>],
    candidate: &CoverageEntry,
) -> bool {
    let a = reference.geometry.affine();
    let pixel_rect = |entry: &CoverageEntry| {
        let b = entry.geometry.affine();
        let x = ((b.translate_x - a.translate_x) / a.scale_x).round();
        let y = ((b.translate_y - a.translate_y) / a.scale_y).round();
        (
            x,
            y,
            entry.geometry.width() as f64,
            entry.geometry.height() as f64,
        )
    };
    let (cx, cy, cw, ch) = pixel_rect(candidate);
    members.iter().all(|member| {
        let (mx, my, mw, mh) = pixel_rect(member);
        cx + cw <= mx || mx + mw <= cx || cy + ch <= my || my + mh <= cy
    })
}
