//! Segment rasterization into per-tile density grids
//!
//! A segment is drawn once in the pixel frame of the tile holding its start point and, when
//! its end point lies in another tile, once more in the frame of that tile. Each frame is a
//! full Bresenham line in that tile's coordinates; the grid bounds check clips away whatever
//! falls outside the tile.
//!
//! After drawing a line, the destination pixel is decremented by one. Consecutive segments of
//! a track share their vertex, and without the correction that vertex would be counted by both
//! line draws.

use crate::projection::{pixel_in, tile_of};
use crate::{DensityGrid, Segment, TileId, TileSet};
use smallvec::SmallVec;

/// One segment as seen from one tile: the pixel positions of both endpoints in that tile's frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFrame {
    pub tile: TileId,
    pub from: (i64, i64),
    pub to: (i64, i64),
}

impl SegmentFrame {
    /// Accumulate this frame into the grid of [`SegmentFrame::tile`]
    #[inline]
    pub fn apply(&self, grid: &mut DensityGrid) {
        if self.from == self.to {
            grid.increment(self.from.0, self.from.1);
        } else {
            grid.draw_line(self.from, self.to);
            grid.decrement(self.to.0, self.to.1);
        }
    }
}

/// The frames a segment is drawn in at `zoom`: the start tile, then the end tile if different
pub fn frames(segment: &Segment, zoom: u8, tile_size: u32) -> SmallVec<[SegmentFrame; 2]> {
    let from_tile = tile_of(segment.from, zoom);
    let to_tile = tile_of(segment.to, zoom);

    let frame_for = |tile: TileId| SegmentFrame {
        tile,
        from: pixel_in(segment.from, zoom, tile, tile_size),
        to: pixel_in(segment.to, zoom, tile, tile_size),
    };

    let mut out = SmallVec::new();
    out.push(frame_for(from_tile));
    if from_tile != to_tile {
        out.push(frame_for(to_tile));
    }
    out
}

/// Rasterize one segment into `tile_set`, returning the tiles it touched
pub fn rasterize(segment: &Segment, tile_set: &mut TileSet) -> SmallVec<[TileId; 2]> {
    frames(segment, tile_set.zoom(), tile_set.tile_size())
        .into_iter()
        .map(|frame| {
            frame.apply(tile_set.grid_mut(frame.tile));
            frame.tile
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use crate::projection::project;

    const TILE_SIZE: u32 = 256;

    fn nonzero(grid: &DensityGrid) -> Vec<(i64, i64, f64)> {
        let size = grid.size() as i64;
        let mut out = Vec::new();
        for py in 0..size {
            for px in 0..size {
                let v = grid.get(px, py).unwrap();
                if v != 0.0 {
                    out.push((px, py, v));
                }
            }
        }
        out
    }

    /// Latitude/longitude of the centre of pixel `(px, py)` of `tile`
    fn pixel_center(tile: TileId, px: u32, py: u32) -> Point {
        let zoom = tile.zoom();
        let fx = tile.x() as f64 + (px as f64 + 0.5) / TILE_SIZE as f64;
        let fy = tile.y() as f64 + (py as f64 + 0.5) / TILE_SIZE as f64;
        Point::new(
            crate::projection::tile_y_to_lat(fy, zoom),
            crate::projection::tile_x_to_lon(fx, zoom),
        )
    }

    #[test]
    fn test_short_segment_single_pixel() {
        let mut set = TileSet::new(10, TILE_SIZE);
        let segment = Segment::new(Point::new(0.0, 0.0), Point::new(0.0, 0.001));
        let touched = rasterize(&segment, &mut set);

        assert_eq!(touched.len(), 1);
        assert_eq!(set.len(), 1);
        let grid = set.get(touched[0]).unwrap();
        let cells = nonzero(grid);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].2, 1.0);
    }

    #[test]
    fn test_segment_within_one_pixel_no_line() {
        let tile = TileId::new(12, 2047, 1362).unwrap();
        let point = pixel_center(tile, 40, 77);
        let segment = Segment::new(point, point);

        let mut set = TileSet::new(12, TILE_SIZE);
        rasterize(&segment, &mut set);
        assert_eq!(set.len(), 1);
        assert_eq!(nonzero(set.get(tile).unwrap()), vec![(40, 77, 1.0)]);
    }

    #[test]
    fn test_line_within_tile_corrects_endpoint() {
        let tile = TileId::new(12, 2047, 1362).unwrap();
        let segment = Segment::new(pixel_center(tile, 10, 20), pixel_center(tile, 14, 20));

        let mut set = TileSet::new(12, TILE_SIZE);
        rasterize(&segment, &mut set);
        // Destination pixel drawn then decremented back to zero
        assert_eq!(
            nonzero(set.get(tile).unwrap()),
            vec![(10, 20, 1.0), (11, 20, 1.0), (12, 20, 1.0), (13, 20, 1.0)]
        );
    }

    #[test]
    fn test_chained_segments_count_shared_vertex_once() {
        let tile = TileId::new(14, 8000, 5000).unwrap();
        let a = pixel_center(tile, 10, 50);
        let b = pixel_center(tile, 20, 50);
        let c = pixel_center(tile, 30, 50);

        let mut set = TileSet::new(14, TILE_SIZE);
        rasterize(&Segment::new(a, b), &mut set);
        rasterize(&Segment::new(b, c), &mut set);

        let grid = set.get(tile).unwrap();
        assert_eq!(grid.get(20, 50), Some(1.0));
        assert_eq!(grid.get(10, 50), Some(1.0));
        assert_eq!(grid.get(25, 50), Some(1.0));
        // The final vertex is left uncounted by the correction
        assert_eq!(grid.get(30, 50), Some(0.0));
    }

    #[test]
    fn test_segment_crossing_two_tiles() {
        let west = TileId::new(8, 100, 90).unwrap();
        let east = TileId::new(8, 101, 90).unwrap();
        let segment = Segment::new(pixel_center(west, 250, 30), pixel_center(east, 5, 30));

        let mut set = TileSet::new(8, TILE_SIZE);
        let touched = rasterize(&segment, &mut set);
        assert_eq!(touched.as_slice(), &[west, east]);
        assert_eq!(set.len(), 2);

        // West frame: 250..=255 drawn, destination (261, 30) is outside so no correction lands
        let west_cells = nonzero(set.get(west).unwrap());
        assert_eq!(
            west_cells,
            (250..256).map(|px| (px, 30, 1.0)).collect::<Vec<_>>()
        );

        // East frame: line from (-6, 30) to (5, 30), destination pixel corrected to zero
        let east_cells = nonzero(set.get(east).unwrap());
        assert_eq!(east_cells, (0..5).map(|px| (px, 30, 1.0)).collect::<Vec<_>>());
        assert_eq!(set.get(east).unwrap().get(5, 30), Some(0.0));
    }

    #[test]
    fn test_crossing_frames_decrement_destination() {
        let west = TileId::new(8, 100, 90).unwrap();
        let east = TileId::new(8, 101, 90).unwrap();
        let from = pixel_center(west, 200, 100);
        let to = pixel_center(east, 40, 120);
        let segment = Segment::new(from, to);

        for frame in frames(&segment, 8, TILE_SIZE) {
            let mut naive = DensityGrid::new(TILE_SIZE);
            naive.draw_line(frame.from, frame.to);
            let mut corrected = DensityGrid::new(TILE_SIZE);
            frame.apply(&mut corrected);

            let (tx, ty) = frame.to;
            if naive.contains(tx, ty) {
                assert_eq!(
                    corrected.get(tx, ty).unwrap(),
                    naive.get(tx, ty).unwrap() - 1.0
                );
            }
            let differing = naive
                .cells()
                .iter()
                .zip(corrected.cells())
                .filter(|(a, b)| a != b)
                .count();
            assert!(differing <= 1);
        }
    }

    #[test]
    fn test_antimeridian_crossing_at_deepest_zoom() {
        // The destination frame starts almost a full world width away from its tile
        let segment = Segment::new(Point::new(10.0, 179.9999), Point::new(10.0, -179.9999));
        let started = std::time::Instant::now();

        let mut set = TileSet::new(30, TILE_SIZE);
        let touched = rasterize(&segment, &mut set);
        assert_eq!(touched.len(), 2);
        assert!(set.get(touched[0]).unwrap().positive_cells() > 0);
        for tile in touched {
            assert!(set.get(tile).unwrap().positive_cells() <= TILE_SIZE as usize);
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_frames_pixel_coordinates() {
        let segment = Segment::new(Point::new(51.5074, -0.1278), Point::new(51.5080, -0.1270));
        let zoom = 16;
        let frames = frames(&segment, zoom, TILE_SIZE);
        let (fx, fy) = project(segment.from, zoom);
        let frame = frames[0];
        assert_eq!(frame.tile, tile_of(segment.from, zoom));
        assert_eq!(
            frame.from,
            (
                ((fx - frame.tile.x() as f64) * 256.0).floor() as i64,
                ((fy - frame.tile.y() as f64) * 256.0).floor() as i64
            )
        );
    }
}
