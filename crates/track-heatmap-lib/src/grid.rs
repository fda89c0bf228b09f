//! Density grids and the per-zoom tile set that groups them

use crate::{TileId, TileKey};
use std::collections::HashMap;

/// Square accumulator of segment density for one tile
///
/// Cells are stored row-major and addressed by local pixel coordinates. Writes outside
/// `[0, size)` on either axis are dropped silently, which is what clips lines drawn in the
/// frame of a neighbouring tile.
#[derive(Clone, Debug, PartialEq)]
pub struct DensityGrid {
    size: u32,
    cells: Vec<f64>,
}

impl DensityGrid {
    /// Create a zeroed `size × size` grid
    pub fn new(size: u32) -> Self {
        let side = size as usize;
        Self {
            size,
            cells: vec![0.0; side * side],
        }
    }

    /// Side length in pixels
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Raw cells, row-major
    #[inline]
    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    #[inline]
    pub fn contains(&self, px: i64, py: i64) -> bool {
        let size = self.size as i64;
        px >= 0 && py >= 0 && px < size && py < size
    }

    #[inline]
    fn index(&self, px: i64, py: i64) -> Option<usize> {
        self.contains(px, py)
            .then(|| py as usize * self.size as usize + px as usize)
    }

    /// Value at a pixel, `None` outside the grid
    #[inline]
    pub fn get(&self, px: i64, py: i64) -> Option<f64> {
        self.index(px, py).map(|i| self.cells[i])
    }

    /// Add `delta` to a pixel. Returns false (and does nothing) outside the grid.
    #[inline]
    pub fn add(&mut self, px: i64, py: i64, delta: f64) -> bool {
        match self.index(px, py) {
            Some(i) => {
                self.cells[i] += delta;
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn increment(&mut self, px: i64, py: i64) -> bool {
        self.add(px, py, 1.0)
    }

    #[inline]
    pub fn decrement(&mut self, px: i64, py: i64) -> bool {
        self.add(px, py, -1.0)
    }

    /// Increment every in-bounds pixel of the Bresenham line between two pixels, both
    /// endpoints included
    ///
    /// Off-grid leading pixels are skipped in constant time, so the cost is bounded by the
    /// grid size rather than the line length.
    pub fn draw_line(&mut self, from: (i64, i64), to: (i64, i64)) {
        let (x0, y0) = from;
        let (x1, y1) = to;

        // Nothing to do when the line's bounding box misses the grid
        let size = self.size as i64;
        if x0.max(x1) < 0 || y0.max(y1) < 0 || x0.min(x1) >= size || y0.min(y1) >= size {
            return;
        }

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };

        let Some((nx, ny)) = first_visible_step(
            dx,
            -dy,
            steps_to_enter(x0, sx, size),
            steps_to_enter(y0, sy, size),
        ) else {
            return;
        };
        let (mut x, mut y) = (x0 + sx * nx, y0 + sy * ny);
        // Error term after nx horizontal and ny vertical steps; bounded by the line extent
        let mut err = (dx as i128 + dy as i128 + ny as i128 * dx as i128 + nx as i128 * dy as i128)
            as i64;

        loop {
            // Both axes are monotone, so once the path leaves the grid it never comes back
            if !self.increment(x, y) {
                break;
            }

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Largest cell value
    pub fn max_value(&self) -> f64 {
        self.cells.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Number of cells holding a positive density
    pub fn positive_cells(&self) -> usize {
        self.cells.iter().filter(|&&v| v > 0.0).count()
    }
}

/// All density grids of one zoom level, keyed by [`TileKey`]
///
/// A tile set lives for exactly one zoom iteration; it is never merged with another zoom.
#[derive(Clone, Debug)]
pub struct TileSet {
    zoom: u8,
    tile_size: u32,
    grids: HashMap<TileKey, DensityGrid>,
}

impl TileSet {
    pub fn new(zoom: u8, tile_size: u32) -> Self {
        Self {
            zoom,
            tile_size,
            grids: HashMap::new(),
        }
    }

    pub(crate) fn from_grids(
        zoom: u8,
        tile_size: u32,
        grids: HashMap<TileKey, DensityGrid>,
    ) -> Self {
        Self {
            zoom,
            tile_size,
            grids,
        }
    }

    #[inline]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.grids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// The grid for `tile`, created zeroed on first access
    pub fn grid_mut(&mut self, tile: TileId) -> &mut DensityGrid {
        debug_assert_eq!(tile.zoom(), self.zoom);
        let tile_size = self.tile_size;
        self.grids
            .entry(tile.key())
            .or_insert_with(|| DensityGrid::new(tile_size))
    }

    pub fn get(&self, tile: TileId) -> Option<&DensityGrid> {
        self.grids.get(&tile.key())
    }

    pub fn remove(&mut self, tile: TileId) -> Option<DensityGrid> {
        self.grids.remove(&tile.key())
    }

    /// Maximum cell value across every grid, never below zero
    pub fn max_density(&self) -> f64 {
        self.grids
            .values()
            .map(DensityGrid::max_value)
            .fold(0.0, f64::max)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, &DensityGrid)> {
        self.grids.iter().map(|(key, grid)| (key.decode(), grid))
    }

    /// Consume the set, yielding each grid once
    pub fn into_tiles(self) -> impl Iterator<Item = (TileId, DensityGrid)> {
        self.grids.into_iter().map(|(key, grid)| (key.decode(), grid))
    }
}

/// Steps along one axis from `start` in direction `step` before reaching `[0, size)`
#[inline]
fn steps_to_enter(start: i64, step: i64, size: i64) -> i64 {
    if step > 0 {
        (-start).max(0)
    } else {
        (start - (size - 1)).max(0)
    }
}

/// Horizontal and vertical step counts of the first Bresenham pixel that has advanced at least
/// `enter_x` and `enter_y` steps, for a line spanning `dx` by `dy` pixels (both non-negative).
/// `None` when the line ends before that.
///
/// The major axis advances on every iteration. After `n` of them the minor axis has advanced
/// `round_half_up(n * minor / major)` steps.
fn first_visible_step(dx: i64, dy: i64, enter_x: i64, enter_y: i64) -> Option<(i64, i64)> {
    if enter_x == 0 && enter_y == 0 {
        return Some((0, 0));
    }
    if dx >= dy {
        let n = enter_x.max(major_steps_for_minor(dx, dy, enter_y)?);
        (n <= dx).then(|| (n, minor_after(dx, dy, n)))
    } else {
        let n = enter_y.max(major_steps_for_minor(dy, dx, enter_x)?);
        (n <= dy).then(|| (minor_after(dy, dx, n), n))
    }
}

/// Fewest major-axis iterations after which the minor axis has advanced `target` steps
fn major_steps_for_minor(major: i64, minor: i64, target: i64) -> Option<i64> {
    if target == 0 {
        return Some(0);
    }
    if minor == 0 {
        return None;
    }
    let (major, minor, target) = (major as i128, minor as i128, target as i128);
    // Smallest n with (2 * minor * n + major) / (2 * major) >= target
    let numerator = 2 * major * target - major;
    let denominator = 2 * minor;
    let n = (numerator + denominator - 1) / denominator;
    Some(n.min(i64::MAX as i128) as i64)
}

/// Minor-axis steps taken after `n` major-axis iterations
fn minor_after(major: i64, minor: i64, n: i64) -> i64 {
    if n == 0 {
        return 0;
    }
    let (major, minor, n) = (major as i128, minor as i128, n as i128);
    ((2 * minor * n + major) / (2 * major)) as i64
}
