//! Web Mercator projection into slippy-map tile and pixel space
//!
//! Coordinates are projected onto the unit square scaled by `2^zoom`, so the integer part of a
//! projected coordinate is the tile index and the fractional part the position inside it.

use crate::{Point, TileId};
use geo::{Coord, Rect};
use std::f64::consts::PI;

/// Maximum latitude that can be represented in Web Mercator
///
/// The projection diverges at the poles; latitudes are clamped to this before projecting.
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Longitude range of the projection
pub const MAX_LONGITUDE: f64 = 180.0;

/// Clamp a point into the projectable range. Non-finite components become 0.
#[inline(always)]
pub fn clamp_point(point: Point) -> Point {
    let lat = if point.lat.is_finite() { point.lat } else { 0.0 };
    let lon = if point.lon.is_finite() { point.lon } else { 0.0 };
    Point::new(
        lat.clamp(-MAX_LATITUDE, MAX_LATITUDE),
        lon.clamp(-MAX_LONGITUDE, MAX_LONGITUDE),
    )
}

/// Fractional tile coordinates `(x, y)` of a point at `zoom`, each in `[0, 2^zoom]`
#[inline(always)]
pub fn project(point: Point, zoom: u8) -> (f64, f64) {
    let point = clamp_point(point);
    let n = TileId::tiles_per_side(zoom) as f64;

    let x = (point.lon + 180.0) / 360.0 * n;

    // Compute lat_rad once
    let lat_rad = point.lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;

    (x, y)
}

/// The tile containing `point` at `zoom`
///
/// Points on the far east edge or the clamped poles are pulled back into the last tile.
#[inline]
pub fn tile_of(point: Point, zoom: u8) -> TileId {
    let (x, y) = project(point, zoom);
    let last = (TileId::tiles_per_side(zoom) - 1) as f64;
    TileId::new_unchecked(
        zoom,
        x.floor().clamp(0.0, last) as u32,
        y.floor().clamp(0.0, last) as u32,
    )
}

/// Pixel position of `point` in the frame of `tile`
///
/// The result is only inside `[0, tile_size)` when `tile` actually contains the point; callers
/// rasterizing across tile boundaries rely on the out-of-range values.
#[inline]
pub fn pixel_in(point: Point, zoom: u8, tile: TileId, tile_size: u32) -> (i64, i64) {
    let (x, y) = project(point, zoom);
    let size = tile_size as f64;
    (
        ((x - tile.x() as f64) * size).floor() as i64,
        ((y - tile.y() as f64) * size).floor() as i64,
    )
}

/// Longitude of the west edge of tile column `x` at `zoom`
#[inline]
pub fn tile_x_to_lon(x: f64, zoom: u8) -> f64 {
    let n = TileId::tiles_per_side(zoom) as f64;
    x / n * 360.0 - 180.0
}

/// Latitude of the north edge of tile row `y` at `zoom`
#[inline]
pub fn tile_y_to_lat(y: f64, zoom: u8) -> f64 {
    let n = TileId::tiles_per_side(zoom) as f64;
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Geographic bounds of a tile, with `x` as longitude and `y` as latitude
pub fn tile_bounds(tile: TileId) -> Rect<f64> {
    let zoom = tile.zoom();
    let west = tile_x_to_lon(tile.x() as f64, zoom);
    let east = tile_x_to_lon(tile.x() as f64 + 1.0, zoom);
    // Tile rows grow southwards
    let north = tile_y_to_lat(tile.y() as f64, zoom);
    let south = tile_y_to_lat(tile.y() as f64 + 1.0, zoom);
    Rect::new(Coord { x: west, y: south }, Coord { x: east, y: north })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_origin() {
        let (x, y) = project(Point::new(0.0, 0.0), 0);
        assert!((x - 0.5).abs() < 1e-12);
        assert!((y - 0.5).abs() < 1e-12);

        let (x, y) = project(Point::new(0.0, 0.0), 10);
        assert!((x - 512.0).abs() < 1e-9);
        assert!((y - 512.0).abs() < 1e-9);
    }

    #[test]
    fn test_tile_of_london() {
        // London at zoom 10 is the well known tile 10/511/340
        let tile = tile_of(Point::new(51.5074, -0.1278), 10);
        assert_eq!((tile.zoom(), tile.x(), tile.y()), (10, 511, 340));
    }

    #[test]
    fn test_poles_are_clamped() {
        for zoom in [0u8, 5, 16] {
            let last = TileId::tiles_per_side(zoom) - 1;

            let north = tile_of(Point::new(90.0, 0.0), zoom);
            assert_eq!(north.y(), 0);

            let south = tile_of(Point::new(-90.0, 0.0), zoom);
            assert_eq!(south.y(), last);

            let east = tile_of(Point::new(0.0, 180.0), zoom);
            assert_eq!(east.x(), last);

            let out_of_range = tile_of(Point::new(123.0, -500.0), zoom);
            assert_eq!((out_of_range.x(), out_of_range.y()), (0, 0));
        }
    }

    #[test]
    fn test_non_finite_input() {
        let tile = tile_of(Point::new(f64::NAN, f64::INFINITY), 3);
        assert_eq!((tile.x(), tile.y()), (4, 4));
        let (x, y) = project(Point::new(f64::NAN, f64::NAN), 3);
        assert!(x.is_finite() && y.is_finite());
    }

    #[test]
    fn test_pixel_in_own_tile() {
        let point = Point::new(51.5074, -0.1278);
        let tile = tile_of(point, 12);
        let (px, py) = pixel_in(point, 12, tile, 256);
        assert!((0..256).contains(&px));
        assert!((0..256).contains(&py));
    }

    #[test]
    fn test_pixel_in_neighbour_tile() {
        let point = Point::new(0.0, 0.0);
        // At zoom 1 the origin is the corner shared by all four tiles
        let west = TileId::new(1, 0, 0).unwrap();
        assert_eq!(pixel_in(point, 1, west, 256), (256, 256));
        let east = TileId::new(1, 1, 1).unwrap();
        assert_eq!(pixel_in(point, 1, east, 256), (0, 0));
    }

    #[test]
    fn test_tile_bounds_roundtrip() {
        let whole = tile_bounds(TileId::new(0, 0, 0).unwrap());
        assert!((whole.min().x + 180.0).abs() < 1e-9);
        assert!((whole.max().x - 180.0).abs() < 1e-9);
        assert!((whole.max().y - MAX_LATITUDE).abs() < 1e-6);
        assert!((whole.min().y + MAX_LATITUDE).abs() < 1e-6);

        let tile = tile_of(Point::new(51.5074, -0.1278), 10);
        let bounds = tile_bounds(tile);
        assert!(bounds.min().x < -0.1278 && -0.1278 < bounds.max().x);
        assert!(bounds.min().y < 51.5074 && 51.5074 < bounds.max().y);
    }
}
