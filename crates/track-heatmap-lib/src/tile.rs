//! Tile addressing: `(zoom, x, y)` triples and their interleaved integer key

use crate::{HeatmapError, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Deepest zoom level the key encoding supports
///
/// A key needs `2 * zoom` bits for the interleaved coordinates plus one marker bit.
pub const MAX_ZOOM: u8 = 30;

/// A slippy-map tile, always within the grid bounds of its zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TileId {
    zoom: u8,
    x: u32,
    y: u32,
}

/// Single-integer key for a [`TileId`]
///
/// The layout is a quadkey: the bits of `x` and `y` are interleaved (x in the even bits,
/// y in the odd ones) and a marker bit is set right above them, at position `2 * zoom`.
/// The marker keeps equal `(x, y)` pairs at different zooms apart and lets [`TileKey::decode`]
/// recover the zoom level. Ordering of keys carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TileKey(u64);

impl TileId {
    /// Create a tile, checking that the coordinates fit the zoom level
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self> {
        if zoom > MAX_ZOOM || x >= Self::tiles_per_side(zoom) || y >= Self::tiles_per_side(zoom) {
            return Err(HeatmapError::TileOutOfRange { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }

    /// Caller guarantees `x, y < 2^zoom` and `zoom <= MAX_ZOOM`
    #[inline]
    pub(crate) fn new_unchecked(zoom: u8, x: u32, y: u32) -> Self {
        debug_assert!(zoom <= MAX_ZOOM);
        debug_assert!(x < Self::tiles_per_side(zoom) && y < Self::tiles_per_side(zoom));
        Self { zoom, x, y }
    }

    /// Number of tiles along one side of the grid at `zoom`
    #[inline]
    pub fn tiles_per_side(zoom: u8) -> u32 {
        1u32 << zoom.min(MAX_ZOOM)
    }

    #[inline]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    #[inline]
    pub fn x(&self) -> u32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Encode this tile as a [`TileKey`]
    #[inline]
    pub fn key(&self) -> TileKey {
        TileKey::encode(self.zoom, self.x, self.y)
    }

    /// Bing-style quadkey string (one base-4 digit per zoom level, empty at zoom 0)
    pub fn quadkey(&self) -> String {
        (1..=self.zoom)
            .rev()
            .map(|level| {
                let mask = 1u32 << (level - 1);
                let mut digit = b'0';
                if self.x & mask != 0 {
                    digit += 1;
                }
                if self.y & mask != 0 {
                    digit += 2;
                }
                digit as char
            })
            .collect()
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl TileKey {
    /// Encode a triple. Coordinates must be valid for the zoom level (see [`TileId::new`]).
    #[inline]
    pub fn encode(zoom: u8, x: u32, y: u32) -> Self {
        debug_assert!(zoom <= MAX_ZOOM);
        let marker = 1u64 << (2 * zoom as u32);
        TileKey(marker | spread_bits(x) | (spread_bits(y) << 1))
    }

    /// Recover the tile this key was encoded from
    #[inline]
    pub fn decode(self) -> TileId {
        let zoom = ((63 - self.0.leading_zeros()) / 2) as u8;
        let interleaved = self.0 ^ (1u64 << (2 * zoom as u32));
        TileId {
            zoom,
            x: compact_bits(interleaved),
            y: compact_bits(interleaved >> 1),
        }
    }

    /// Raw integer value of the key
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Rebuild a key from its raw value, rejecting values no tile encodes to
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            return None;
        }
        let marker_bit = 63 - raw.leading_zeros();
        if marker_bit % 2 != 0 || marker_bit / 2 > MAX_ZOOM as u32 {
            return None;
        }
        Some(TileKey(raw))
    }
}

impl From<TileId> for TileKey {
    fn from(tile: TileId) -> Self {
        tile.key()
    }
}

impl From<TileKey> for TileId {
    fn from(key: TileKey) -> Self {
        key.decode()
    }
}

/// Move the 32 bits of `v` into the even bit positions of a `u64`
#[inline]
fn spread_bits(v: u32) -> u64 {
    let mut v = v as u64;
    v = (v | (v << 16)) & 0x0000_FFFF_0000_FFFF;
    v = (v | (v << 8)) & 0x00FF_00FF_00FF_00FF;
    v = (v | (v << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    v = (v | (v << 2)) & 0x3333_3333_3333_3333;
    v = (v | (v << 1)) & 0x5555_5555_5555_5555;
    v
}

/// Inverse of [`spread_bits`]: gather the even bits of `v`
#[inline]
fn compact_bits(v: u64) -> u32 {
    let mut v = v & 0x5555_5555_5555_5555;
    v = (v | (v >> 1)) & 0x3333_3333_3333_3333;
    v = (v | (v >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    v = (v | (v >> 4)) & 0x00FF_00FF_00FF_00FF;
    v = (v | (v >> 8)) & 0x0000_FFFF_0000_FFFF;
    v = (v | (v >> 16)) & 0x0000_0000_FFFF_FFFF;
    v as u32
}
