//! Track Heatmap Library - Density Tile Pyramids from GPS Segments
//!
//! This library turns a collection of GPS track segments into a multi-resolution pyramid of
//! raster density tiles following the standard slippy-map `(zoom, x, y)` tiling scheme.
//! Every zoom level is rasterized into its own short-lived set of density grids, normalized
//! against the zoom-wide maximum on a logarithmic scale and written out tile by tile.
//!
//! # Architecture
//!
//! - **[`projection`]**: Web Mercator projection into fractional tile and pixel space
//! - **[`TileId`] / [`TileKey`]**: Tile addressing and the interleaved integer key
//! - **[`DensityGrid`] / [`TileSet`]**: Per-tile accumulators, grouped per zoom
//! - **[`rasterize`]**: Bresenham segment rasterization with tile-boundary splitting
//! - **[`Renderer`]**: Logarithmic normalization into luminance or gradient images
//! - **[`TilePyramid`]**: The per-zoom orchestrator, plus on-demand single-tile builds
//! - **[`TileSink`]**: Where rendered images go (filesystem or memory)
//! - **[`SegmentIndex`]**: Spatial index answering bounding-box segment queries
//! - **[`Track`]**: GPX loading and plausibility-filtered segment derivation
//!
//! # Memory
//!
//! At most one zoom level's tile set is resident per worker. Grids are consumed while their
//! images are written, so the peak is bounded by the number of tiles touched at one zoom.

mod grid;
mod index;
mod jitter;
pub mod projection;
mod pyramid;
pub mod rasterize;
mod render;
mod sink;
mod tile;
mod track;

// Public API exports
pub use grid::{DensityGrid, TileSet};
pub use index::{SegmentIndex, SpatialRangeSource};
pub use jitter::Jitter;
pub use pyramid::{BuildReport, Config, MAX_TILE_SIZE, Parallelism, TilePyramid, ZoomReport};
pub use rasterize::SegmentFrame;
pub use render::{RenderMode, Renderer, WeightMode};
pub use sink::{FileSystemSink, MemorySink, TileSink};
pub use tile::{MAX_ZOOM, TileId, TileKey};
pub use track::{Point, Segment, SegmentFilter, Track, find_gpx_files, load_segments};

/// Error types for tile generation
#[derive(Debug, thiserror::Error)]
pub enum HeatmapError {
    #[error("Invalid zoom range: {min}..={max} (maximum supported zoom is {MAX_ZOOM})")]
    InvalidZoomRange { min: u8, max: u8 },

    #[error("Invalid tile size: {0}")]
    InvalidTileSize(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tile out of range: {zoom}/{x}/{y}")]
    TileOutOfRange { zoom: u8, x: u32, y: u32 },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GPX parsing error: {0}")]
    GpxParse(#[from] gpx::errors::GpxError),

    #[error("Empty track")]
    EmptyTrack,
}

pub type Result<T> = std::result::Result<T, HeatmapError>;
