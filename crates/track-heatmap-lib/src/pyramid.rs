//! Zoom pyramid orchestration
//!
//! [`TilePyramid`] drives the per-zoom pipeline: rasterize every segment into a fresh
//! [`TileSet`], find the zoom-wide maximum, render each grid against it and hand the images to
//! a [`TileSink`]. A tile set never outlives its zoom iteration.

use crate::projection::tile_bounds;
use crate::rasterize;
use crate::{
    DensityGrid, HeatmapError, Jitter, MAX_ZOOM, RenderMode, Renderer, Result, Segment,
    SpatialRangeSource, TileId, TileKey, TileSet, TileSink, WeightMode,
};
use dashmap::DashMap;
use rayon::prelude::*;
use std::borrow::Cow;
use std::ops::RangeInclusive;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest accepted tile side length in pixels
pub const MAX_TILE_SIZE: u32 = 4096;

/// How the work of a build is spread over threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Parallelism {
    /// One zoom after the other on the calling thread
    #[default]
    Sequential,
    /// Zoom levels on rayon workers, each with its own tile set
    Zooms,
    /// One zoom at a time, segments rasterized on rayon workers into a shared, sharded map
    Segments,
}

/// Configuration for building a tile pyramid
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Side length of every tile in pixels, at most [`MAX_TILE_SIZE`] (default 256)
    pub tile_size: u32,
    /// First zoom level built (default 0)
    pub min_zoom: u8,
    /// Last zoom level built, inclusive (default 16)
    pub max_zoom: u8,
    pub render_mode: RenderMode,
    pub weight: WeightMode,
    /// Lowest output value of a foreground pixel (default 0)
    pub base_value: u8,
    /// Coordinate jitter applied per zoom (default none)
    pub jitter: Jitter,
    pub parallelism: Parallelism,
    /// Ask the sink to flush after this many tiles (default 200)
    pub flush_every: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Default for Config {
    fn default() -> Self {
        Self {
            tile_size: 256,
            min_zoom: 0,
            max_zoom: 16,
            render_mode: RenderMode::Luminance,
            weight: WeightMode::ZoomScaled,
            base_value: 0,
            jitter: Jitter::none(),
            parallelism: Parallelism::Sequential,
            flush_every: 200,
        }
    }
}

impl Config {
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Select a render mode together with the weighting conventionally paired with it
    pub fn with_render_mode(mut self, render_mode: RenderMode) -> Self {
        self.render_mode = render_mode;
        self.weight = render_mode.default_weight();
        self
    }

    pub fn with_weight(mut self, weight: WeightMode) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_base_value(mut self, base_value: u8) -> Self {
        self.base_value = base_value;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    /// Reject configurations that cannot produce a valid pyramid
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(HeatmapError::InvalidTileSize(self.tile_size));
        }
        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_ZOOM {
            return Err(HeatmapError::InvalidZoomRange {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        if self.flush_every == 0 {
            return Err(HeatmapError::InvalidConfig(
                "flush batch size must be at least 1".to_string(),
            ));
        }
        let amplitude = self.jitter.amplitude();
        if !amplitude.is_finite() || amplitude < 0.0 {
            return Err(HeatmapError::InvalidConfig(format!(
                "jitter amplitude must be finite and non-negative, got {amplitude}"
            )));
        }
        match self.weight {
            WeightMode::Constant(weight) if !(weight.is_finite() && weight > 0.0) => {
                Err(HeatmapError::InvalidConfig(format!(
                    "constant weight must be finite and positive, got {weight}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Outcome of one zoom level
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ZoomReport {
    pub zoom: u8,
    /// Segments rasterized
    pub segments: usize,
    /// Tiles that received at least one write
    pub tiles_rasterized: usize,
    /// Images handed to the sink
    pub tiles_written: usize,
    /// Normalization maximum, 0 when nothing was drawn
    pub max_density: f64,
    /// True when the zoom held no positive density and nothing was written
    pub skipped: bool,
}

/// Outcome of a full build
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BuildReport {
    /// One entry per zoom level, ascending
    pub zooms: Vec<ZoomReport>,
}

impl BuildReport {
    pub fn total_tiles_written(&self) -> usize {
        self.zooms.iter().map(|zoom| zoom.tiles_written).sum()
    }

    pub fn skipped_zooms(&self) -> impl Iterator<Item = u8> + '_ {
        self.zooms.iter().filter(|zoom| zoom.skipped).map(|zoom| zoom.zoom)
    }
}

/// Builds heatmap tiles for a range of zoom levels
#[derive(Debug, Clone)]
pub struct TilePyramid {
    config: Config,
    renderer: Renderer,
}

impl TilePyramid {
    /// Validate `config` and prepare a pyramid builder
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let renderer = Renderer::new(
            config.render_mode,
            config.weight,
            config.base_value,
            config.tile_size,
        );
        Ok(Self { config, renderer })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Zoom levels a full build covers
    pub fn zooms(&self) -> RangeInclusive<u8> {
        self.config.min_zoom..=self.config.max_zoom
    }

    /// Build every configured zoom level
    ///
    /// The empty tile is written first. A sink error aborts the build; tiles of zoom levels
    /// already finished stay written.
    pub fn build(&self, segments: &[Segment], sink: &dyn TileSink) -> Result<BuildReport> {
        #[cfg(feature = "profiling")]
        profiling::scope!("pyramid::build");

        tracing::info!(
            "Building zoom levels {}..={} from {} segments ({:?})",
            self.config.min_zoom,
            self.config.max_zoom,
            segments.len(),
            self.config.parallelism
        );

        sink.write_empty(self.renderer.empty_tile())?;

        let zooms = match self.config.parallelism {
            Parallelism::Zooms => self
                .zooms()
                .into_par_iter()
                .map(|zoom| self.build_zoom(zoom, segments, sink))
                .collect::<Result<Vec<_>>>()?,
            Parallelism::Sequential | Parallelism::Segments => self
                .zooms()
                .map(|zoom| self.build_zoom(zoom, segments, sink))
                .collect::<Result<Vec<_>>>()?,
        };

        let report = BuildReport { zooms };
        tracing::info!("Wrote {} tiles", report.total_tiles_written());
        Ok(report)
    }

    /// Build a single zoom level
    ///
    /// Exposed for callers that drive zoom levels themselves, for example to stop between them.
    pub fn build_zoom(
        &self,
        zoom: u8,
        segments: &[Segment],
        sink: &dyn TileSink,
    ) -> Result<ZoomReport> {
        #[cfg(feature = "profiling")]
        profiling::scope!("pyramid::build_zoom");

        if zoom > MAX_ZOOM {
            return Err(HeatmapError::InvalidZoomRange {
                min: zoom,
                max: zoom,
            });
        }

        let tile_set = self.rasterize_zoom(segments, zoom);
        let mut report = ZoomReport {
            zoom,
            segments: segments.len(),
            tiles_rasterized: tile_set.len(),
            ..Default::default()
        };

        let max_density = tile_set.max_density();
        if max_density <= 0.0 {
            tracing::info!("Zoom {}: no density, skipped", zoom);
            report.skipped = true;
            return Ok(report);
        }

        report.max_density = max_density;
        report.tiles_written = self.write_tile_set(tile_set, max_density, sink)?;
        tracing::info!(
            "Zoom {}: {} tiles written (max density {})",
            zoom,
            report.tiles_written,
            max_density
        );
        Ok(report)
    }

    /// Rasterize (jittered) segments into the density grids of one zoom level
    pub fn rasterize_zoom(&self, segments: &[Segment], zoom: u8) -> TileSet {
        #[cfg(feature = "profiling")]
        profiling::scope!("pyramid::rasterize_zoom");

        let segments = self.jittered(segments, zoom);
        match self.config.parallelism {
            Parallelism::Segments => self.rasterize_concurrent(&segments, zoom),
            Parallelism::Sequential | Parallelism::Zooms => {
                let mut tile_set = TileSet::new(zoom, self.config.tile_size);
                for segment in segments.iter() {
                    rasterize::rasterize(segment, &mut tile_set);
                }
                tile_set
            }
        }
    }

    /// Build one tile from the segments `source` returns for its bounds
    ///
    /// The tile is normalized against its own maximum rather than the zoom-wide one. Returns
    /// `None`, writing nothing, when no segment contributes density to the tile.
    pub fn build_tile<S>(
        &self,
        tile: TileId,
        source: &S,
        sink: &dyn TileSink,
    ) -> Result<Option<ZoomReport>>
    where
        S: SpatialRangeSource + ?Sized,
    {
        #[cfg(feature = "profiling")]
        profiling::scope!("pyramid::build_tile");

        let zoom = tile.zoom();
        let segments = source.segments_in(tile_bounds(tile));
        if segments.is_empty() {
            tracing::debug!("Tile {}: no segments", tile);
            return Ok(None);
        }

        let mut tile_set = self.rasterize_zoom(&segments, zoom);
        let tiles_rasterized = tile_set.len();
        let Some(grid) = tile_set.remove(tile) else {
            tracing::debug!("Tile {}: {} segments, none drawn here", tile, segments.len());
            return Ok(None);
        };
        drop(tile_set);

        let max_density = grid.max_value();
        if max_density <= 0.0 {
            return Ok(None);
        }

        let image = self
            .renderer
            .render(&grid, Renderer::log_reference(max_density), zoom);
        sink.write_tile(tile, &image)?;

        Ok(Some(ZoomReport {
            zoom,
            segments: segments.len(),
            tiles_rasterized,
            tiles_written: 1,
            max_density,
            skipped: false,
        }))
    }

    fn jittered<'a>(&self, segments: &'a [Segment], zoom: u8) -> Cow<'a, [Segment]> {
        if self.config.jitter.is_enabled() {
            Cow::Owned(self.config.jitter.apply(segments, zoom))
        } else {
            Cow::Borrowed(segments)
        }
    }

    /// Rasterize on rayon workers; each tile's grid is mutated under its shard lock
    fn rasterize_concurrent(&self, segments: &[Segment], zoom: u8) -> TileSet {
        let tile_size = self.config.tile_size;
        let grids: DashMap<TileKey, DensityGrid> = DashMap::new();

        segments.par_iter().for_each(|segment| {
            for frame in rasterize::frames(segment, zoom, tile_size) {
                let mut grid = grids
                    .entry(frame.tile.key())
                    .or_insert_with(|| DensityGrid::new(tile_size));
                frame.apply(grid.value_mut());
            }
        });

        TileSet::from_grids(zoom, tile_size, grids.into_iter().collect())
    }

    /// Render and write every grid of the set, consuming it
    fn write_tile_set(
        &self,
        tile_set: TileSet,
        max_density: f64,
        sink: &dyn TileSink,
    ) -> Result<usize> {
        let zoom = tile_set.zoom();
        let log_ref = Renderer::log_reference(max_density);
        let mut written = 0;

        for (tile, grid) in tile_set.into_tiles() {
            // Endpoint correction can cancel a tile out entirely. It still gets a blank image so
            // a rebuild replaces whatever an earlier build left at that path.
            if grid.positive_cells() == 0 {
                drop(grid);
                sink.write_tile(tile, self.renderer.empty_tile())?;
            } else {
                let image = self.renderer.render(&grid, log_ref, zoom);
                drop(grid);
                sink.write_tile(tile, &image)?;
            }
            tracing::debug!("Tile {} written", tile);
            written += 1;

            if written % self.config.flush_every == 0 {
                sink.flush()?;
            }
        }

        Ok(written)
    }
}
