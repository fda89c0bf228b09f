use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;
use track_heatmap_lib::{Config, Jitter, Parallelism, RenderMode, SegmentFilter, WeightMode};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Track Heatmap - Render folders of GPX tracks into slippy-map heatmap tiles
pub struct Settings {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build every tile of the configured zoom levels
    Build {
        #[clap(flatten)]
        input: InputOptions,

        /// Output directory for <zoom>/<x>/<y>.png tiles and empty.png
        #[clap(short, long, value_name = "DIR", env = "TRACK_HEATMAP_OUTPUT")]
        output: PathBuf,

        #[clap(flatten)]
        pyramid: PyramidOptions,

        /// Write a JSON build report to this file
        #[clap(long, value_name = "FILE", env = "TRACK_HEATMAP_REPORT")]
        report: Option<PathBuf>,
    },

    /// Build a single tile, normalized against its own maximum
    Tile {
        #[clap(flatten)]
        input: InputOptions,

        /// Output directory for <zoom>/<x>/<y>.png tiles and empty.png
        #[clap(short, long, value_name = "DIR", env = "TRACK_HEATMAP_OUTPUT")]
        output: PathBuf,

        #[clap(flatten)]
        pyramid: PyramidOptions,

        /// Zoom level of the tile
        #[clap(long)]
        zoom: u8,

        /// Column of the tile
        #[clap(long)]
        x: u32,

        /// Row of the tile (0 at the north edge)
        #[clap(long)]
        y: u32,
    },

    /// Only write the empty tile served in place of missing tiles
    Empty {
        /// Output directory
        #[clap(short, long, value_name = "DIR", env = "TRACK_HEATMAP_OUTPUT")]
        output: PathBuf,

        #[clap(flatten)]
        pyramid: PyramidOptions,
    },
}

#[derive(Args, Debug, Clone)]
pub struct InputOptions {
    /// Directory searched recursively for .gpx files
    #[clap(short, long, value_name = "DIR", env = "TRACK_HEATMAP_TRACKS")]
    pub tracks: PathBuf,

    /// Segments slower than this (m/s) are dropped
    #[clap(long, default_value = "2.0", env = "TRACK_HEATMAP_MIN_VELOCITY")]
    pub min_velocity: f64,

    /// Segments faster than this (m/s) are dropped
    #[clap(long, default_value = "50.0", env = "TRACK_HEATMAP_MAX_VELOCITY")]
    pub max_velocity: f64,
}

impl InputOptions {
    pub fn segment_filter(&self) -> SegmentFilter {
        SegmentFilter {
            min_velocity: self.min_velocity,
            max_velocity: self.max_velocity,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PyramidOptions {
    /// First zoom level to build
    #[clap(long, default_value = "0", env = "TRACK_HEATMAP_MIN_ZOOM")]
    pub min_zoom: u8,

    /// Last zoom level to build (inclusive)
    #[clap(long, default_value = "16", env = "TRACK_HEATMAP_MAX_ZOOM")]
    pub max_zoom: u8,

    /// Tile side length in pixels (1 to 4096)
    #[clap(long, default_value = "256", env = "TRACK_HEATMAP_TILE_SIZE")]
    pub tile_size: u32,

    /// Output image flavour
    #[clap(long, value_enum, default_value = "luminance", env = "TRACK_HEATMAP_MODE")]
    pub mode: ModeArg,

    /// Density weight: "zoom" for (zoom + 1) / 2, or a constant. Defaults to the mode's weight
    #[clap(long, env = "TRACK_HEATMAP_WEIGHT")]
    pub weight: Option<WeightArg>,

    /// Lowest output value of a foreground pixel
    #[clap(long, default_value = "0", env = "TRACK_HEATMAP_BASE_VALUE")]
    pub base_value: u8,

    /// Random offset in degrees applied to coordinates at every zoom (0 disables it)
    #[clap(long, default_value = "0.0", env = "TRACK_HEATMAP_JITTER")]
    pub jitter: f64,

    /// Seed of the jitter streams
    #[clap(long, default_value = "0", env = "TRACK_HEATMAP_SEED")]
    pub seed: u64,

    /// How the build is spread over threads
    #[clap(long, value_enum, default_value = "sequential", env = "TRACK_HEATMAP_PARALLEL")]
    pub parallel: ParallelArg,

    /// Ask the output to flush after this many tiles
    #[clap(long, default_value = "200", env = "TRACK_HEATMAP_FLUSH_EVERY")]
    pub flush_every: usize,
}

impl PyramidOptions {
    pub fn to_config(&self) -> Config {
        let mut config = Config::default()
            .with_zoom_range(self.min_zoom, self.max_zoom)
            .with_tile_size(self.tile_size)
            .with_render_mode(self.mode.into())
            .with_base_value(self.base_value)
            .with_jitter(Jitter::uniform(self.jitter, self.seed))
            .with_parallelism(self.parallel.into())
            .with_flush_every(self.flush_every);
        if let Some(weight) = self.weight {
            config = config.with_weight(weight.into());
        }
        config
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Grayscale brightness
    Luminance,
    /// Red to green with alpha, on a transparent background
    Gradient,
}

impl From<ModeArg> for RenderMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Luminance => RenderMode::Luminance,
            ModeArg::Gradient => RenderMode::Gradient,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelArg {
    Sequential,
    Zooms,
    Segments,
}

impl From<ParallelArg> for Parallelism {
    fn from(parallel: ParallelArg) -> Self {
        match parallel {
            ParallelArg::Sequential => Parallelism::Sequential,
            ParallelArg::Zooms => Parallelism::Zooms,
            ParallelArg::Segments => Parallelism::Segments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightArg {
    Zoom,
    Constant(f64),
}

impl FromStr for WeightArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("zoom") {
            return Ok(WeightArg::Zoom);
        }
        s.parse::<f64>()
            .map(WeightArg::Constant)
            .map_err(|_| format!("expected \"zoom\" or a number, got \"{s}\""))
    }
}

impl From<WeightArg> for WeightMode {
    fn from(weight: WeightArg) -> Self {
        match weight {
            WeightArg::Zoom => WeightMode::ZoomScaled,
            WeightArg::Constant(weight) => WeightMode::Constant(weight),
        }
    }
}

impl Settings {
    /// Parse the command line, exiting with usage on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }
}
