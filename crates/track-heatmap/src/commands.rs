//! Subcommand implementations

use crate::cli::{Command, InputOptions, PyramidOptions, Settings};
use std::path::{Path, PathBuf};
use track_heatmap_lib::{
    BuildReport, FileSystemSink, HeatmapError, Segment, SegmentIndex, TileId, TilePyramid,
    TileSink, find_gpx_files, load_segments,
};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Heatmap(#[from] HeatmapError),

    #[error("Failed to serialize build report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("Failed to write build report {path}: {source}")]
    ReportIo {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub fn run(settings: Settings) -> Result<(), CliError> {
    match settings.command {
        Command::Build {
            input,
            output,
            pyramid,
            report,
        } => build(&input, &output, &pyramid, report.as_deref()),
        Command::Tile {
            input,
            output,
            pyramid,
            zoom,
            x,
            y,
        } => tile(&input, &output, &pyramid, zoom, x, y),
        Command::Empty { output, pyramid } => empty(&output, &pyramid),
    }
}

fn build(
    input: &InputOptions,
    output: &Path,
    options: &PyramidOptions,
    report_path: Option<&Path>,
) -> Result<(), CliError> {
    // Reject bad settings before spending time on parsing tracks
    let pyramid = TilePyramid::new(options.to_config())?;
    let segments = load(input)?;

    let sink = FileSystemSink::new(output);
    let report = pyramid.build(&segments, &sink)?;
    tracing::info!(
        "Built {} tiles into {}",
        report.total_tiles_written(),
        output.display()
    );

    if let Some(path) = report_path {
        write_report(path, &report)?;
    }
    Ok(())
}

fn tile(
    input: &InputOptions,
    output: &Path,
    options: &PyramidOptions,
    zoom: u8,
    x: u32,
    y: u32,
) -> Result<(), CliError> {
    let pyramid = TilePyramid::new(options.to_config())?;
    let tile = TileId::new(zoom, x, y)?;
    let index = SegmentIndex::from_segments(load(input)?);

    let sink = FileSystemSink::new(output);
    sink.write_empty(pyramid.renderer().empty_tile())?;
    match pyramid.build_tile(tile, &index, &sink)? {
        Some(report) => tracing::info!(
            "Tile {} written from {} segments to {}",
            tile,
            report.segments,
            sink.tile_path(tile).display()
        ),
        None => tracing::info!(
            "Tile {} has no data, {} stands in for it",
            tile,
            sink.empty_path().display()
        ),
    }
    Ok(())
}

fn empty(output: &Path, options: &PyramidOptions) -> Result<(), CliError> {
    let pyramid = TilePyramid::new(options.to_config())?;
    let sink = FileSystemSink::new(output);
    sink.write_empty(pyramid.renderer().empty_tile())?;
    tracing::info!("Wrote {}", sink.empty_path().display());
    Ok(())
}

fn load(input: &InputOptions) -> Result<Vec<Segment>, CliError> {
    let files = find_gpx_files(&input.tracks)?;
    if files.is_empty() {
        tracing::warn!("No .gpx files found in {}", input.tracks.display());
    } else {
        tracing::info!(
            "Loading {} GPX files from {}",
            files.len(),
            input.tracks.display()
        );
    }

    let segments = load_segments(&files, &input.segment_filter())?;
    tracing::info!("{} segments passed the plausibility filter", segments.len());
    Ok(segments)
}

fn write_report(path: &Path, report: &BuildReport) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).map_err(|source| CliError::ReportIo {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("Build report written to {}", path.display());
    Ok(())
}
