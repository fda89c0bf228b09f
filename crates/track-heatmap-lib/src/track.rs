//! Track loading and segment derivation
//!
//! This module provides the geodetic [`Point`] and [`Segment`] values the rasterizer consumes,
//! and the [`Track`] struct that turns parsed GPX data into plausibility-filtered segments.

use crate::{HeatmapError, Result};
use geo::{Coord, Rect};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Earth's radius in meters
const EARTH_RADIUS_M: f64 = 6371000.0;

/// A WGS84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    #[inline]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Haversine distance to `other` in meters
    #[inline]
    pub fn haversine_distance(&self, other: &Point) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}

impl From<geo::Point<f64>> for Point {
    fn from(point: geo::Point<f64>) -> Self {
        Point::new(point.y(), point.x())
    }
}

/// One edge of a track, from one recorded position to the next
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Segment {
    pub from: Point,
    pub to: Point,
}

impl Segment {
    #[inline]
    pub const fn new(from: Point, to: Point) -> Self {
        Self { from, to }
    }

    /// Bounding box with `x` as longitude and `y` as latitude
    #[inline]
    pub fn bounding_box(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.from.lon,
                y: self.from.lat,
            },
            Coord {
                x: self.to.lon,
                y: self.to.lat,
            },
        )
    }

    /// Length in meters
    #[inline]
    pub fn length(&self) -> f64 {
        self.from.haversine_distance(&self.to)
    }
}

/// Plausibility bounds applied when deriving segments from a track
///
/// GPS noise while standing still produces zero-length edges, and signal jumps produce
/// edges no cyclist or runner could have ridden; both would pollute the heatmap.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentFilter {
    /// Segments must be strictly longer than this (meters)
    pub min_length: f64,
    /// Minimum velocity in m/s (inclusive)
    pub min_velocity: f64,
    /// Maximum velocity in m/s (inclusive)
    pub max_velocity: f64,
}

impl Default for SegmentFilter {
    fn default() -> Self {
        Self {
            min_length: 0.0,
            min_velocity: 2.0,
            max_velocity: 50.0,
        }
    }
}

impl SegmentFilter {
    /// A filter that accepts every segment
    pub fn accept_all() -> Self {
        Self {
            min_length: f64::NEG_INFINITY,
            min_velocity: f64::NEG_INFINITY,
            max_velocity: f64::INFINITY,
        }
    }

    /// Check one edge. `seconds` is `None` when either end has no timestamp, in which case
    /// only the length bound applies.
    pub fn accepts(&self, length: f64, seconds: Option<i64>) -> bool {
        if length <= self.min_length {
            return false;
        }
        match seconds {
            Some(seconds) => {
                let seconds = if seconds == 0 { 1 } else { seconds };
                let velocity = length / seconds as f64;
                velocity >= self.min_velocity && velocity <= self.max_velocity
            }
            None => true,
        }
    }
}

/// A recorded position with its optional Unix timestamp
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct TimedPoint {
    point: Point,
    time: Option<i64>,
}

/// Positions of one GPX file, split at GPX track segment boundaries
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Track {
    name: Option<String>,
    parts: Vec<Vec<TimedPoint>>,
    cached_total_points: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Track {
    /// Create a track from parsed GPX data
    ///
    /// Returns [`HeatmapError::EmptyTrack`] if the document holds no track points.
    pub fn from_gpx(gpx_data: gpx::Gpx) -> Result<Self> {
        let name = gpx_data.tracks.iter().find_map(|t| t.name.clone());

        let parts: Vec<Vec<TimedPoint>> = gpx_data
            .tracks
            .iter()
            .flat_map(|track| track.segments.iter())
            .map(|segment| {
                segment
                    .points
                    .iter()
                    .map(|waypoint| TimedPoint {
                        point: Point::from(waypoint.point()),
                        time: waypoint
                            .time
                            .map(|t| time::OffsetDateTime::from(t).unix_timestamp()),
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|points| !points.is_empty())
            .collect();

        let total_points: usize = parts.iter().map(Vec::len).sum();
        if total_points == 0 {
            return Err(HeatmapError::EmptyTrack);
        }

        Ok(Self {
            name,
            parts,
            cached_total_points: total_points,
        })
    }

    /// Parse a GPX file from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Self::from_gpx(gpx::read(reader)?)
    }

    /// Name of the first named GPX track, if any
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Total number of recorded positions
    #[inline]
    pub fn total_points(&self) -> usize {
        self.cached_total_points
    }

    /// Sum of all edge lengths in meters, unfiltered
    pub fn total_distance(&self) -> f64 {
        self.parts
            .iter()
            .flat_map(|points| points.windows(2))
            .map(|pair| pair[0].point.haversine_distance(&pair[1].point))
            .sum()
    }

    /// Derive the segments between consecutive positions that pass `filter`
    ///
    /// Segments never bridge two GPX track segments.
    pub fn segments(&self, filter: &SegmentFilter) -> Vec<Segment> {
        self.parts
            .iter()
            .flat_map(|points| points.windows(2))
            .filter_map(|pair| {
                let (from, to) = (pair[0], pair[1]);
                let length = from.point.haversine_distance(&to.point);
                let seconds = from.time.zip(to.time).map(|(start, end)| end - start);
                filter
                    .accepts(length, seconds)
                    .then(|| Segment::new(from.point, to.point))
            })
            .collect()
    }
}

/// Recursively collect `.gpx` files below `dir`, sorted by path
///
/// Symbolic links are followed. Links pointing back at one of their own ancestors are skipped
/// with a warning.
pub fn find_gpx_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.loop_ancestor().is_some() => {
                tracing::warn!("Skipping directory loop: {}", err);
                continue;
            }
            Err(err) => return Err(std::io::Error::from(err).into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_gpx = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gpx"));
        if is_gpx {
            found.push(entry.into_path());
        }
    }

    found.sort();
    Ok(found)
}

/// Load GPX files in parallel and derive their filtered segments
///
/// Files sharing a file name with an earlier path are imported only once. Files without any
/// track point are skipped with a warning; any other error aborts the load.
pub fn load_segments<P: AsRef<Path> + Sync>(
    paths: &[P],
    filter: &SegmentFilter,
) -> Result<Vec<Segment>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("track::load_segments");

    let mut seen_names = HashSet::new();
    let unique: Vec<&Path> = paths
        .iter()
        .map(AsRef::as_ref)
        .filter(|path| {
            let name = path.file_name().map(|n| n.to_os_string());
            let first = seen_names.insert(name);
            if !first {
                tracing::info!("Skipping already imported file: {}", path.display());
            }
            first
        })
        .collect();

    let per_file: Result<Vec<Vec<Segment>>> = unique
        .into_par_iter()
        .map(|path| match Track::from_file(path) {
            Ok(track) => {
                let segments = track.segments(filter);
                tracing::debug!(
                    "Read {}: {} points, {:.1} km, {} segments kept",
                    path.display(),
                    track.total_points(),
                    track.total_distance() / 1000.0,
                    segments.len()
                );
                Ok(segments)
            }
            Err(HeatmapError::EmptyTrack) => {
                tracing::warn!("Skipping file without track points: {}", path.display());
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        })
        .collect();

    Ok(per_file?.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpx::{Gpx, Track as GpxTrack, TrackSegment, Waypoint};

    fn create_test_waypoint(lat: f64, lon: f64, unix: Option<i64>) -> Waypoint {
        let mut waypoint = Waypoint::new(geo::Point::new(lon, lat));
        waypoint.time = unix.map(|t| {
            time::OffsetDateTime::from_unix_timestamp(t)
                .unwrap()
                .into()
        });
        waypoint
    }

    fn create_test_gpx(points: &[(f64, f64, Option<i64>)]) -> Gpx {
        let mut gpx = Gpx::default();
        let mut track = GpxTrack::default();
        let mut segment = TrackSegment::default();
        for &(lat, lon, unix) in points {
            segment.points.push(create_test_waypoint(lat, lon, unix));
        }
        track.segments.push(segment);
        gpx.tracks.push(track);
        gpx
    }

    const GPX_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Morning ride</name>
    <trkseg>
      <trkpt lat="51.5000" lon="-0.1200"><time>2024-05-01T08:00:00Z</time></trkpt>
      <trkpt lat="51.5010" lon="-0.1200"><time>2024-05-01T08:00:20Z</time></trkpt>
      <trkpt lat="51.5020" lon="-0.1200"><time>2024-05-01T08:00:40Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_haversine_distance() {
        // One thousandth of a degree of latitude is about 111 m
        let d = Point::new(51.5, -0.12).haversine_distance(&Point::new(51.501, -0.12));
        assert!((d - 111.2).abs() < 0.5);
    }

    #[test]
    fn test_empty_track_fails() {
        assert!(matches!(
            Track::from_gpx(Gpx::default()),
            Err(HeatmapError::EmptyTrack)
        ));
    }

    #[test]
    fn test_segments_velocity_filter() {
        // ~111 m every 20 s is ~5.6 m/s; then ~111 m in 1 s is ~111 m/s
        let gpx = create_test_gpx(&[
            (51.500, -0.12, Some(0)),
            (51.501, -0.12, Some(20)),
            (51.502, -0.12, Some(21)),
        ]);
        let track = Track::from_gpx(gpx).unwrap();
        assert_eq!(track.total_points(), 3);

        let segments = track.segments(&SegmentFilter::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].from, Point::new(51.500, -0.12));

        let all = track.segments(&SegmentFilter::accept_all());
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_segments_zero_length_dropped() {
        let gpx = create_test_gpx(&[(51.5, -0.12, Some(0)), (51.5, -0.12, Some(10))]);
        let track = Track::from_gpx(gpx).unwrap();
        assert!(track.segments(&SegmentFilter::default()).is_empty());
    }

    #[test]
    fn test_same_timestamp_counts_as_one_second() {
        // ~11 m in "0" seconds is treated as ~11 m/s
        let gpx = create_test_gpx(&[(51.5, -0.12, Some(5)), (51.5001, -0.12, Some(5))]);
        let track = Track::from_gpx(gpx).unwrap();
        assert_eq!(track.segments(&SegmentFilter::default()).len(), 1);
    }

    #[test]
    fn test_missing_timestamps_skip_velocity_bound() {
        let gpx = create_test_gpx(&[(51.5, -0.12, None), (52.5, -0.12, None)]);
        let track = Track::from_gpx(gpx).unwrap();
        assert_eq!(track.segments(&SegmentFilter::default()).len(), 1);
    }

    #[test]
    fn test_segments_do_not_bridge_track_segments() {
        let mut gpx = create_test_gpx(&[(51.5, -0.12, None), (51.501, -0.12, None)]);
        let mut second = TrackSegment::default();
        second.points.push(create_test_waypoint(51.6, -0.12, None));
        second.points.push(create_test_waypoint(51.601, -0.12, None));
        gpx.tracks[0].segments.push(second);

        let track = Track::from_gpx(gpx).unwrap();
        assert_eq!(track.total_points(), 4);
        assert_eq!(track.segments(&SegmentFilter::default()).len(), 2);
    }

    #[test]
    fn test_load_segments_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2024");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("ride.gpx"), GPX_DOCUMENT).unwrap();
        // Same file name in another folder: imported once
        std::fs::write(nested.join("ride.gpx"), GPX_DOCUMENT).unwrap();
        std::fs::write(nested.join("notes.txt"), "not a track").unwrap();

        let files = find_gpx_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);

        let segments = load_segments(&files, &SegmentFilter::default()).unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_gpx_files_survives_symlink_cycle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ride.gpx"), GPX_DOCUMENT).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("b")).unwrap();

        let files = find_gpx_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("ride.gpx")]);
    }

    #[test]
    fn test_find_gpx_files_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_gpx_files(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_track_name_and_distance() {
        let track = Track::from_gpx(gpx::read(GPX_DOCUMENT.as_bytes()).unwrap()).unwrap();
        assert_eq!(track.name(), Some("Morning ride"));
        assert!((track.total_distance() - 222.4).abs() < 1.0);
    }

    #[test]
    fn test_segment_bounding_box() {
        let segment = Segment::new(Point::new(10.0, 20.0), Point::new(5.0, 25.0));
        let bbox = segment.bounding_box();
        assert_eq!(bbox.min(), Coord { x: 20.0, y: 5.0 });
        assert_eq!(bbox.max(), Coord { x: 25.0, y: 10.0 });
    }
}
