//! Injectable coordinate jitter
//!
//! Tracks recorded over the same road by the same device tend to land on exactly the same
//! pixels at high zoom. A small random offset on each coordinate spreads them out. The jitter
//! is an explicit value so that builds stay reproducible (seeded) or exact (disabled).

use crate::{Point, Segment};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Uniform offset in degrees, or none at all
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Jitter {
    /// Maximum absolute offset in degrees applied to each coordinate
    amplitude: f64,
    /// Base seed; every zoom level derives its own stream from it
    seed: u64,
}

impl Jitter {
    /// Amplitude historically used for GPS heatmaps, about two meters
    pub const DEFAULT_AMPLITUDE: f64 = 0.00002;

    /// No jitter: coordinates pass through unchanged
    pub const fn none() -> Self {
        Self {
            amplitude: 0.0,
            seed: 0,
        }
    }

    /// Offsets uniform in `[-amplitude, amplitude)` drawn from a stream seeded with `seed`
    pub const fn uniform(amplitude: f64, seed: u64) -> Self {
        Self { amplitude, seed }
    }

    #[inline]
    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.amplitude > 0.0
    }

    /// Jitter a batch of segments for one zoom level
    ///
    /// The stream depends only on the seed and the zoom, so zoom levels processed on different
    /// workers see the same offsets as a sequential build. Both endpoints of every segment are
    /// offset independently.
    pub fn apply(&self, segments: &[Segment], zoom: u8) -> Vec<Segment> {
        let mut stream = self.stream(zoom);
        segments
            .iter()
            .map(|segment| Segment::new(stream.offset(segment.from), stream.offset(segment.to)))
            .collect()
    }

    fn stream(&self, zoom: u8) -> JitterStream {
        JitterStream {
            amplitude: self.amplitude,
            rng: fastrand::Rng::with_seed(
                self.seed ^ (zoom as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15),
            ),
        }
    }
}

struct JitterStream {
    amplitude: f64,
    rng: fastrand::Rng,
}

impl JitterStream {
    #[inline]
    fn offset(&mut self, point: Point) -> Point {
        let lat = point.lat + self.rng.f64() * self.amplitude * 2.0 - self.amplitude;
        let lon = point.lon + self.rng.f64() * self.amplitude * 2.0 - self.amplitude;
        Point::new(lat, lon)
    }
}
