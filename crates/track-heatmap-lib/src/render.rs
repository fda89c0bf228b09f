//! Logarithmic normalization of density grids into raster images
//!
//! Each positive cell `v` is mapped to `p = ln(v * weight(zoom)) / log_ref`, where `log_ref` is
//! derived from the zoom-wide maximum. `p` is then spread linearly over `base..=255` of the
//! output channel. Cells at or below zero stay background.

use crate::DensityGrid;
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use std::sync::OnceLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Output image flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RenderMode {
    /// Single channel, black background, brightness grows with density
    #[default]
    Luminance,
    /// Red fading to green as density grows, alpha from the base value up to opaque,
    /// transparent background
    Gradient,
}

impl RenderMode {
    /// Weighting conventionally paired with this mode
    pub fn default_weight(&self) -> WeightMode {
        match self {
            RenderMode::Luminance => WeightMode::ZoomScaled,
            RenderMode::Gradient => WeightMode::Constant(10.0),
        }
    }
}

/// Per-zoom multiplier applied to a density before taking its logarithm
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WeightMode {
    /// `(zoom + 1) / 2`: low zooms, where many tracks overlap, are dimmed
    #[default]
    ZoomScaled,
    /// The same weight at every zoom
    Constant(f64),
}

impl WeightMode {
    #[inline]
    pub fn weight(&self, zoom: u8) -> f64 {
        match *self {
            WeightMode::ZoomScaled => (zoom as f64 + 1.0) / 2.0,
            WeightMode::Constant(weight) => weight,
        }
    }
}

/// Turns density grids into images
#[derive(Debug, Clone)]
pub struct Renderer {
    mode: RenderMode,
    weight: WeightMode,
    base_value: u8,
    tile_size: u32,
    /// Built on first request and shared afterwards
    empty: OnceLock<DynamicImage>,
}

impl Renderer {
    pub fn new(mode: RenderMode, weight: WeightMode, base_value: u8, tile_size: u32) -> Self {
        Self {
            mode,
            weight,
            base_value,
            tile_size,
            empty: OnceLock::new(),
        }
    }

    #[inline]
    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    #[inline]
    pub fn weight(&self) -> WeightMode {
        self.weight
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Normalization reference for a zoom whose densest cell holds `max_density`
    ///
    /// Only meaningful for `max_density > 0`; the orchestrator skips other zooms.
    #[inline]
    pub fn log_reference(max_density: f64) -> f64 {
        (max_density * 10.0).ln()
    }

    /// Normalized intensity of one cell, `None` for background cells
    #[inline]
    pub fn normalize(&self, value: f64, log_ref: f64, zoom: u8) -> Option<f64> {
        if value <= 0.0 {
            return None;
        }
        let p = (value * self.weight.weight(zoom)).ln() / log_ref;
        (!p.is_nan()).then_some(p)
    }

    /// Render one grid against the zoom's normalization reference
    pub fn render(&self, grid: &DensityGrid, log_ref: f64, zoom: u8) -> DynamicImage {
        #[cfg(feature = "profiling")]
        profiling::scope!("render::render");

        let size = grid.size();
        let base = self.base_value;
        let intensity = |x: u32, y: u32| {
            grid.get(x as i64, y as i64)
                .and_then(|v| self.normalize(v, log_ref, zoom))
        };

        match self.mode {
            RenderMode::Luminance => DynamicImage::ImageLuma8(GrayImage::from_fn(size, size, |x, y| {
                Luma([intensity(x, y).map_or(0, |p| scale_channel(p, base))])
            })),
            RenderMode::Gradient => DynamicImage::ImageRgba8(RgbaImage::from_fn(size, size, |x, y| {
                match intensity(x, y) {
                    Some(p) => {
                        let n = scale_channel(p, 0);
                        Rgba([255 - n, n, 0, scale_channel(p, base)])
                    }
                    None => Rgba([0, 0, 0, 0]),
                }
            })),
        }
    }

    /// The all-background tile, substituted wherever a tile has no data
    pub fn empty_tile(&self) -> &DynamicImage {
        self.empty.get_or_init(|| {
            let size = self.tile_size;
            match self.mode {
                RenderMode::Luminance => {
                    DynamicImage::ImageLuma8(GrayImage::from_pixel(size, size, Luma([0])))
                }
                RenderMode::Gradient => {
                    DynamicImage::ImageRgba8(RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0])))
                }
            }
        })
    }
}

/// Map `p` onto `base..=255`, clamped, truncated to 8 bits
#[inline]
fn scale_channel(p: f64, base: u8) -> u8 {
    let base = base as f64;
    (base + p * (255.0 - base)).clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with(values: &[(i64, i64, f64)]) -> DensityGrid {
        let mut grid = DensityGrid::new(16);
        for &(x, y, v) in values {
            grid.add(x, y, v);
        }
        grid
    }

    #[test]
    fn test_weight_modes() {
        assert_eq!(WeightMode::ZoomScaled.weight(0), 0.5);
        assert_eq!(WeightMode::ZoomScaled.weight(9), 5.0);
        assert_eq!(WeightMode::Constant(10.0).weight(3), 10.0);
        assert_eq!(RenderMode::Gradient.default_weight(), WeightMode::Constant(10.0));
    }

    #[test]
    fn test_luminance_values() {
        let renderer = Renderer::new(RenderMode::Luminance, WeightMode::ZoomScaled, 0, 16);
        let grid = grid_with(&[(1, 1, 4.0), (2, 1, 1.0), (3, 1, -1.0)]);
        let zoom = 3; // weight 2
        let log_ref = Renderer::log_reference(4.0);

        let image = renderer.render(&grid, log_ref, zoom).into_luma8();
        let expected = ((8.0f64).ln() / (40.0f64).ln() * 255.0) as u8;
        assert_eq!(image.get_pixel(1, 1)[0], expected);
        let expected = ((2.0f64).ln() / (40.0f64).ln() * 255.0) as u8;
        assert_eq!(image.get_pixel(2, 1)[0], expected);
        // Non-positive cells stay background
        assert_eq!(image.get_pixel(3, 1)[0], 0);
        assert_eq!(image.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_low_weight_clamps_to_zero() {
        // At zoom 0 the weight is 0.5, so a single traversal has a negative logarithm
        let renderer = Renderer::new(RenderMode::Luminance, WeightMode::ZoomScaled, 0, 16);
        let grid = grid_with(&[(0, 0, 1.0)]);
        let image = renderer.render(&grid, Renderer::log_reference(1.0), 0).into_luma8();
        assert_eq!(image.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_base_value_lifts_foreground() {
        let renderer = Renderer::new(RenderMode::Luminance, WeightMode::Constant(1.0), 100, 16);
        let grid = grid_with(&[(0, 0, 1.0), (1, 0, 10.0)]);
        let image = renderer.render(&grid, Renderer::log_reference(10.0), 5).into_luma8();
        // ln(1) = 0 maps to the base
        assert_eq!(image.get_pixel(0, 0)[0], 100);
        assert_eq!(image.get_pixel(1, 0)[0], (100.0 + (10.0f64).ln() / (100.0f64).ln() * 155.0) as u8);
        assert_eq!(image.get_pixel(2, 0)[0], 0);
    }

    #[test]
    fn test_monotonic() {
        let renderer = Renderer::new(RenderMode::Luminance, WeightMode::ZoomScaled, 30, 16);
        let values: Vec<(i64, i64, f64)> = (0..16).map(|i| (i, 0, 1.0 + i as f64 * 3.5)).collect();
        let grid = grid_with(&values);
        let log_ref = Renderer::log_reference(grid.max_value());
        let image = renderer.render(&grid, log_ref, 12).into_luma8();

        for x in 1..16 {
            assert!(image.get_pixel(x, 0)[0] >= image.get_pixel(x - 1, 0)[0]);
        }
        assert!(image.get_pixel(15, 0)[0] > image.get_pixel(0, 0)[0]);
    }

    #[test]
    fn test_gradient_pixels() {
        let renderer = Renderer::new(RenderMode::Gradient, WeightMode::Constant(10.0), 0, 16);
        let grid = grid_with(&[(5, 5, 7.0), (6, 5, 1.0)]);
        let image = renderer.render(&grid, Renderer::log_reference(7.0), 9).into_rgba8();

        // The densest cell saturates: fully green, opaque
        assert_eq!(image.get_pixel(5, 5).0, [0, 255, 0, 255]);

        let p = (10.0f64).ln() / (70.0f64).ln();
        let n = (p * 255.0) as u8;
        assert_eq!(image.get_pixel(6, 5).0, [255 - n, n, 0, n]);

        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_zero_reference_never_nan() {
        let renderer = Renderer::new(RenderMode::Luminance, WeightMode::Constant(1.0), 0, 16);
        let grid = grid_with(&[(0, 0, 1.0), (1, 0, 2.0)]);
        // log_ref 0: ln(1)/0 is NaN and treated as background, ln(2)/0 saturates
        let image = renderer.render(&grid, 0.0, 0).into_luma8();
        assert_eq!(image.get_pixel(0, 0)[0], 0);
        assert_eq!(image.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_empty_tile_cached() {
        let renderer = Renderer::new(RenderMode::Gradient, WeightMode::Constant(10.0), 0, 32);
        let first = renderer.empty_tile();
        let second = renderer.empty_tile();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.width(), 32);
        assert!(first.to_rgba8().pixels().all(|p| p.0 == [0, 0, 0, 0]));

        let luminance = Renderer::new(RenderMode::Luminance, WeightMode::ZoomScaled, 0, 32);
        assert!(luminance.empty_tile().to_luma8().pixels().all(|p| p.0 == [0]));
    }

    #[test]
    fn test_blank_grid_renders_as_empty_tile() {
        let renderer = Renderer::new(RenderMode::Luminance, WeightMode::ZoomScaled, 0, 16);
        let image = renderer.render(&DensityGrid::new(16), 1.0, 4);
        assert_eq!(image, *renderer.empty_tile());
    }
}
