//! Destinations for rendered tiles

use crate::{Result, TileId};
use dashmap::DashMap;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Receives rendered tiles
///
/// Sinks are shared across rayon workers when zoom levels are built concurrently.
pub trait TileSink: Send + Sync {
    fn write_tile(&self, tile: TileId, image: &DynamicImage) -> Result<()>;

    /// Store the all-background tile that consumers substitute for missing tiles
    fn write_empty(&self, _image: &DynamicImage) -> Result<()> {
        Ok(())
    }

    /// Called periodically while a zoom level is written, as a hint to release buffers
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<S: TileSink + ?Sized> TileSink for &S {
    fn write_tile(&self, tile: TileId, image: &DynamicImage) -> Result<()> {
        (**self).write_tile(tile, image)
    }

    fn write_empty(&self, image: &DynamicImage) -> Result<()> {
        (**self).write_empty(image)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

/// Writes PNG files in the `<root>/<zoom>/<x>/<y>.png` layout served by slippy-map clients,
/// plus `<root>/empty.png`
#[derive(Debug, Clone)]
pub struct FileSystemSink {
    root: PathBuf,
}

impl FileSystemSink {
    pub const EMPTY_TILE_NAME: &'static str = "empty.png";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tile_path(&self, tile: TileId) -> PathBuf {
        self.root
            .join(tile.zoom().to_string())
            .join(tile.x().to_string())
            .join(format!("{}.png", tile.y()))
    }

    pub fn empty_path(&self) -> PathBuf {
        self.root.join(Self::EMPTY_TILE_NAME)
    }

    fn save(path: &Path, image: &DynamicImage) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

impl TileSink for FileSystemSink {
    fn write_tile(&self, tile: TileId, image: &DynamicImage) -> Result<()> {
        let path = self.tile_path(tile);
        tracing::trace!("Writing {}", path.display());
        Self::save(&path, image)
    }

    fn write_empty(&self, image: &DynamicImage) -> Result<()> {
        Self::save(&self.empty_path(), image)
    }
}

/// Keeps PNG-encoded tiles in memory
///
/// Useful for embedding the engine behind a server, and for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    tiles: DashMap<TileId, Vec<u8>>,
    empty: RwLock<Option<Vec<u8>>>,
    flushes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, tile: TileId) -> bool {
        self.tiles.contains_key(&tile)
    }

    /// All stored tiles, sorted
    pub fn tiles(&self) -> Vec<TileId> {
        let mut tiles: Vec<TileId> = self.tiles.iter().map(|entry| *entry.key()).collect();
        tiles.sort_unstable();
        tiles
    }

    /// Encoded PNG bytes of a tile
    pub fn png(&self, tile: TileId) -> Option<Vec<u8>> {
        self.tiles.get(&tile).map(|bytes| bytes.value().clone())
    }

    /// Decode a stored tile
    pub fn image(&self, tile: TileId) -> Result<Option<DynamicImage>> {
        self.png(tile).map(|bytes| decode_png(&bytes)).transpose()
    }

    /// Decode the stored empty tile
    pub fn empty_image(&self) -> Result<Option<DynamicImage>> {
        let empty = self.empty.read().unwrap_or_else(PoisonError::into_inner);
        empty.as_deref().map(decode_png).transpose()
    }

    /// How many times the sink was asked to flush
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Drop every stored tile
    pub fn clear(&self) {
        self.tiles.clear();
    }
}

impl TileSink for MemorySink {
    fn write_tile(&self, tile: TileId, image: &DynamicImage) -> Result<()> {
        self.tiles.insert(tile, encode_png(image)?);
        Ok(())
    }

    fn write_empty(&self, image: &DynamicImage) -> Result<()> {
        let bytes = encode_png(image)?;
        *self.empty.write().unwrap_or_else(PoisonError::into_inner) = Some(bytes);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.tiles.shrink_to_fit();
        Ok(())
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn decode_png(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?)
}
