//! Tile cache value types.

use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

use crate::coord::TileCoord;

/// Decoded tile raster, shared between the cache and the renderer.
pub type Bitmap = Arc<RgbaImage>;

/// Identity of a cached tile: map name plus grid address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub map: Arc<str>,
    pub tile: TileCoord,
}

impl TileKey {
    pub fn new(map: impl Into<Arc<str>>, tile: TileCoord) -> Self {
        Self {
            map: map.into(),
            tile,
        }
    }

    pub fn zoom(&self) -> u8 {
        self.tile.zoom
    }

    pub fn row(&self) -> u32 {
        self.tile.row
    }

    pub fn col(&self) -> u32 {
        self.tile.col
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.map, self.tile)
    }
}

/// "Data became available" signals for the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileEvent {
    /// The loader placed a tile (possibly still without a bitmap) in the cache.
    Loaded(TileKey),
    /// A download finished; `ok` is false when the placeholder was kept.
    Downloaded { key: TileKey, ok: bool },
}

impl TileEvent {
    pub fn key(&self) -> &TileKey {
        match self {
            TileEvent::Loaded(key) => key,
            TileEvent::Downloaded { key, .. } => key,
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub resident: usize,
    pub hits: u64,
    pub misses: u64,
    pub loaders_started: u64,
    pub downloaders_started: u64,
    pub downloads_failed: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of requests served from memory.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} tiles, {} hits, {} misses, {} loads, {} downloads ({} failed), {} evictions",
            self.resident,
            self.capacity,
            self.hits,
            self.misses,
            self.loaders_started,
            self.downloaders_started,
            self.downloads_failed,
            self.evictions
        )
    }
}
