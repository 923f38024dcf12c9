//! Multi-resolution fallback.
//!
//! When a tile is missing from storage, a lower-zoom ancestor already on disk
//! can stand in for it: the matching sub-square of the ancestor is cropped
//! and scaled up to full tile size. At most [`MAX_FALLBACK_LEVELS`] ancestors
//! are tried.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::trace;

use crate::coord::TileCoord;
use crate::storage::Storage;

/// How many zoom levels up the loader looks for a stand-in.
pub const MAX_FALLBACK_LEVELS: usize = 5;

/// Sub-square of an ancestor tile covering the requested tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fallback {
    pub ancestor: TileCoord,
    /// Left edge of the sub-square, pixels.
    pub x: u32,
    /// Top edge of the sub-square, pixels.
    pub y: u32,
    /// Edge of the sub-square, pixels.
    pub size: u32,
}

/// Ancestors of `tile`, nearest first, with the pixel window each one offers.
pub fn fallbacks(tile: TileCoord, tile_size: u32) -> Vec<Fallback> {
    let half = tile_size / 2;
    let mut out = Vec::with_capacity(MAX_FALLBACK_LEVELS);
    let (mut row, mut col, mut zoom) = (tile.row, tile.col, tile.zoom);
    let (mut x, mut y, mut size) = (0u32, 0u32, tile_size);

    for _ in 0..MAX_FALLBACK_LEVELS {
        if zoom == 0 {
            break;
        }
        zoom -= 1;
        size >>= 1;
        x = (x >> 1) + if col & 1 == 1 { half } else { 0 };
        y = (y >> 1) + if row & 1 == 1 { half } else { 0 };
        col >>= 1;
        row >>= 1;
        if size == 0 {
            break;
        }
        out.push(Fallback {
            ancestor: TileCoord { row, col, zoom },
            x,
            y,
            size,
        });
    }
    out
}

/// Result of a storage lookup.
#[derive(Debug, Default)]
pub struct LoadedTile {
    pub bitmap: Option<RgbaImage>,
    /// True when the tile itself was on disk, not an ancestor.
    pub exact: bool,
}

/// Decodes tile bytes; corrupt data is absence.
pub fn decode(bytes: &[u8]) -> Option<RgbaImage> {
    image::load_from_memory(bytes).ok().map(|img| img.to_rgba8())
}

/// Crops `window` out of `ancestor` and scales it to `tile_size`.
///
/// `None` when the ancestor is too small for the window.
pub fn upscale(ancestor: &RgbaImage, window: &Fallback, tile_size: u32) -> Option<RgbaImage> {
    let (width, height) = ancestor.dimensions();
    if window.x + window.size > width || window.y + window.size > height {
        return None;
    }
    let sub = imageops::crop_imm(ancestor, window.x, window.y, window.size, window.size).to_image();
    Some(imageops::resize(
        &sub,
        tile_size,
        tile_size,
        FilterType::Triangle,
    ))
}

/// Reads `tile` from storage, falling back to ancestors.
pub fn load_tile(storage: &Storage, map: &str, tile: TileCoord, tile_size: u32) -> LoadedTile {
    if let Some(bitmap) = storage.read_tile(map, tile).and_then(|b| decode(&b)) {
        return LoadedTile {
            bitmap: Some(bitmap),
            exact: true,
        };
    }

    for window in fallbacks(tile, tile_size) {
        let Some(ancestor) = storage
            .read_tile(map, window.ancestor)
            .and_then(|b| decode(&b))
        else {
            continue;
        };
        if let Some(bitmap) = upscale(&ancestor, &window, tile_size) {
            trace!(map, %tile, ancestor = %window.ancestor, "Tile filled from ancestor");
            return LoadedTile {
                bitmap: Some(bitmap),
                exact: false,
            };
        }
    }
    LoadedTile::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TileFormat;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    /// 256px tile whose 64px blocks are colored by block index.
    fn block_image() -> RgbaImage {
        RgbaImage::from_fn(256, 256, |x, y| {
            Rgba([(x / 64 * 60) as u8, (y / 64 * 60) as u8, 0, 255])
        })
    }

    fn png(img: &RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_fallback_windows_from_z5() {
        let tile = TileCoord::new(10, 10, 5).unwrap();
        let windows = fallbacks(tile, 256);
        assert_eq!(windows.len(), 5);

        assert_eq!(
            windows[0],
            Fallback {
                ancestor: TileCoord { row: 5, col: 5, zoom: 4 },
                x: 0,
                y: 0,
                size: 128
            }
        );
        assert_eq!(
            windows[1],
            Fallback {
                ancestor: TileCoord { row: 2, col: 2, zoom: 3 },
                x: 128,
                y: 128,
                size: 64
            }
        );
        assert_eq!(windows[4].ancestor.zoom, 0);
    }

    #[test]
    fn test_fallbacks_stop_at_zoom_zero() {
        let tile = TileCoord::new(1, 0, 2).unwrap();
        let windows = fallbacks(tile, 256);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].ancestor, TileCoord { row: 0, col: 0, zoom: 0 });
        assert!(fallbacks(TileCoord::new(0, 0, 0).unwrap(), 256).is_empty());
    }

    #[test]
    fn test_upscale_rejects_small_ancestor() {
        let small = RgbaImage::new(100, 100);
        let window = Fallback {
            ancestor: TileCoord { row: 0, col: 0, zoom: 0 },
            x: 128,
            y: 0,
            size: 128,
        };
        assert!(upscale(&small, &window, 256).is_none());
    }

    #[test]
    fn test_load_tile_from_z3_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let ancestor = TileCoord::new(2, 2, 3).unwrap();
        storage
            .save_tile("local", ancestor, TileFormat::Png, &png(&block_image()))
            .unwrap();

        let loaded = load_tile(&storage, "local", TileCoord::new(10, 10, 5).unwrap(), 256);
        assert!(!loaded.exact);
        let bitmap = loaded.bitmap.unwrap();
        assert_eq!(bitmap.dimensions(), (256, 256));
        // Block (2, 2) of the ancestor
        assert_eq!(*bitmap.get_pixel(128, 128), Rgba([120, 120, 0, 255]));
    }

    #[test]
    fn test_load_tile_exact_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let tile = TileCoord::new(1, 1, 1).unwrap();
        assert!(load_tile(&storage, "local", tile, 256).bitmap.is_none());

        storage
            .save_tile("local", tile, TileFormat::Png, &png(&block_image()))
            .unwrap();
        let loaded = load_tile(&storage, "local", tile, 256);
        assert!(loaded.exact);
        assert!(loaded.bitmap.is_some());
    }

    #[test]
    fn test_corrupt_tile_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let tile = TileCoord::new(0, 0, 0).unwrap();
        storage
            .save_tile("local", tile, TileFormat::Jpeg, b"not an image")
            .unwrap();
        let loaded = load_tile(&storage, "local", tile, 256);
        assert!(loaded.bitmap.is_none());
        assert!(!loaded.exact);
    }
}
