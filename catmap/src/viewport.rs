//! The visible window onto the map.
//!
//! The center is kept in normalized projection space; everything on screen
//! is derived from it, the zoom and the pixel size of the view.

use serde::{Deserialize, Serialize};

use crate::coord::{self, Boundaries, TileCoord, MAX_ZOOM};
use crate::map::DEFAULT_TILE_SIZE;

/// A tile to draw and where its top-left corner lands on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleTile {
    pub tile: TileCoord,
    pub x_px: i64,
    pub y_px: i64,
}

/// Center, zoom and pixel size of the view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center_x: f64,
    pub center_y: f64,
    pub zoom: u8,
    pub width_px: u32,
    pub height_px: u32,
    pub tile_size: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE, DEFAULT_TILE_SIZE)
    }
}

impl Viewport {
    /// A view of the whole world centered on (0, 0).
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            center_x: 0.5,
            center_y: 0.5,
            zoom: 0,
            width_px,
            height_px,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_center(mut self, x: f64, y: f64) -> Self {
        self.set_center(x, y);
        self
    }

    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom.min(MAX_ZOOM);
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    /// Moves the center; x wraps and y clamps to the world.
    pub fn set_center(&mut self, x: f64, y: f64) {
        self.center_x = wrap_x(x);
        self.center_y = y.clamp(0.0, 1.0);
    }

    /// Size of the whole world in pixels at the current zoom.
    pub fn px_total(&self) -> f64 {
        self.tile_size as f64 * (1u64 << self.zoom) as f64
    }

    /// Drags the map by a pixel offset.
    pub fn pan(&mut self, dx_px: f64, dy_px: f64) {
        let total = self.px_total();
        self.set_center(self.center_x + dx_px / total, self.center_y + dy_px / total);
    }

    /// The visible rectangle, wrap encoded when it crosses the antimeridian.
    pub fn boundaries(&self) -> Boundaries {
        let total = self.px_total();
        let half_width = self.width_px as f64 / 2.0 / total;
        let half_height = self.height_px as f64 / 2.0 / total;
        let (x_left, x_right) = if self.width_px as f64 >= total {
            (0.0, 1.0)
        } else {
            (
                (self.center_x - half_width + 1.0) % 1.0,
                (self.center_x + half_width) % 1.0,
            )
        };
        Boundaries::new(
            x_left,
            x_right,
            (self.center_y - half_height).max(0.0),
            (self.center_y + half_height).min(1.0),
        )
    }

    pub fn center_tile(&self) -> TileCoord {
        coord::tile_for(self.center_x, self.center_y, self.zoom)
    }

    /// Tiles overlapping the view, center first, then clockwise rings.
    pub fn visible_tiles(&self) -> Vec<VisibleTile> {
        let n = 1i64 << self.zoom;
        let size = self.tile_size as i64;
        let (width, height) = (self.width_px as i64, self.height_px as i64);

        let fx = self.center_x * n as f64;
        let fy = self.center_y * n as f64;
        let (col0, row0) = (fx.floor() as i64, fy.floor() as i64);
        let left0 = width / 2 - ((fx - col0 as f64) * size as f64).round() as i64;
        let top0 = height / 2 - ((fy - row0 as f64) * size as f64).round() as i64;

        let mut tiles = Vec::new();
        let mut push = |col: i64, row: i64| {
            let x_px = left0 + (col - col0) * size;
            let y_px = top0 + (row - row0) * size;
            if x_px <= -size || x_px >= width || y_px <= -size || y_px >= height {
                return;
            }
            if row < 0 || row >= n {
                return;
            }
            if let Ok(tile) = TileCoord::new(row as u32, col.rem_euclid(n) as u32, self.zoom) {
                tiles.push(VisibleTile { tile, x_px, y_px });
            }
        };

        push(col0, row0);
        let rings = (width.max(height) / 2 + size - 1) / size + 1;
        for r in 1..=rings {
            for col in col0 - r + 1..=col0 + r {
                push(col, row0 - r);
            }
            for row in row0 - r + 1..=row0 + r {
                push(col0 + r, row);
            }
            for col in (col0 - r..col0 + r).rev() {
                push(col, row0 + r);
            }
            for row in (row0 - r..row0 + r).rev() {
                push(col0 - r, row);
            }
        }
        tiles
    }

    /// Screen position of a normalized point, taking the shorter way around.
    pub fn to_screen(&self, x: f64, y: f64) -> (f64, f64) {
        let total = self.px_total();
        let mut dx = x - self.center_x;
        if dx > 0.5 {
            dx -= 1.0;
        } else if dx < -0.5 {
            dx += 1.0;
        }
        (
            self.width_px as f64 / 2.0 + dx * total,
            self.height_px as f64 / 2.0 + (y - self.center_y) * total,
        )
    }

    /// Normalized point under a screen position; `None` above or below the
    /// world.
    pub fn to_world(&self, x_px: f64, y_px: f64) -> Option<(f64, f64)> {
        let total = self.px_total();
        let x = wrap_x(self.center_x + (x_px - self.width_px as f64 / 2.0) / total);
        let y = self.center_y + (y_px - self.height_px as f64 / 2.0) / total;
        (0.0..=1.0).contains(&y).then_some((x, y))
    }
}

fn wrap_x(x: f64) -> f64 {
    if (0.0..=1.0).contains(&x) {
        x
    } else {
        x.rem_euclid(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_full_width_when_world_is_narrow() {
        let view = Viewport::new(512, 200);
        let b = view.boundaries();
        assert_eq!((b.x_left, b.x_right), (0.0, 1.0));
        assert!((b.y_top - (0.5 - 100.0 / 256.0)).abs() < 1e-12);
    }

    #[test]
    fn test_boundaries_full_width_when_view_matches_world() {
        let b = Viewport::new(256, 256).boundaries();
        assert_eq!((b.x_left, b.x_right), (0.0, 1.0));
        assert!(b.contains(0.3, 0.5));
        assert!(!b.wraps());
    }

    #[test]
    fn test_boundaries_centered() {
        let view = Viewport::new(512, 512).with_zoom(2);
        let b = view.boundaries();
        assert!((b.x_left - 0.25).abs() < 1e-12);
        assert!((b.x_right - 0.75).abs() < 1e-12);
        assert!(!b.wraps());
    }

    #[test]
    fn test_boundaries_wrap_at_antimeridian() {
        let view = Viewport::new(512, 512).with_zoom(3).with_center(0.01, 0.02);
        let b = view.boundaries();
        assert!(b.wraps());
        assert!((b.x_left - 0.885).abs() < 1e-12);
        assert!((b.x_right - 0.135).abs() < 1e-12);
        assert_eq!(b.y_top, 0.0);
    }

    #[test]
    fn test_center_tile_wraps_and_clamps() {
        let view = Viewport::new(256, 256).with_zoom(1).with_center(1.0, 1.0);
        assert_eq!(view.center_tile(), TileCoord::new(1, 0, 1).unwrap());
    }

    #[test]
    fn test_visible_tiles_center_first() {
        let view = Viewport::new(512, 256).with_zoom(1);
        let tiles = view.visible_tiles();
        assert_eq!(tiles[0].tile, TileCoord::new(1, 1, 1).unwrap());
        assert_eq!((tiles[0].x_px, tiles[0].y_px), (256, 128));

        let mut coords: Vec<(u32, u32)> = tiles.iter().map(|t| (t.tile.row, t.tile.col)).collect();
        coords.sort();
        assert_eq!(coords, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_visible_tiles_wrap_columns() {
        let view = Viewport::new(512, 256).with_zoom(2).with_center(0.0, 0.5);
        let cols: Vec<u32> = view.visible_tiles().iter().map(|t| t.tile.col).collect();
        assert!(cols.contains(&3));
        assert!(cols.contains(&0));
        assert!(cols.iter().all(|&c| c < 4));
    }

    #[test]
    fn test_screen_round_trip() {
        let view = Viewport::new(800, 600).with_zoom(5).with_center(0.999, 0.4);
        let (px, py) = view.to_screen(0.001, 0.401);
        assert!(px > 400.0, "shorter way is east");
        let (x, y) = view.to_world(px, py).unwrap();
        assert!((x - 0.001).abs() < 1e-9);
        assert!((y - 0.401).abs() < 1e-9);
        assert!(view.to_world(0.0, -1e9).is_none());
    }

    #[test]
    fn test_pan_wraps() {
        let mut view = Viewport::new(256, 256).with_zoom(0);
        view.pan(-192.0, 0.0);
        assert!((view.center_x - 0.75).abs() < 1e-12);
        view.pan(0.0, -1000.0);
        assert_eq!(view.center_y, 0.0);
    }
}
