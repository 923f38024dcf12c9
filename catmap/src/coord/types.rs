//! Coordinate types shared by the projection, tile and track modules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Northern limit of the usable Mercator range, in degrees.
pub const MAX_LAT: f64 = 85.0;

/// Southern limit of the usable Mercator range, in degrees.
pub const MIN_LAT: f64 = -85.0;

/// Western limit of longitude, in degrees.
pub const MIN_LON: f64 = -180.0;

/// Eastern limit of longitude, in degrees.
pub const MAX_LON: f64 = 180.0;

/// Highest zoom level the map can display.
pub const MAX_ZOOM: u8 = 17;

/// Errors produced when building coordinate values from external input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("Invalid zoom level: {0}")]
    InvalidZoom(u8),

    #[error("Tile ({row}, {col}) is outside the grid at zoom {zoom}")]
    OutOfGrid { row: u32, col: u32, zoom: u8 },

    #[error("Unknown projection: {0:?}")]
    UnknownProjection(String),
}

/// Mercator flavour a map is drawn in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapProjection {
    /// Web Mercator (EPSG:3857), the default.
    #[default]
    Spherical,
    /// True Mercator on the WGS84 ellipsoid (EPSG:3395).
    Ellipsoid,
}

impl MapProjection {
    /// Returns true for the ellipsoidal variant.
    pub fn is_ellipsoid(self) -> bool {
        matches!(self, MapProjection::Ellipsoid)
    }

    /// Tag written into map descriptors.
    pub fn tag(self) -> &'static str {
        match self {
            MapProjection::Spherical => "spherical",
            MapProjection::Ellipsoid => "ellipsoid",
        }
    }
}

impl FromStr for MapProjection {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ellipsoid" => Ok(MapProjection::Ellipsoid),
            "spherical" => Ok(MapProjection::Spherical),
            other => Err(CoordError::UnknownProjection(other.to_string())),
        }
    }
}

impl fmt::Display for MapProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.tag())
    }
}

/// Address of a tile in the quad-tree grid.
///
/// Row grows southward, column grows eastward, both in `[0, 2^zoom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub row: u32,
    pub col: u32,
    pub zoom: u8,
}

impl TileCoord {
    /// Creates a tile coordinate, checking it against the grid at `zoom`.
    pub fn new(row: u32, col: u32, zoom: u8) -> Result<Self, CoordError> {
        if zoom > 31 {
            return Err(CoordError::InvalidZoom(zoom));
        }
        let n = 1u64 << zoom;
        if row as u64 >= n || col as u64 >= n {
            return Err(CoordError::OutOfGrid { row, col, zoom });
        }
        Ok(Self { row, col, zoom })
    }

    /// Number of tiles along one axis at this zoom.
    pub fn grid_size(&self) -> u32 {
        1u32 << self.zoom
    }

    /// The tile one level up that covers this one, or `None` at zoom 0.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.zoom == 0 {
            return None;
        }
        Some(TileCoord {
            row: self.row >> 1,
            col: self.col >> 1,
            zoom: self.zoom - 1,
        })
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.row, self.col)
    }
}

/// Visible rectangle in normalized projection space.
///
/// `x_left > x_right` means the rectangle crosses the antimeridian.
/// `y_top < y_bottom` always.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundaries {
    pub x_left: f64,
    pub x_right: f64,
    pub y_top: f64,
    pub y_bottom: f64,
}

impl Boundaries {
    pub fn new(x_left: f64, x_right: f64, y_top: f64, y_bottom: f64) -> Self {
        Self {
            x_left,
            x_right,
            y_top,
            y_bottom,
        }
    }

    /// The whole world.
    pub fn world() -> Self {
        Self::new(0.0, 1.0, 0.0, 1.0)
    }

    /// True when the rectangle is encoded as wrapping over x = 1.
    pub fn wraps(&self) -> bool {
        self.x_left > self.x_right
    }

    /// Strict containment; NaN coordinates never match.
    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let x_inside = if self.wraps() {
            self.x_left < x || x < self.x_right
        } else {
            self.x_left < x && x < self.x_right
        };
        x_inside && self.y_top < y && y < self.y_bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_from_tag() {
        assert_eq!("ellipsoid".parse::<MapProjection>(), Ok(MapProjection::Ellipsoid));
        assert_eq!("spherical".parse::<MapProjection>(), Ok(MapProjection::Spherical));
        assert!(matches!(
            "utm".parse::<MapProjection>(),
            Err(CoordError::UnknownProjection(_))
        ));
    }

    #[test]
    fn test_tile_coord_rejects_out_of_grid() {
        assert!(TileCoord::new(3, 3, 2).is_ok());
        assert!(matches!(
            TileCoord::new(4, 0, 2),
            Err(CoordError::OutOfGrid { .. })
        ));
    }

    #[test]
    fn test_tile_parent_chain() {
        let tile = TileCoord::new(10, 10, 5).unwrap();
        let parent = tile.parent().unwrap();
        assert_eq!(parent, TileCoord { row: 5, col: 5, zoom: 4 });
        let grandparent = parent.parent().unwrap();
        assert_eq!(grandparent, TileCoord { row: 2, col: 2, zoom: 3 });
        assert!(TileCoord::new(0, 0, 0).unwrap().parent().is_none());
    }

    #[test]
    fn test_boundaries_plain_and_wrapped() {
        let plain = Boundaries::new(0.4, 0.6, 0.4, 0.6);
        assert!(plain.contains(0.5, 0.5));
        assert!(!plain.contains(0.7, 0.5));
        assert!(!plain.contains(0.6, 0.5), "edges are exclusive");

        let wrapped = Boundaries::new(0.9, 0.1, 0.0, 1.0);
        assert!(wrapped.wraps());
        assert!(wrapped.contains(0.95, 0.5));
        assert!(wrapped.contains(0.05, 0.5));
        assert!(!wrapped.contains(0.5, 0.5));
    }

    #[test]
    fn test_boundaries_never_contain_nan() {
        let world = Boundaries::world();
        assert!(!world.contains(f64::NAN, 0.5));
        assert!(!world.contains(0.5, f64::NAN));
        let wrapped = Boundaries::new(0.9, 0.1, 0.0, 1.0);
        assert!(!wrapped.contains(f64::NAN, f64::NAN));
    }
}
