//! Raster tile cache.
//!
//! - [`TileCache`] keeps a fixed number of decoded tiles keyed by
//!   (map, zoom, row, col) and fills itself in the background.
//! - [`pyramid`] builds stand-ins for missing tiles from lower zoom levels.

mod cache;
pub mod pyramid;
mod types;

pub use cache::{TileCache, TileEvents};
pub use types::{Bitmap, CacheStats, TileEvent, TileKey};
