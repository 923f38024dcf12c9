//! catmap - offline-tolerant slippy map core
//!
//! This library provides the parts of a map viewer that are not drawing:
//! Mercator projections, a bounded tile cache that loads from disk, falls
//! back to lower zooms and downloads in the background, and GPS tracks that
//! can be recorded, opened, searched and shared as short strings.
//!
//! A [`Session`] ties them together for one map view.

pub mod config;
pub mod coord;
pub mod logging;
pub mod map;
pub mod provider;
pub mod session;
pub mod storage;
pub mod tile;
pub mod track;
pub mod viewport;

pub use config::{AppConfig, ConfigFile};
pub use coord::{Boundaries, MapProjection, TileCoord};
pub use map::{MapRegistry, MapSource};
pub use session::{GeoPoint, Session, SessionError, SessionEvent, SessionState};
pub use storage::Storage;
pub use tile::{TileCache, TileEvent};
pub use track::{CurrentTrack, Fix, OpenedTrack, PointSequence, Track, TrackIndex, TrackRef};
pub use viewport::Viewport;
