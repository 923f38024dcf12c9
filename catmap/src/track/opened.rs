//! Tracks opened from an arbitrary file or from the compact encoding.

use std::path::Path;

use tracing::debug;

use super::gpx;
use super::point::{trim_trailing_breaks, PointSequence, TrackPoint};
use super::project_items;

/// Fewest rows an opened track may have.
pub const MIN_OPENED_ROWS: usize = 3;

/// A track with its provenance: a file path or an encoded string.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedTrack {
    source: String,
    points: Vec<TrackPoint>,
}

impl OpenedTrack {
    /// Opens an existing file, or decodes any other string.
    ///
    /// Trailing breaks are dropped. Returns `None` when fewer than three
    /// rows remain.
    pub fn open(path_or_encoded: &str) -> Option<Self> {
        let path = Path::new(path_or_encoded);
        let mut points = if path.is_file() {
            match gpx::scan_file(path) {
                Ok(items) => project_items(&items),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Cannot open track");
                    Vec::new()
                }
            }
        } else {
            gpx::decode(path_or_encoded)
                .into_iter()
                .map(|(lon, lat)| {
                    if lon.is_nan() {
                        TrackPoint::BREAK
                    } else {
                        TrackPoint::from_degrees(lon, lat)
                    }
                })
                .collect()
        };

        trim_trailing_breaks(&mut points);
        if points.len() < MIN_OPENED_ROWS {
            return None;
        }
        Some(Self {
            source: path_or_encoded.to_string(),
            points,
        })
    }

    /// The path or encoded string the track was opened from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// x of the last point.
    pub fn end_x(&self) -> f64 {
        self.points.last().map_or(f64::NAN, |p| p.x)
    }

    pub fn end_y(&self, ellipsoid: bool) -> f64 {
        self.points.last().map_or(f64::NAN, |p| p.y(ellipsoid))
    }
}

impl PointSequence for OpenedTrack {
    fn points(&self) -> &[TrackPoint] {
        &self.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord;

    #[test]
    fn test_open_encoded() {
        let track = OpenedTrack::open("x10y20x11y21xNaNyNaNx12y22xNaNyNaN").unwrap();
        assert_eq!(track.len(), 4, "trailing break trimmed");
        assert_eq!(track.source(), "x10y20x11y21xNaNyNaNx12y22xNaNyNaN");
        assert!((track.end_x() - coord::to_x(12.0)).abs() < 1e-12);
        assert!((track.end_y(true) - coord::to_y(22.0, true)).abs() < 1e-12);
    }

    #[test]
    fn test_open_rejects_short() {
        assert!(OpenedTrack::open("x1y1x2y2").is_none());
        assert!(OpenedTrack::open("x1y1x2y2xNaNyNaNxNaNyNaN").is_none());
        assert!(OpenedTrack::open("").is_none());
        assert!(OpenedTrack::open("hello").is_none());
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.gpx");
        gpx::write_sample_track(&path).unwrap();

        let track = OpenedTrack::open(path.to_str().unwrap()).unwrap();
        assert_eq!(track.len(), 6);
        assert!((track.end_x() - coord::to_x(105.0)).abs() < 1e-12);
    }
}
