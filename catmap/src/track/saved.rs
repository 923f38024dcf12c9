//! Saved tracks read from `tracks/`.

use std::path::Path;

use tracing::warn;

use super::gpx;
use super::point::{PointSequence, TrackPoint};
use super::project_items;

/// An immutable track loaded from a GPX file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    points: Vec<TrackPoint>,
}

impl Track {
    pub fn from_points(points: Vec<TrackPoint>) -> Self {
        Self { points }
    }

    /// Scans a GPX file. Never fails: unreadable files give an empty track.
    pub fn load(path: &Path) -> Self {
        match gpx::scan_file(path) {
            Ok(items) => Self::from_points(project_items(&items)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read track");
                Self::default()
            }
        }
    }
}

impl PointSequence for Track {
    fn points(&self) -> &[TrackPoint] {
        &self.points
    }
}
