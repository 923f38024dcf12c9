//! GPS tracks: saved, opened and recording, plus the selection index and
//! the fix filter.

mod current;
pub mod gpx;
pub mod index;
mod opened;
mod point;
pub mod recorder;
mod saved;

use std::sync::Arc;

pub use current::{CloseOutcome, CurrentTrack, MIN_ENCODED_POINTS, MIN_SAVED_POINTS};
pub use index::{track_cache, IndexEvent, Toggle, TrackCache, TrackIndex};
pub use opened::{OpenedTrack, MIN_OPENED_ROWS};
pub use point::{PointCursor, PointSequence, TrackPoint};
pub use recorder::{Fix, RecordOutcome, TrackRecorder};
pub use saved::Track;

use crate::coord;
use gpx::GpxItem;

/// Projects scanned items into rows.
///
/// Coordinates are normalized. A segment end becomes a break unless the
/// sequence is empty or already ends with one.
pub(crate) fn project_items(items: &[GpxItem]) -> Vec<TrackPoint> {
    let mut points: Vec<TrackPoint> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            GpxItem::Point(p) => points.push(TrackPoint::from_degrees(
                coord::normalize_longitude(p.lon),
                coord::normalize_latitude(p.lat),
            )),
            GpxItem::SegmentEnd => {
                if points.ends_with_point() {
                    points.push(TrackPoint::BREAK);
                }
            }
        }
    }
    points
}

/// Any drawable track.
#[derive(Debug, Clone, Copy)]
pub enum TrackRef<'a> {
    Saved(&'a Track),
    Opened(&'a OpenedTrack),
    Current(&'a CurrentTrack),
}

impl TrackRef<'_> {
    pub fn points(&self) -> &[TrackPoint] {
        match self {
            TrackRef::Saved(t) => t.points(),
            TrackRef::Opened(t) => t.points(),
            TrackRef::Current(t) => t.points(),
        }
    }

    pub fn start_iterator(&self, ellipsoid: bool) -> PointCursor<'_> {
        PointCursor::new(self.points(), ellipsoid)
    }
}

impl<'a> From<&'a Arc<Track>> for TrackRef<'a> {
    fn from(track: &'a Arc<Track>) -> Self {
        TrackRef::Saved(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lon: f64, lat: f64) -> GpxItem {
        GpxItem::Point(gpx::GpxPoint {
            lat,
            lon,
            ele: 0.0,
            time: None,
        })
    }

    #[test]
    fn test_project_items_collapses_breaks() {
        let items = vec![
            GpxItem::SegmentEnd,
            point(10.0, 10.0),
            GpxItem::SegmentEnd,
            GpxItem::SegmentEnd,
            point(370.0, 95.0),
        ];
        let points = project_items(&items);
        assert_eq!(points.len(), 3);
        assert!(points[1].is_break());
        assert!((points[2].x - coord::to_x(10.0)).abs() < 1e-12);
        assert!((points[2].y(false) - coord::to_y(85.0, false)).abs() < 1e-12);
    }

    #[test]
    fn test_track_ref_draws_every_kind() {
        let track = Track::from_points(vec![TrackPoint::from_degrees(0.0, 0.0)]);
        let opened = OpenedTrack::open("x1y1x2y2x3y3").unwrap();
        assert_eq!(TrackRef::Saved(&track).start_iterator(false).count(), 1);
        assert_eq!(TrackRef::Opened(&opened).start_iterator(true).count(), 3);
    }
}
