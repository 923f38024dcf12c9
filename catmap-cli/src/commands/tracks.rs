//! `catmap tracks`: saved tracks, sharing and search.

use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;
use tokio::runtime::Handle;

use catmap::track::{gpx, IndexEvent};
use catmap::{GeoPoint, OpenedTrack, PointSequence, Session, SessionEvent, SessionState, Storage, Track};

use super::parse_position;
use crate::error::CliError;
use crate::Context;

#[derive(Debug, Subcommand)]
pub enum TracksAction {
    /// List saved tracks, newest first
    List,

    /// Select every saved track crossing a view
    Search {
        /// View center as LON,LAT in degrees
        #[arg(value_parser = parse_position, allow_hyphen_values = true)]
        center: (f64, f64),

        /// Zoom level
        #[arg(long, short, default_value_t = 12)]
        zoom: u8,

        /// View width in pixels
        #[arg(long, default_value_t = 1024)]
        width: u32,

        /// View height in pixels
        #[arg(long, default_value_t = 768)]
        height: u32,
    },

    /// Print the compact encoding of a GPX file
    Encode {
        /// GPX file
        path: PathBuf,
    },

    /// Open a GPX file or encoded track and describe it
    Open {
        /// Path or encoded string
        track: String,
    },

    /// Deselect all tracks
    Clear,

    /// Delete the selected tracks from disk
    DeleteSelected,
}

pub fn run(ctx: &mut Context, action: TracksAction) -> Result<(), CliError> {
    match action {
        TracksAction::List => {
            let storage = Storage::open(&ctx.config.data_dir)?;
            for name in storage.track_names() {
                let track = Track::load(&storage.track_path(&name));
                println!("{:<28} {:>7} points", name, track.point_count());
            }
            Ok(())
        }
        TracksAction::Encode { path } => {
            let items = gpx::scan_file(&path)?;
            println!("{}", gpx::encode(&items));
            Ok(())
        }
        TracksAction::Open { track } => {
            let opened = OpenedTrack::open(&track)
                .ok_or_else(|| CliError::Input("fewer than three points".to_string()))?;
            let segments = opened.points().iter().filter(|p| p.is_break()).count() + 1;
            println!(
                "{} points in {} segments, ends at x {:.6} y {:.6}",
                opened.point_count(),
                segments,
                opened.end_x(),
                opened.end_y(false)
            );
            Ok(())
        }
        TracksAction::Search {
            center,
            zoom,
            width,
            height,
        } => search(ctx, center, zoom, width, height),
        TracksAction::Clear => with_session(ctx, |session| {
            session.deselect_all_tracks();
            println!("Selection cleared");
        }),
        TracksAction::DeleteSelected => with_session(ctx, |session| {
            let deleted = session.delete_selected_tracks();
            println!("Deleted {} tracks", deleted);
        }),
    }
}

fn with_session(ctx: &mut Context, f: impl FnOnce(&mut Session)) -> Result<(), CliError> {
    let state_path = ctx.state_path();
    let state = SessionState::load(&state_path);
    let config = ctx.config.clone();
    ctx.runtime()?.block_on(async {
        let mut session = Session::start(&config, state, Handle::current())?;
        f(&mut session);
        session.state().save(&state_path)?;
        session.teardown();
        Ok::<(), CliError>(())
    })
}

fn search(ctx: &mut Context, center: (f64, f64), zoom: u8, width: u32, height: u32) -> Result<(), CliError> {
    let state_path = ctx.state_path();
    let mut state = SessionState::load(&state_path);
    state.center = GeoPoint::new(center.0, center.1);
    state.zoom = zoom;
    let config = ctx.config.clone();

    ctx.runtime()?.block_on(async {
        let mut session = Session::start(&config, state, Handle::current())?;
        session.resize(width, height);
        session.search_visible_tracks();

        let wait = async {
            while let Some(event) = session.next_event().await {
                if let SessionEvent::Tracks(IndexEvent::SearchFinished { found }) = event {
                    return found;
                }
            }
            0
        };
        let found = tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .map_err(|_| CliError::Timeout("track search".to_string()))?;

        println!("Found {} tracks", found);
        for name in session.selected_tracks() {
            println!("  {}", name);
        }
        session.state().save(&state_path)?;
        session.teardown();
        Ok::<(), CliError>(())
    })
}
