//! `catmap tile`: load the tile under a position, downloading it if needed.

use std::time::Duration;

use clap::Args;
use tokio::runtime::Handle;

use catmap::coord::MAX_ZOOM;
use catmap::{GeoPoint, Session, SessionEvent, SessionState, TileEvent};

use super::parse_position;
use crate::error::CliError;
use crate::Context;

#[derive(Debug, Args)]
pub struct TileArgs {
    /// Position as LON,LAT in degrees
    #[arg(value_parser = parse_position, allow_hyphen_values = true)]
    position: (f64, f64),

    /// Zoom level
    #[arg(long, short, default_value_t = 12)]
    zoom: u8,

    /// Map name; the last used map by default
    #[arg(long, short)]
    map: Option<String>,

    /// Seconds to wait for disk and network
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

pub fn run(ctx: &mut Context, args: TileArgs) -> Result<(), CliError> {
    if args.zoom > MAX_ZOOM {
        return Err(CliError::Input(format!("zoom must be at most {MAX_ZOOM}")));
    }
    let state_path = ctx.state_path();
    let mut state = SessionState::load(&state_path);
    if args.map.is_some() {
        state.map = args.map.clone();
    }
    state.zoom = args.zoom;
    state.center = GeoPoint::new(args.position.0, args.position.1);

    let config = ctx.config.clone();
    let runtime = ctx.runtime()?;
    runtime.block_on(async {
        let mut session = Session::start(&config, state, Handle::current())?;
        let tile = session.viewport().center_tile();
        println!("map {} tile {}", session.map().name(), tile);

        let wait = async {
            let _ = session.tile(tile.row, tile.col);
            while let Some(event) = session.next_event().await {
                let SessionEvent::Tile(event) = event else {
                    continue;
                };
                if event.key().tile != tile {
                    continue;
                }
                match event {
                    TileEvent::Loaded(_) => {
                        let on_disk = session
                            .storage()
                            .tile_path(session.map().name(), tile)
                            .is_some();
                        let bitmap = session.tile(tile.row, tile.col);
                        if on_disk || !session.map().can_download() {
                            return bitmap.is_some();
                        }
                    }
                    TileEvent::Downloaded { ok, .. } => return ok,
                }
            }
            false
        };
        let found = tokio::time::timeout(Duration::from_secs(args.timeout), wait)
            .await
            .map_err(|_| CliError::Timeout(format!("tile {}", tile)))?;

        let stats = session.tile_cache_stats();
        if found {
            println!("{}", session.center_tile_path().display());
        } else {
            println!("no data for tile {}", tile);
        }
        println!("{}", stats);
        session.state().save(&state_path)?;
        session.teardown();
        Ok::<(), CliError>(())
    })
}
