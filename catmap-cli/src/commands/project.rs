//! `catmap project`: position to projection space.

use clap::Args;

use catmap::coord::{self, MAX_ZOOM};

use super::parse_position;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ProjectArgs {
    /// Position as LON,LAT in degrees
    #[arg(value_parser = parse_position, allow_hyphen_values = true)]
    position: (f64, f64),

    /// Zoom level for the tile address
    #[arg(long, short, default_value_t = 10)]
    zoom: u8,
}

pub fn run(args: ProjectArgs) -> Result<(), CliError> {
    if args.zoom > MAX_ZOOM {
        return Err(CliError::Input(format!("zoom must be at most {MAX_ZOOM}")));
    }
    let (lon, lat) = args.position;
    let x = coord::to_x(lon);
    println!("x:             {:.9}", x);
    for (label, ellipsoid) in [("spherical", false), ("ellipsoid", true)] {
        let y = coord::to_y(lat, ellipsoid);
        let tile = coord::tile_for(x, y, args.zoom);
        println!("y {:<12} {:.9}  tile {}", label, y, tile);
    }
    Ok(())
}
