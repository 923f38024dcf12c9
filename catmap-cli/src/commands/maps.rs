//! `catmap maps`: map sources.

use std::sync::Arc;

use clap::Subcommand;

use catmap::map::MapRegistry;
use catmap::Storage;

use crate::error::CliError;
use crate::Context;

#[derive(Debug, Subcommand)]
pub enum MapsAction {
    /// List available maps
    List,

    /// Add a map source
    Add {
        /// Map name; a suffix is added if taken
        name: String,

        /// URL template with %1$d column, %2$d row, %3$d zoom
        url: String,

        /// Projection tag, "ellipsoid" for true Mercator
        #[arg(long)]
        projection: Option<String>,
    },
}

pub fn run(ctx: &Context, action: MapsAction) -> Result<(), CliError> {
    let storage = Arc::new(Storage::open(&ctx.config.data_dir)?);
    let registry = MapRegistry::new(storage);

    match action {
        MapsAction::List => {
            for name in registry.names() {
                let map = registry.load(Some(name.as_str()));
                let url = map
                    .url_template()
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_else(|| "(offline)".to_string());
                println!("{:<12} {:<10} {}", name, map.projection(), url);
            }
            Ok(())
        }
        MapsAction::Add {
            name,
            url,
            projection,
        } => {
            let actual = registry.add(&name, &url, projection.as_deref())?;
            println!("Added map {}", actual);
            Ok(())
        }
    }
}
