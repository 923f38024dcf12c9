//! `catmap config`: effective settings.

use clap::Subcommand;

use catmap::config::ConfigFile;

use crate::error::CliError;
use crate::Context;

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration
    Show,

    /// Write the effective configuration to the configuration file
    Init,
}

pub fn run(ctx: &Context, action: ConfigAction) -> Result<(), CliError> {
    let config = &ctx.config;
    match action {
        ConfigAction::Path => {
            println!("{}", ctx.config_path.display());
        }
        ConfigAction::Show => {
            println!("config file:        {}", ctx.config_path.display());
            println!("data dir:           {}", config.data_dir.display());
            println!(
                "tile memory:        {} MiB (min {} slots)",
                config.tile_cache.memory_budget_bytes / (1024 * 1024),
                config.tile_cache.min_slots
            );
            println!("track cache:        {} points", config.track_cache_points);
            println!(
                "timeouts:           connect {:?}, read {:?}",
                config.network.connect_timeout, config.network.read_timeout
            );
            println!("user agent:         {}", config.network.user_agent);
            println!("log level:          {}", config.log_level);
        }
        ConfigAction::Init => {
            let file = ConfigFile {
                data_dir: Some(config.data_dir.clone()),
                memory_budget_mb: Some(config.tile_cache.memory_budget_bytes / (1024 * 1024)),
                min_slots: Some(config.tile_cache.min_slots),
                track_cache_points: Some(config.track_cache_points),
                connect_timeout_secs: Some(config.network.connect_timeout.as_secs()),
                read_timeout_secs: Some(config.network.read_timeout.as_secs()),
                user_agent: Some(config.network.user_agent.clone()),
                log_level: Some(config.log_level.clone()),
            };
            file.save(&ctx.config_path)?;
            println!("Wrote {}", ctx.config_path.display());
        }
    }
    Ok(())
}
