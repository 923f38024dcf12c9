//! `catmap record`: feed fixes into a recording.
//!
//! Each stdin line is one JSON fix:
//! `{"longitude":13.4,"latitude":52.5,"altitude":34,"accuracy":5,"time_ms":1700000000000}`

use std::io::{self, BufRead};

use clap::Args;
use tokio::runtime::Handle;
use tracing::warn;

use catmap::track::{CloseOutcome, RecordOutcome};
use catmap::{Fix, Session, SessionState};

use crate::error::CliError;
use crate::Context;

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Leave the track unfinished so the next run resumes it
    #[arg(long)]
    keep_open: bool,

    /// Print the compact encoding of the track before finishing
    #[arg(long)]
    encode: bool,
}

pub fn run(ctx: &mut Context, args: RecordArgs) -> Result<(), CliError> {
    let state_path = ctx.state_path();
    let state = SessionState::load(&state_path);
    let config = ctx.config.clone();

    ctx.runtime()?.block_on(async {
        let mut session = Session::start(&config, state, Handle::current())?;
        session.begin_recording()?;

        for (number, line) in io::stdin().lock().lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fix: Fix = match serde_json::from_str(&line) {
                Ok(fix) => fix,
                Err(e) => {
                    warn!(line = number + 1, error = %e, "Skipping malformed fix");
                    continue;
                }
            };
            match session.update_fix(fix)? {
                Some(RecordOutcome::Recorded { distance_m }) => {
                    println!("recorded +{:.0} m", distance_m);
                }
                Some(RecordOutcome::SegmentBreak) => println!("new segment"),
                _ => {}
            }
        }

        let (total, _) = session.distances();
        println!("total {:.0} m", total);
        if args.encode {
            match session.encoded_current_track() {
                Some(encoded) => println!("{}", encoded),
                None => println!("too short to share"),
            }
        }

        if !args.keep_open {
            match session.end_recording()? {
                Some(CloseOutcome::Saved(path)) => println!("saved {}", path.display()),
                Some(CloseOutcome::Deleted) => println!("too short, discarded"),
                None => {}
            }
        }
        session.state().save(&state_path)?;
        session.teardown();
        Ok::<(), CliError>(())
    })
}
