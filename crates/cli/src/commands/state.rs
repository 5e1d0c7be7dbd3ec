//! Saved trade cycle inspection.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use strangle_options_manager::{LifecycleStatus, StatePersistence, TradeState};

#[derive(Args, Debug)]
pub struct StateArgs {
    /// State file to read; defaults to `state_file` from the config
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Dump the raw cycle as JSON
    #[arg(long, conflicts_with = "reset")]
    pub json: bool,

    /// Delete the saved cycle so the next run starts idle
    #[arg(long)]
    pub reset: bool,

    /// Allow --reset while the saved cycle still holds positions
    #[arg(long, requires = "reset")]
    pub force: bool,
}

pub fn run(args: &StateArgs, path: &Path) -> Result<()> {
    let persistence = StatePersistence::new(path.to_path_buf());
    let cycle = persistence.load()?;

    if args.reset {
        if cycle.state != TradeState::Idle && !args.force {
            anyhow::bail!(
                "saved cycle is {} with open size {}; close it first or pass --force",
                cycle.state,
                cycle.open_size()
            );
        }
        persistence.clear()?;
        println!("Cleared {}", path.display());
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&cycle)?);
    } else {
        println!("{}", path.display());
        println!("{}", LifecycleStatus::new(&cycle, None, None, None).explain());
    }
    Ok(())
}
