//! pipewalk CLI: traverse → process → upload over one or more directory trees.

use anyhow::Result;
use clap::Parser;
use pipewalk::engine::arg_parser::Cli;
use pipewalk::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
