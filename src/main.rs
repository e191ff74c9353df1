use anyhow::Result;
use clap::Parser;
use log::error;
use std::path::PathBuf;

use afd::exit::INCORRECT;
use afd::supervisor::Supervisor;
use afd::{AfdConfig, WorkDir};

/// AFD init process: prepares the work tree and supervises the components.
#[derive(Parser, Debug)]
#[command(name = "afd", version, about = "Automatic File Distribution")]
struct Args {
    /// Work directory (default: $AFD_WORK_DIR)
    #[arg(short = 'w', long = "work-dir")]
    work_dir: Option<PathBuf>,
}

fn run(args: Args) -> Result<()> {
    let work = WorkDir::resolve(args.work_dir)?;
    work.create_tree()?;
    afd::fifo::make_all(&work.fifodir())?;
    let outcome = afd::typesize::check(&work)?;
    log::debug!(target: "system", "typesize check: {:?}", outcome);
    let cfg = AfdConfig::from_work_dir(&work)?;
    log::info!(target: "system", "starting AFD in {} ({})", work.root().display(), cfg);
    Supervisor::from_current_exe(&work, &cfg)?.run()
}

fn main() {
    afd::logging::init_logger();
    if let Err(e) = run(Args::parse()) {
        error!("{:?}", e);
        std::process::exit(INCORRECT);
    }
}
