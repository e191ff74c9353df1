use anyhow::Result;
use clap::Parser;
use log::error;
use std::path::PathBuf;

use afd::exit::INCORRECT;
use afd::{AfdConfig, WorkDir};

#[derive(Parser, Debug)]
#[command(name = "amg", version, about = "AFD master: directory watcher and config builder")]
struct Args {
    /// Work directory (default: $AFD_WORK_DIR)
    #[arg(short = 'w', long = "work-dir")]
    work_dir: Option<PathBuf>,
}

fn run(args: Args) -> Result<()> {
    let work = WorkDir::resolve(args.work_dir)?;
    let cfg = AfdConfig::from_work_dir(&work)?;
    afd::watch::run(&work, &cfg)
}

fn main() {
    afd::logging::init_logger();
    if let Err(e) = run(Args::parse()) {
        error!("{:?}", e);
        std::process::exit(INCORRECT);
    }
}
