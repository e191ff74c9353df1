use anyhow::Result;
use clap::Parser;
use log::error;

use afd::exit::INCORRECT;
use afd::{AfdConfig, WorkDir};

mod cli;
mod cmd_control;
mod cmd_dump;
mod cmd_handle_event;
mod cmd_init;
mod cmd_janitor;
mod cmd_status;

fn main() {
    afd::logging::init_logger();
    if let Err(e) = run() {
        error!("{:?}", e);
        std::process::exit(INCORRECT);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    let work = WorkDir::resolve(cli.work_dir)?;
    match cli.cmd {
        cli::Cmd::Init => cmd_init::exec(&work),

        cli::Cmd::DumpConfig { out_dir, passwords } => cmd_dump::exec(&work, out_dir, passwords),

        cli::Cmd::Status { json } => cmd_status::exec(&work, json),

        cli::Cmd::HandleEvent { host, action, for_secs } => {
            cmd_handle_event::exec(&work, &host, &action, for_secs)
        }

        cli::Cmd::Reread => cmd_control::reread(&work),

        cli::Cmd::Shutdown => cmd_control::shutdown(&work),

        cli::Cmd::Janitor => {
            let cfg = AfdConfig::from_work_dir(&work)?;
            cmd_janitor::exec(&work, &cfg)
        }
    }
}
