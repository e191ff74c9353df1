use anyhow::Result;
use clap::Parser;
use log::error;
use std::path::PathBuf;

use afd::catalog::Jid;
use afd::exit::INCORRECT;
use afd::spool::SpoolRoots;
use afd::table::Access;
use afd::worker::{self, LocalTransport, WorkerEnv};
use afd::{AfdConfig, Fsa, WorkDir};

/// Local transfer worker: moves or links one message into its target
/// directory. Started by `fd`, one process per job.
#[derive(Parser, Debug)]
#[command(name = "sf_loc", version, about = "AFD local transfer worker")]
struct Args {
    /// Work directory (default: $AFD_WORK_DIR)
    #[arg(short = 'w', long = "work-dir")]
    work_dir: Option<PathBuf>,
    fsa_pos: usize,
    slot: usize,
    jid_pos: usize,
    /// Message name `<job>/<dir>/<creation>_<unique>_<split>`
    msg: String,
    spool_no: u16,
}

fn run(args: Args) -> Result<i32> {
    let work = WorkDir::resolve(args.work_dir)?;
    let cfg = AfdConfig::from_work_dir(&work)?;
    worker::signals::install()?;
    let wargs = worker::parse_args(args.fsa_pos, args.slot, args.jid_pos, &args.msg, args.spool_no)?;
    let env = WorkerEnv::new(&work, SpoolRoots::from_config(&work, &cfg)?);
    let mut fsa = Fsa::attach_active(&work.fifodir())?;
    let jid = Jid::open(&work.fifodir(), Access::Passive)?;
    let pid = std::process::id() as i32;
    Ok(worker::run_message(
        &env,
        &mut fsa,
        &jid,
        &wargs,
        pid,
        &mut LocalTransport::new(),
        afd::util::now(),
    ))
}

fn main() {
    afd::logging::init_logger();
    match run(Args::parse()) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(INCORRECT);
        }
    }
}
