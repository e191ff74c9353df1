use anyhow::Result;

use afd::table::Access;
use afd::{AfdConfig, AfdStatus, Fra, WorkDir};

pub fn exec(work: &WorkDir, cfg: &AfdConfig) -> Result<()> {
    let fifodir = work.fifodir();
    let status = AfdStatus::attach(&fifodir, Access::Passive)?;
    let fra = Fra::attach_active(&fifodir)?;
    afd::supervisor::check_spool(work, cfg, &status, &fra)?;
    println!("spool check done");
    Ok(())
}
