use anyhow::{Context, Result};

use afd::consts::{AFD_CONFIG_FILE, DIR_CONFIG_FILE, HOST_CONFIG_FILE};
use afd::{AfdConfig, WorkDir};

pub fn exec(work: &WorkDir) -> Result<()> {
    work.create_tree()?;
    afd::fifo::make_all(&work.fifodir())?;
    for name in [AFD_CONFIG_FILE, HOST_CONFIG_FILE, DIR_CONFIG_FILE] {
        let p = work.etc_file(name);
        if !p.exists() {
            std::fs::write(&p, "").with_context(|| format!("create {}", p.display()))?;
            println!("created {}", p.display());
        }
    }
    let outcome = afd::typesize::check(work)?;
    let cfg = AfdConfig::from_work_dir(work)?;
    let r = afd::builder::reread(work, &cfg)?;
    println!(
        "work dir {}: {} hosts, {} directories, {} jobs ({:?})",
        work.root().display(),
        r.hosts,
        r.dirs,
        r.jobs,
        outcome
    );
    for line in &r.rejected {
        println!("  rejected: {}", line);
    }
    Ok(())
}
