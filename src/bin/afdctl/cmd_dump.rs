use anyhow::{Context, Result};
use std::path::PathBuf;

use afd::consts::{DIR_CONFIG_FILE, HOST_CONFIG_FILE};
use afd::WorkDir;

pub fn exec(work: &WorkDir, out_dir: Option<PathBuf>, passwords: bool) -> Result<()> {
    let (hosts, dirs) = afd::dump::render_all(&work.fifodir(), passwords)?;
    match out_dir {
        None => {
            println!("# {}", HOST_CONFIG_FILE);
            print!("{}", hosts);
            println!("# {}", DIR_CONFIG_FILE);
            print!("{}", dirs);
        }
        Some(d) => {
            std::fs::create_dir_all(&d).with_context(|| format!("create {}", d.display()))?;
            for (name, text) in [(HOST_CONFIG_FILE, &hosts), (DIR_CONFIG_FILE, &dirs)] {
                let p = d.join(name);
                std::fs::write(&p, text).with_context(|| format!("write {}", p.display()))?;
                println!("wrote {}", p.display());
            }
        }
    }
    Ok(())
}
