//! Starting and reaping transfer workers.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::consts::*;
use crate::exit::GOT_KILLED;
use crate::paths::WorkDir;
use crate::worker::WorkerArgs;

/// Worker binary for a protocol bitset.
pub fn worker_binary(protocol: u32) -> Result<&'static str> {
    if protocol & LOC != 0 {
        return Ok("sf_loc");
    }
    bail!("no transfer worker for protocol 0x{:x}", protocol)
}

pub trait WorkerLauncher {
    /// Start a worker; returns its pid. Called while the host's CON lock is
    /// held, so it must not touch the FSA.
    fn launch(&mut self, protocol: u32, args: &WorkerArgs) -> Result<i32>;

    /// Exited workers as `(pid, exit code)`.
    fn reap(&mut self) -> Vec<(i32, i32)>;
}

/// Spawns worker binaries that live next to the running executable.
pub struct ProcessLauncher {
    work: WorkDir,
    bin_dir: PathBuf,
    children: HashMap<i32, Child>,
}

impl ProcessLauncher {
    pub fn new(work: &WorkDir) -> Result<Self> {
        let exe = std::env::current_exe().context("current_exe")?;
        let bin_dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::with_bin_dir(work, bin_dir))
    }

    pub fn with_bin_dir(work: &WorkDir, bin_dir: PathBuf) -> Self {
        Self {
            work: work.clone(),
            bin_dir,
            children: HashMap::new(),
        }
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }

    /// Signal every running worker; used on shutdown.
    pub fn terminate_all(&mut self) {
        for pid in self.children.keys() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(*pid),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&mut self, protocol: u32, args: &WorkerArgs) -> Result<i32> {
        let bin = self.bin_dir.join(worker_binary(protocol)?);
        let child = Command::new(&bin)
            .arg("-w")
            .arg(self.work.root())
            .args(args.to_args())
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {}", bin.display()))?;
        let pid = child.id() as i32;
        self.children.insert(pid, child);
        Ok(pid)
    }

    fn reap(&mut self) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        self.children.retain(|pid, child| match child.try_wait() {
            Ok(Some(st)) => {
                let code = match (st.code(), st.signal()) {
                    (Some(c), _) => c,
                    (None, Some(_)) => GOT_KILLED,
                    (None, None) => GOT_KILLED,
                };
                out.push((*pid, code));
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::warn!(target: "system", "wait for worker {}: {}", pid, e);
                true
            }
        });
        out
    }
}
