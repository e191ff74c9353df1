//! Process supervision: the `afd` init process and the `afd_worker`
//! maintenance loop.
//!
//! `afd` starts every component as a child process, restarts children that
//! die (with a rate limit, see `restart`), and shuts them down in order on
//! `SHUTDOWN` from `afd_cmd.fifo`.

pub mod restart;
pub mod tick;

pub use restart::{Decision, RestartPolicy};
pub use tick::{danger_transition, Maintenance, TickReport};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as Process, Stdio};
use std::time::{Duration, Instant};

use crate::catalog::Jid;
use crate::config::AfdConfig;
use crate::consts::*;
use crate::fifo::{send_command, Command, FifoReader};
use crate::fra::Fra;
use crate::fsa::Fsa;
use crate::janitor::{FdQueue, Janitor};
use crate::message::FifoSink;
use crate::paths::WorkDir;
use crate::spool::SpoolRoots;
use crate::status::{AfdStatus, Component};
use crate::table::Access;
use crate::util::now;

/// One janitor pass with the live queue.
pub fn check_spool(work: &WorkDir, cfg: &AfdConfig, status: &AfdStatus, fra: &Fra) -> Result<()> {
    let fifodir = work.fifodir();
    let jid = Jid::open(&fifodir, Access::Passive)?;
    let spool = SpoolRoots::from_config(work, cfg)?;
    let mut queue = FdQueue {
        work,
        status: Some(status),
    };
    let mut sink = FifoSink::open(&fifodir)?;
    let rep = Janitor::new(&spool, &jid, fra, cfg).run(&mut queue, &mut sink)?;
    log::debug!(target: "system", "spool check: {:?}", rep);
    Ok(())
}

/// `afd_worker` main loop. Returns after answering `SHUTDOWN`.
pub fn run_worker(work: &WorkDir, cfg: &AfdConfig) -> Result<()> {
    let fifodir = work.fifodir();
    let mut status = AfdStatus::open_or_create(&fifodir)?;
    status.set_pid(Component::AfdWorker, std::process::id() as i32)?;
    status.set_state(Component::AfdWorker, ON)?;
    let fsa = Fsa::attach_active(&fifodir)?;
    let fra = Fra::attach_active(&fifodir)?;
    let mut m = Maintenance::new(work, cfg, fsa, fra, status);
    let mut cmd = FifoReader::open(&work.fifo(AFD_WORKER_CMD_FIFO))?;
    let mut last_tick = 0i64;
    let mut last_spool_check = 0i64;

    loop {
        if cmd.wait(Duration::from_secs(AFD_WORKER_TICK as u64))? {
            for c in cmd.read_commands()? {
                match c {
                    Command::Shutdown => {
                        m.status_mut().set_state(Component::AfdWorker, OFF)?;
                        if let Err(e) = send_command(&work.fifo(AFD_WORKER_RESP_FIFO), Command::Ackn) {
                            log::warn!(target: "system", "afd_worker: {:#}", e);
                        }
                        log::info!(target: "system", "afd_worker stopped");
                        return Ok(());
                    }
                    other => log::warn!(target: "system", "afd_worker: reading garbage ({:?})", other),
                }
            }
        }
        let t = now();
        if t - last_tick < AFD_WORKER_TICK {
            continue;
        }
        last_tick = t;
        let rep = m.tick(t)?;
        if rep != TickReport::default() {
            log::debug!(target: "system", "tick: {:?}", rep);
        }
        if t - last_spool_check >= SPOOL_CHECK_INTERVAL {
            if let Err(e) = check_spool(work, cfg, m.status(), m.fra()) {
                log::warn!(target: "system", "spool check failed: {:#}", e);
            }
            last_spool_check = t;
        }
    }
}

/// Components `afd` starts. `wmod` only runs with a configured target dir.
pub fn components(cfg: &AfdConfig) -> Vec<Component> {
    Component::ALL
        .iter()
        .copied()
        .filter(|c| *c != Component::Wmod || cfg.wmo_target_dir.is_some())
        .collect()
}

pub struct Supervisor {
    work: WorkDir,
    cfg: AfdConfig,
    bin_dir: PathBuf,
    status: AfdStatus,
    children: HashMap<Component, Child>,
    policy: RestartPolicy,
}

impl Supervisor {
    pub fn new(work: &WorkDir, cfg: &AfdConfig, bin_dir: PathBuf) -> Result<Self> {
        let status = AfdStatus::open_or_create(&work.fifodir())?;
        Ok(Self {
            work: work.clone(),
            cfg: cfg.clone(),
            bin_dir,
            status,
            children: HashMap::new(),
            policy: RestartPolicy::new(),
        })
    }

    /// Binaries are looked up next to the running executable.
    pub fn from_current_exe(work: &WorkDir, cfg: &AfdConfig) -> Result<Self> {
        let exe = std::env::current_exe().context("current_exe")?;
        let bin_dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::new(work, cfg, bin_dir)
    }

    pub fn status(&self) -> &AfdStatus {
        &self.status
    }

    pub fn is_running(&self, c: Component) -> bool {
        self.children.contains_key(&c)
    }

    pub fn start(&mut self, c: Component) -> Result<()> {
        let bin = self.bin_dir.join(c.binary());
        let child = Process::new(&bin)
            .arg("-w")
            .arg(self.work.root())
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {}", bin.display()))?;
        let pid = child.id() as i32;
        self.status.set_pid(c, pid)?;
        self.status.set_state(c, ON)?;
        log::info!(target: "system", "started {} (pid {})", c, pid);
        self.children.insert(c, child);
        Ok(())
    }

    pub fn start_all(&mut self) -> Result<()> {
        self.status.set_start_time(now())?;
        for c in components(&self.cfg) {
            self.start(c)?;
        }
        Ok(())
    }

    /// Collect exited children and restart them within the rate limit.
    pub fn reap(&mut self, now: i64) -> Result<Vec<(Component, i32)>> {
        let mut exited = Vec::new();
        self.children.retain(|c, child| match child.try_wait() {
            Ok(Some(st)) => {
                exited.push((*c, st.code().unwrap_or_else(|| 128 + st.signal().unwrap_or(0))));
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::warn!(target: "system", "wait for {}: {}", c, e);
                true
            }
        });
        for &(c, code) in &exited {
            self.status.set_pid(c, 0)?;
            match self.policy.on_exit(c, now) {
                Decision::Restart => {
                    log::warn!(target: "system", "{} exited with {}, restarting", c, code);
                    if let Err(e) = self.start(c) {
                        log::error!(target: "system", "restart {}: {:#}", c, e);
                        self.status.set_state(c, STOPPED)?;
                    }
                }
                Decision::GiveUp => {
                    log::error!(
                        target: "system",
                        "{} died more than {} times within {}s, not restarting",
                        c,
                        MAX_RESTARTS_IN_WINDOW,
                        RESTART_WINDOW
                    );
                    self.status.set_state(c, STOPPED)?;
                }
            }
        }
        Ok(exited)
    }

    /// Ask every child to stop, wait up to `grace`, then kill the rest.
    pub fn shutdown(&mut self, grace: Duration) -> Result<()> {
        let mut resp = FifoReader::open(&self.work.fifo(AFD_WORKER_RESP_FIFO))?;
        resp.read_commands()?;
        for (c, child) in &self.children {
            self.status.set_state(*c, SHUTDOWN_STATE)?;
            let fifo = match c {
                Component::Amg => Some(AMG_CMD_FIFO),
                Component::Fd => Some(FD_CMD_FIFO),
                Component::AfdWorker => Some(AFD_WORKER_CMD_FIFO),
                Component::Atpd | Component::Wmod => None,
            };
            let sent = match fifo {
                Some(f) => send_command(&self.work.fifo(f), Command::Shutdown).is_ok(),
                None => false,
            };
            if !sent {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(child.id() as i32),
                    nix::sys::signal::Signal::SIGTERM,
                );
            }
        }
        if self.children.contains_key(&Component::AfdWorker) {
            let acked = resp.wait(grace)? && resp.read_commands()?.contains(&Command::Ackn);
            if !acked {
                log::warn!(target: "system", "afd_worker did not acknowledge shutdown");
            }
        }
        let deadline = Instant::now() + grace;
        while !self.children.is_empty() && Instant::now() < deadline {
            self.children.retain(|_, ch| matches!(ch.try_wait(), Ok(None)));
            std::thread::sleep(Duration::from_millis(100));
        }
        for (c, ch) in self.children.iter_mut() {
            log::warn!(target: "system", "killing {}", c);
            let _ = ch.kill();
            let _ = ch.wait();
        }
        self.children.clear();
        for c in Component::ALL {
            self.status.set_pid(c, 0)?;
            self.status.set_state(c, OFF)?;
        }
        self.status.flush();
        Ok(())
    }

    /// Main loop of `afd`.
    pub fn run(&mut self) -> Result<()> {
        let mut cmd = FifoReader::open(&self.work.fifo(AFD_CMD_FIFO))?;
        self.start_all()?;
        loop {
            if cmd.wait(Duration::from_secs(1))? {
                for c in cmd.read_commands()? {
                    match c {
                        Command::Shutdown => {
                            log::info!(target: "system", "shutting down AFD");
                            return self.shutdown(Duration::from_secs(10));
                        }
                        Command::RereadConfig => {
                            if let Err(e) = send_command(&self.work.fifo(AMG_CMD_FIFO), Command::RereadConfig) {
                                log::warn!(target: "system", "reread: {:#}", e);
                            }
                        }
                        other => log::warn!(target: "system", "afd: reading garbage ({:?})", other),
                    }
                }
            }
            self.reap(now())?;
        }
    }
}
