//! The maintenance tick run by `afd_worker` every `AFD_WORKER_TICK` seconds.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::action::{ActionKind, ActionSide, Actions};
use crate::config::AfdConfig;
use crate::consts::*;
use crate::dirconfig::local_dir_of;
use crate::event::{Event, EventLevel, EventLog, EventType};
use crate::fra::{Fra, FraRegion};
use crate::fsa::{group, Fsa, FsaRegion, HostRec};
use crate::handle_event::expire_timed;
use crate::host_state::{check_warn_time, Notify};
use crate::paths::WorkDir;
use crate::status::AfdStatus;
use crate::util::{count_files, link_max};

/// What one tick changed; used by tests and the debug log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub counted_dirs: usize,
    pub jobs_in_queue: i64,
    pub danger_set: Vec<String>,
    pub danger_cleared: Vec<String>,
    pub warn_set: Vec<String>,
    pub paused: Vec<String>,
    pub unpaused: Vec<String>,
    pub expired: Vec<String>,
}

/// Danger-pause transition for one host: `Some(true)` to set,
/// `Some(false)` to clear, `None` to keep.
///
/// Arms when the queue holds at least half the hardlink ceiling and the
/// host has more than `danger_no_of_files` files pending. Disarms only
/// when both values dropped to half of their trigger.
pub fn danger_transition<B: AsRef<[u8]>>(
    h: &HostRec<B>,
    jobs_in_queue: i64,
    link_max: i64,
    danger_no_of_files: i64,
) -> Option<bool> {
    let jobs_trigger = link_max / 2;
    let tfc = h.total_file_counter() as i64;
    let paused = h.host_status() & DANGER_PAUSE_QUEUE != 0;
    if !paused {
        (jobs_in_queue >= jobs_trigger && tfc > danger_no_of_files).then_some(true)
    } else {
        let jobs_low = 2 * jobs_in_queue <= jobs_trigger + 1;
        let files_low = 2 * tfc <= danger_no_of_files + 1;
        (jobs_low && files_low).then_some(false)
    }
}

pub struct Maintenance {
    work: WorkDir,
    cfg: AfdConfig,
    fsa: Fsa,
    fra: Fra,
    status: AfdStatus,
    events: EventLog,
    actions: Actions,
    link_max: i64,
    last_count: i64,
    last_action_check: i64,
    last_ip_hist: i64,
}

impl Maintenance {
    pub fn new(work: &WorkDir, cfg: &AfdConfig, fsa: Fsa, fra: Fra, status: AfdStatus) -> Self {
        Self {
            work: work.clone(),
            cfg: cfg.clone(),
            fsa,
            fra,
            status,
            events: EventLog::new(work),
            actions: Actions::new(work),
            link_max: link_max(&work.outgoing()),
            last_count: 0,
            last_action_check: 0,
            last_ip_hist: 0,
        }
    }

    pub fn with_link_max(mut self, n: i64) -> Self {
        self.link_max = n;
        self
    }

    pub fn fsa(&self) -> &Fsa {
        &self.fsa
    }

    pub fn fsa_mut(&mut self) -> &mut Fsa {
        &mut self.fsa
    }

    pub fn fra(&self) -> &Fra {
        &self.fra
    }

    pub fn fra_mut(&mut self) -> &mut Fra {
        &mut self.fra
    }

    pub fn status(&self) -> &AfdStatus {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut AfdStatus {
        &mut self.status
    }

    pub fn tick(&mut self, now: i64) -> Result<TickReport> {
        let mut rep = TickReport::default();
        self.fsa.check_reattach()?;
        self.fra.check_reattach()?;

        if now - self.last_count >= COUNT_FILES_INTERVAL {
            rep.counted_dirs = self.count_copied_dirs(now)?;
            self.last_count = now;
        }
        if now - self.last_action_check >= ACTION_CHECK_INTERVAL {
            self.check_action_success()?;
            self.last_action_check = now;
        }
        if now - self.last_ip_hist >= IP_HIST_INTERVAL {
            self.write_ip_history()?;
            self.last_ip_hist = now;
        }

        group::aggregate(&mut self.fsa)?;
        let hosts = self.fsa.iter_hosts(false)?;
        let mut jobs = 0i64;
        for &pos in &hosts {
            jobs += self.fsa.host(pos)?.jobs_queued() as i64;
        }
        self.status.set_jobs_in_queue(jobs)?;
        rep.jobs_in_queue = jobs;

        let danger_no = self.cfg.danger_no_of_files();
        for pos in hosts {
            self.error_pause(pos, now, &mut rep)?;
            let n = Notify {
                events: &self.events,
                actions: &self.actions,
            };
            if check_warn_time(&mut self.fsa, pos, now, &n)? {
                rep.warn_set.push(self.fsa.host(pos)?.host_alias());
            }
            if expire_timed(&mut self.fsa, pos, now, &self.events)? {
                rep.expired.push(self.fsa.host(pos)?.host_alias());
            }
            let (alias, change) = {
                let h = self.fsa.host(pos)?;
                (h.host_alias(), danger_transition(&h, jobs, self.link_max, danger_no))
            };
            match change {
                Some(true) => {
                    self.fsa.update_status(pos, DANGER_PAUSE_QUEUE, 0)?;
                    log::warn!(
                        target: "system",
                        "{}: stopped queue, {} jobs queued and too many files pending",
                        alias,
                        jobs
                    );
                    self.events.emit(Event::host(
                        now,
                        EventType::DangerPauseQueueSet,
                        &alias,
                        EventLevel::Warn,
                        format!("{} jobs in queue", jobs),
                    ));
                    rep.danger_set.push(alias);
                }
                Some(false) => {
                    self.fsa.update_status(pos, 0, DANGER_PAUSE_QUEUE)?;
                    log::info!(target: "system", "{}: queue released after danger pause", alias);
                    self.events.emit(Event::host(
                        now,
                        EventType::DangerPauseQueueUnset,
                        &alias,
                        EventLevel::Info,
                        "",
                    ));
                    rep.danger_cleared.push(alias);
                }
                None => {}
            }
        }
        self.fsa.flush();
        Ok(rep)
    }

    /// Keep `AUTO_PAUSE_QUEUE` in step with `error_counter >= max_errors`.
    fn error_pause(&mut self, pos: usize, now: i64, rep: &mut TickReport) -> Result<()> {
        let (alias, change) = {
            let _g = self.fsa.lock_all(pos, &[FsaRegion::Hs, FsaRegion::Ec])?;
            let mut h = self.fsa.host_mut(pos)?;
            let st = h.host_status();
            let max = h.max_errors();
            let over = max > 0 && h.error_counter() >= max;
            let paused = st & AUTO_PAUSE_QUEUE != 0;
            let change = if over && !paused {
                h.set_host_status(st | AUTO_PAUSE_QUEUE | PENDING_ERRORS);
                Some(true)
            } else if !over && paused {
                h.set_host_status(st & !(AUTO_PAUSE_QUEUE | PENDING_ERRORS));
                Some(false)
            } else {
                None
            };
            (h.host_alias(), change)
        };
        match change {
            Some(true) => {
                self.events
                    .emit(Event::host(now, EventType::AutoPauseQueueSet, &alias, EventLevel::Warn, ""));
                rep.paused.push(alias);
            }
            Some(false) => {
                self.events
                    .emit(Event::host(now, EventType::AutoPauseQueueUnset, &alias, EventLevel::Info, ""));
                rep.unpaused.push(alias);
            }
            None => {}
        }
        Ok(())
    }

    /// Refresh `files_in_dir`/`bytes_in_dir` of directories that hit the
    /// copy cap and were not scanned for two rescan periods.
    fn count_copied_dirs(&mut self, now: i64) -> Result<usize> {
        let deadline = Instant::now() + Duration::from_secs(COUNT_FILES_MAX_TIME as u64);
        let stale_after = 2 * self.cfg.rescan_time;
        let mut counted = 0;
        for pos in 0..self.fra.no_of_dirs()? {
            if Instant::now() >= deadline {
                log::warn!(target: "system", "counting files took longer than {}s, stopped", COUNT_FILES_MAX_TIME);
                break;
            }
            let path = {
                let d = self.fra.dir(pos)?;
                if d.dir_flag() & MAX_COPIED == 0 || !d.is_local() || now - d.last_retrieval() < stale_after {
                    continue;
                }
                local_dir_of(&d.url())
            };
            let (files, bytes) = match count_files(Path::new(&path), Some(deadline)) {
                Ok(v) => v,
                Err(e) => {
                    log::debug!(target: "system", "count files in {}: {:#}", path, e);
                    continue;
                }
            };
            let _g = self.fra.lock(pos, FraRegion::Counters)?;
            let mut d = self.fra.dir_mut(pos)?;
            d.set_files_in_dir(files);
            d.set_bytes_in_dir(bytes);
            counted += 1;
        }
        Ok(counted)
    }

    /// Mirror `<etc>/action/target/success/<alias>` into `HOST_ACTION_SUCCESS`.
    fn check_action_success(&mut self) -> Result<()> {
        for pos in self.fsa.iter_hosts(false)? {
            let (alias, has) = {
                let h = self.fsa.host(pos)?;
                (h.host_alias(), h.host_status() & HOST_ACTION_SUCCESS != 0)
            };
            let want = self.actions.exists(ActionSide::Target, ActionKind::Success, &alias);
            if want != has {
                if want {
                    self.fsa.update_status(pos, HOST_ACTION_SUCCESS, 0)?;
                } else {
                    self.fsa.update_status(pos, 0, HOST_ACTION_SUCCESS)?;
                }
            }
        }
        Ok(())
    }

    /// Rewrite the IP history: `alias hostname ip` for hosts with `STORE_IP`.
    fn write_ip_history(&self) -> Result<()> {
        let path = self.work.fifodir().join(IP_HIST_FILE);
        let tmp = path.with_extension("tmp");
        let mut out = Vec::new();
        for pos in self.fsa.iter_hosts(false)? {
            let h = self.fsa.host(pos)?;
            if h.host_status() & STORE_IP == 0 {
                continue;
            }
            let name = h.real_hostname(0);
            if name.is_empty() {
                continue;
            }
            let ip = (name.as_str(), 0u16)
                .to_socket_addrs()
                .ok()
                .and_then(|mut a| a.next())
                .map(|a| a.ip().to_string())
                .unwrap_or_default();
            writeln!(out, "{} {} {}", h.host_alias(), name, ip)?;
        }
        fs::write(&tmp, &out).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename {}", path.display()))?;
        Ok(())
    }
}
