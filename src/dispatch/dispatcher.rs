//! In-memory queue of ready messages and the worker lifecycle around it.

use anyhow::Result;
use std::collections::HashMap;

use super::launcher::WorkerLauncher;
use super::queue::{self, QueueEntry, HELD_FOR_TIME, IN_ERROR};
use crate::action::Actions;
use crate::catalog::{JobDef, Jid};
use crate::consts::*;
use crate::event::EventLog;
use crate::exit::{is_local_error, is_success, NO_FILES_TO_SEND};
use crate::fra::time_entry::{any_matches, Zone};
use crate::fra::Fra;
use crate::fsa::{slots, Fsa, FsaRegion, HostRec};
use crate::host_state::{self, Notify};
use crate::message::Envelope;
use crate::paths::WorkDir;
use crate::spool::SpoolRoots;
use crate::status::AfdStatus;
use crate::util::{count_files, rec_rmdir};
use crate::worker::WorkerArgs;

/// May host `h` start another transfer at `now`?
///
/// A host paused after too many errors gets a single probe once its
/// retry interval has passed since the last failure.
pub fn host_accepts<B: AsRef<[u8]>>(h: &HostRec<B>, now: i64) -> bool {
    if h.is_disabled() || h.is_group_header() {
        return false;
    }
    let st = h.host_status();
    if st & (STOP_TRANSFER | PAUSE_QUEUE | DANGER_PAUSE_QUEUE) != 0 {
        return false;
    }
    if st & AUTO_PAUSE_QUEUE != 0 {
        return h.active_transfers() == 0 && now - h.last_retry_time() >= h.retry_interval() as i64;
    }
    true
}

pub struct Dispatcher {
    work: WorkDir,
    spool: SpoolRoots,
    fsa: Fsa,
    fra: Fra,
    jid: Jid,
    status: Option<AfdStatus>,
    queue: Vec<QueueEntry>,
    /// Next slot to try per host.
    rr: HashMap<usize, usize>,
    events: EventLog,
    actions: Actions,
}

impl Dispatcher {
    pub fn new(work: &WorkDir, spool: SpoolRoots, fsa: Fsa, fra: Fra, jid: Jid) -> Self {
        Self {
            work: work.clone(),
            spool,
            fsa,
            fra,
            jid,
            status: None,
            queue: Vec::new(),
            rr: HashMap::new(),
            events: EventLog::new(work),
            actions: Actions::new(work),
        }
    }

    pub fn with_status(mut self, status: AfdStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn queue(&self) -> &[QueueEntry] {
        &self.queue
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

    /// Pick up queue entries from a previous run's dump.
    pub fn restore(&mut self) -> Result<usize> {
        let mut n = 0;
        for mut e in queue::read_queue(&self.work.fifodir())? {
            if self.queue.iter().any(|q| q.msg_name == e.msg_name) {
                continue;
            }
            e.pid = 0;
            e.slot = None;
            self.queue.push(e);
            n += 1;
        }
        if n > 0 {
            self.resolve_positions()?;
            log::info!(target: "system", "restored {} queued messages", n);
        }
        Ok(n)
    }

    /// Accept a ready message. Returns false when it was dropped.
    pub fn enqueue(&mut self, env: &Envelope) -> Result<bool> {
        let name = env.name;
        let dir = self.spool.message_dir(env.spool_no, &name);
        let jid_pos = match self.jid.position(name.job_id)? {
            Some(p) => p,
            None => {
                log::warn!(target: "system", "message {}: job {:x} not in database, removing", name, name.job_id);
                rec_rmdir(&dir)?;
                return Ok(false);
            }
        };
        if self.queue.iter().any(|q| q.msg_name == name) {
            log::debug!(target: "trans_db", "message {} already queued", name);
            return Ok(false);
        }
        let job = JobDef::from_rec(&self.jid.job(jid_pos)?);
        let fsa_pos = match self.fsa.position(&job.host_alias)? {
            Some(p) => p,
            None => {
                log::warn!(target: "system", "message {}: host {} not in FSA", name, job.host_alias);
                return Ok(false);
            }
        };
        self.fsa.add_tfc(fsa_pos, env.files_to_send as i32, env.file_size_to_send)?;
        {
            let mut h = self.fsa.host_mut(fsa_pos)?;
            h.set_jobs_queued(h.jobs_queued().wrapping_add(1));
        }
        let priority = if env.priority == 0 { job.priority } else { env.priority };
        self.queue.push(QueueEntry {
            msg_name: name,
            file_size_to_send: env.file_size_to_send,
            next_start_time: 0,
            jid_pos: jid_pos as i32,
            fsa_pos: fsa_pos as i32,
            pid: 0,
            files_to_send: env.files_to_send,
            retries: 0,
            priority,
            special: 0,
            slot: None,
            spool_no: env.spool_no,
        });
        Ok(true)
    }

    fn zone_of(&self, dir_id: u32) -> Zone {
        match self.fra.position_by_id(dir_id) {
            Ok(Some(p)) => match self.fra.dir(p) {
                Ok(d) => Zone::parse(&d.timezone()).unwrap_or(Zone::Local),
                Err(_) => Zone::Local,
            },
            _ => Zone::Local,
        }
    }

    /// Start workers for every eligible queued message. Returns the number
    /// of workers started.
    pub fn dispatch(&mut self, launcher: &mut dyn WorkerLauncher, now: i64) -> Result<usize> {
        queue::sort_for_dispatch(&mut self.queue);
        let mut started = 0;
        for idx in 0..self.queue.len() {
            let e = self.queue[idx].clone();
            if e.is_running() || e.next_start_time > now || e.jid_pos < 0 || e.fsa_pos < 0 {
                continue;
            }
            let pos = e.fsa_pos as usize;
            if !host_accepts(&self.fsa.host(pos)?, now) {
                continue;
            }
            let job = JobDef::from_rec(&self.jid.job(e.jid_pos as usize)?);
            if !job.time_entries.is_empty() && job.special_flag & TIME_JOB != 0 {
                if !any_matches(&job.time_entries, now, &self.zone_of(e.msg_name.dir_id)) {
                    self.queue[idx].special |= HELD_FOR_TIME;
                    continue;
                }
                self.queue[idx].special &= !HELD_FOR_TIME;
            }
            let start = self.rr.get(&pos).copied().unwrap_or(0);
            let protocol = if job.protocol != 0 {
                job.protocol
            } else {
                self.fsa.host(pos)?.protocol()
            };
            let msg = e.msg_name;
            let got = slots::acquire_with(&mut self.fsa, pos, msg.job_id, start, |slot| {
                launcher.launch(
                    protocol,
                    &WorkerArgs {
                        fsa_pos: pos,
                        slot,
                        jid_pos: e.jid_pos as usize,
                        msg,
                        spool_no: e.spool_no,
                    },
                )
            });
            match got {
                Ok(Some((slot, pid))) => {
                    let q = &mut self.queue[idx];
                    q.pid = pid;
                    q.slot = Some(slot);
                    self.rr.insert(pos, slot + 1);
                    if let Some(st) = self.status.as_mut() {
                        st.bump_fork_counter()?;
                    }
                    log::debug!(target: "trans_db", "started worker {} for {} in slot {}", pid, msg, slot);
                    started += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    log::error!(target: "system", "failed to start worker for {}: {:#}", msg, err);
                    let retry = self.fsa.host(pos)?.retry_interval() as i64;
                    self.queue[idx].next_start_time = now + retry;
                }
            }
        }
        self.update_transfers()?;
        Ok(started)
    }

    fn update_transfers(&mut self) -> Result<()> {
        let running = self.queue.iter().filter(|e| e.is_running()).count() as i32;
        if let Some(st) = self.status.as_mut() {
            st.set_no_of_transfers(running)?;
        }
        Ok(())
    }

    /// Account exited workers.
    pub fn reap(&mut self, launcher: &mut dyn WorkerLauncher, now: i64) -> Result<usize> {
        let exited = launcher.reap();
        let n = exited.len();
        for (pid, code) in exited {
            match self.queue.iter().position(|e| e.pid == pid) {
                Some(idx) => self.finish(idx, pid, code, now)?,
                None => log::debug!(target: "system", "reaped unknown worker {} ({})", pid, code),
            }
        }
        if n > 0 {
            self.update_transfers()?;
        }
        Ok(n)
    }

    fn finish(&mut self, idx: usize, pid: i32, code: i32, now: i64) -> Result<()> {
        let e = self.queue[idx].clone();
        let pos = e.fsa_pos as usize;
        let failed = !is_success(code);
        if let Some(slot) = e.slot {
            // A worker that released its own slot has accounted its outcome.
            if let Some(status) = slots::release_slot(&mut self.fsa, pos, slot, pid)? {
                log::debug!(target: "system", "worker {} did not release slot {}", pid, slot);
                if failed && status != NOT_WORKING && !is_local_error(code) {
                    let n = Notify {
                        events: &self.events,
                        actions: &self.actions,
                    };
                    host_state::record_error(&mut self.fsa, pos, code, now, &n)?;
                }
            }
        }

        let dir = self.spool.message_dir(e.spool_no, &e.msg_name);
        let (files, bytes) = if dir.is_dir() {
            count_files(&dir, None).unwrap_or((0, 0))
        } else {
            (0, 0)
        };
        let done_files = e.files_to_send.saturating_sub(files);
        let done_bytes = (e.file_size_to_send.max(0) as u64).saturating_sub(bytes);
        if let Some(fra_pos) = self.fra.position_by_id(e.msg_name.dir_id)? {
            self.fra.dequeue(fra_pos, done_files, done_bytes)?;
        }

        if files == 0 {
            if code == NO_FILES_TO_SEND {
                // Nothing was sent, so nothing was taken off the host counters.
                self.fsa.add_tfc(pos, -(e.files_to_send as i32), -e.file_size_to_send)?;
            }
            let _ = std::fs::remove_dir(&dir);
            self.queue.remove(idx);
            let mut h = self.fsa.host_mut(pos)?;
            h.set_jobs_queued(h.jobs_queued().saturating_sub(1));
            log::debug!(target: "trans_db", "message {} finished ({})", e.msg_name, code);
            return Ok(());
        }

        let retry = self.fsa.host(pos)?.retry_interval() as i64;
        let q = &mut self.queue[idx];
        q.pid = 0;
        q.slot = None;
        q.files_to_send = files;
        q.file_size_to_send = bytes as i64;
        if failed {
            q.retries += 1;
            q.next_start_time = now + retry;
            q.special |= IN_ERROR;
        } else {
            q.special &= !IN_ERROR;
        }
        Ok(())
    }

    /// Retry messages of hosts that recovered right away instead of waiting
    /// out their retry interval.
    pub fn wake_up(&mut self) -> Result<usize> {
        let mut n = 0;
        for e in self.queue.iter_mut() {
            if e.special & IN_ERROR == 0 || e.is_running() || e.fsa_pos < 0 {
                continue;
            }
            if self.fsa.host(e.fsa_pos as usize)?.error_counter() == 0 {
                e.next_start_time = 0;
                e.special &= !IN_ERROR;
                n += 1;
            }
        }
        Ok(n)
    }

    /// Drop messages older than `queued_file_time` hours for stopped hosts
    /// whose directory asks for it.
    pub fn purge_queued_files(&mut self, now: i64) -> Result<usize> {
        let mut idx = 0;
        let mut n = 0;
        while idx < self.queue.len() {
            let e = self.queue[idx].clone();
            let drop_it = !e.is_running() && e.fsa_pos >= 0 && {
                let h = self.fsa.host(e.fsa_pos as usize)?;
                h.host_status() & STOP_TRANSFER != 0
            } && match self.fra.position_by_id(e.msg_name.dir_id)? {
                Some(p) => {
                    let d = self.fra.dir(p)?;
                    d.delete_files_flag() & QUEUED_FILES != 0
                        && now - e.msg_name.creation_time > d.queued_file_time() as i64 * 3600
                }
                None => false,
            };
            if !drop_it {
                idx += 1;
                continue;
            }
            let pos = e.fsa_pos as usize;
            rec_rmdir(&self.spool.message_dir(e.spool_no, &e.msg_name))?;
            self.fsa.add_tfc(pos, -(e.files_to_send as i32), -e.file_size_to_send)?;
            {
                let mut h = self.fsa.host_mut(pos)?;
                h.set_jobs_queued(h.jobs_queued().saturating_sub(1));
            }
            if let Some(p) = self.fra.position_by_id(e.msg_name.dir_id)? {
                self.fra.dequeue(p, e.files_to_send, e.file_size_to_send.max(0) as u64)?;
            }
            log::info!(target: "system", "deleted queued message {} ({} files)", e.msg_name, e.files_to_send);
            self.queue.remove(idx);
            n += 1;
        }
        Ok(n)
    }

    /// Re-attach stale tables and re-resolve queue positions.
    pub fn check_tables(&mut self) -> Result<bool> {
        let a = self.fsa.check_reattach()?;
        let b = self.fra.check_reattach()?;
        let c = self.jid.check_reattach()?;
        if a || c {
            self.resolve_positions()?;
            self.rr.clear();
        }
        Ok(a || b || c)
    }

    fn resolve_positions(&mut self) -> Result<()> {
        for e in self.queue.iter_mut() {
            match self.jid.position(e.msg_name.job_id)? {
                Some(jp) => {
                    let job = JobDef::from_rec(&self.jid.job(jp)?);
                    e.jid_pos = jp as i32;
                    e.fsa_pos = self.fsa.position(&job.host_alias)?.map(|p| p as i32).unwrap_or(-1);
                }
                None => {
                    e.jid_pos = -1;
                    e.fsa_pos = -1;
                }
            }
        }
        // Entries whose job is gone are left to the janitor.
        self.queue.retain(|e| e.jid_pos >= 0 || e.is_running());
        Ok(())
    }

    /// Write the queue to `msg_queue_data`.
    pub fn dump_queue(&self) -> Result<()> {
        queue::write_queue(&self.work.fifodir(), &self.queue)
    }

    /// Rebuild `total_file_counter`/`total_file_size` from the queue when a
    /// host's counters went negative.
    pub fn correct_counters(&mut self, now: i64) -> Result<usize> {
        let mut n = 0;
        for pos in self.fsa.iter_hosts(false)? {
            let (files, bytes): (i64, i64) = self
                .queue
                .iter()
                .filter(|e| e.fsa_pos == pos as i32)
                .fold((0, 0), |a, e| (a.0 + e.files_to_send as i64, a.1 + e.file_size_to_send));
            let _g = self.fsa.lock(pos, FsaRegion::Tfc)?;
            let mut h = self.fsa.host_mut(pos)?;
            if h.total_file_counter() < 0 || h.total_file_size() < 0 {
                let alias = h.host_alias();
                log::warn!(
                    target: "system",
                    "{}: corrected file counter {} -> {}, size {} -> {}",
                    alias,
                    h.total_file_counter(),
                    files,
                    h.total_file_size(),
                    bytes
                );
                h.set_total_file_counter(files as i32);
                h.set_total_file_size(bytes);
                self.events.emit(crate::event::Event::host(
                    now,
                    crate::event::EventType::CounterCorrected,
                    &alias,
                    crate::event::EventLevel::Warn,
                    format!("{} files {} bytes", files, bytes),
                ));
                n += 1;
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::take_envelopes;
    use crate::exit::{CONNECT_ERROR, TRANSFER_SUCCESS};
    use crate::fra::testutil::make_fra;
    use crate::fsa::testutil::make_fsa;
    use crate::message::{MsgName, Originator};
    use crate::worker::{run_message, LocalTransport, WorkerEnv};

    /// Runs the worker in-process when reaped, never holding CON across
    /// the call.
    struct InlineLauncher {
        work: WorkDir,
        next_pid: i32,
        pending: Vec<(i32, WorkerArgs)>,
        fixed_code: Option<i32>,
        now: i64,
    }

    impl WorkerLauncher for InlineLauncher {
        fn launch(&mut self, _protocol: u32, args: &WorkerArgs) -> Result<i32> {
            self.next_pid += 1;
            self.pending.push((self.next_pid, args.clone()));
            Ok(self.next_pid)
        }

        fn reap(&mut self) -> Vec<(i32, i32)> {
            let mut out = Vec::new();
            for (pid, args) in std::mem::take(&mut self.pending) {
                let code = match self.fixed_code {
                    Some(c) => c,
                    None => {
                        let env = WorkerEnv::new(&self.work, SpoolRoots::single(&self.work));
                        let mut fsa = Fsa::attach_active(&self.work.fifodir()).unwrap();
                        let jid = Jid::open(&self.work.fifodir(), crate::table::Access::Passive).unwrap();
                        run_message(&env, &mut fsa, &jid, &args, pid, &mut LocalTransport::new(), self.now)
                    }
                };
                out.push((pid, code));
            }
            out
        }
    }

    fn setup(name: &str) -> (WorkDir, Dispatcher, Envelope, std::path::PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "afd-disp-{}-{}-{}",
            name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let work = WorkDir::new(&root);
        work.create_tree().unwrap();
        let target = root.join("target");
        let fsa = make_fsa(&work.fifodir(), &["h"], 2);
        let fra = make_fra(&work.fifodir(), &["d"]);
        let dir_id = fra.dir(0).unwrap().dir_id();
        let job = JobDef {
            dir_id,
            host_alias: "h".into(),
            recipient: format!("file://h{}", target.display()),
            soptions: vec!["create target dir".into()],
            priority: b'5',
            protocol: LOC,
            ..Default::default()
        };
        let jid = Jid::write(&work.fifodir(), &[job.clone()]).unwrap();
        let spool = SpoolRoots::single(&work);
        let name = MsgName {
            job_id: job.job_id(),
            dir_id,
            creation_time: 1_700_000_000,
            unique: 7,
            split: 0,
        };
        let dir = spool.message_dir(0, &name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("f1"), b"hello").unwrap();
        std::fs::write(dir.join("f2"), b"world!").unwrap();
        let env = Envelope {
            name,
            files_to_send: 2,
            file_size_to_send: 11,
            dir_no: 0,
            priority: 0,
            originator: Originator::Watcher,
            spool_no: 0,
        };
        let d = Dispatcher::new(&work, spool, fsa, fra, jid);
        (work, d, env, target)
    }

    fn launcher(work: &WorkDir, code: Option<i32>) -> InlineLauncher {
        InlineLauncher {
            work: work.clone(),
            next_pid: 9000,
            pending: Vec::new(),
            fixed_code: code,
            now: 1_700_000_100,
        }
    }

    #[test]
    fn message_flows_through_worker() {
        let (work, mut d, env, target) = setup("flow");
        assert!(d.enqueue(&env).unwrap());
        assert!(!d.enqueue(&env).unwrap());
        {
            let h = d.fsa().host(0).unwrap();
            assert_eq!((h.total_file_counter(), h.total_file_size(), h.jobs_queued()), (2, 11, 1));
            assert_eq!(d.queue()[0].priority, b'5');
        }
        let mut l = launcher(&work, None);
        assert_eq!(d.dispatch(&mut l, 1_700_000_100).unwrap(), 1);
        assert_eq!(d.fsa().host(0).unwrap().active_transfers(), 1);
        assert_eq!(d.dispatch(&mut l, 1_700_000_100).unwrap(), 0);
        assert_eq!(d.reap(&mut l, 1_700_000_100).unwrap(), 1);
        assert!(d.queue().is_empty());
        let h = d.fsa().host(0).unwrap();
        assert_eq!(h.active_transfers(), 0);
        assert_eq!((h.total_file_counter(), h.total_file_size(), h.jobs_queued()), (0, 0, 0));
        assert_eq!(h.file_counter_done(), 2);
        assert_eq!(std::fs::read(target.join("f2")).unwrap(), b"world!");
    }

    #[test]
    fn crashed_worker_is_attributed_and_retried() {
        let (work, mut d, env, _) = setup("crash");
        d.enqueue(&env).unwrap();
        let mut l = launcher(&work, Some(CONNECT_ERROR));
        d.dispatch(&mut l, 100).unwrap();
        d.reap(&mut l, 100).unwrap();
        let h = d.fsa().host(0).unwrap();
        assert_eq!(h.active_transfers(), 0);
        assert_eq!(h.error_counter(), 1);
        let e = &d.queue()[0];
        assert_eq!((e.retries, e.next_start_time, e.pid), (1, 160, 0));
        assert_ne!(e.special & IN_ERROR, 0);
        assert_eq!(d.dispatch(&mut l, 150).unwrap(), 0);
        assert_eq!(d.dispatch(&mut l, 160).unwrap(), 1);
    }

    #[test]
    fn paused_host_gets_one_probe_after_retry_interval() {
        let (work, mut d, env, _) = setup("probe");
        d.enqueue(&env).unwrap();
        {
            let mut h = d.fsa_mut().host_mut(0).unwrap();
            h.set_host_status(AUTO_PAUSE_QUEUE | PENDING_ERRORS);
            h.set_last_retry_time(1_000);
        }
        let mut l = launcher(&work, Some(TRANSFER_SUCCESS));
        assert_eq!(d.dispatch(&mut l, 1_030).unwrap(), 0);
        assert_eq!(d.dispatch(&mut l, 1_060).unwrap(), 1);
        d.fsa_mut().host_mut(0).unwrap().set_host_status(STOP_TRANSFER);
        assert!(!host_accepts(&d.fsa().host(0).unwrap(), 2_000));
    }

    #[test]
    fn unknown_job_is_removed() {
        let (_work, mut d, mut env, _) = setup("unknown");
        let dir = d.spool.message_dir(0, &env.name);
        env.name.job_id ^= 0xffff;
        let other = d.spool.message_dir(0, &env.name);
        std::fs::create_dir_all(&other).unwrap();
        assert!(!d.enqueue(&env).unwrap());
        assert!(!other.exists());
        assert!(dir.exists());
    }

    #[test]
    fn queue_dump_survives_restart() {
        let (work, mut d, env, _) = setup("dump");
        d.enqueue(&env).unwrap();
        d.dump_queue().unwrap();
        let fsa = Fsa::attach_active(&work.fifodir()).unwrap();
        let fra = Fra::attach_active(&work.fifodir()).unwrap();
        let jid = Jid::open(&work.fifodir(), crate::table::Access::Passive).unwrap();
        let mut d2 = Dispatcher::new(&work, SpoolRoots::single(&work), fsa, fra, jid);
        assert_eq!(d2.restore().unwrap(), 1);
        assert_eq!(d2.queue()[0].msg_name, env.name);
    }

    #[test]
    fn envelope_sent_before_reload_finds_its_directory() {
        let (work, mut d, env, _) = setup("reload");
        let mut buf = env.encode().to_vec();
        // Both tables are rebuilt with the host and the directory moved.
        make_fra(&work.fifodir(), &["first", "d"]);
        make_fsa(&work.fifodir(), &["x", "h"], 2);
        assert!(d.fsa().is_stale());

        assert!(d.check_tables().unwrap());
        let envs = take_envelopes(&mut buf);
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].name.dir_id, env.name.dir_id);
        assert!(d.enqueue(&envs[0]).unwrap());

        assert_eq!(d.fra().position_by_id(env.name.dir_id).unwrap(), Some(1));
        assert_eq!(d.queue()[0].fsa_pos, 1);
        let h = d.fsa().host(1).unwrap();
        assert_eq!((h.total_file_counter(), h.total_file_size(), h.jobs_queued()), (2, 11, 1));
        assert_eq!(d.fsa().host(0).unwrap().total_file_counter(), 0);
    }
}
