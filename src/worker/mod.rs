//! Transfer worker shell: the shared-state contract every protocol adapter
//! runs under.
//!
//! A worker owns one slot of one host. It streams the files of one message,
//! keeps the slot and host counters current, applies the rate limit and the
//! transfer timeout, and reports the outcome through the host state machine
//! before it releases the slot.

pub mod loc;
pub mod rate;
pub mod signals;
pub mod transport;

pub use loc::LocalTransport;
pub use transport::{TransferError, Transport};

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::action::Actions;
use crate::catalog::{JobDef, Jid};
use crate::consts::*;
use crate::error::is_stale;
use crate::error_queue::{ErrorEntry, ErrorQueue};
use crate::event::EventLog;
use crate::exit::*;
use crate::fifo::{send_command, Command};
use crate::fsa::{slots, Fsa, FsaRegion};
use crate::host_state::{self, Notify};
use crate::message::MsgName;
use crate::paths::WorkDir;
use crate::spool::SpoolRoots;
use rate::RateLimiter;
use transport::TResult;

/// What the dispatcher hands a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    pub fsa_pos: usize,
    pub slot: usize,
    pub jid_pos: usize,
    pub msg: MsgName,
    pub spool_no: u16,
}

impl WorkerArgs {
    /// Positional command line of a worker binary (after `-w <work>`).
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.fsa_pos.to_string(),
            self.slot.to_string(),
            self.jid_pos.to_string(),
            self.msg.to_string(),
            self.spool_no.to_string(),
        ]
    }
}

/// Everything a worker needs besides its tables.
pub struct WorkerEnv {
    pub work: WorkDir,
    pub spool: SpoolRoots,
    pub events: EventLog,
    pub actions: Actions,
}

impl WorkerEnv {
    pub fn new(work: &WorkDir, spool: SpoolRoots) -> Self {
        Self {
            work: work.clone(),
            spool,
            events: EventLog::new(work),
            actions: Actions::new(work),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sent {
    pub files: u32,
    pub bytes: u64,
}

fn list_message(dir: &Path) -> TResult<Vec<(String, PathBuf, u64)>> {
    let rd = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TransferError::io(OPEN_LOCAL_ERROR, &dir.display().to_string(), e)),
    };
    let mut out = Vec::new();
    for ent in rd.flatten() {
        let md = match ent.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if md.is_file() {
            out.push((ent.file_name().to_string_lossy().into_owned(), ent.path(), md.len()));
        }
    }
    out.sort();
    Ok(out)
}

/// The worker's hold on one slot. The host position follows the alias
/// across reloads; the slot index and pid stay fixed.
struct Seat {
    pos: usize,
    slot: usize,
    pid: i32,
    alias: String,
}

impl Seat {
    fn new(fsa: &mut Fsa, args: &WorkerArgs, pid: i32) -> Result<Self> {
        fsa.check_reattach()?;
        let alias = fsa.host(args.fsa_pos)?.host_alias();
        Ok(Self {
            pos: args.fsa_pos,
            slot: args.slot,
            pid,
            alias,
        })
    }

    /// Re-map a stale FSA before the next access and find our host again.
    fn follow(&mut self, fsa: &mut Fsa) -> Result<usize> {
        if !fsa.check_reattach()? {
            return Ok(self.pos);
        }
        let pos = fsa.require_position(&self.alias)?;
        let owner = fsa.host(pos)?.slot(self.slot).proc_id();
        if owner != self.pid {
            return Err(anyhow!(
                "{}: slot {} belongs to pid {} after reload",
                self.alias,
                self.slot,
                owner
            ));
        }
        if pos != self.pos {
            log::debug!(
                target: "system",
                "{}: host moved from position {} to {} after reload",
                self.alias,
                self.pos,
                pos
            );
            self.pos = pos;
        }
        Ok(pos)
    }

    /// Run `f` against our host record. A reload that lands between
    /// `follow` and `f` is followed once more and `f` retried.
    fn with<T>(&mut self, fsa: &mut Fsa, mut f: impl FnMut(&mut Fsa, usize) -> Result<T>) -> Result<T> {
        let pos = self.follow(fsa)?;
        match f(fsa, pos) {
            Err(e) if is_stale(&e) => {
                let pos = self.follow(fsa)?;
                f(fsa, pos)
            }
            r => r,
        }
    }
}

fn internal(e: anyhow::Error) -> TransferError {
    TransferError::new(ALLOC_ERROR, format!("{:#}", e))
}

#[allow(clippy::too_many_arguments)]
fn send_file(
    fsa: &mut Fsa,
    seat: &mut Seat,
    t: &mut dyn Transport,
    limiter: &mut RateLimiter,
    first_byte: &mut Option<Instant>,
    name: &str,
    src: &Path,
    size: u64,
) -> TResult<()> {
    let slot = seat.slot;
    let (block, timeout) = seat
        .with(fsa, |fsa, pos| {
            let h = fsa.host(pos)?;
            Ok((h.block_size().max(512) as usize, h.transfer_timeout().max(0) as u64))
        })
        .map_err(internal)?;
    seat.with(fsa, |fsa, pos| {
        let mut h = fsa.host_mut(pos)?;
        let mut s = h.slot_mut(slot);
        s.set_file_name_in_use(name);
        s.set_file_size_in_use(size as i64);
        s.set_file_size_in_use_done(0);
        Ok(())
    })
    .map_err(internal)?;
    let mut f = File::open(src).map_err(|e| TransferError::io(OPEN_LOCAL_ERROR, &src.display().to_string(), e))?;
    t.open_file(name, size)?;
    let mut buf = vec![0u8; block];
    let mut done = 0u64;
    loop {
        if signals::killed() {
            return Err(TransferError::new(GOT_KILLED, "signal received"));
        }
        let n = f
            .read(&mut buf)
            .map_err(|e| TransferError::io(READ_LOCAL_ERROR, &src.display().to_string(), e))?;
        if n == 0 {
            break;
        }
        let started = *first_byte.get_or_insert_with(Instant::now);
        t.write_block(&buf[..n])?;
        done += n as u64;
        let trl = seat
            .with(fsa, |fsa, pos| {
                let mut h = fsa.host_mut(pos)?;
                let trl = h.trl_per_process();
                let mut s = h.slot_mut(slot);
                s.set_file_size_in_use_done(done as i64);
                s.set_file_size_done(s.file_size_done() + n as i64);
                s.set_bytes_send(s.bytes_send() + n as u64);
                Ok(trl)
            })
            .map_err(internal)?;
        limiter.throttle(n as u64, trl);
        if timeout > 0 && started.elapsed().as_secs() > timeout {
            return Err(TransferError::new(
                TIMEOUT_ERROR,
                format!("{}: transfer timeout after {}s", name, timeout),
            ));
        }
    }
    t.close_file()
}

/// Transfer one message. Returns the worker's exit code; the slot is
/// released on every path, in whatever generation is current by then.
pub fn run_message(
    env: &WorkerEnv,
    fsa: &mut Fsa,
    jid: &Jid,
    args: &WorkerArgs,
    pid: i32,
    transport: &mut dyn Transport,
    now: i64,
) -> i32 {
    let notify = Notify {
        events: &env.events,
        actions: &env.actions,
    };
    let mut seat = match Seat::new(fsa, args, pid) {
        Ok(s) => s,
        Err(e) => {
            log::error!(target: "system", "host at position {}: {:#}", args.fsa_pos, e);
            return ALLOC_ERROR;
        }
    };
    let code = match transfer(env, fsa, &mut seat, jid, args, transport, now, &notify) {
        Ok(sent) => {
            log::debug!(
                target: "trans_db",
                "message {} done: {} files, {} bytes",
                args.msg,
                sent.files,
                sent.bytes
            );
            if sent.files == 0 {
                NO_FILES_TO_SEND
            } else {
                TRANSFER_SUCCESS
            }
        }
        Err(e) => {
            if let Err(e2) = on_failure(env, fsa, &mut seat, args, &e, now, &notify) {
                log::error!(target: "system", "{:#}", e2);
            }
            match e.code {
                TIMEOUT_ERROR => STILL_FILES_TO_SEND,
                c => c,
            }
        }
    };
    if let Err(e) = seat.with(fsa, |fsa, pos| slots::release_slot(fsa, pos, args.slot, pid)) {
        log::error!(target: "system", "release slot {}: {:#}", args.slot, e);
    }
    code
}

#[allow(clippy::too_many_arguments)]
fn transfer(
    env: &WorkerEnv,
    fsa: &mut Fsa,
    seat: &mut Seat,
    jid: &Jid,
    args: &WorkerArgs,
    t: &mut dyn Transport,
    now: i64,
    notify: &Notify,
) -> TResult<Sent> {
    let job = JobDef::from_rec(&jid.job(args.jid_pos).map_err(|e| TransferError::new(JID_NUMBER_ERROR, format!("{:#}", e)))?);
    if job.job_id() != args.msg.job_id {
        return Err(TransferError::new(
            JID_NUMBER_ERROR,
            format!("job {:x} is not at position {}", args.msg.job_id, args.jid_pos),
        ));
    }

    let msg_dir = env.spool.message_dir(args.spool_no, &args.msg);
    let files = list_message(&msg_dir)?;
    let total: u64 = files.iter().map(|f| f.2).sum();
    let pid = seat.pid;
    let slot = args.slot;

    let hostname = seat
        .with(fsa, |fsa, pos| {
            let _con = fsa.lock(pos, FsaRegion::Con)?;
            let mut h = fsa.host_mut(pos)?;
            if h.slot(slot).proc_id() != pid {
                return Ok(None);
            }
            let mut s = h.slot_mut(slot);
            s.set_connect_status(ACTIVE);
            s.set_no_of_files(files.len() as i32);
            s.set_no_of_files_done(0);
            s.set_file_size(total as i64);
            s.set_file_size_done(0);
            s.set_unique_name(&args.msg.leaf());
            Ok(Some(h.active_hostname()))
        })
        .map_err(internal)?
        .ok_or_else(|| TransferError::new(ALLOC_ERROR, format!("slot {} of {} is not ours", slot, seat.alias)))?;

    if files.is_empty() {
        let _ = std::fs::remove_dir(&msg_dir);
        return Ok(Sent::default());
    }

    t.connect(&job, &hostname)?;
    let mut limiter = RateLimiter::new();
    let mut first_byte = None;
    let mut sent = Sent::default();
    for (name, src, size) in &files {
        if let Err(e) = send_file(fsa, seat, t, &mut limiter, &mut first_byte, name, src, *size) {
            t.disconnect();
            return Err(e);
        }
        seat.with(fsa, |fsa, pos| {
            let _g = fsa.lock(pos, FsaRegion::Tfc)?;
            let mut h = fsa.host_mut(pos)?;
            h.set_total_file_counter(h.total_file_counter() - 1);
            h.set_total_file_size(h.total_file_size() - *size as i64);
            h.set_file_counter_done(h.file_counter_done().wrapping_add(1));
            h.set_bytes_send(h.bytes_send().wrapping_add(*size));
            h.set_last_connection(now);
            let mut s = h.slot_mut(slot);
            s.set_no_of_files_done(s.no_of_files_done() + 1);
            Ok(())
        })
        .map_err(internal)?;
        if let Err(e) = std::fs::remove_file(src) {
            log::warn!(target: "system", "remove {}: {}", src.display(), e);
        }
        log::info!(target: "transfer", "{} [{}]: {} {} bytes", seat.alias, slot, name, size);
        sent.files += 1;
        sent.bytes += size;
    }
    t.disconnect();
    if let Err(e) = std::fs::remove_dir(&msg_dir) {
        log::debug!(target: "system", "rmdir {}: {}", msg_dir.display(), e);
    }
    seat.with(fsa, |fsa, pos| {
        let mut h = fsa.host_mut(pos)?;
        let mut s = h.slot_mut(slot);
        s.set_file_name_in_use("");
        s.set_connect_status(CLOSING_CONNECTION);
        Ok(())
    })
    .map_err(internal)?;

    let pos = seat.follow(fsa).map_err(internal)?;
    let out = host_state::record_success(fsa, pos, Some(slot), now, notify).map_err(internal)?;
    clear_error_queue(env, fsa, pos, args.msg.dir_id).map_err(internal)?;
    if out.errors_cleared {
        if let Err(e) = send_command(&env.work.fifo(FD_WAKE_UP_FIFO), Command::WakeUp) {
            log::debug!(target: "system", "wake dispatcher: {:#}", e);
        }
    }
    Ok(sent)
}

fn clear_error_queue(env: &WorkerEnv, fsa: &mut Fsa, pos: usize, dir_id: u32) -> Result<()> {
    let (status, host_id) = {
        let h = fsa.host(pos)?;
        (h.host_status(), h.host_id())
    };
    if status & ERROR_QUEUE_SET == 0 {
        return Ok(());
    }
    let q = ErrorQueue::new(&env.work.fifodir());
    if !q.remove(host_id, dir_id)? {
        fsa.update_status(pos, 0, ERROR_QUEUE_SET)?;
    }
    Ok(())
}

fn on_failure(
    env: &WorkerEnv,
    fsa: &mut Fsa,
    seat: &mut Seat,
    args: &WorkerArgs,
    e: &TransferError,
    now: i64,
    notify: &Notify,
) -> Result<()> {
    log::warn!(target: "transfer", "{} [{}]: {}: {}", seat.alias, args.slot, args.msg, e);
    if is_local_error(e.code) || e.code == GOT_KILLED {
        return Ok(());
    }
    let slot = args.slot;
    seat.with(fsa, |fsa, pos| {
        let _con = fsa.lock(pos, FsaRegion::Con)?;
        let mut h = fsa.host_mut(pos)?;
        if h.slot(slot).proc_id() > 0 {
            h.slot_mut(slot).set_connect_status(NOT_WORKING);
        }
        Ok(())
    })?;
    let pos = seat.follow(fsa)?;
    host_state::record_error(fsa, pos, e.code, now, notify)?;
    let (host_id, retry) = seat.with(fsa, |fsa, pos| {
        let h = fsa.host(pos)?;
        Ok((h.host_id(), h.retry_interval() as i64))
    })?;
    ErrorQueue::new(&env.work.fifodir()).add(ErrorEntry {
        job_id: args.msg.job_id,
        dir_id: args.msg.dir_id,
        host_id,
        next_retry_time: now + retry,
    })?;
    seat.with(fsa, |fsa, pos| fsa.update_status(pos, ERROR_QUEUE_SET, 0))?;
    Ok(())
}

/// Parse the positional worker arguments produced by `WorkerArgs::to_args`.
pub fn parse_args(fsa_pos: usize, slot: usize, jid_pos: usize, msg: &str, spool_no: u16) -> Result<WorkerArgs> {
    if slot >= MAX_PARALLEL_JOBS {
        return Err(anyhow!("slot {} out of range", slot));
    }
    Ok(WorkerArgs {
        fsa_pos,
        slot,
        jid_pos,
        msg: MsgName::parse(msg)?,
        spool_no,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsa::testutil::{make_fsa, reload_fsa};

    struct Failing;

    impl Transport for Failing {
        fn connect(&mut self, _: &JobDef, _: &str) -> TResult<()> {
            Err(TransferError::new(CONNECT_ERROR, "refused"))
        }
        fn open_file(&mut self, _: &str, _: u64) -> TResult<()> {
            Ok(())
        }
        fn write_block(&mut self, _: &[u8]) -> TResult<()> {
            Ok(())
        }
        fn close_file(&mut self) -> TResult<()> {
            Ok(())
        }
        fn disconnect(&mut self) {}
    }

    /// Local delivery that commits a new FSA generation, with `h` moved to
    /// position 1, before the first block goes out.
    struct ReloadOnFirstBlock {
        inner: LocalTransport,
        fifodir: PathBuf,
        reloaded: bool,
    }

    impl Transport for ReloadOnFirstBlock {
        fn connect(&mut self, job: &JobDef, hostname: &str) -> TResult<()> {
            self.inner.connect(job, hostname)
        }
        fn open_file(&mut self, name: &str, size: u64) -> TResult<()> {
            self.inner.open_file(name, size)
        }
        fn write_block(&mut self, data: &[u8]) -> TResult<()> {
            if !self.reloaded {
                reload_fsa(&self.fifodir, &["new", "h"]);
                self.reloaded = true;
            }
            self.inner.write_block(data)
        }
        fn close_file(&mut self) -> TResult<()> {
            self.inner.close_file()
        }
        fn disconnect(&mut self) {
            self.inner.disconnect()
        }
    }

    fn setup(name: &str) -> (WorkerEnv, Fsa, Jid, WorkerArgs, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "afd-worker-{}-{}-{}",
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
        let mut fsa = make_fsa(&work.fifodir(), &["h"], 2);
        fsa.host_mut(0).unwrap().set_block_size(4);
        let job = JobDef {
            dir_id: 1,
            host_alias: "h".into(),
            recipient: format!("file://h{}", target.display()),
            soptions: vec!["create target dir".into()],
            priority: b'5',
            protocol: LOC,
            ..Default::default()
        };
        let jid = Jid::write(&work.fifodir(), &[job.clone()]).unwrap();
        let msg = MsgName {
            job_id: job.job_id(),
            dir_id: 1,
            creation_time: 1_700_000_000,
            unique: 1,
            split: 0,
        };
        let env = WorkerEnv::new(&work, SpoolRoots::single(&work));
        let dir = env.spool.message_dir(0, &msg);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a"), b"0123456789").unwrap();
        std::fs::write(dir.join("b"), b"xyz").unwrap();
        fsa.add_tfc(0, 2, 13).unwrap();
        let slot = slots::acquire_slot(&mut fsa, 0, 4242, msg.job_id, 0).unwrap().unwrap();
        let args = WorkerArgs {
            fsa_pos: 0,
            slot,
            jid_pos: 0,
            msg,
            spool_no: 0,
        };
        (env, fsa, jid, args, target)
    }

    #[test]
    fn successful_message_updates_counters_and_releases_slot() {
        let (env, mut fsa, jid, args, target) = setup("ok");
        let code = run_message(&env, &mut fsa, &jid, &args, 4242, &mut LocalTransport::new(), 500);
        assert_eq!(code, TRANSFER_SUCCESS);
        let h = fsa.host(0).unwrap();
        assert_eq!(h.file_counter_done(), 2);
        assert_eq!(h.bytes_send(), 13);
        assert_eq!((h.total_file_counter(), h.total_file_size()), (0, 0));
        assert_eq!(h.active_transfers(), 0);
        assert_eq!(h.live_slots(), 0);
        assert_eq!(h.last_connection(), 500);
        assert_eq!(std::fs::read(target.join("a")).unwrap(), b"0123456789");
        assert!(!env.spool.message_dir(0, &args.msg).exists());
    }

    #[test]
    fn failure_counts_error_and_queues_retry() {
        let (env, mut fsa, jid, args, _) = setup("fail");
        let code = run_message(&env, &mut fsa, &jid, &args, 4242, &mut Failing, 500);
        assert_eq!(code, CONNECT_ERROR);
        let h = fsa.host(0).unwrap();
        assert_eq!(h.error_counter(), 1);
        assert_ne!(h.host_status() & ERROR_QUEUE_SET, 0);
        assert_eq!(h.total_file_counter(), 2);
        assert_eq!(h.active_transfers(), 0);
        let q = ErrorQueue::new(&env.work.fifodir()).entries().unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q[0].next_retry_time, 560);
        assert!(env.spool.message_dir(0, &args.msg).join("a").exists());
    }

    #[test]
    fn foreign_slot_is_refused() {
        let (env, mut fsa, jid, args, _) = setup("foreign");
        let code = run_message(&env, &mut fsa, &jid, &args, 1, &mut LocalTransport::new(), 500);
        assert_eq!(code, ALLOC_ERROR);
        assert_eq!(fsa.host(0).unwrap().active_transfers(), 1);
    }

    #[test]
    fn reload_mid_message_is_followed() {
        let (env, mut fsa, jid, args, target) = setup("reload");
        let mut t = ReloadOnFirstBlock {
            inner: LocalTransport::new(),
            fifodir: env.work.fifodir(),
            reloaded: false,
        };
        let code = run_message(&env, &mut fsa, &jid, &args, 4242, &mut t, 500);
        assert!(t.reloaded);
        assert_eq!(code, TRANSFER_SUCCESS);
        assert_eq!(fsa.generation(), Some(1));
        assert_eq!(fsa.require_position("h").unwrap(), 1);
        let h = fsa.host(1).unwrap();
        assert_eq!(h.file_counter_done(), 2);
        assert_eq!(h.bytes_send(), 13);
        assert_eq!((h.total_file_counter(), h.total_file_size()), (0, 0));
        assert_eq!(h.active_transfers(), 0);
        assert_eq!(h.slot(args.slot).proc_id(), 0);
        assert_eq!(fsa.host(0).unwrap().file_counter_done(), 0);
        assert_eq!(std::fs::read(target.join("b")).unwrap(), b"xyz");
    }
}
