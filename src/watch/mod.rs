//! Directory watcher (`amg`): lists every due directory, admits files
//! through the gates and masks, and turns them into spooled messages.

pub mod dupcheck;
pub mod gates;
pub mod local_opts;
pub mod mask;
pub mod msgdir;
pub mod retrieve_list;
pub mod schedule;

pub use gates::{FileInfo, Gates, Verdict};
pub use mask::MaskSet;
pub use msgdir::{MessageBuilder, OpenMsg};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::action::{ActionKind, ActionSide, Actions};
use crate::builder;
use crate::catalog::{Fmd, Jid, JobDef};
use crate::config::AfdConfig;
use crate::consts::*;
use crate::dirconfig::local_dir_of;
use crate::event::{Event, EventLevel, EventLog, EventType};
use crate::fifo::{send_command, Command, FifoReader};
use crate::fra::{time_entry, Fra, FraRegion, TimeEntry, Zone};
use crate::message::{send_message, Envelope, FifoSink, MessageSink, MsgName, Originator};
use crate::paths::WorkDir;
use crate::spool::SpoolRoots;
use crate::status::{AfdStatus, Component};
use crate::table::Access;
use crate::util::{next_unique_number, now};

use dupcheck::DupCheck;
use local_opts::{Outcome, Pending};
use retrieve_list::RetrieveList;

/// A job as the watcher needs it.
#[derive(Debug, Clone)]
pub struct WatchJob {
    pub job_id: u32,
    pub special_flag: u32,
    pub priority: u8,
    pub loptions: Vec<String>,
    pub time_entries: Vec<TimeEntry>,
}

/// Jobs sharing one `[files]` section.
#[derive(Debug, Clone)]
pub struct MaskGroup {
    pub masks: MaskSet,
    pub jobs: Vec<WatchJob>,
}

/// Mask groups per `dir_id`, in `files_group` order.
pub fn load_groups(jid: &Jid, fmd: &Fmd) -> Result<HashMap<u32, Vec<MaskGroup>>> {
    let mut keyed: HashMap<u32, Vec<(u8, MaskGroup)>> = HashMap::new();
    for pos in 0..jid.no_of_jobs()? {
        let def = JobDef::from_rec(&jid.job(pos)?);
        let fm = if def.fmd_offset >= 0 {
            Some(fmd.at(def.fmd_offset as usize)?)
        } else {
            fmd.by_id(def.file_mask_id)?
        };
        let Some(fm) = fm else {
            log::warn!(target: "receive", "job #{:x}: file mask {:x} missing", def.job_id(), def.file_mask_id);
            continue;
        };
        let job = WatchJob {
            job_id: def.job_id(),
            special_flag: def.special_flag,
            priority: def.priority,
            loptions: def.loptions.clone(),
            time_entries: def.time_entries.clone(),
        };
        let groups = keyed.entry(def.dir_id).or_default();
        match groups.iter_mut().find(|(g, _)| *g == def.files_group) {
            Some((_, mg)) => mg.jobs.push(job),
            None => groups.push((
                def.files_group,
                MaskGroup {
                    masks: MaskSet::compile(&fm.masks)?,
                    jobs: vec![job],
                },
            )),
        }
    }
    Ok(keyed
        .into_iter()
        .map(|(id, mut v)| {
            v.sort_by_key(|(g, _)| *g);
            (id, v.into_iter().map(|(_, m)| m).collect())
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files taken from the directory.
    pub files: u32,
    pub bytes: u64,
    pub messages: usize,
    pub unknown: usize,
    pub skipped: bool,
}

struct PendingMsg {
    job: Pending,
    name: MsgName,
    dir_pos: usize,
    priority: u8,
    spool_no: u16,
}

pub struct Watcher {
    work: WorkDir,
    cfg: AfdConfig,
    spool: SpoolRoots,
    fra: Fra,
    jid: Jid,
    fmd: Fmd,
    groups: HashMap<u32, Vec<MaskGroup>>,
    events: EventLog,
    actions: Actions,
    pending: Vec<PendingMsg>,
}

/// Credit the FRA queue counters and announce.
fn announce(
    fra: &mut Fra,
    sink: &mut dyn MessageSink,
    pos: usize,
    name: MsgName,
    files: u32,
    bytes: u64,
    priority: u8,
    spool_no: u16,
) -> Result<()> {
    {
        let _g = fra.lock(pos, FraRegion::Counters)?;
        let mut d = fra.dir_mut(pos)?;
        d.set_files_queued(d.files_queued().wrapping_add(files));
        d.set_bytes_in_queue(d.bytes_in_queue().wrapping_add(bytes));
    }
    let env = Envelope {
        name,
        files_to_send: files,
        file_size_to_send: bytes as i64,
        dir_no: pos as u32,
        priority,
        originator: Originator::Watcher,
        spool_no,
    };
    send_message(sink, &env)
}

fn remove_quiet(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!(target: "receive", "remove {}: {}", path.display(), e);
            false
        }
    }
}

fn mtime_of(md: &fs::Metadata) -> i64 {
    md.mtime()
}

impl Watcher {
    pub fn new(work: &WorkDir, cfg: &AfdConfig) -> Result<Self> {
        let fifodir = work.fifodir();
        let fra = Fra::attach_active(&fifodir)?;
        let jid = Jid::open(&fifodir, Access::Passive)?;
        let fmd = Fmd::open(&fifodir, Access::Passive)?;
        let groups = load_groups(&jid, &fmd)?;
        Ok(Self {
            work: work.clone(),
            cfg: cfg.clone(),
            spool: SpoolRoots::from_config(work, cfg)?,
            fra,
            jid,
            fmd,
            groups,
            events: EventLog::new(work),
            actions: Actions::new(work),
            pending: Vec::new(),
        })
    }

    pub fn fra(&self) -> &Fra {
        &self.fra
    }

    pub fn groups_of(&self, dir_id: u32) -> Option<&[MaskGroup]> {
        self.groups.get(&dir_id).map(|v| v.as_slice())
    }

    /// Follow a rebuild: new FRA generation and catalogs.
    pub fn reattach(&mut self) -> Result<bool> {
        let a = self.fra.check_reattach()?;
        let b = self.jid.check_reattach()?;
        let c = self.fmd.check_reattach()?;
        if a || b || c {
            self.groups = load_groups(&self.jid, &self.fmd)?;
            log::debug!(target: "receive", "watcher reloaded {} directories with jobs", self.groups.len());
        }
        Ok(a || b || c)
    }

    /// Scan every directory whose schedule is due.
    pub fn scan_due(&mut self, now: i64, sink: &mut dyn MessageSink) -> Result<ScanReport> {
        let mut total = ScanReport::default();
        for pos in 0..self.fra.no_of_dirs()? {
            if !schedule::is_due(&self.fra.dir(pos)?, now) {
                continue;
            }
            let r = self.scan_dir(pos, now, sink)?;
            total.files += r.files;
            total.bytes += r.bytes;
            total.messages += r.messages;
            total.unknown += r.unknown;
        }
        Ok(total)
    }

    fn dir_error(&mut self, pos: usize, now: i64, alias: &str, err: &std::io::Error) -> Result<()> {
        let latched;
        let ec;
        {
            let _g = self.fra.mapping().lock_all(pos, &[FraRegion::Status, FraRegion::Errors])?;
            let mut d = self.fra.dir_mut(pos)?;
            ec = d.error_counter() + 1;
            d.set_error_counter(ec);
            latched = ec >= d.max_errors() && d.dir_flag() & DIR_ERROR_SET == 0;
            if latched {
                d.set_dir_flag(d.dir_flag() | DIR_ERROR_SET);
                d.set_dir_status(DIR_ERROR_STATUS);
            }
        }
        log::warn!(target: "receive", "{}: cannot read directory ({}), error counter {}", alias, err, ec);
        if latched {
            self.events.emit(Event::dir(
                now,
                EventType::DirErrorStart,
                alias,
                EventLevel::Error,
                err.to_string(),
            ));
            self.actions.fire(ActionSide::Source, ActionKind::Start, alias);
        }
        Ok(())
    }

    fn dir_ok(&mut self, pos: usize, now: i64, alias: &str) -> Result<()> {
        let cleared;
        {
            let _g = self.fra.mapping().lock_all(pos, &[FraRegion::Status, FraRegion::Errors])?;
            let mut d = self.fra.dir_mut(pos)?;
            d.set_error_counter(0);
            cleared = d.dir_flag() & DIR_ERROR_SET != 0;
            if cleared {
                d.set_dir_flag(d.dir_flag() & !DIR_ERROR_SET);
                d.set_dir_status(NORMAL_STATUS);
            }
        }
        if cleared {
            log::info!(target: "receive", "{}: directory readable again", alias);
            self.events.emit(Event::dir(
                now,
                EventType::DirErrorEnd,
                alias,
                EventLevel::Info,
                "directory readable",
            ));
            self.actions.fire(ActionSide::Source, ActionKind::Stop, alias);
        }
        Ok(())
    }

    fn list(path: &Path, accept_dot: bool) -> std::io::Result<(Vec<FileInfo>, Vec<FileInfo>)> {
        let mut files = Vec::new();
        let mut locked = Vec::new();
        for e in fs::read_dir(path)? {
            let e = match e {
                Ok(e) => e,
                Err(err) => {
                    log::warn!(target: "receive", "{}: {}", path.display(), err);
                    continue;
                }
            };
            if let Ok(ft) = e.file_type() {
                if ft.is_dir() {
                    continue;
                }
            }
            let name = e.file_name().to_string_lossy().into_owned();
            let md = match e.metadata() {
                Ok(m) => m,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    log::warn!(target: "receive", "stat {}/{}: {}", path.display(), name, err);
                    continue;
                }
            };
            if !md.is_file() {
                continue;
            }
            let fi = FileInfo {
                name,
                size: md.len(),
                mtime: mtime_of(&md),
            };
            if fi.name.starts_with('.') && !accept_dot {
                locked.push(fi);
            } else {
                files.push(fi);
            }
        }
        files.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.name.cmp(&b.name)));
        Ok((files, locked))
    }

    /// One pass over directory `pos`.
    pub fn scan_dir(&mut self, pos: usize, now: i64, sink: &mut dyn MessageSink) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let d = self.fra.dir(pos)?;
        let alias = d.dir_alias();
        let dir_id = d.dir_id();
        let dir_flag = d.dir_flag();
        if dir_flag & (ALL_DISABLED | DIR_DISABLED | DIR_STOPPED) != 0 || !d.is_local() {
            report.skipped = true;
            return Ok(report);
        }
        let path = PathBuf::from(local_dir_of(&d.url()));
        let gates = Gates::from_dir(&d);
        let accept_dot = d.dir_options() & ACCEPT_DOT_FILES != 0;
        let remove = d.remove() != 0;
        let stupid_mode = d.stupid_mode();
        let delete_flag = d.delete_files_flag();
        let report_unknown = d.report_unknown_files() != 0;
        let unknown_age = d.unknown_file_time() as i64 * 3600;
        let locked_age = d.locked_file_time() as i64 * 3600;
        let unreadable_age = d.unreadable_file_time() as i64 * 3600;
        let max_files = d.max_copied_files();
        let max_size = d.max_copied_file_size();
        let same_fs = dir_flag & IN_SAME_FILESYSTEM != 0;
        let spool_no = SpoolRoots::spool_no(d.extra_work_dir());
        let tz = Zone::parse(&d.timezone()).unwrap_or(Zone::Local);
        let dup_flag = d.dup_check_flag();
        let dup_timeout = d.dup_check_timeout();
        let ls_alias = d.ls_data_alias();
        let next = schedule::next_check(&d, now, self.cfg.rescan_time);

        let (files, locked) = match Self::list(&path, accept_dot) {
            Ok(x) => x,
            Err(e) => {
                self.dir_error(pos, now, &alias, &e)?;
                self.fra.dir_mut(pos)?.set_next_check_time(next);
                return Ok(report);
            }
        };
        self.dir_ok(pos, now, &alias)?;

        if delete_flag & OLD_LOCKED_FILES != 0 {
            for f in &locked {
                if now - f.mtime > locked_age && remove_quiet(&path.join(&f.name)) {
                    log::info!(target: "receive", "{}: removed old locked file {}", alias, f.name);
                }
            }
        }

        if !gates.wait_for_satisfied(files.iter().map(|f| f.name.as_str())) {
            log::debug!(target: "receive", "{}: waiting for {}", alias, gates.wait_for);
            self.fra.dir_mut(pos)?.set_next_check_time(next);
            return Ok(report);
        }

        let groups = self.groups.get(&dir_id).cloned().unwrap_or_default();
        let mut rl = if remove {
            None
        } else {
            let p = RetrieveList::path_for(&self.work.ls_data_dir(), &ls_alias);
            let mut rl = RetrieveList::load(&p)?;
            rl.begin();
            Some(rl)
        };
        let dc = DupCheck {
            work: &self.work,
            id: dir_id,
            flag: dup_flag,
            timeout: dup_timeout,
        };
        let spool = self.spool.clone();
        let creation_time = now;
        let unique = next_unique_number();
        let mut builders: HashMap<u32, (MessageBuilder, u8, u32, Vec<String>)> = HashMap::new();
        let mut closed: Vec<(OpenMsg, u8, u32, Vec<String>)> = Vec::new();
        let mut left_files = 0u32;
        let mut left_bytes = 0u64;

        for f in &files {
            let src = path.join(&f.name);
            if gates.admit(f, &src, now) != Verdict::Take {
                left_files += 1;
                left_bytes += f.size;
                continue;
            }
            let matched: Vec<&MaskGroup> = groups.iter().filter(|g| g.masks.matches(&f.name)).collect();
            if matched.is_empty() {
                report.unknown += 1;
                if delete_flag & UNKNOWN_FILES != 0 && now - f.mtime > unknown_age {
                    if remove_quiet(&src) {
                        log::info!(target: "receive", "{}: removed unknown file {}", alias, f.name);
                    }
                    continue;
                }
                if report_unknown {
                    log::info!(target: "receive", "{}: unknown file {}", alias, f.name);
                }
                left_files += 1;
                left_bytes += f.size;
                continue;
            }
            if let Err(e) = fs::File::open(&src) {
                match e.kind() {
                    ErrorKind::NotFound => continue,
                    ErrorKind::PermissionDenied => {
                        if delete_flag & UNREADABLE_FILES != 0 && now - f.mtime > unreadable_age {
                            remove_quiet(&src);
                            log::info!(target: "receive", "{}: removed unreadable file {}", alias, f.name);
                        } else {
                            log::warn!(target: "receive", "{}: cannot read {}", alias, f.name);
                            left_files += 1;
                            left_bytes += f.size;
                        }
                        continue;
                    }
                    _ => {
                        log::warn!(target: "receive", "{}: open {}: {}", alias, f.name, e);
                        continue;
                    }
                }
            }
            if let Some(rl) = rl.as_mut() {
                if !rl.take(f, stupid_mode) {
                    left_files += 1;
                    left_bytes += f.size;
                    continue;
                }
            }
            if dc.reject(&src, &f.name, now)? {
                continue;
            }

            let mut placed = false;
            for g in &matched {
                for job in &g.jobs {
                    if job.special_flag & TIME_NO_COLLECT != 0 && !time_entry::any_matches(&job.time_entries, now, &tz)
                    {
                        continue;
                    }
                    let entry = builders.entry(job.job_id).or_insert_with(|| {
                        let link = same_fs && job.special_flag & DO_NOT_LINK_FILES == 0;
                        (
                            MessageBuilder::new(
                                &spool,
                                spool_no,
                                job.job_id,
                                dir_id,
                                creation_time,
                                unique,
                                max_files,
                                max_size,
                                link,
                            ),
                            job.priority,
                            job.special_flag,
                            job.loptions.clone(),
                        )
                    });
                    match entry.0.add(&src, &f.name, f.size) {
                        Ok(Some(m)) => closed.push((m, entry.1, entry.2, entry.3.clone())),
                        Ok(None) => {}
                        Err(e) => {
                            log::warn!(target: "receive", "{}: {:#}", alias, e);
                            continue;
                        }
                    }
                    placed = true;
                }
            }
            if !placed {
                left_files += 1;
                left_bytes += f.size;
                continue;
            }
            report.files += 1;
            report.bytes += f.size;
            if remove {
                remove_quiet(&src);
            } else {
                left_files += 1;
                left_bytes += f.size;
            }
        }

        let mut split_happened = false;
        for (_, (b, prio, flag, lopts)) in builders {
            split_happened |= b.split_happened;
            if let Some(m) = b.finish() {
                closed.push((m, prio, flag, lopts));
            }
        }
        for (m, prio, flag, lopts) in closed {
            if self.release(pos, m, prio, flag, &lopts, spool_no, sink)? {
                report.messages += 1;
            }
        }
        if let Some(mut rl) = rl {
            rl.finish()?;
        }

        {
            let _g = self.fra.mapping().lock_all(pos, &[FraRegion::Counters, FraRegion::Status])?;
            let mut d = self.fra.dir_mut(pos)?;
            d.set_files_received(d.files_received().wrapping_add(report.files));
            d.set_bytes_received(d.bytes_received().wrapping_add(report.bytes));
            d.set_files_in_dir(left_files);
            d.set_bytes_in_dir(left_bytes);
            let mut flag = d.dir_flag();
            if split_happened {
                flag |= MAX_COPIED;
            } else {
                flag &= !MAX_COPIED;
            }
            if d.files_queued() > 0 {
                flag |= FILES_IN_QUEUE;
            } else {
                flag &= !FILES_IN_QUEUE;
            }
            d.set_dir_flag(flag);
            d.set_last_retrieval(now);
            d.set_next_check_time(next);
            if let Ok(md) = fs::metadata(&path) {
                d.set_dir_mtime(md.mtime());
            }
        }
        if report.files > 0 {
            log::info!(
                target: "receive",
                "{}: {} files ({} bytes) in {} messages",
                alias,
                report.files,
                report.bytes,
                report.messages
            );
        }
        Ok(report)
    }

    /// Apply local options and announce. `false` when nothing was sent yet.
    #[allow(clippy::too_many_arguments)]
    fn release(
        &mut self,
        pos: usize,
        m: OpenMsg,
        priority: u8,
        special_flag: u32,
        loptions: &[String],
        spool_no: u16,
        sink: &mut dyn MessageSink,
    ) -> Result<bool> {
        let outcome = if loptions.is_empty() {
            Outcome::Send {
                files: m.files,
                bytes: m.bytes,
            }
        } else {
            local_opts::apply(&m.dir, loptions, special_flag)?
        };
        match outcome {
            Outcome::Send { files, bytes } => {
                announce(&mut self.fra, sink, pos, m.name, files, bytes, priority, spool_no)?;
                Ok(true)
            }
            Outcome::Discard => {
                let _ = fs::remove_dir(&m.dir);
                log::debug!(target: "receive", "message {} discarded by local options", m.name);
                Ok(false)
            }
            Outcome::Pending(p) => {
                self.pending.push(PendingMsg {
                    job: p,
                    name: m.name,
                    dir_pos: pos,
                    priority,
                    spool_no,
                });
                Ok(false)
            }
        }
    }

    /// Announce messages whose background local options have finished.
    pub fn poll_pending(&mut self, sink: &mut dyn MessageSink) -> Result<usize> {
        let mut sent = 0;
        let mut still = Vec::with_capacity(self.pending.len());
        for mut p in std::mem::take(&mut self.pending) {
            match p.job.poll()? {
                None => still.push(p),
                Some(Outcome::Send { files, bytes }) => {
                    announce(&mut self.fra, sink, p.dir_pos, p.name, files, bytes, p.priority, p.spool_no)?;
                    sent += 1;
                }
                Some(Outcome::Discard) => {
                    let _ = fs::remove_dir(&p.job.msg_dir);
                }
                Some(Outcome::Pending(next)) => {
                    p.job = next;
                    still.push(p);
                }
            }
        }
        self.pending = still;
        Ok(sent)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn config_mtimes(work: &WorkDir) -> Vec<Option<SystemTime>> {
    [DIR_CONFIG_FILE, HOST_CONFIG_FILE]
        .iter()
        .map(|f| fs::metadata(work.etc_file(f)).and_then(|m| m.modified()).ok())
        .collect()
}

fn rebuild(work: &WorkDir, cfg: &AfdConfig) -> Result<()> {
    let r = builder::reread(work, cfg).context("rebuild from DIR_CONFIG/HOST_CONFIG")?;
    for line in &r.rejected {
        log::warn!(target: "system", "{}", line);
    }
    if let Err(e) = send_command(&work.fifo(FD_CMD_FIFO), Command::CheckFsaEntries) {
        log::debug!(target: "system", "FD not listening: {:#}", e);
    }
    Ok(())
}

/// `amg` main loop. Returns on `SHUTDOWN`.
pub fn run(work: &WorkDir, cfg: &AfdConfig) -> Result<()> {
    let fifodir = work.fifodir();
    rebuild(work, cfg)?;
    let mut status = AfdStatus::open_or_create(&fifodir)?;
    status.set_pid(Component::Amg, std::process::id() as i32)?;
    status.set_state(Component::Amg, ON)?;

    let mut w = Watcher::new(work, cfg)?;
    let mut sink = FifoSink::open(&fifodir)?;
    let mut cmd = FifoReader::open(&work.fifo(AMG_CMD_FIFO))?;
    let mut mtimes = config_mtimes(work);
    log::info!(target: "system", "AMG started, {} directories", w.fra().no_of_dirs()?);

    loop {
        let mut reload = false;
        if cmd.wait(Duration::from_secs(cfg.rescan_time.max(1) as u64))? {
            for c in cmd.read_commands()? {
                match c {
                    Command::Shutdown => {
                        status.set_state(Component::Amg, OFF)?;
                        log::info!(target: "system", "AMG shutting down, {} messages still pending", w.pending());
                        return Ok(());
                    }
                    Command::RereadConfig | Command::CheckFsaEntries => reload = true,
                    other => log::debug!(target: "system", "amg: ignoring {:?}", other),
                }
            }
        }
        let m = config_mtimes(work);
        if m != mtimes {
            mtimes = m;
            reload = true;
        }
        if reload {
            match rebuild(work, cfg) {
                Ok(()) => {
                    status.set_last_reread(now())?;
                }
                Err(e) => log::error!(target: "system", "{:#}", e),
            }
        }
        w.reattach()?;
        let t = now();
        w.scan_due(t, &mut sink)?;
        w.poll_pending(&mut sink)?;
    }
}
