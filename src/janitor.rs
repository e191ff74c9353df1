//! Orphan janitor: reconciles the outgoing spool with the job catalog and
//! the dispatcher's queue.
//!
//! Layout walked: `<root>/<job_id hex>/<dir_id hex>/<ct>_<unique>_<split>`.
//! Jobs no longer in the JID are removed as a whole. Messages the
//! dispatcher does not know are re-announced when they still hold files
//! and removed when empty.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::catalog::{Jid, JobDef};
use crate::config::AfdConfig;
use crate::consts::*;
use crate::dispatch::read_queue;
use crate::fifo::{send_command, Command, FifoReader};
use crate::fra::Fra;
use crate::message::{send_message, Envelope, MessageSink, MsgName, Originator};
use crate::paths::WorkDir;
use crate::spool::SpoolRoots;
use crate::status::{AfdStatus, Component};
use crate::util::{count_files, parse_hex_u32, rec_rmdir};

/// Where the set of messages the dispatcher holds comes from.
pub trait QueueSource {
    fn queued(&mut self) -> Result<HashSet<MsgName>>;
}

impl QueueSource for HashSet<MsgName> {
    fn queued(&mut self) -> Result<HashSet<MsgName>> {
        Ok(self.clone())
    }
}

/// Ask a running dispatcher for its queue, or read the queue file when no
/// dispatcher runs.
pub struct FdQueue<'a> {
    pub work: &'a WorkDir,
    pub status: Option<&'a AfdStatus>,
}

impl QueueSource for FdQueue<'_> {
    fn queued(&mut self) -> Result<HashSet<MsgName>> {
        let fifodir = self.work.fifodir();
        let fd_on = match self.status {
            Some(s) => s.is_running(Component::Fd)?,
            None => false,
        };
        if !fd_on {
            return Ok(read_queue(&fifodir)?.into_iter().map(|q| q.msg_name).collect());
        }
        let mut ready = FifoReader::open(&self.work.fifo(QUEUE_LIST_READY_FIFO))?;
        ready.read_commands()?;
        send_command(&self.work.fifo(FD_CMD_FIFO), Command::FlushMsgFifoDumpQueue)
            .context("ask FD for its queue")?;
        let mut got = None;
        if ready.wait(Duration::from_secs(QUEUE_LIST_READY_TIMEOUT))? {
            for c in ready.read_commands()? {
                match c {
                    Command::QueueListReady => {
                        got = Some(read_queue(&fifodir)?.into_iter().map(|q| q.msg_name).collect())
                    }
                    Command::QueueListEmpty => got = Some(HashSet::new()),
                    other => log::debug!(target: "system", "unexpected {:?} on queue list ready fifo", other),
                }
            }
        }
        if let Err(e) = send_command(&self.work.fifo(QUEUE_LIST_DONE_FIFO), Command::QueueListDone) {
            log::debug!(target: "system", "queue list done: {:#}", e);
        }
        got.ok_or_else(|| anyhow::anyhow!("FD did not hand over its queue within {}s", QUEUE_LIST_READY_TIMEOUT))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub removed_jobs: usize,
    pub requeued: usize,
    pub removed_empty: usize,
    pub skipped_dirs: usize,
    /// `(job_id, links)` of the most crowded skipped directory.
    pub max_links: Option<(u32, u64)>,
    pub timed_out: bool,
}

pub struct Janitor<'a> {
    pub spool: &'a SpoolRoots,
    pub jid: &'a Jid,
    pub fra: &'a Fra,
    pub max_check_file_dirs: u64,
    pub max_time: Duration,
}

impl<'a> Janitor<'a> {
    pub fn new(spool: &'a SpoolRoots, jid: &'a Jid, fra: &'a Fra, cfg: &AfdConfig) -> Self {
        Self {
            spool,
            jid,
            fra,
            max_check_file_dirs: cfg.max_check_file_dirs,
            max_time: Duration::from_secs(cfg.max_file_dir_check_time.max(1) as u64),
        }
    }

    /// One pass over every spool root.
    pub fn run(&self, queue: &mut dyn QueueSource, sink: &mut dyn MessageSink) -> Result<JanitorReport> {
        let queued = queue.queued()?;
        let deadline = Instant::now() + self.max_time;
        let mut rep = JanitorReport::default();
        let mount_ids = self.spool.mount_ids();
        let mut roots = vec![0u16];
        roots.extend((1..=mount_ids.len()).map(|i| i as u16));
        for spool_no in roots {
            let root = self.spool.root(spool_no).to_path_buf();
            let rd = match fs::read_dir(&root) {
                Ok(rd) => rd,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("read_dir {}", root.display())),
            };
            for e in rd {
                if Instant::now() >= deadline {
                    rep.timed_out = true;
                    break;
                }
                let e = e?;
                let name = e.file_name().to_string_lossy().into_owned();
                let Some(job_id) = parse_hex_u32(&name) else {
                    continue;
                };
                // The extra work dir links share the main root.
                if spool_no == 0 && mount_ids.contains(&job_id) {
                    continue;
                }
                let path = e.path();
                if !self.jid.contains(job_id)? {
                    rec_rmdir(&path)?;
                    log::debug!(target: "system", "removed job #{:x}: no longer in database", job_id);
                    rep.removed_jobs += 1;
                    continue;
                }
                self.check_job(&path, job_id, spool_no, &queued, sink, &mut rep)?;
            }
        }
        if rep.skipped_dirs > 0 {
            if let Some((job, links)) = rep.max_links {
                log::warn!(
                    target: "system",
                    "skipped {} spool directories with more than {} links, most in #{:x} ({})",
                    rep.skipped_dirs,
                    self.max_check_file_dirs,
                    job,
                    links
                );
            }
        }
        if rep.timed_out {
            log::info!(target: "system", "spool check stopped after {}s", self.max_time.as_secs());
        }
        Ok(rep)
    }

    fn check_job(
        &self,
        job_dir: &Path,
        job_id: u32,
        spool_no: u16,
        queued: &HashSet<MsgName>,
        sink: &mut dyn MessageSink,
        rep: &mut JanitorReport,
    ) -> Result<()> {
        let priority = match self.jid.position(job_id)? {
            Some(p) => JobDef::from_rec(&self.jid.job(p)?).priority,
            None => DEFAULT_PRIORITY,
        };
        for d in fs::read_dir(job_dir).with_context(|| format!("read_dir {}", job_dir.display()))? {
            let d = d?;
            let Some(dir_id) = parse_hex_u32(&d.file_name().to_string_lossy()) else {
                continue;
            };
            let dir_path = d.path();
            let links = fs::metadata(&dir_path)?.nlink();
            if links > self.max_check_file_dirs {
                rep.skipped_dirs += 1;
                if rep.max_links.map(|(_, l)| links > l).unwrap_or(true) {
                    rep.max_links = Some((job_id, links));
                }
                continue;
            }
            let dir_no = self.fra.position_by_id(dir_id)?;
            for m in fs::read_dir(&dir_path)? {
                let m = m?;
                let leaf = m.file_name().to_string_lossy().into_owned();
                let Some(name) = MsgName::parse_leaf(job_id, dir_id, &leaf) else {
                    continue;
                };
                if queued.contains(&name) {
                    continue;
                }
                let msg_path = m.path();
                let (files, bytes) = count_files(&msg_path, None)?;
                if files == 0 {
                    match fs::remove_dir(&msg_path) {
                        Ok(()) => {}
                        Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => rec_rmdir(&msg_path)?,
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e).with_context(|| format!("rmdir {}", msg_path.display())),
                    }
                    rep.removed_empty += 1;
                    continue;
                }
                let Some(dir_no) = dir_no else {
                    log::debug!(target: "system", "removed message {}: directory no longer configured", name);
                    rec_rmdir(&msg_path)?;
                    continue;
                };
                let env = Envelope {
                    name,
                    files_to_send: files,
                    file_size_to_send: bytes as i64,
                    dir_no: dir_no as u32,
                    priority,
                    originator: Originator::Janitor,
                    spool_no,
                };
                send_message(sink, &env)?;
                log::info!(target: "system", "re-queued message {} ({} files)", name, files);
                rep.requeued += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::dirconfig::{DirConfig, HostConfig};
    use crate::table::Access;

    #[test]
    fn requeue_remove_and_skip() {
        let root = std::env::temp_dir().join(format!("afd-janitor-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let work = WorkDir::new(&root);
        work.create_tree().unwrap();
        let text = format!(
            "[directory] {0}/in in\n[files]\n*\n[destination]\n[recipient]\nfile://h1{0}/out\n",
            root.display()
        );
        let mut cfg = AfdConfig::default();
        builder::build(&work, &cfg, &HostConfig::default(), &DirConfig::parse(&text, &cfg), 1).unwrap();
        let fifodir = work.fifodir();
        let jid = Jid::open(&fifodir, Access::Passive).unwrap();
        let fra = Fra::attach_passive(&fifodir).unwrap();
        let job = JobDef::from_rec(&jid.job(0).unwrap());
        let job_id = job.job_id();
        let out = work.outgoing();

        let full = out.join(format!("{:x}/{:x}/10_1_0", job_id, job.dir_id));
        fs::create_dir_all(&full).unwrap();
        fs::write(full.join("f"), b"abc").unwrap();
        let empty = out.join(format!("{:x}/{:x}/10_2_0", job_id, job.dir_id));
        fs::create_dir_all(&empty).unwrap();
        let queued = out.join(format!("{:x}/{:x}/10_3_0", job_id, job.dir_id));
        fs::create_dir_all(&queued).unwrap();
        fs::write(queued.join("g"), b"x").unwrap();
        let orphan = out.join("0a/01/1700000000_0001_0");
        fs::create_dir_all(&orphan).unwrap();

        let spool = SpoolRoots::single(&work);
        let mut q: HashSet<MsgName> = HashSet::new();
        q.insert(MsgName::parse_leaf(job_id, job.dir_id, "10_3_0").unwrap());
        let mut sink: Vec<Envelope> = Vec::new();
        let rep = Janitor::new(&spool, &jid, &fra, &cfg).run(&mut q, &mut sink).unwrap();
        assert_eq!((rep.removed_jobs, rep.requeued, rep.removed_empty), (1, 1, 1));
        assert!(!out.join("0a").exists());
        assert!(!empty.exists());
        assert_eq!(sink[0].files_to_send, 1);
        assert_eq!(sink[0].file_size_to_send, 3);
        assert_eq!(sink[0].originator, Originator::Janitor);

        cfg.max_check_file_dirs = 2;
        let mut sink: Vec<Envelope> = Vec::new();
        let rep = Janitor::new(&spool, &jid, &fra, &cfg).run(&mut q, &mut sink).unwrap();
        assert_eq!(rep.skipped_dirs, 1);
        assert!(sink.is_empty());
        assert_eq!(rep.max_links.map(|(j, _)| j), Some(job_id));
        fs::remove_dir_all(&root).unwrap();
    }
}
