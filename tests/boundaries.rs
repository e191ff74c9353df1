use anyhow::Result;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use afd::builder;
use afd::catalog::{Jid, JobDef};
use afd::consts::*;
use afd::dirconfig::{DirConfig, HostConfig};
use afd::janitor::Janitor;
use afd::message::{Envelope, MsgName};
use afd::spool::SpoolRoots;
use afd::table::Access;
use afd::watch::{schedule, Watcher};
use afd::{AfdConfig, Fra, WorkDir};

struct Capture {
    lines: Mutex<Vec<(log::Level, String)>>,
}

impl log::Log for Capture {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Ok(mut l) = self.lines.lock() {
            l.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture {
    lines: Mutex::new(Vec::new()),
};

fn captured(level: log::Level, needle: &str) -> usize {
    CAPTURE
        .lines
        .lock()
        .map(|l| l.iter().filter(|(lv, s)| *lv == level && s.contains(needle)).count())
        .unwrap_or(0)
}

fn build_with(root: &PathBuf, dir_options: &str) -> Result<(WorkDir, AfdConfig)> {
    let work = WorkDir::new(root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let text = format!(
        "[directory] {0}/in in\n[dir options]\n{1}\n[files]\n*\n[destination]\n[recipient]\nfile://h1{0}/out\n",
        root.display(),
        dir_options
    );
    builder::build(&work, &cfg, &HostConfig::default(), &DirConfig::parse(&text, &cfg), 1)?;
    Ok((work, cfg))
}

/// Drop the same file twice, scanning after each; returns the messages sent.
fn scan_same_file_twice(root: &PathBuf, work: &WorkDir, cfg: &AfdConfig) -> Result<usize> {
    let mut w = Watcher::new(work, cfg)?;
    let mut sink: Vec<Envelope> = Vec::new();
    for t in [1000, 1010] {
        fs::write(root.join("in").join("report.txt"), b"same content")?;
        w.scan_dir(0, t, &mut sink)?;
    }
    Ok(sink.len())
}

#[test]
fn zero_dupcheck_timeout_disables_the_check() -> Result<()> {
    let root = unique_root("dup0");
    let (work, cfg) = build_with(&root, "dupcheck 0")?;
    assert_eq!(Fra::attach_passive(&work.fifodir())?.dir(0)?.dup_check_timeout(), 0);
    assert_eq!(scan_same_file_twice(&root, &work, &cfg)?, 2);
    fs::remove_dir_all(&root)?;

    let root = unique_root("dup60");
    let (work, cfg) = build_with(&root, "dupcheck 3600")?;
    assert_eq!(scan_same_file_twice(&root, &work, &cfg)?, 1);
    assert!(!root.join("in").join("report.txt").exists());
    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn externally_scheduled_dir_is_never_due() -> Result<()> {
    let root = unique_root("ext");
    let (work, cfg) = build_with(&root, "time external")?;
    fs::write(root.join("in").join("waiting"), b"x")?;

    let mut w = Watcher::new(&work, &cfg)?;
    let d = w.fra().dir(0)?;
    assert_eq!(d.next_check_time(), EXTERNAL_SCHEDULE);
    assert!(!schedule::is_due(&d, EXTERNAL_SCHEDULE - 1));
    assert_eq!(schedule::next_check(&d, 5000, 60), EXTERNAL_SCHEDULE);
    drop(d);

    let mut sink: Vec<Envelope> = Vec::new();
    let r = w.scan_due(5000, &mut sink)?;
    assert_eq!((r.files, r.messages), (0, 0));
    assert!(sink.is_empty());
    assert!(root.join("in").join("waiting").exists());

    // A direct scan still works and keeps the schedule external.
    w.scan_dir(0, 5000, &mut sink)?;
    assert_eq!(sink.len(), 1);
    assert_eq!(w.fra().dir(0)?.next_check_time(), EXTERNAL_SCHEDULE);

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn crowded_spool_dir_is_skipped_and_logged_once() -> Result<()> {
    let _ = log::set_logger(&CAPTURE);
    log::set_max_level(log::LevelFilter::Debug);
    let root = unique_root("links");
    let (work, cfg) = build_with(&root, "warn time 0")?;
    let cfg = cfg.with_max_check_file_dirs(3);
    let jid = Jid::open(&work.fifodir(), Access::Passive)?;
    let fra = Fra::attach_passive(&work.fifodir())?;
    let job = JobDef::from_rec(&jid.job(0)?);
    let base = work.outgoing().join(format!("{:x}/{:x}", job.job_id(), job.dir_id));
    for i in 1..=4 {
        let m = base.join(format!("1700000000_{:x}_0", i));
        fs::create_dir_all(&m)?;
        fs::write(m.join("f"), b"x")?;
    }

    let spool = SpoolRoots::single(&work);
    let mut queue: HashSet<MsgName> = HashSet::new();
    let mut sink: Vec<Envelope> = Vec::new();
    let rep = Janitor::new(&spool, &jid, &fra, &cfg).run(&mut queue, &mut sink)?;
    assert_eq!(rep.skipped_dirs, 1);
    assert!(matches!(rep.max_links, Some((j, l)) if j == job.job_id() && l > 3));
    assert!(sink.is_empty());
    assert_eq!(captured(log::Level::Warn, "spool directories with more than 3 links"), 1);
    assert_eq!(fs::read_dir(&base)?.count(), 4);

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn unknown_files_are_removed_only_when_old() -> Result<()> {
    let root = unique_root("unknown");
    let work = WorkDir::new(&root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let text = format!(
        "[directory] {0}/in in\n[dir options]\ndelete unknown files 2\n[files]\n*.grib\n[destination]\n[recipient]\nfile://h1{0}/out\n",
        root.display()
    );
    builder::build(&work, &cfg, &HostConfig::default(), &DirConfig::parse(&text, &cfg), 1)?;
    let now = afd::util::now();
    let src = root.join("in");
    for n in ["old.txt", "new.txt", "a.grib"] {
        fs::write(src.join(n), b"x")?;
    }
    filetime::set_file_mtime(src.join("old.txt"), filetime::FileTime::from_unix_time(now - 3 * 3600, 0))?;

    let mut w = Watcher::new(&work, &cfg)?;
    let mut sink: Vec<Envelope> = Vec::new();
    let r = w.scan_dir(0, now, &mut sink)?;
    assert_eq!(r.files, 1);
    assert_eq!(r.unknown, 2);
    assert!(!src.join("old.txt").exists());
    assert!(src.join("new.txt").exists());
    assert!(!src.join("a.grib").exists());

    fs::remove_dir_all(&root)?;
    Ok(())
}

fn inode(p: &std::path::Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(p)?.ino())
}

#[test]
fn foreign_filesystem_dir_is_copied_not_linked() -> Result<()> {
    let root = unique_root("xdev");
    let work = WorkDir::new(&root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let text = format!(
        "[directory] {0}/in in\n[dir options]\ndo not remove\n[files]\n*\n[destination]\n[recipient]\nfile://h1{0}/out\n",
        root.display()
    );
    let dc = DirConfig::parse(&text, &cfg);
    let src = root.join("in");

    // A spool on no known device shares a filesystem with nothing.
    let elsewhere = SpoolRoots::single(&work).with_main_device(None);
    builder::build_with(&work, &cfg, &HostConfig::default(), &dc, 1, &elsewhere)?;
    assert_eq!(Fra::attach_passive(&work.fifodir())?.dir(0)?.dir_flag() & IN_SAME_FILESYSTEM, 0);
    fs::write(src.join("a"), b"payload")?;
    let mut sink: Vec<Envelope> = Vec::new();
    Watcher::new(&work, &cfg)?.scan_dir(0, 1000, &mut sink)?;
    assert_eq!(sink.len(), 1);
    let spooled = SpoolRoots::single(&work).message_dir(sink[0].spool_no, &sink[0].name).join("a");
    assert_eq!(fs::read(&spooled)?, b"payload");
    assert_ne!(inode(&spooled)?, inode(&src.join("a"))?);

    // Same filesystem again: the next file is hardlinked.
    builder::build(&work, &cfg, &HostConfig::default(), &dc, 1)?;
    assert_ne!(Fra::attach_passive(&work.fifodir())?.dir(0)?.dir_flag() & IN_SAME_FILESYSTEM, 0);
    fs::write(src.join("b"), b"second")?;
    let mut sink: Vec<Envelope> = Vec::new();
    Watcher::new(&work, &cfg)?.scan_dir(0, 2000, &mut sink)?;
    let linked = sink
        .iter()
        .map(|e| SpoolRoots::single(&work).message_dir(e.spool_no, &e.name).join("b"))
        .find(|p| p.exists())
        .expect("b spooled");
    assert_eq!(inode(&linked)?, inode(&src.join("b"))?);

    fs::remove_dir_all(&root)?;
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let pid = std::process::id();
    std::env::temp_dir().join(format!("afd-bound-{}-{}-{}", prefix, pid, t))
}
