use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use afd::builder;
use afd::consts::*;
use afd::dirconfig::{DirConfig, HostConfig};
use afd::event::{EventLevel, EventLog, EventType};
use afd::supervisor::Maintenance;
use afd::{AfdConfig, AfdStatus, Fra, Fsa, WorkDir};

const LINK_MAX: i64 = 1000;

#[test]
fn danger_pause_arms_and_releases_with_hysteresis() -> Result<()> {
    let root = unique_root("danger");
    let work = WorkDir::new(&root);
    work.create_tree()?;
    let cfg = AfdConfig::default().with_max_copied_files(10);
    assert_eq!(cfg.danger_no_of_files(), 20);
    let text = format!(
        "[directory] {0}/in in\n[files]\n*\n[destination]\n[recipient]\nfile://h1{0}/out\n",
        root.display()
    );
    builder::build(&work, &cfg, &HostConfig::default(), &DirConfig::parse(&text, &cfg), 1)?;

    let fifodir = work.fifodir();
    let mut m = Maintenance::new(
        &work,
        &cfg,
        Fsa::attach_active(&fifodir)?,
        Fra::attach_active(&fifodir)?,
        AfdStatus::open_or_create(&fifodir)?,
    )
    .with_link_max(LINK_MAX);
    let pos = m.fsa().require_position("h1")?;

    m.fsa_mut().host_mut(pos)?.set_jobs_queued((LINK_MAX / 2 + 1) as u32);
    m.fsa_mut().add_tfc(pos, 21, 2100)?;
    let rep = m.tick(1000)?;
    assert_eq!(rep.jobs_in_queue, LINK_MAX / 2 + 1);
    assert_eq!(rep.danger_set, ["h1"]);
    assert_ne!(m.fsa().host(pos)?.host_status() & DANGER_PAUSE_QUEUE, 0);

    // Fewer jobs alone does not release the queue.
    m.fsa_mut().host_mut(pos)?.set_jobs_queued((LINK_MAX / 4) as u32);
    let rep = m.tick(1005)?;
    assert!(rep.danger_cleared.is_empty());
    assert_ne!(m.fsa().host(pos)?.host_status() & DANGER_PAUSE_QUEUE, 0);

    m.fsa_mut().add_tfc(pos, -11, -1100)?;
    let rep = m.tick(1010)?;
    assert_eq!(rep.danger_cleared, ["h1"]);
    assert_eq!(m.fsa().host(pos)?.host_status() & DANGER_PAUSE_QUEUE, 0);

    let events = EventLog::new(&work).read_all()?;
    let unset: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventType::DangerPauseQueueUnset && e.alias == "h1")
        .collect();
    assert_eq!(unset.len(), 1);
    assert_eq!(unset[0].level, EventLevel::Info);
    assert_eq!(EventLog::new(&work).count(EventType::DangerPauseQueueSet, "h1")?, 1);

    fs::remove_dir_all(&root)?;
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let pid = std::process::id();
    std::env::temp_dir().join(format!("afd-danger-{}-{}-{}", prefix, pid, t))
}
