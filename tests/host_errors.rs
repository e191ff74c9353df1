use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use afd::action::{ActionKind, ActionSide, Actions};
use afd::builder;
use afd::consts::*;
use afd::dirconfig::{DirConfig, HostConfig};
use afd::event::{EventLog, EventType};
use afd::exit::CONNECT_ERROR;
use afd::host_state::{check_warn_time, record_error, record_success, Notify};
use afd::{AfdConfig, Fsa, WorkDir};

fn setup(root: &Path, host_line: &str) -> Result<(WorkDir, Fsa, usize)> {
    let work = WorkDir::new(root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let text = format!(
        "[directory] {0}/in in\n[files]\n*\n[destination]\n[recipient]\nfile://h1{0}/out\n",
        root.display()
    );
    builder::build(&work, &cfg, &HostConfig::parse(host_line, &cfg), &DirConfig::parse(&text, &cfg), 1)?;
    let fsa = Fsa::attach_active(&work.fifodir())?;
    let pos = fsa.require_position("h1")?;
    Ok((work, fsa, pos))
}

/// A hook that appends its action name to `log`.
fn install_hook(actions: &Actions, kind: ActionKind, log: &Path) -> Result<()> {
    let hook = actions.hook_path(ActionSide::Target, kind, "h1");
    fs::write(&hook, format!("#!/bin/sh\necho \"$1 $2\" >> {}\n", log.display()))?;
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn hook_lines(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn max_errors_pauses_queue_until_success() -> Result<()> {
    let root = unique_root("pause");
    let (work, mut fsa, pos) = setup(&root, "h1:h1::::1:3\n")?;
    let events = EventLog::new(&work);
    let actions = Actions::new(&work);
    let n = Notify {
        events: &events,
        actions: &actions,
    };

    let mut starts = 0;
    for i in 0..3 {
        let out = record_error(&mut fsa, pos, CONNECT_ERROR, 100 + i, &n)?;
        if out.error_start {
            starts += 1;
        }
    }
    assert_eq!(starts, 1);
    let h = fsa.host(pos)?;
    assert_eq!(h.error_counter(), 3);
    assert_ne!(h.host_status() & AUTO_PAUSE_QUEUE, 0);
    assert_eq!(h.error_history()[0], CONNECT_ERROR as u8);
    assert_eq!(h.first_error_time(), 100);
    assert_eq!(events.count(EventType::ErrorStart, "h1")?, 1);

    let out = record_success(&mut fsa, pos, None, 200, &n)?;
    assert!(out.errors_cleared);
    let h = fsa.host(pos)?;
    assert_eq!(h.host_status() & (AUTO_PAUSE_QUEUE | PENDING_ERRORS), 0);
    assert_eq!(h.error_counter(), 0);
    assert_eq!(h.last_connection(), 200);
    assert_eq!(events.count(EventType::ErrorEnd, "h1")?, 1);

    // A second clean transfer is not another error end.
    let out = record_success(&mut fsa, pos, None, 210, &n)?;
    assert!(!out.errors_cleared);
    assert_eq!(events.count(EventType::ErrorEnd, "h1")?, 1);

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn warn_time_fires_hooks_once_each_way() -> Result<()> {
    let root = unique_root("warn");
    let (work, mut fsa, pos) = setup(&root, "h1\n")?;
    let events = EventLog::new(&work);
    let actions = Actions::new(&work);
    let calls = root.join("hooks.log");
    install_hook(&actions, ActionKind::Warn, &calls)?;
    install_hook(&actions, ActionKind::StopWarn, &calls)?;
    let n = Notify {
        events: &events,
        actions: &actions,
    };

    {
        let mut h = fsa.host_mut(pos)?;
        h.set_warn_time(60);
        h.set_last_connection(1000);
    }
    assert!(!check_warn_time(&mut fsa, pos, 1060, &n)?);
    assert!(check_warn_time(&mut fsa, pos, 1061, &n)?);
    assert_ne!(fsa.host(pos)?.host_status() & HOST_WARN_TIME_REACHED, 0);
    assert!(!check_warn_time(&mut fsa, pos, 1100, &n)?);
    assert_eq!(hook_lines(&calls), ["h1 warn"]);
    assert_eq!(events.count(EventType::WarnTimeSet, "h1")?, 1);

    let out = record_success(&mut fsa, pos, None, 1200, &n)?;
    assert!(out.warn_cleared);
    assert_eq!(fsa.host(pos)?.host_status() & HOST_WARN_TIME_REACHED, 0);
    assert_eq!(hook_lines(&calls), ["h1 warn", "h1 stop_warn"]);
    assert_eq!(events.count(EventType::WarnTimeUnset, "h1")?, 1);

    fs::remove_dir_all(&root)?;
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let pid = std::process::id();
    std::env::temp_dir().join(format!("afd-host-{}-{}-{}", prefix, pid, t))
}
