use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use afd::builder;
use afd::consts::*;
use afd::dirconfig::{DirConfig, HostConfig};
use afd::{AfdConfig, Fsa, WorkDir};

fn dir_config(root: &PathBuf, hosts: &[&str]) -> String {
    let mut s = format!("[directory] {}/in in\n[files]\n*\n[destination]\n[recipient]\n", root.display());
    for h in hosts {
        s.push_str(&format!("file://{}{}/out/{}\n", h, root.display(), h));
    }
    s
}

#[test]
fn reload_with_identical_config_keeps_counters() -> Result<()> {
    let root = unique_root("same");
    let work = WorkDir::new(&root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let hc = HostConfig::parse("h1:h1.example::::2:5\n", &cfg);
    let dc = DirConfig::parse(&dir_config(&root, &["h1"]), &cfg);

    let first = builder::build(&work, &cfg, &hc, &dc, 1)?;
    {
        let mut fsa = Fsa::attach_active(&work.fifodir())?;
        let pos = fsa.require_position("h1")?;
        fsa.add_tfc(pos, 7, 42)?;
        let mut h = fsa.host_mut(pos)?;
        h.set_error_counter(2);
        h.set_error_history(&[3, 9, 0, 0, 0]);
    }

    let second = builder::build(&work, &cfg, &hc, &dc, 1)?;
    assert_eq!(second.fsa_generation, first.fsa_generation + 1);
    assert_eq!(second.fra_generation, first.fra_generation + 1);

    let fsa = Fsa::attach_passive(&work.fifodir())?;
    assert_eq!(fsa.generation(), Some(second.fsa_generation));
    let h = fsa.host(fsa.require_position("h1")?)?;
    assert_eq!(h.total_file_counter(), 7);
    assert_eq!(h.total_file_size(), 42);
    assert_eq!(h.error_counter(), 2);
    assert_eq!(h.error_history(), [3, 9, 0, 0, 0]);
    assert_eq!(h.allowed_transfers(), 2);
    assert_eq!(h.max_errors(), 5);

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn counters_follow_their_alias_across_reordering() -> Result<()> {
    let root = unique_root("order");
    let work = WorkDir::new(&root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let dc = DirConfig::parse(&dir_config(&root, &["a", "b", "c"]), &cfg);

    builder::build(&work, &cfg, &HostConfig::parse("a\nb\nc\n", &cfg), &dc, 1)?;
    {
        let mut fsa = Fsa::attach_active(&work.fifodir())?;
        for (alias, n) in [("a", 1), ("b", 2), ("c", 3)] {
            let pos = fsa.require_position(alias)?;
            fsa.add_tfc(pos, n, n as i64 * 100)?;
            fsa.host_mut(pos)?.push_error_history(n as u8);
        }
    }

    builder::build(&work, &cfg, &HostConfig::parse("c\n[grp]\na\nb\n", &cfg), &dc, 1)?;
    let fsa = Fsa::attach_passive(&work.fifodir())?;
    assert_eq!(fsa.host(0)?.host_alias(), "c");
    assert!(fsa.host(1)?.is_group_header());
    for (alias, n) in [("a", 1), ("b", 2), ("c", 3)] {
        let h = fsa.host(fsa.require_position(alias)?)?;
        assert_eq!(h.total_file_counter(), n, "{}", alias);
        assert_eq!(h.total_file_size(), n as i64 * 100, "{}", alias);
        assert_eq!(h.error_history()[0], n as u8, "{}", alias);
    }

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn host_without_recipients_keeps_queued_counters() -> Result<()> {
    let root = unique_root("orphan");
    let work = WorkDir::new(&root);
    work.create_tree()?;
    let cfg = AfdConfig::default();

    builder::build(&work, &cfg, &HostConfig::default(), &DirConfig::parse(&dir_config(&root, &["h1", "h2"]), &cfg), 1)?;
    {
        let mut fsa = Fsa::attach_active(&work.fifodir())?;
        let pos = fsa.require_position("h2")?;
        fsa.add_tfc(pos, 4, 400)?;
    }

    let r = builder::build(&work, &cfg, &HostConfig::default(), &DirConfig::parse(&dir_config(&root, &["h1"]), &cfg), 2)?;
    assert_eq!(r.retained_hosts, ["h2"]);
    let fsa = Fsa::attach_passive(&work.fifodir())?;
    let h = fsa.host(fsa.require_position("h2")?)?;
    assert_eq!((h.total_file_counter(), h.total_file_size()), (4, 400));
    assert_ne!(h.special_flag() & HOST_NOT_IN_DIR_CONFIG, 0);
    drop(fsa);

    // Once drained and no longer configured, the host goes away.
    {
        let mut fsa = Fsa::attach_active(&work.fifodir())?;
        let pos = fsa.require_position("h2")?;
        fsa.add_tfc(pos, -4, -400)?;
    }
    let r = builder::build(&work, &cfg, &HostConfig::default(), &DirConfig::parse(&dir_config(&root, &["h1"]), &cfg), 3)?;
    assert!(r.retained_hosts.is_empty());
    let fsa = Fsa::attach_passive(&work.fifodir())?;
    assert!(fsa.position("h2")?.is_none());

    fs::remove_dir_all(&root)?;
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let pid = std::process::id();
    std::env::temp_dir().join(format!("afd-reload-{}-{}-{}", prefix, pid, t))
}
