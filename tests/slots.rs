use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use afd::builder;
use afd::consts::*;
use afd::dirconfig::{DirConfig, HostConfig};
use afd::fsa::slots::{acquire_slot, release_slot};
use afd::{AfdConfig, Fsa, WorkDir};

fn host_with(root: &PathBuf, allowed: usize) -> Result<(Fsa, usize)> {
    let work = WorkDir::new(root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let text = format!(
        "[directory] {0}/in in\n[files]\n*\n[destination]\n[recipient]\nfile://h1{0}/out\n",
        root.display()
    );
    let hc = HostConfig::parse(&format!("h1:h1::::{}:10\n", allowed), &cfg);
    builder::build(&work, &cfg, &hc, &DirConfig::parse(&text, &cfg), 1)?;
    let fsa = Fsa::attach_active(&work.fifodir())?;
    let pos = fsa.require_position("h1")?;
    Ok((fsa, pos))
}

fn check_invariants(fsa: &Fsa, pos: usize) -> Result<()> {
    let h = fsa.host(pos)?;
    let busy = (0..MAX_PARALLEL_JOBS).filter(|&i| h.slot(i).proc_id() > 0).count() as i32;
    assert_eq!(busy, h.active_transfers());
    assert_eq!(busy, h.live_slots());
    let limit = h.transfer_rate_limit();
    let n = h.active_transfers().max(1) as i64;
    assert_eq!(h.trl_per_process(), (limit + n - 1) / n);
    Ok(())
}

#[test]
fn random_acquire_release_keeps_counts_consistent() -> Result<()> {
    let root = unique_root("random");
    let (mut fsa, pos) = host_with(&root, 4)?;
    {
        let mut h = fsa.host_mut(pos)?;
        h.set_transfer_rate_limit(1000);
        h.recompute_trl();
    }
    check_invariants(&fsa, pos)?;

    let mut rng = oorandom::Rand32::new(0x5eed);
    let mut held: Vec<(usize, i32)> = Vec::new();
    let mut next_pid = 1000;
    for step in 0..500 {
        if held.is_empty() || rng.rand_range(0..3) > 0 {
            let start = rng.rand_range(0..MAX_PARALLEL_JOBS as u32) as usize;
            match acquire_slot(&mut fsa, pos, next_pid, 0xabc, start)? {
                Some(slot) => {
                    assert!(slot < 4, "step {}: slot {} above allowed_transfers", step, slot);
                    assert!(held.iter().all(|(s, _)| *s != slot));
                    held.push((slot, next_pid));
                    next_pid += 1;
                }
                None => assert_eq!(held.len(), 4, "step {}: refused with free slots", step),
            }
        } else {
            let k = rng.rand_range(0..held.len() as u32) as usize;
            let (slot, pid) = held.swap_remove(k);
            // A stranger cannot release someone else's slot.
            assert_eq!(release_slot(&mut fsa, pos, slot, pid + 100_000)?, None);
            assert!(release_slot(&mut fsa, pos, slot, pid)?.is_some());
        }
        check_invariants(&fsa, pos)?;
        assert_eq!(fsa.host(pos)?.active_transfers() as usize, held.len());
    }

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn single_transfer_host_never_runs_two() -> Result<()> {
    let root = unique_root("one");
    let (mut fsa, pos) = host_with(&root, 1)?;
    let s = acquire_slot(&mut fsa, pos, 11, 1, 0)?;
    assert_eq!(s, Some(0));
    assert_eq!(acquire_slot(&mut fsa, pos, 12, 1, 0)?, None);
    assert_eq!(acquire_slot(&mut fsa, pos, 12, 1, 3)?, None);
    assert!(release_slot(&mut fsa, pos, 0, 11)?.is_some());
    assert_eq!(acquire_slot(&mut fsa, pos, 12, 1, 0)?, Some(0));
    check_invariants(&fsa, pos)?;
    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn every_slot_usable_at_the_parallel_limit() -> Result<()> {
    let root = unique_root("max");
    let (mut fsa, pos) = host_with(&root, MAX_PARALLEL_JOBS)?;
    for i in 0..MAX_PARALLEL_JOBS {
        assert!(acquire_slot(&mut fsa, pos, 100 + i as i32, 1, 0)?.is_some());
    }
    assert_eq!(fsa.host(pos)?.active_transfers(), MAX_PARALLEL_JOBS as i32);
    assert_eq!(acquire_slot(&mut fsa, pos, 999, 1, 0)?, None);
    check_invariants(&fsa, pos)?;
    fs::remove_dir_all(&root)?;
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let pid = std::process::id();
    std::env::temp_dir().join(format!("afd-slots-{}-{}-{}", prefix, pid, t))
}
