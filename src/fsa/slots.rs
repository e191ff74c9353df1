//! Connection slot bookkeeping under the CON lock.

use anyhow::Result;

use super::{Fsa, FsaRegion};
use crate::consts::*;

/// Claim a free slot of host `pos` for the process returned by `spawn`.
///
/// The slot search starts at `start` and wraps (round-robin). `spawn` is
/// called with the slot index while CON is held; its pid is written into
/// the slot, `active_transfers` is incremented and `trl_per_process`
/// recomputed. Returns `None` when every usable slot is busy.
pub fn acquire_with<F>(
    fsa: &mut Fsa,
    pos: usize,
    job_id: u32,
    start: usize,
    spawn: F,
) -> Result<Option<(usize, i32)>>
where
    F: FnOnce(usize) -> Result<i32>,
{
    let _con = fsa.lock(pos, FsaRegion::Con)?;
    let usable = fsa.host(pos)?.usable_slots();
    if usable == 0 {
        return Ok(None);
    }
    let mut found = None;
    {
        let h = fsa.host(pos)?;
        if h.active_transfers() >= h.allowed_transfers() {
            return Ok(None);
        }
        for k in 0..usable {
            let i = (start + k) % usable;
            if h.slot(i).is_free() {
                found = Some(i);
                break;
            }
        }
    }
    let slot = match found {
        Some(s) => s,
        None => return Ok(None),
    };
    let pid = spawn(slot)?;
    let mut h = fsa.host_mut(pos)?;
    {
        let mut s = h.slot_mut(slot);
        s.clear();
        s.set_proc_id(pid);
        s.set_job_id(job_id);
        s.set_connect_status(CONNECTING);
    }
    h.set_active_transfers(h.active_transfers() + 1);
    h.set_connections(h.connections().wrapping_add(1));
    h.recompute_trl();
    Ok(Some((slot, pid)))
}

/// Claim a slot for an already known pid.
pub fn acquire_slot(fsa: &mut Fsa, pos: usize, pid: i32, job_id: u32, start: usize) -> Result<Option<usize>> {
    Ok(acquire_with(fsa, pos, job_id, start, |_| Ok(pid))?.map(|(s, _)| s))
}

/// Release `slot` if it still belongs to `pid`. Decrements
/// `active_transfers` (clamped at zero) and recomputes `trl_per_process`.
/// Returns the slot's `connect_status` before release, or `None` if the
/// slot was not owned by `pid`.
pub fn release_slot(fsa: &mut Fsa, pos: usize, slot: usize, pid: i32) -> Result<Option<u8>> {
    let _con = fsa.lock(pos, FsaRegion::Con)?;
    let mut h = fsa.host_mut(pos)?;
    if slot >= MAX_PARALLEL_JOBS || h.slot(slot).proc_id() != pid {
        return Ok(None);
    }
    let status = h.slot(slot).connect_status();
    let unusable = h.slot(slot).is_unusable();
    {
        let mut s = h.slot_mut(slot);
        s.set_proc_id(0);
        s.set_file_name_in_use("");
        s.set_file_size_in_use(0);
        s.set_file_size_in_use_done(0);
        s.set_connect_status(if status == NOT_WORKING { NOT_WORKING } else { DISCONNECT });
        if unusable {
            s.set_proc_id(-1);
        }
    }
    h.set_active_transfers((h.active_transfers() - 1).max(0));
    h.recompute_trl();
    Ok(Some(status))
}
