//! Group headers: a record whose `real_hostname[0]` starts with
//! `GROUP_IDENTIFIER` owns the non-header records that follow it.

use anyhow::Result;
use std::ops::Range;

use super::Fsa;
use crate::consts::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupView {
    pub header: usize,
    pub alias: String,
    pub members: Range<usize>,
}

pub fn groups(fsa: &Fsa) -> Result<Vec<GroupView>> {
    let n = fsa.no_of_hosts()?;
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < n {
        let h = fsa.host(pos)?;
        if !h.is_group_header() {
            pos += 1;
            continue;
        }
        let alias = h.host_alias();
        let start = pos + 1;
        let mut end = start;
        while end < n && !fsa.host(end)?.is_group_header() {
            end += 1;
        }
        out.push(GroupView {
            header: pos,
            alias,
            members: start..end,
        });
        pos = end;
    }
    Ok(out)
}

/// Group a host belongs to, if any.
pub fn group_of(groups: &[GroupView], pos: usize) -> Option<&GroupView> {
    groups.iter().find(|g| g.members.contains(&pos))
}

/// Recompute every header's counters and flags from its members.
///
/// Members are the records after the header up to the next header. Group
/// membership ends at a `[]` line in HOST_CONFIG, which the builder encodes
/// by putting ungrouped hosts before the first header.
pub fn aggregate(fsa: &mut Fsa) -> Result<()> {
    for g in groups(fsa)? {
        let mut tfc = 0i32;
        let mut tfs = 0i64;
        let mut done = 0u32;
        let mut sent = 0u64;
        let mut conns = 0u32;
        let mut active = 0i32;
        let mut allowed = 0i32;
        let mut errors = 0i32;
        let mut queued = 0u32;
        let mut flags = 0u32;
        let mut last_conn = 0i64;
        for m in g.members.clone() {
            let h = fsa.host(m)?;
            tfc += h.total_file_counter().max(0);
            tfs += h.total_file_size().max(0);
            done = done.wrapping_add(h.file_counter_done());
            sent = sent.wrapping_add(h.bytes_send());
            conns = conns.wrapping_add(h.connections());
            active += h.active_transfers().max(0);
            allowed += h.allowed_transfers().max(0);
            errors += h.error_counter().max(0);
            queued += h.jobs_queued();
            last_conn = last_conn.max(h.last_connection());
            let st = h.host_status();
            if (h.max_errors() > 0 && h.error_counter() >= h.max_errors())
                || st & (AUTO_PAUSE_QUEUE | PENDING_ERRORS) != 0
            {
                flags |= ERROR_HOSTS_IN_GROUP;
            }
            if st & HOST_WARN_TIME_REACHED != 0 {
                flags |= WARN_HOSTS_IN_GROUP;
            }
        }
        let mut h = fsa.host_mut(g.header)?;
        h.set_total_file_counter(tfc);
        h.set_total_file_size(tfs);
        h.set_file_counter_done(done);
        h.set_bytes_send(sent);
        h.set_connections(conns);
        h.set_active_transfers(active);
        h.set_allowed_transfers(allowed);
        h.set_error_counter(errors);
        h.set_jobs_queued(queued);
        h.set_last_connection(last_conn);
        let st = h.host_status() & !(ERROR_HOSTS_IN_GROUP | WARN_HOSTS_IN_GROUP);
        h.set_host_status(st | flags);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsa::testutil::make_fsa;

    #[test]
    fn header_sums_members() {
        let d = std::env::temp_dir().join(format!("afd-group-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&d);
        let mut fsa = make_fsa(&d, &["solo", "grp", "m1", "m2"], 2);
        fsa.host_mut(1).unwrap().mark_group_header();
        {
            let mut h = fsa.host_mut(2).unwrap();
            h.set_total_file_counter(3);
            h.set_error_counter(5);
            h.set_max_errors(3);
        }
        fsa.host_mut(3).unwrap().set_total_file_counter(4);

        let gs = fsa.groups().unwrap();
        assert_eq!(gs.len(), 1);
        assert_eq!(gs[0].members, 2..4);
        assert_eq!(group_of(&gs, 3).map(|g| g.header), Some(1));
        assert!(group_of(&gs, 0).is_none());
        assert_eq!(fsa.iter_hosts(false).unwrap(), vec![0, 2, 3]);

        aggregate(&mut fsa).unwrap();
        let h = fsa.host(1).unwrap();
        assert_eq!(h.total_file_counter(), 7);
        assert_ne!(h.host_status() & ERROR_HOSTS_IN_GROUP, 0);
        assert_eq!(h.allowed_transfers(), 4);
    }
}
