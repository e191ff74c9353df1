//! When a directory is scanned next.

use crate::fra::{time_entry, DirRec, Zone};

/// Scan now? Externally scheduled directories never are.
pub fn is_due<B: AsRef<[u8]>>(d: &DirRec<B>, now: i64) -> bool {
    if d.is_externally_scheduled() {
        return false;
    }
    d.next_check_time() <= now
}

/// Next check time after a scan at `now`.
pub fn next_check<B: AsRef<[u8]>>(d: &DirRec<B>, now: i64, rescan_time: i64) -> i64 {
    if d.is_externally_scheduled() {
        return d.next_check_time();
    }
    let entries = d.time_entries();
    if entries.is_empty() {
        return now + rescan_time.max(1);
    }
    let tz = Zone::parse(&d.timezone()).unwrap_or(Zone::Local);
    time_entry::next_time(&entries, now, &tz).unwrap_or(now + rescan_time.max(1))
}
