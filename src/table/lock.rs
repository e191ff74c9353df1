//! Per-record byte-range advisory locks.
//!
//! Every lock is one byte at `AFD_WORD_OFFSET + pos * record_size + region`
//! of the data file, taken with `fcntl(F_SETLKW)` so external tools that use
//! the same offsets interoperate. Waiting is unbounded; deadlock freedom comes
//! from the lock order, which every caller must follow:
//!
//!   ID file -> record index ascending -> region rank ascending (CON < HS < TFC < EC)
//!
//! POSIX record locks are owned by the process, so two threads of one process
//! would not exclude each other. A process-local gate keyed by
//! (device, inode, offset) serialises holders inside the process before the
//! fcntl lock is taken.
//!
//! The lock is released when `RecordLock` drops.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Condvar, Mutex};

/// A lockable region inside a record.
pub trait LockRegion: Copy + std::fmt::Debug {
    /// Byte offset of the lock byte relative to the record start.
    fn offset(self) -> usize;
    /// Position in the global lock order.
    fn rank(self) -> u8;
}

type GateKey = (u64, u64, u64);

static HELD: Mutex<BTreeSet<GateKey>> = Mutex::new(BTreeSet::new());
static RELEASED: Condvar = Condvar::new();

fn gate_enter(key: GateKey) {
    let mut held = HELD.lock().unwrap_or_else(|p| p.into_inner());
    while held.contains(&key) {
        held = RELEASED.wait(held).unwrap_or_else(|p| p.into_inner());
    }
    held.insert(key);
}

fn gate_leave(key: &GateKey) {
    let mut held = HELD.lock().unwrap_or_else(|p| p.into_inner());
    held.remove(key);
    drop(held);
    RELEASED.notify_all();
}

#[derive(Debug)]
pub struct RecordLock {
    fd: RawFd,
    offset: u64,
    key: GateKey,
}

impl RecordLock {
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        let _ = fcntl_lock(self.fd, self.offset, libc::F_UNLCK as libc::c_short);
        gate_leave(&self.key);
    }
}

fn fcntl_lock(fd: RawFd, offset: u64, kind: libc::c_short) -> std::io::Result<()> {
    // SAFETY: flock is a plain C struct; zeroed is a valid initial value.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = kind;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = offset as libc::off_t;
    fl.l_len = 1;
    loop {
        // SAFETY: fd is an open descriptor owned by the caller's File.
        let rc = unsafe { libc::fcntl(fd, libc::F_SETLKW, &fl as *const libc::flock) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// Take a write lock on one byte of `file`. Blocks until granted.
pub fn lock_byte(file: &File, offset: u64) -> Result<RecordLock> {
    let md = file.metadata()?;
    let key = (md.dev(), md.ino(), offset);
    gate_enter(key);
    let fd = file.as_raw_fd();
    if let Err(e) = fcntl_lock(fd, offset, libc::F_WRLCK as libc::c_short) {
        gate_leave(&key);
        return Err(anyhow!("fcntl(F_SETLKW) at offset {}: {}", offset, e));
    }
    Ok(RecordLock { fd, offset, key })
}

/// Lock several regions of one record in rank order.
pub fn lock_regions<R: LockRegion>(
    file: &File,
    record_base: u64,
    regions: &[R],
) -> Result<Vec<RecordLock>> {
    let mut sorted: Vec<R> = regions.to_vec();
    sorted.sort_by_key(|r| r.rank());
    sorted.dedup_by_key(|r| r.rank());
    let mut out = Vec::with_capacity(sorted.len());
    for r in sorted {
        out.push(lock_byte(file, record_base + r.offset() as u64)?);
    }
    Ok(out)
}
