//! Error queue: jobs whose last message failed, with their next retry time.
//!
//! `<fifodir>/error_queue` is a flat array of 24-byte entries
//! `u32 job_id | u32 dir_id | u32 host_id | 4 reserved | i64 next_retry_time`,
//! rewritten as a whole under an exclusive `fs2` lock.

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::ERROR_QUEUE_FILE;

const ENTRY_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEntry {
    pub job_id: u32,
    pub dir_id: u32,
    pub host_id: u32,
    pub next_retry_time: i64,
}

pub struct ErrorQueue {
    path: PathBuf,
}

struct Locked {
    file: File,
}

impl Drop for Locked {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl ErrorQueue {
    pub fn new(fifodir: &Path) -> Self {
        Self {
            path: fifodir.join(ERROR_QUEUE_FILE),
        }
    }

    fn lock(&self) -> Result<Locked> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock_exclusive {}", self.path.display()))?;
        Ok(Locked { file })
    }

    fn read(l: &mut Locked) -> Result<Vec<ErrorEntry>> {
        let mut raw = Vec::new();
        l.file.seek(SeekFrom::Start(0))?;
        l.file.read_to_end(&mut raw)?;
        Ok(raw
            .chunks_exact(ENTRY_SIZE)
            .map(|c| ErrorEntry {
                job_id: LittleEndian::read_u32(&c[0..4]),
                dir_id: LittleEndian::read_u32(&c[4..8]),
                host_id: LittleEndian::read_u32(&c[8..12]),
                next_retry_time: LittleEndian::read_i64(&c[16..24]),
            })
            .collect())
    }

    fn write(l: &mut Locked, entries: &[ErrorEntry]) -> Result<()> {
        let mut raw = vec![0u8; entries.len() * ENTRY_SIZE];
        for (e, c) in entries.iter().zip(raw.chunks_exact_mut(ENTRY_SIZE)) {
            LittleEndian::write_u32(&mut c[0..4], e.job_id);
            LittleEndian::write_u32(&mut c[4..8], e.dir_id);
            LittleEndian::write_u32(&mut c[8..12], e.host_id);
            LittleEndian::write_i64(&mut c[16..24], e.next_retry_time);
        }
        l.file.set_len(0)?;
        l.file.seek(SeekFrom::Start(0))?;
        l.file.write_all(&raw)?;
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<ErrorEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut l = self.lock()?;
        Self::read(&mut l)
    }

    /// Insert or refresh the entry of `(job_id, dir_id)`.
    pub fn add(&self, e: ErrorEntry) -> Result<()> {
        let mut l = self.lock()?;
        let mut all = Self::read(&mut l)?;
        match all
            .iter_mut()
            .find(|x| x.job_id == e.job_id && x.dir_id == e.dir_id)
        {
            Some(x) => {
                x.host_id = e.host_id;
                x.next_retry_time = e.next_retry_time;
            }
            None => all.push(e),
        }
        Self::write(&mut l, &all)
    }

    /// Drop every entry of `dir_id` for `host_id`. Returns whether entries
    /// for the host remain.
    pub fn remove(&self, host_id: u32, dir_id: u32) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let mut l = self.lock()?;
        let mut all = Self::read(&mut l)?;
        let before = all.len();
        all.retain(|x| !(x.host_id == host_id && x.dir_id == dir_id));
        if all.len() != before {
            Self::write(&mut l, &all)?;
        }
        Ok(all.iter().any(|x| x.host_id == host_id))
    }

    pub fn has_host(&self, host_id: u32) -> Result<bool> {
        Ok(self.entries()?.iter().any(|x| x.host_id == host_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_refresh_remove() {
        let d = std::env::temp_dir().join(format!("afd-eq-{}", std::process::id()));
        std::fs::create_dir_all(&d).unwrap();
        let _ = std::fs::remove_file(d.join(ERROR_QUEUE_FILE));
        let q = ErrorQueue::new(&d);
        let e = |job, dir, t| ErrorEntry {
            job_id: job,
            dir_id: dir,
            host_id: 5,
            next_retry_time: t,
        };
        q.add(e(1, 10, 100)).unwrap();
        q.add(e(2, 11, 100)).unwrap();
        q.add(e(1, 10, 200)).unwrap();
        assert_eq!(q.entries().unwrap().len(), 2);
        assert_eq!(q.entries().unwrap()[0].next_retry_time, 200);
        assert!(q.remove(5, 10).unwrap());
        assert!(!q.remove(5, 11).unwrap());
        assert!(!q.has_host(5).unwrap());
    }
}
