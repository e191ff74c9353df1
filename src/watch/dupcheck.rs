//! Duplicate detection by checksum with expiry.
//!
//! Store file `<work>/files/store/dupcheck/<id hex>`: a flat array of
//! `(u32 crc, i64 expires)` little-endian pairs, rewritten under an
//! exclusive `fs2` lock on every check.

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::paths::WorkDir;

const PAIR_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupAction {
    Delete,
    Store,
    Warn,
}

impl DupAction {
    pub fn from_flag(flag: u32) -> Self {
        if flag & DC_STORE != 0 {
            DupAction::Store
        } else if flag & DC_WARN != 0 {
            DupAction::Warn
        } else {
            DupAction::Delete
        }
    }
}

/// Checksum of the part of the file selected by `flag`.
pub fn dup_key(path: &Path, name: &str, flag: u32) -> Result<u32> {
    if flag & (DC_FILE_CONTENT | DC_FILE_CONT_NAME) != 0 {
        let mut h = crc32fast::Hasher::new();
        let mut f = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut buf = [0u8; 8192];
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            h.update(&buf[..n]);
        }
        if flag & DC_FILE_CONT_NAME != 0 {
            h.update(name.as_bytes());
        }
        return Ok(h.finalize());
    }
    if flag & DC_NAME_NO_SUFFIX != 0 {
        let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
        return Ok(crc32fast::hash(stem.as_bytes()));
    }
    Ok(crc32fast::hash(name.as_bytes()))
}

pub struct DupStore {
    path: PathBuf,
}

impl DupStore {
    pub fn new(work: &WorkDir, id: u32) -> Self {
        Self {
            path: work.dupcheck_dir().join(format!("{:x}", id)),
        }
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Whether `crc` was seen before; records it otherwise. Expired pairs
    /// are dropped on the way.
    pub fn check(&self, crc: u32, timeout: u32, now: i64) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        f.lock_exclusive()
            .with_context(|| format!("lock_exclusive {}", self.path.display()))?;
        let mut raw = Vec::new();
        f.read_to_end(&mut raw)?;

        let mut live = Vec::with_capacity(raw.len() / PAIR_SIZE + 1);
        let mut rd = Cursor::new(&raw[..raw.len() / PAIR_SIZE * PAIR_SIZE]);
        while (rd.position() as usize) < rd.get_ref().len() {
            let c = rd.read_u32::<LittleEndian>()?;
            let exp = rd.read_i64::<LittleEndian>()?;
            if exp > now {
                live.push((c, exp));
            }
        }
        let dup = live.iter().any(|(c, _)| *c == crc);
        if !dup {
            live.push((crc, now + timeout as i64));
        }

        let mut out = Vec::with_capacity(live.len() * PAIR_SIZE);
        for (c, exp) in &live {
            out.write_u32::<LittleEndian>(*c)?;
            out.write_i64::<LittleEndian>(*exp)?;
        }
        f.seek(SeekFrom::Start(0))?;
        f.set_len(0)?;
        f.write_all(&out)?;
        let _ = f.unlock();
        Ok(dup)
    }
}

/// Per-directory duplicate check as configured in the FRA.
pub struct DupCheck<'a> {
    pub work: &'a WorkDir,
    pub id: u32,
    pub flag: u32,
    pub timeout: u32,
}

impl DupCheck<'_> {
    pub fn enabled(&self) -> bool {
        self.timeout > 0
    }

    /// `true` if the file must not be distributed. The configured action
    /// is applied to duplicates here.
    pub fn reject(&self, path: &Path, name: &str, now: i64) -> Result<bool> {
        if !self.enabled() {
            return Ok(false);
        }
        let key = dup_key(path, name, self.flag)?;
        if !DupStore::new(self.work, self.id).check(key, self.timeout, now)? {
            return Ok(false);
        }
        match DupAction::from_flag(self.flag) {
            DupAction::Delete => {
                log::info!(target: "receive", "duplicate {} removed", name);
                remove_quiet(path);
                Ok(true)
            }
            DupAction::Store => {
                let dst = self.work.double_dir().join(format!("{:x}", self.id));
                fs::create_dir_all(&dst)?;
                fs::rename(path, dst.join(name))
                    .with_context(|| format!("store duplicate {}", path.display()))?;
                log::info!(target: "receive", "duplicate {} stored in {}", name, dst.display());
                Ok(true)
            }
            DupAction::Warn => {
                log::warn!(target: "receive", "duplicate {} passed on", name);
                Ok(false)
            }
        }
    }
}

fn remove_quiet(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!(target: "receive", "remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(tag: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!("afd-dup-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&d);
        fs::create_dir_all(&d).unwrap();
        d
    }

    #[test]
    fn second_sighting_is_duplicate_until_expiry() {
        let d = root("store");
        let s = DupStore::at(&d.join("x"));
        assert!(!s.check(5, 60, 1000).unwrap());
        assert!(s.check(5, 60, 1030).unwrap());
        assert!(!s.check(6, 60, 1030).unwrap());
        // 5 expired at 1060
        assert!(!s.check(5, 60, 1061).unwrap());
        fs::remove_dir_all(&d).unwrap();
    }

    #[test]
    fn keys_and_actions() {
        let d = root("keys");
        let p = d.join("a.txt");
        fs::write(&p, b"same").unwrap();
        let q = d.join("b.dat");
        fs::write(&q, b"same").unwrap();
        assert_eq!(
            dup_key(&p, "a.txt", DC_FILE_CONTENT).unwrap(),
            dup_key(&q, "b.dat", DC_FILE_CONTENT).unwrap()
        );
        assert_ne!(
            dup_key(&p, "a.txt", DC_FILE_CONT_NAME).unwrap(),
            dup_key(&q, "b.dat", DC_FILE_CONT_NAME).unwrap()
        );
        assert_eq!(
            dup_key(&p, "a.txt", DC_NAME_NO_SUFFIX).unwrap(),
            dup_key(&p, "a.gz", DC_NAME_NO_SUFFIX).unwrap()
        );
        assert_eq!(DupAction::from_flag(DC_FILENAME_ONLY), DupAction::Delete);
        assert_eq!(DupAction::from_flag(DC_STORE), DupAction::Store);

        let work = WorkDir::new(d.join("work"));
        let dc = DupCheck {
            work: &work,
            id: 1,
            flag: DC_FILE_CONTENT | DC_STORE,
            timeout: 60,
        };
        assert!(!dc.reject(&p, "a.txt", 10).unwrap());
        assert!(dc.reject(&q, "b.dat", 11).unwrap());
        assert!(!q.exists());
        assert!(work.double_dir().join("1").join("b.dat").exists());
        fs::remove_dir_all(&d).unwrap();
    }
}
