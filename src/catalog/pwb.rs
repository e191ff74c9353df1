//! Password buffer: one entry per distinct `user@host`.
//!
//! Record: `uh_name[user + host + 1] | passwd[user] | dup_check u8`, padded
//! to 8. The field widths follow `MAX_USER_NAME_LENGTH` and
//! `MAX_REAL_HOSTNAME_LENGTH`; when either changes the file is converted
//! (see `typesize`). Passwords are stored scrambled, never in clear.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, Zeroizing};

use crate::consts::*;
use crate::table::view::{align8, get_str, put_str};
use crate::table::{rewrite_table, Access, Mapping, TableSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwbLayout {
    pub user_len: usize,
    pub host_len: usize,
}

impl PwbLayout {
    pub const fn current() -> Self {
        Self {
            user_len: MAX_USER_NAME_LENGTH,
            host_len: MAX_REAL_HOSTNAME_LENGTH,
        }
    }

    fn uh_len(&self) -> usize {
        self.user_len + self.host_len + 1
    }

    fn off_passwd(&self) -> usize {
        self.uh_len()
    }

    fn off_dup_check(&self) -> usize {
        self.uh_len() + self.user_len
    }

    pub fn record_size(&self) -> usize {
        align8(self.off_dup_check() + 1)
    }

    pub fn spec(&self) -> TableSpec {
        TableSpec {
            name: "PWB",
            record_size: self.record_size(),
            version: CURRENT_PWB_VERSION,
        }
    }
}

pub struct PwEntry {
    /// `user@host`.
    pub uh_name: String,
    pub passwd: Zeroizing<String>,
    pub dup_check: u8,
}

impl std::fmt::Debug for PwEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PwEntry")
            .field("uh_name", &self.uh_name)
            .field("dup_check", &self.dup_check)
            .finish_non_exhaustive()
    }
}

impl Clone for PwEntry {
    fn clone(&self) -> Self {
        Self {
            uh_name: self.uh_name.clone(),
            passwd: Zeroizing::new(self.passwd.as_str().to_string()),
            dup_check: self.dup_check,
        }
    }
}

impl PartialEq for PwEntry {
    fn eq(&self, o: &Self) -> bool {
        self.uh_name == o.uh_name && *self.passwd == *o.passwd && self.dup_check == o.dup_check
    }
}

fn scramble(plain: &[u8]) -> Vec<u8> {
    plain
        .iter()
        .enumerate()
        .map(|(i, &b)| b.wrapping_add(24).wrapping_sub(i as u8))
        .collect()
}

fn unscramble(stored: &[u8]) -> Vec<u8> {
    stored
        .iter()
        .enumerate()
        .map(|(i, &b)| b.wrapping_add(i as u8).wrapping_sub(24))
        .collect()
}

fn write_entry(rec: &mut [u8], layout: PwbLayout, e: &PwEntry) {
    rec.fill(0);
    put_str(rec, 0, layout.uh_len(), &e.uh_name);
    let mut pw = scramble(e.passwd.as_bytes());
    let n = pw.len().min(layout.user_len.saturating_sub(1));
    rec[layout.off_passwd()..layout.off_passwd() + n].copy_from_slice(&pw[..n]);
    pw.zeroize();
    rec[layout.off_dup_check()] = e.dup_check;
}

fn read_entry(rec: &[u8], layout: PwbLayout) -> PwEntry {
    let field = &rec[layout.off_passwd()..layout.off_passwd() + layout.user_len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let mut plain = unscramble(&field[..end]);
    let passwd = Zeroizing::new(String::from_utf8_lossy(&plain).into_owned());
    plain.zeroize();
    PwEntry {
        uh_name: get_str(rec, 0, layout.uh_len()),
        passwd,
        dup_check: rec[layout.off_dup_check()],
    }
}

pub struct Pwb {
    map: Mapping,
    layout: PwbLayout,
}

impl Pwb {
    pub fn path_in(fifodir: &Path) -> PathBuf {
        fifodir.join(PWB_FILE)
    }

    pub fn open(fifodir: &Path, access: Access) -> Result<Self> {
        Self::open_with(&Self::path_in(fifodir), PwbLayout::current(), access)
    }

    pub fn open_with(path: &Path, layout: PwbLayout, access: Access) -> Result<Self> {
        let map = Mapping::open(path, layout.spec(), access)?;
        Ok(Self { map, layout })
    }

    pub fn load(fifodir: &Path) -> Result<Vec<PwEntry>> {
        let path = Self::path_in(fifodir);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Self::open(fifodir, Access::Passive)?.entries()
    }

    pub fn write(fifodir: &Path, entries: &[PwEntry]) -> Result<Self> {
        Self::write_with(&Self::path_in(fifodir), PwbLayout::current(), entries)
    }

    pub fn write_with(path: &Path, layout: PwbLayout, entries: &[PwEntry]) -> Result<Self> {
        let map = rewrite_table(path, layout.spec(), entries.len(), 0, |m| {
            for (pos, e) in entries.iter().enumerate() {
                write_entry(m.record_mut(pos)?, layout, e);
            }
            Ok(())
        })?;
        Ok(Self { map, layout })
    }

    /// Rewrite only if `entries` differ from what is stored. Returns true
    /// when the file was replaced.
    pub fn update(fifodir: &Path, entries: &[PwEntry]) -> Result<bool> {
        let old = Self::load(fifodir)?;
        if old.len() == entries.len() && old.iter().zip(entries).all(|(a, b)| a == b) {
            return Ok(false);
        }
        Self::write(fifodir, entries)?;
        log::info!(target: "system", "password buffer rewritten ({} entries)", entries.len());
        Ok(true)
    }

    pub fn layout(&self) -> PwbLayout {
        self.layout
    }

    pub fn entries(&self) -> Result<Vec<PwEntry>> {
        (0..self.map.entries()?)
            .map(|pos| Ok(read_entry(self.map.record(pos)?, self.layout)))
            .collect()
    }

    pub fn lookup(&self, user: &str, host: &str) -> Result<Option<Zeroizing<String>>> {
        let key = format!("{}@{}", user, host);
        for pos in 0..self.map.entries()? {
            let e = read_entry(self.map.record(pos)?, self.layout);
            if e.uh_name == key {
                return Ok(Some(e.passwd));
            }
        }
        Ok(None)
    }
}

/// Re-encode `path` from `old` to `new` field widths. Oversized names are
/// truncated; when anything was truncated the previous file is kept as
/// `<path>.save`. Returns whether truncation happened.
pub fn convert(path: &Path, old: PwbLayout, new: PwbLayout) -> Result<bool> {
    if old == new {
        return Ok(false);
    }
    if new.user_len == 0 {
        bail!("PWB layout with zero user length");
    }
    let entries = Pwb::open_with(path, old, Access::Passive)?.entries()?;
    let mut truncated = false;
    let fitted: Vec<PwEntry> = entries
        .into_iter()
        .map(|mut e| {
            if e.uh_name.len() > new.uh_len() - 1 {
                truncated = true;
                e.uh_name = crate::table::view::truncate_str(&e.uh_name, new.uh_len() - 1).to_string();
            }
            if e.passwd.len() > new.user_len.saturating_sub(1) {
                truncated = true;
                let cut = crate::table::view::truncate_str(&e.passwd, new.user_len.saturating_sub(1)).to_string();
                e.passwd = Zeroizing::new(cut);
            }
            e
        })
        .collect();
    if truncated {
        let save = PathBuf::from(format!("{}.save", path.display()));
        std::fs::copy(path, &save)?;
        log::warn!(
            target: "system",
            "PWB conversion truncated entries, old file saved as {}",
            save.display()
        );
    }
    Pwb::write_with(path, new, &fitted)?;
    log::info!(
        target: "system",
        "converted {} from user/host {}/{} to {}/{}",
        path.display(),
        old.user_len,
        old.host_len,
        new.user_len,
        new.host_len
    );
    Ok(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(uh: &str, pw: &str) -> PwEntry {
        PwEntry {
            uh_name: uh.into(),
            passwd: Zeroizing::new(pw.into()),
            dup_check: 0,
        }
    }

    fn dir(n: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!("afd-pwb-{}-{}", n, std::process::id()));
        let _ = std::fs::remove_dir_all(&d);
        std::fs::create_dir_all(&d).unwrap();
        d
    }

    #[test]
    fn stored_scrambled_and_found() {
        let d = dir("basic");
        Pwb::write(&d, &[entry("ftp@host1", "secret")]).unwrap();
        let raw = std::fs::read(Pwb::path_in(&d)).unwrap();
        assert!(!raw.windows(6).any(|w| w == b"secret"));
        let pwb = Pwb::open(&d, Access::Passive).unwrap();
        assert_eq!(pwb.lookup("ftp", "host1").unwrap().as_deref().map(String::as_str), Some("secret"));
        assert!(pwb.lookup("ftp", "host2").unwrap().is_none());
        assert!(!Pwb::update(&d, &[entry("ftp@host1", "secret")]).unwrap());
        assert!(Pwb::update(&d, &[entry("ftp@host1", "other")]).unwrap());
    }

    #[test]
    fn shrinking_layout_truncates_and_saves() {
        let d = dir("conv");
        let path = Pwb::path_in(&d);
        let wide = PwbLayout { user_len: 16, host_len: 16 };
        let narrow = PwbLayout { user_len: 4, host_len: 4 };
        Pwb::write_with(&path, wide, &[entry("a@b", "xy"), entry("longuser@longhost", "pw")]).unwrap();
        assert!(convert(&path, wide, narrow).unwrap());
        assert!(PathBuf::from(format!("{}.save", path.display())).exists());
        let e = Pwb::open_with(&path, narrow, Access::Passive).unwrap().entries().unwrap();
        assert_eq!(e[0], entry("a@b", "xy"));
        assert_eq!(e[1].uh_name, "longuser");
    }
}
