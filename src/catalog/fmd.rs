//! File mask database.
//!
//! Variable body: entries of
//! `u32 file_mask_id | i32 no_of_masks | i32 blob_len | 4 reserved | blob`,
//! where `blob` is the NUL-separated mask list padded to 8 bytes. A JID
//! entry refers to its masks by the entry's byte offset in the body.

use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::table::view::align8;
use crate::table::{rewrite_table, Access, Mapping, TableSpec};

pub const FMD_SPEC: TableSpec = TableSpec {
    name: "FMD",
    record_size: 0,
    version: CURRENT_FMD_VERSION,
};

const ENTRY_HEADER: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMask {
    pub id: u32,
    pub masks: Vec<String>,
}

impl FileMask {
    pub fn new(masks: Vec<String>) -> Self {
        let id = crc32fast::hash(&pack(&masks));
        Self { id, masks }
    }

    fn encoded_len(&self) -> usize {
        ENTRY_HEADER + align8(pack(&self.masks).len())
    }
}

fn pack(masks: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for m in masks {
        out.extend_from_slice(m.as_bytes());
        out.push(0);
    }
    out
}

fn unpack(blob: &[u8], n: usize) -> Vec<String> {
    blob.split(|&b| b == 0)
        .take(n)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

pub struct Fmd {
    path: PathBuf,
    map: Mapping,
}

impl Fmd {
    pub fn path_in(fifodir: &Path) -> PathBuf {
        fifodir.join(FMD_FILE)
    }

    pub fn open(fifodir: &Path, access: Access) -> Result<Self> {
        let path = Self::path_in(fifodir);
        let map = Mapping::open(&path, FMD_SPEC, access)?;
        Ok(Self { path, map })
    }

    pub fn load(fifodir: &Path) -> Result<Vec<FileMask>> {
        let path = Self::path_in(fifodir);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(Self::open(fifodir, Access::Passive)?
            .entries()?
            .into_iter()
            .map(|(_, m)| m)
            .collect())
    }

    /// Keep the known mask lists, append new ones, rewrite. Returns the
    /// catalog and the body offset of every list in `add`.
    pub fn merge(fifodir: &Path, add: &[FileMask]) -> Result<(Self, Vec<i32>)> {
        let mut all = Self::load(fifodir)?;
        for fm in add {
            if !all.iter().any(|m| m.id == fm.id) {
                all.push(fm.clone());
            }
        }
        let mut offsets = Vec::with_capacity(all.len());
        let mut body_len = 0usize;
        for fm in &all {
            offsets.push(body_len);
            body_len += fm.encoded_len();
        }
        let path = Self::path_in(fifodir);
        let map = rewrite_table(&path, FMD_SPEC, all.len(), body_len, |m| {
            let body = m.body_mut()?;
            for (fm, &off) in all.iter().zip(offsets.iter()) {
                let blob = pack(&fm.masks);
                LittleEndian::write_u32(&mut body[off..off + 4], fm.id);
                LittleEndian::write_i32(&mut body[off + 4..off + 8], fm.masks.len() as i32);
                LittleEndian::write_i32(&mut body[off + 8..off + 12], blob.len() as i32);
                body[off + ENTRY_HEADER..off + ENTRY_HEADER + blob.len()].copy_from_slice(&blob);
            }
            Ok(())
        })?;
        let positions = add
            .iter()
            .map(|fm| {
                all.iter()
                    .position(|m| m.id == fm.id)
                    .map(|i| offsets[i] as i32)
                    .unwrap_or(-1)
            })
            .collect();
        Ok((Self { path, map }, positions))
    }

    pub fn check_reattach(&mut self) -> Result<bool> {
        if !self.map.is_stale() {
            return Ok(false);
        }
        self.map = Mapping::open(&self.path, FMD_SPEC, self.map.access())?;
        Ok(true)
    }

    /// Entry at body offset `off`.
    pub fn at(&self, off: usize) -> Result<FileMask> {
        let body = self.map.body()?;
        if off + ENTRY_HEADER > body.len() {
            bail!("FMD offset {} beyond {} byte body", off, body.len());
        }
        let id = LittleEndian::read_u32(&body[off..off + 4]);
        let n = LittleEndian::read_i32(&body[off + 4..off + 8]).max(0) as usize;
        let len = LittleEndian::read_i32(&body[off + 8..off + 12]).max(0) as usize;
        let start = off + ENTRY_HEADER;
        if start + len > body.len() {
            bail!("FMD entry at {} overruns body", off);
        }
        Ok(FileMask {
            id,
            masks: unpack(&body[start..start + len], n),
        })
    }

    /// `(offset, masks)` for every entry.
    pub fn entries(&self) -> Result<Vec<(usize, FileMask)>> {
        let n = self.map.entries()?;
        let mut out = Vec::with_capacity(n);
        let mut off = 0usize;
        for _ in 0..n {
            let fm = self.at(off)?;
            let next = off + fm.encoded_len();
            out.push((off, fm));
            off = next;
        }
        Ok(out)
    }

    pub fn by_id(&self, id: u32) -> Result<Option<FileMask>> {
        Ok(self.entries()?.into_iter().map(|(_, m)| m).find(|m| m.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fm(masks: &[&str]) -> FileMask {
        FileMask::new(masks.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn exclusions_survive_storage() {
        let d = std::env::temp_dir().join(format!("afd-fmd-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&d);
        std::fs::create_dir_all(&d).unwrap();
        let a = fm(&["*.grib", "!*.tmp.grib"]);
        let b = fm(&["*"]);
        let (_, offs) = Fmd::merge(&d, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(offs[0], 0);
        let (fmd, offs2) = Fmd::merge(&d, &[b.clone()]).unwrap();
        assert_eq!(offs2[0], offs[1]);
        assert_eq!(fmd.at(0).unwrap(), a);
        assert_eq!(fmd.by_id(b.id).unwrap(), Some(b));
        assert_eq!(fmd.entries().unwrap().len(), 2);
    }
}
