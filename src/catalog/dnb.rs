//! Directory name buffer: stable `dir_id` <-> absolute path.
//!
//! Record: `u32 dir_id | 4 reserved | dir_name[1024]`. Entries are only ever
//! appended; a rebuild keeps every name it already knew so that old spool
//! subtrees stay resolvable.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::table::view::{record_fields, record_strings};
use crate::table::{rewrite_table, Access, Mapping, TableSpec};
use crate::util::checksum_str;

const OFF_DIR_NAME: usize = 8;
pub const DNB_RECORD_SIZE: usize = OFF_DIR_NAME + MAX_PATH_LENGTH;

pub const DNB_SPEC: TableSpec = TableSpec {
    name: "DNB",
    record_size: DNB_RECORD_SIZE,
    version: CURRENT_DNB_VERSION,
};

struct DirNameRec<B> {
    buf: B,
}

record_fields!(DirNameRec {
    dir_id, set_dir_id: u32 = 0;
});

record_strings!(DirNameRec {
    dir_name, set_dir_name = OFF_DIR_NAME, MAX_PATH_LENGTH;
});

/// `dir_id` of a directory path.
pub fn dir_id_of(path: &str) -> u32 {
    checksum_str(path)
}

pub struct Dnb {
    path: PathBuf,
    map: Mapping,
}

impl Dnb {
    pub fn path_in(fifodir: &Path) -> PathBuf {
        fifodir.join(DNB_FILE)
    }

    pub fn open(fifodir: &Path, access: Access) -> Result<Self> {
        let path = Self::path_in(fifodir);
        let map = Mapping::open(&path, DNB_SPEC, access)?;
        Ok(Self { path, map })
    }

    /// Existing entries, or none when the file does not exist yet.
    pub fn load(fifodir: &Path) -> Result<Vec<(u32, String)>> {
        let path = Self::path_in(fifodir);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Self::open(fifodir, Access::Passive)?.entries()
    }

    /// Append the names in `add` that are not present yet and rewrite.
    /// Returns the catalog and the position of every name in `add`.
    pub fn merge(fifodir: &Path, add: &[String]) -> Result<(Self, Vec<usize>)> {
        let mut all = Self::load(fifodir)?;
        let mut positions = Vec::with_capacity(add.len());
        for name in add {
            let id = dir_id_of(name);
            match all.iter().position(|(i, n)| *i == id && n == name) {
                Some(p) => positions.push(p),
                None => {
                    all.push((id, name.clone()));
                    positions.push(all.len() - 1);
                }
            }
        }
        let path = Self::path_in(fifodir);
        let map = rewrite_table(&path, DNB_SPEC, all.len(), 0, |m| {
            for (pos, (id, name)) in all.iter().enumerate() {
                let mut r = DirNameRec {
                    buf: m.record_mut(pos)?,
                };
                r.set_dir_id(*id);
                r.set_dir_name(name);
            }
            Ok(())
        })?;
        Ok((Self { path, map }, positions))
    }

    pub fn check_reattach(&mut self) -> Result<bool> {
        if !self.map.is_stale() {
            return Ok(false);
        }
        self.map = Mapping::open(&self.path, DNB_SPEC, self.map.access())?;
        Ok(true)
    }

    pub fn entries(&self) -> Result<Vec<(u32, String)>> {
        (0..self.map.entries()?)
            .map(|pos| {
                let r = DirNameRec {
                    buf: self.map.record(pos)?,
                };
                Ok((r.dir_id(), r.dir_name()))
            })
            .collect()
    }

    pub fn name_at(&self, pos: usize) -> Result<String> {
        let r = DirNameRec {
            buf: self.map.record(pos)?,
        };
        Ok(r.dir_name())
    }

    pub fn lookup(&self, dir_id: u32) -> Result<Option<String>> {
        for pos in 0..self.map.entries()? {
            let r = DirNameRec {
                buf: self.map.record(pos)?,
            };
            if r.dir_id() == dir_id {
                return Ok(Some(r.dir_name()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_append_only() {
        let d = std::env::temp_dir().join(format!("afd-dnb-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&d);
        std::fs::create_dir_all(&d).unwrap();
        let (_, p1) = Dnb::merge(&d, &["/in/a".into(), "/in/b".into()]).unwrap();
        assert_eq!(p1, vec![0, 1]);
        let (dnb, p2) = Dnb::merge(&d, &["/in/c".into(), "/in/a".into()]).unwrap();
        assert_eq!(p2, vec![2, 0]);
        assert_eq!(dnb.entries().unwrap().len(), 3);
        assert_eq!(dnb.lookup(dir_id_of("/in/b")).unwrap().as_deref(), Some("/in/b"));
        assert_eq!(dnb.name_at(2).unwrap(), "/in/c");
    }
}
