//! Retrieve list (`<fifodir>/ls_data/<alias>`): which files of a
//! directory that is not emptied have already been taken.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::table::view::{align8, record_fields, record_strings};
use crate::table::{rewrite_table, Access, Mapping, TableSpec};

use super::gates::FileInfo;

const OFF_FILE_NAME: usize = 24;
pub const RL_RECORD_SIZE: usize = align8(OFF_FILE_NAME + MAX_FILENAME_LENGTH);

pub const RL_SPEC: TableSpec = TableSpec {
    name: "RL",
    record_size: RL_RECORD_SIZE,
    version: CURRENT_RL_VERSION,
};

pub struct RlRec<B> {
    pub(crate) buf: B,
}

record_fields!(RlRec {
    size, set_size: i64 = 0;
    mtime, set_mtime: i64 = 8;
    retrieved, set_retrieved: u8 = 16;
    in_list, set_in_list: u8 = 17;
});

record_strings!(RlRec {
    file_name, set_file_name = OFF_FILE_NAME, MAX_FILENAME_LENGTH;
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RlEntry {
    pub file_name: String,
    pub size: i64,
    pub mtime: i64,
    pub retrieved: bool,
    pub in_list: bool,
}

pub struct RetrieveList {
    path: PathBuf,
    entries: Vec<RlEntry>,
}

impl RetrieveList {
    pub fn path_for(ls_data_dir: &Path, alias: &str) -> PathBuf {
        ls_data_dir.join(alias)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        if path.exists() {
            let m = Mapping::open(path, RL_SPEC, Access::Passive)?;
            for i in 0..m.entries()? {
                let r = RlRec { buf: m.record(i)? };
                entries.push(RlEntry {
                    file_name: r.file_name(),
                    size: r.size(),
                    mtime: r.mtime(),
                    retrieved: r.retrieved() != 0,
                    in_list: r.in_list() != 0,
                });
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entries(&self) -> &[RlEntry] {
        &self.entries
    }

    /// Start of a listing pass.
    pub fn begin(&mut self) {
        for e in &mut self.entries {
            e.in_list = false;
        }
    }

    /// Decide whether `f` is taken in this pass and record it.
    pub fn take(&mut self, f: &FileInfo, stupid_mode: u8) -> bool {
        if stupid_mode == STUPID_YES {
            return true;
        }
        match self.entries.iter_mut().find(|e| e.file_name == f.name) {
            Some(e) => {
                e.in_list = true;
                let changed = e.size != f.size as i64 || e.mtime != f.mtime;
                if changed && stupid_mode != GET_ONCE_ONLY {
                    e.size = f.size as i64;
                    e.mtime = f.mtime;
                    e.retrieved = true;
                    return true;
                }
                if !e.retrieved {
                    e.retrieved = true;
                    return true;
                }
                false
            }
            None => {
                self.entries.push(RlEntry {
                    file_name: f.name.clone(),
                    size: f.size as i64,
                    mtime: f.mtime,
                    retrieved: true,
                    in_list: true,
                });
                true
            }
        }
    }

    /// A size announced by a remote listing. It replaces the stored value
    /// only when `adjust` (`DIR_ADJUST_RL_SIZE`) is set.
    pub fn announce_size(&mut self, name: &str, size: i64, adjust: bool) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.file_name == name) {
            if adjust && e.size != size {
                log::debug!(target: "receive", "{}: size {} -> {}", name, e.size, size);
                e.size = size;
            }
        }
    }

    /// Drop files that vanished and write the list back.
    pub fn finish(&mut self) -> Result<()> {
        self.entries.retain(|e| e.in_list);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = &self.entries;
        rewrite_table(&self.path, RL_SPEC, entries.len(), 0, |m| {
            for (i, e) in entries.iter().enumerate() {
                let mut r = RlRec { buf: m.record_mut(i)? };
                r.set_file_name(&e.file_name);
                r.set_size(e.size);
                r.set_mtime(e.mtime);
                r.set_retrieved(e.retrieved as u8);
                r.set_in_list(e.in_list as u8);
            }
            Ok(())
        })?;
        Ok(())
    }
}
