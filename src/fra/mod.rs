//! Fileretrieve status area: one record per watched directory.

pub mod layout;
pub mod time_entry;

pub use layout::{DirRec, FraRegion, DIR_RECORD_SIZE};
pub use time_entry::{TimeEntry, Zone};

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::table::{self, Access, GenFiles, Mapping, RecordLock, TableSpec};

pub const FRA_SPEC: TableSpec = TableSpec {
    name: "FRA",
    record_size: DIR_RECORD_SIZE,
    version: CURRENT_FRA_VERSION,
};

pub const FRA_FILES: GenFiles = GenFiles {
    id_file: FRA_ID_FILE,
    base: FRA_STAT_FILE,
};

pub struct Fra {
    fifodir: PathBuf,
    map: Mapping,
}

impl Fra {
    pub fn attach(fifodir: &Path, access: Access) -> Result<Self> {
        let map = table::attach(fifodir, FRA_FILES, FRA_SPEC, access)?;
        Ok(Self {
            fifodir: fifodir.to_path_buf(),
            map,
        })
    }

    pub fn attach_passive(fifodir: &Path) -> Result<Self> {
        Self::attach(fifodir, Access::Passive)
    }

    pub fn attach_active(fifodir: &Path) -> Result<Self> {
        Self::attach(fifodir, Access::Active)
    }

    pub fn from_mapping(fifodir: &Path, map: Mapping) -> Self {
        Self {
            fifodir: fifodir.to_path_buf(),
            map,
        }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.map
    }

    pub fn into_mapping(self) -> Mapping {
        self.map
    }

    pub fn generation(&self) -> Option<i32> {
        self.map.generation()
    }

    pub fn is_stale(&self) -> bool {
        self.map.is_stale()
    }

    pub fn check_reattach(&mut self) -> Result<bool> {
        if !self.map.is_stale() {
            return Ok(false);
        }
        let access = self.map.access();
        self.map = table::attach(&self.fifodir, FRA_FILES, FRA_SPEC, access)?;
        log::debug!(target: "system", "FRA re-attached: generation {:?}", self.map.generation());
        Ok(true)
    }

    pub fn no_of_dirs(&self) -> Result<usize> {
        self.map.entries()
    }

    pub fn dir(&self, pos: usize) -> Result<DirRec<&[u8]>> {
        Ok(DirRec::new(self.map.record(pos)?))
    }

    pub fn dir_mut(&mut self, pos: usize) -> Result<DirRec<&mut [u8]>> {
        Ok(DirRec::new(self.map.record_mut(pos)?))
    }

    pub fn lock(&self, pos: usize, region: FraRegion) -> Result<RecordLock> {
        self.map.lock(pos, region)
    }

    pub fn position(&self, alias: &str) -> Result<Option<usize>> {
        for pos in 0..self.no_of_dirs()? {
            if self.dir(pos)?.dir_alias() == alias {
                return Ok(Some(pos));
            }
        }
        Ok(None)
    }

    pub fn position_by_id(&self, dir_id: u32) -> Result<Option<usize>> {
        for pos in 0..self.no_of_dirs()? {
            if self.dir(pos)?.dir_id() == dir_id {
                return Ok(Some(pos));
            }
        }
        Ok(None)
    }

    /// Subtract a finished or dropped message from the queue counters.
    pub fn dequeue(&mut self, pos: usize, files: u32, bytes: u64) -> Result<()> {
        let _g = self.lock(pos, FraRegion::Counters)?;
        let mut d = self.dir_mut(pos)?;
        d.set_files_queued(d.files_queued().saturating_sub(files));
        d.set_bytes_in_queue(d.bytes_in_queue().saturating_sub(bytes));
        Ok(())
    }

    pub fn flush(&self) {
        self.map.flush();
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::table::IdFile;

    pub fn make_fra(fifodir: &Path, aliases: &[&str]) -> Fra {
        std::fs::create_dir_all(fifodir).unwrap();
        let id = IdFile::open(&fifodir.join(FRA_ID_FILE)).unwrap();
        let lock = id.lock_exclusive().unwrap();
        let old = table::attach_locked(&id, fifodir, FRA_FILES, FRA_SPEC, Access::Active).unwrap();
        let mut ng =
            table::NewGeneration::create(&id, &lock, fifodir, FRA_FILES, FRA_SPEC, aliases.len()).unwrap();
        for (pos, a) in aliases.iter().enumerate() {
            let mut d = DirRec::new(ng.mapping.record_mut(pos).unwrap());
            d.set_dir_alias(a);
            d.set_dir_id(crate::util::checksum_str(a));
            d.set_protocol(LOC);
            d.set_remove(1);
            d.set_max_copied_files(100);
            d.set_max_copied_file_size(1 << 30);
            d.set_max_errors(3);
            d.set_ewl_pos(-1);
            d.set_end_character(-1);
            d.set_fsa_pos(-1);
            d.set_priority(DEFAULT_PRIORITY);
        }
        let m = ng.commit(&id, &lock, old).unwrap();
        Fra::from_mapping(fifodir, m)
    }
}
