//! Filetransfer status area: one record per host.

pub mod group;
pub mod layout;
pub mod slots;

pub use group::GroupView;
pub use layout::{FsaRegion, HostRec, SlotRec, HOST_RECORD_SIZE};

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::error::TableError;
use crate::table::{self, Access, GenFiles, Mapping, RecordLock, TableSpec};

pub const FSA_SPEC: TableSpec = TableSpec {
    name: "FSA",
    record_size: HOST_RECORD_SIZE,
    version: CURRENT_FSA_VERSION,
};

pub const FSA_FILES: GenFiles = GenFiles {
    id_file: FSA_ID_FILE,
    base: FSA_STAT_FILE,
};

pub struct Fsa {
    fifodir: PathBuf,
    map: Mapping,
}

impl std::fmt::Debug for Fsa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fsa").field("map", &self.map).finish()
    }
}

impl Fsa {
    pub fn attach(fifodir: &Path, access: Access) -> Result<Self> {
        let map = table::attach(fifodir, FSA_FILES, FSA_SPEC, access)?;
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

    pub fn mapping_mut(&mut self) -> &mut Mapping {
        &mut self.map
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

    /// Re-attach if the current mapping went stale. Returns true when a new
    /// generation was mapped.
    pub fn check_reattach(&mut self) -> Result<bool> {
        if !self.map.is_stale() {
            return Ok(false);
        }
        let access = self.map.access();
        let fresh = table::attach(&self.fifodir, FSA_FILES, FSA_SPEC, access)?;
        log::debug!(
            target: "system",
            "FSA re-attached: generation {:?} -> {:?}",
            self.map.generation(),
            fresh.generation()
        );
        self.map = fresh;
        Ok(true)
    }

    pub fn no_of_hosts(&self) -> Result<usize> {
        self.map.entries()
    }

    pub fn host(&self, pos: usize) -> Result<HostRec<&[u8]>> {
        Ok(HostRec::new(self.map.record(pos)?))
    }

    pub fn host_mut(&mut self, pos: usize) -> Result<HostRec<&mut [u8]>> {
        Ok(HostRec::new(self.map.record_mut(pos)?))
    }

    pub fn lock(&self, pos: usize, region: FsaRegion) -> Result<RecordLock> {
        self.map.lock(pos, region)
    }

    pub fn lock_all(&self, pos: usize, regions: &[FsaRegion]) -> Result<Vec<RecordLock>> {
        self.map.lock_all(pos, regions)
    }

    /// Position of `alias` among non-group records.
    pub fn position(&self, alias: &str) -> Result<Option<usize>> {
        let n = self.no_of_hosts()?;
        for pos in 0..n {
            let h = self.host(pos)?;
            if !h.is_group_header() && h.host_alias() == alias {
                return Ok(Some(pos));
            }
        }
        Ok(None)
    }

    pub fn require_position(&self, alias: &str) -> Result<usize> {
        self.position(alias)?.ok_or_else(|| {
            TableError::NotFound {
                what: "host",
                key: alias.to_string(),
            }
            .into()
        })
    }

    /// Host positions, optionally including group header records.
    pub fn iter_hosts(&self, include_group_headers: bool) -> Result<Vec<usize>> {
        let n = self.no_of_hosts()?;
        let mut out = Vec::with_capacity(n);
        for pos in 0..n {
            if include_group_headers || !self.host(pos)?.is_group_header() {
                out.push(pos);
            }
        }
        Ok(out)
    }

    pub fn groups(&self) -> Result<Vec<GroupView>> {
        group::groups(self)
    }

    /// Atomically add to `total_file_counter`/`total_file_size` under TFC.
    pub fn add_tfc(&mut self, pos: usize, files: i32, bytes: i64) -> Result<()> {
        let _g = self.lock(pos, FsaRegion::Tfc)?;
        let mut h = self.host_mut(pos)?;
        h.set_total_file_counter(h.total_file_counter() + files);
        h.set_total_file_size(h.total_file_size() + bytes);
        Ok(())
    }

    /// Set or clear bits of `host_status` under HS; returns the old value.
    pub fn update_status(&mut self, pos: usize, set: u32, clear: u32) -> Result<u32> {
        let _g = self.lock(pos, FsaRegion::Hs)?;
        let mut h = self.host_mut(pos)?;
        let old = h.host_status();
        h.set_host_status((old & !clear) | set);
        Ok(old)
    }

    pub fn flush(&self) {
        self.map.flush();
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::table::IdFile;

    fn init_host(h: &mut HostRec<&mut [u8]>, alias: &str, allowed: i32) {
        h.set_host_alias(alias);
        h.set_real_hostname(0, alias);
        h.set_host_id(crate::util::checksum_str(alias));
        h.set_allowed_transfers(allowed);
        h.set_max_errors(3);
        h.set_retry_interval(60);
        h.set_transfer_timeout(120);
        h.set_protocol(LOC | SEND_FLAG);
        h.init_slots();
    }

    /// Build a committed FSA generation with the given aliases.
    pub fn make_fsa(fifodir: &Path, aliases: &[&str], allowed: i32) -> Fsa {
        std::fs::create_dir_all(fifodir).unwrap();
        let id = IdFile::open(&fifodir.join(FSA_ID_FILE)).unwrap();
        let lock = id.lock_exclusive().unwrap();
        let old = table::attach_locked(&id, fifodir, FSA_FILES, FSA_SPEC, Access::Active).unwrap();
        let mut ng =
            table::NewGeneration::create(&id, &lock, fifodir, FSA_FILES, FSA_SPEC, aliases.len()).unwrap();
        for (pos, a) in aliases.iter().enumerate() {
            init_host(&mut HostRec::new(ng.mapping.record_mut(pos).unwrap()), a, allowed);
        }
        let m = ng.commit(&id, &lock, old).unwrap();
        Fsa::from_mapping(fifodir, m)
    }

    /// Commit the next generation listing `aliases` in that order. Hosts
    /// already present keep their record byte for byte, slots included.
    pub fn reload_fsa(fifodir: &Path, aliases: &[&str]) {
        let id = IdFile::open(&fifodir.join(FSA_ID_FILE)).unwrap();
        let lock = id.lock_exclusive().unwrap();
        let prev = table::attach_locked(&id, fifodir, FSA_FILES, FSA_SPEC, Access::Active)
            .unwrap()
            .map(|m| Fsa::from_mapping(fifodir, m))
            .unwrap();
        let mut ng =
            table::NewGeneration::create(&id, &lock, fifodir, FSA_FILES, FSA_SPEC, aliases.len()).unwrap();
        for (pos, a) in aliases.iter().enumerate() {
            let dst = ng.mapping.record_mut(pos).unwrap();
            match prev.position(a).unwrap() {
                Some(p) => dst.copy_from_slice(prev.mapping().record(p).unwrap()),
                None => init_host(&mut HostRec::new(dst), a, 2),
            }
        }
        ng.commit(&id, &lock, Some(prev.into_mapping())).unwrap();
    }
}
