//! Memory-mapped data file with the common header prefix.
//!
//! Life cycle:
//! - `create`  writes the complete zero-filled file (4 KiB chunks, never a
//!   sparse seek+byte), so a full filesystem fails here and not on a later
//!   store through the mapping;
//! - `open`    validates the header (stale marker, struct version) and maps;
//! - `detach`  flushes best-effort and unmaps.
//!
//! Every accessor re-checks the stale marker. Once `-1` has been seen the
//! mapping only answers `TableError::Stale`.

use anyhow::{anyhow, Context, Result};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::header::{read_entries, write_entries, TableHeader};
use super::lock::{lock_byte, lock_regions, LockRegion, RecordLock};
use crate::consts::{AFD_WORD_OFFSET, STALE};
use crate::error::TableError;

/// Static description of one table kind.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    /// Size of one record; 0 for tables with a variable body (FMD).
    pub record_size: usize,
    pub version: u8,
}

impl TableSpec {
    pub fn file_len(&self, entries: usize, body_len: usize) -> usize {
        if self.record_size == 0 {
            AFD_WORD_OFFSET + body_len
        } else {
            AFD_WORD_OFFSET + entries * self.record_size
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only attach; monitoring tools read without locks.
    Passive,
    /// Write-capable attach.
    Active,
}

enum Map {
    Ro(Mmap),
    Rw(MmapMut),
}

impl Map {
    fn bytes(&self) -> &[u8] {
        match self {
            Map::Ro(m) => &m[..],
            Map::Rw(m) => &m[..],
        }
    }
}

const ZERO_CHUNK: usize = 4096;

pub struct Mapping {
    spec: TableSpec,
    path: PathBuf,
    file: File,
    map: Map,
    access: Access,
    generation: Option<i32>,
    stale: bool,
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("table", &self.spec.name)
            .field("path", &self.path)
            .field("generation", &self.generation)
            .field("len", &self.map.bytes().len())
            .field("stale", &self.stale)
            .finish()
    }
}

impl Mapping {
    /// Write a fresh table file: header + zero-filled body, then map it rw.
    pub fn create(path: &Path, spec: TableSpec, entries: usize, body_len: usize) -> Result<Self> {
        let total = spec.file_len(entries, body_len);
        let mut f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("create {} file {}", spec.name, path.display()))?;

        let hdr = TableHeader::new(entries as i32, spec.version);
        f.write_all(&hdr.to_bytes())
            .with_context(|| format!("write {} header {}", spec.name, path.display()))?;
        let chunk = [0u8; ZERO_CHUNK];
        let mut written = AFD_WORD_OFFSET;
        while written < total {
            let n = std::cmp::min(ZERO_CHUNK, total - written);
            f.write_all(&chunk[..n]).with_context(|| {
                format!(
                    "zero-fill {} file {} ({} of {} bytes)",
                    spec.name,
                    path.display(),
                    written,
                    total
                )
            })?;
            written += n;
        }
        f.sync_all()?;

        // SAFETY: the file is exclusively ours until the generation is published.
        let map = unsafe {
            MmapOptions::new()
                .len(total)
                .map_mut(&f)
                .with_context(|| format!("mmap {} {}", spec.name, path.display()))?
        };
        Ok(Self {
            spec,
            path: path.to_path_buf(),
            file: f,
            map: Map::Rw(map),
            access: Access::Active,
            generation: None,
            stale: false,
        })
    }

    /// Map an existing table file and validate its header.
    pub fn open(path: &Path, spec: TableSpec, access: Access) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true);
        if access == Access::Active {
            opts.write(true);
        }
        let f = opts
            .open(path)
            .with_context(|| format!("open {} {}", spec.name, path.display()))?;
        let len = f.metadata()?.len() as usize;
        if len < AFD_WORD_OFFSET {
            return Err(anyhow!(
                "{} file {} too small ({} bytes)",
                spec.name,
                path.display(),
                len
            ));
        }

        // SAFETY: shared mapping of a file all participants treat as the
        // common status table; concurrent writers follow the lock protocol.
        let map = unsafe {
            match access {
                Access::Passive => Map::Ro(
                    MmapOptions::new()
                        .len(len)
                        .map(&f)
                        .with_context(|| format!("mmap {} {}", spec.name, path.display()))?,
                ),
                Access::Active => Map::Rw(
                    MmapOptions::new()
                        .len(len)
                        .map_mut(&f)
                        .with_context(|| format!("mmap {} {}", spec.name, path.display()))?,
                ),
            }
        };

        let hdr = TableHeader::read(map.bytes());
        if hdr.is_stale() {
            return Err(TableError::Stale(path.display().to_string()).into());
        }
        if hdr.struct_version != spec.version {
            return Err(TableError::IncorrectVersion {
                name: format!("{} {}", spec.name, path.display()),
                found: hdr.struct_version,
                expected: spec.version,
            }
            .into());
        }
        let need = spec.file_len(hdr.no_of_entries.max(0) as usize, 0);
        if spec.record_size > 0 && len < need {
            return Err(anyhow!(
                "{} file {} truncated: {} entries need {} bytes, have {}",
                spec.name,
                path.display(),
                hdr.no_of_entries,
                need,
                len
            ));
        }

        Ok(Self {
            spec,
            path: path.to_path_buf(),
            file: f,
            map,
            access,
            generation: None,
            stale: false,
        })
    }

    pub fn with_generation(mut self, gen: i32) -> Self {
        self.generation = Some(gen);
        self
    }

    pub fn generation(&self) -> Option<i32> {
        self.generation
    }

    pub fn spec(&self) -> TableSpec {
        self.spec
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn mapped_len(&self) -> usize {
        self.map.bytes().len()
    }

    /// Header as currently stored (no stale check).
    pub fn header(&self) -> TableHeader {
        TableHeader::read(self.map.bytes())
    }

    /// Re-check the stale marker.
    pub fn check(&mut self) -> Result<()> {
        if self.stale || read_entries(self.map.bytes()) == STALE {
            self.stale = true;
            return Err(TableError::Stale(self.path.display().to_string()).into());
        }
        Ok(())
    }

    pub fn is_stale(&self) -> bool {
        self.stale || read_entries(self.map.bytes()) == STALE
    }

    /// Number of live entries.
    pub fn entries(&self) -> Result<usize> {
        let n = read_entries(self.map.bytes());
        if self.stale || n == STALE {
            return Err(TableError::Stale(self.path.display().to_string()).into());
        }
        Ok(n.max(0) as usize)
    }

    pub fn bytes(&self) -> Result<&[u8]> {
        if self.is_stale() {
            return Err(TableError::Stale(self.path.display().to_string()).into());
        }
        Ok(self.map.bytes())
    }

    pub fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        if self.is_stale() {
            return Err(TableError::Stale(self.path.display().to_string()).into());
        }
        match &mut self.map {
            Map::Rw(m) => Ok(&mut m[..]),
            Map::Ro(_) => Err(TableError::ReadOnly(self.path.display().to_string()).into()),
        }
    }

    /// Body after the header.
    pub fn body(&self) -> Result<&[u8]> {
        Ok(&self.bytes()?[AFD_WORD_OFFSET..])
    }

    pub fn body_mut(&mut self) -> Result<&mut [u8]> {
        Ok(&mut self.bytes_mut()?[AFD_WORD_OFFSET..])
    }

    #[inline]
    pub fn record_offset(&self, pos: usize) -> usize {
        AFD_WORD_OFFSET + pos * self.spec.record_size
    }

    fn check_pos(&self, pos: usize) -> Result<()> {
        let n = self.entries()?;
        if pos >= n {
            return Err(TableError::OutOfRange {
                what: self.spec.name,
                pos,
                len: n,
            }
            .into());
        }
        Ok(())
    }

    pub fn record(&self, pos: usize) -> Result<&[u8]> {
        self.check_pos(pos)?;
        let off = self.record_offset(pos);
        let size = self.spec.record_size;
        Ok(&self.bytes()?[off..off + size])
    }

    pub fn record_mut(&mut self, pos: usize) -> Result<&mut [u8]> {
        self.check_pos(pos)?;
        let off = self.record_offset(pos);
        let size = self.spec.record_size;
        Ok(&mut self.bytes_mut()?[off..off + size])
    }

    /// Lock one region of record `pos`.
    pub fn lock<R: LockRegion>(&self, pos: usize, region: R) -> Result<RecordLock> {
        self.check_pos(pos)?;
        lock_byte(&self.file, (self.record_offset(pos) + region.offset()) as u64)
    }

    /// Lock several regions of record `pos` in rank order.
    pub fn lock_all<R: LockRegion>(&self, pos: usize, regions: &[R]) -> Result<Vec<RecordLock>> {
        self.check_pos(pos)?;
        lock_regions(&self.file, self.record_offset(pos) as u64, regions)
    }

    pub fn set_entries(&mut self, n: i32) -> Result<()> {
        let b = self.bytes_mut()?;
        write_entries(b, n);
        Ok(())
    }

    pub fn set_feature_flag(&mut self, flag: u8) -> Result<()> {
        let b = self.bytes_mut()?;
        b[crate::consts::HDR_OFF_FEATURE_FLAG] = flag;
        Ok(())
    }

    /// Put the `-1` marker into the header so every other participant
    /// re-attaches. The mapping itself becomes unusable.
    pub fn mark_stale(&mut self) -> Result<()> {
        match &mut self.map {
            Map::Rw(m) => {
                write_entries(&mut m[..], STALE);
                let _ = m.flush_range(0, AFD_WORD_OFFSET);
            }
            Map::Ro(_) => {
                return Err(TableError::ReadOnly(self.path.display().to_string()).into());
            }
        }
        self.stale = true;
        Ok(())
    }

    /// Grow (or shrink) a record table to `entries`; the mapping is replaced.
    pub fn resize(&mut self, entries: usize) -> Result<()> {
        if self.access != Access::Active {
            return Err(TableError::ReadOnly(self.path.display().to_string()).into());
        }
        self.check()?;
        let new_len = self.spec.file_len(entries, 0);
        let old_len = self.mapped_len();
        self.flush();
        if new_len > old_len {
            let mut f = &self.file;
            f.seek(SeekFrom::Start(old_len as u64))?;
            let chunk = [0u8; ZERO_CHUNK];
            let mut written = old_len;
            while written < new_len {
                let n = std::cmp::min(ZERO_CHUNK, new_len - written);
                f.write_all(&chunk[..n])
                    .with_context(|| format!("grow {} {}", self.spec.name, self.path.display()))?;
                written += n;
            }
        } else {
            self.file.set_len(new_len as u64)?;
        }
        // SAFETY: same file, same protocol as `open`.
        let map = unsafe {
            MmapOptions::new()
                .len(new_len)
                .map_mut(&self.file)
                .with_context(|| format!("remap {} {}", self.spec.name, self.path.display()))?
        };
        self.map = Map::Rw(map);
        self.set_entries(entries as i32)?;
        Ok(())
    }

    /// Best-effort msync.
    pub fn flush(&self) {
        if let Map::Rw(m) = &self.map {
            if let Err(e) = m.flush() {
                log::warn!("msync {} failed: {}", self.path.display(), e);
            }
        }
    }

    pub fn detach(self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: TableSpec = TableSpec {
        name: "TEST",
        record_size: 32,
        version: 7,
    };

    fn tmp(name: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!(
            "afd-map-{}-{}-{}",
            name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&d).unwrap();
        d.join("data")
    }

    #[test]
    fn create_open_and_stale() {
        let p = tmp("stale");
        {
            let mut m = Mapping::create(&p, SPEC, 3, 0).unwrap();
            assert_eq!(m.mapped_len(), AFD_WORD_OFFSET + 96);
            m.record_mut(2).unwrap()[0] = 0xAA;
            m.flush();
        }
        let mut reader = Mapping::open(&p, SPEC, Access::Passive).unwrap();
        assert_eq!(reader.entries().unwrap(), 3);
        assert_eq!(reader.record(2).unwrap()[0], 0xAA);
        assert!(reader.record(3).is_err());
        assert!(reader.bytes_mut().is_err());

        let mut writer = Mapping::open(&p, SPEC, Access::Active).unwrap();
        writer.mark_stale().unwrap();
        let err = reader.check().unwrap_err();
        assert!(crate::error::is_stale(&err));
        assert!(reader.record(0).is_err());
        assert!(Mapping::open(&p, SPEC, Access::Passive).is_err());
    }

    #[test]
    fn version_mismatch_is_refused() {
        let p = tmp("version");
        Mapping::create(&p, SPEC, 1, 0).unwrap();
        let other = TableSpec { version: 8, ..SPEC };
        let err = Mapping::open(&p, other, Access::Passive).unwrap_err();
        match err.downcast_ref::<TableError>() {
            Some(TableError::IncorrectVersion { found, expected, .. }) => {
                assert_eq!((*found, *expected), (7, 8));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn resize_keeps_records() {
        let p = tmp("resize");
        let mut m = Mapping::create(&p, SPEC, 1, 0).unwrap();
        m.record_mut(0).unwrap()[5] = 9;
        m.resize(4).unwrap();
        assert_eq!(m.entries().unwrap(), 4);
        assert_eq!(m.record(0).unwrap()[5], 9);
        assert_eq!(m.record(3).unwrap()[5], 0);
    }
}
