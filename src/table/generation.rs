//! Generational tables (FSA, FRA): `<base>.id` holds the current generation,
//! `<base>.<gen>` the data.
//!
//! Swap protocol:
//! 1. builder takes the exclusive ID lock,
//! 2. creates and fills `<base>.<gen+1>`,
//! 3. flips the ID file,
//! 4. marks the old mapping stale (`-1`) and unlinks the old data file.
//!
//! Readers that see `-1` re-run `attach`, which reads the new id under a
//! shared lock.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::id_file::{IdFile, IdLock};
use super::mapping::{Access, Mapping, TableSpec};
use crate::error::TableError;

#[derive(Debug, Clone, Copy)]
pub struct GenFiles {
    pub id_file: &'static str,
    pub base: &'static str,
}

pub fn data_path(dir: &Path, files: GenFiles, gen: i32) -> PathBuf {
    dir.join(format!("{}.{}", files.base, gen))
}

/// Attach the current generation (shared ID lock while reading the id).
pub fn attach(dir: &Path, files: GenFiles, spec: TableSpec, access: Access) -> Result<Mapping> {
    let id = IdFile::open(&dir.join(files.id_file))?;
    let _lock = id.lock_shared()?;
    match attach_locked(&id, dir, files, spec, access)? {
        Some(m) => Ok(m),
        None => Err(TableError::NotFound {
            what: spec.name,
            key: id.path().display().to_string(),
        }
        .into()),
    }
}

/// Attach while the caller already holds a lock on `id`.
pub fn attach_locked(
    id: &IdFile,
    dir: &Path,
    files: GenFiles,
    spec: TableSpec,
    access: Access,
) -> Result<Option<Mapping>> {
    let gen = match id.read_generation()? {
        Some(g) => g,
        None => return Ok(None),
    };
    let path = data_path(dir, files, gen);
    if !path.exists() {
        return Ok(None);
    }
    let m = Mapping::open(&path, spec, access)?;
    Ok(Some(m.with_generation(gen)))
}

/// A generation under construction. Dropping it without `commit` removes the
/// new file and leaves the previous generation untouched.
pub struct NewGeneration {
    dir: PathBuf,
    files: GenFiles,
    gen: i32,
    committed: bool,
    pub mapping: Mapping,
}

impl NewGeneration {
    /// Create `<base>.<current+1>`; requires the exclusive ID lock.
    pub fn create(
        id: &IdFile,
        _lock: &IdLock,
        dir: &Path,
        files: GenFiles,
        spec: TableSpec,
        entries: usize,
    ) -> Result<Self> {
        let gen = match id.read_generation()? {
            Some(g) => g.wrapping_add(1).max(0),
            None => 0,
        };
        let path = data_path(dir, files, gen);
        let mapping = Mapping::create(&path, spec, entries, 0)?.with_generation(gen);
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            gen,
            committed: false,
            mapping,
        })
    }

    pub fn generation(&self) -> i32 {
        self.gen
    }

    /// Flip the ID file, then retire `old` (stale marker + unlink).
    pub fn commit(mut self, id: &IdFile, lock: &IdLock, old: Option<Mapping>) -> Result<Mapping> {
        self.mapping.flush();
        id.write_generation(lock, self.gen)
            .with_context(|| format!("flip {} to generation {}", self.files.id_file, self.gen))?;
        self.committed = true;

        if let Some(mut old) = old {
            let old_path = old.path().to_path_buf();
            if let Err(e) = old.mark_stale() {
                log::warn!("mark {} stale: {:#}", old_path.display(), e);
            }
            old.detach();
            if old_path != self.mapping.path() {
                if let Err(e) = std::fs::remove_file(&old_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("unlink {}: {}", old_path.display(), e);
                    }
                }
            }
        }
        let gen = self.gen;
        let path = data_path(&self.dir, self.files, gen);
        log::debug!(
            "{} generation {} live at {}",
            self.files.base,
            gen,
            path.display()
        );
        // Hand the mapping out; Drop sees `committed` and leaves the file.
        let spec = self.mapping.spec();
        let placeholder = std::mem::replace(
            &mut self.mapping,
            Mapping::open(&path, spec, Access::Active)?.with_generation(gen),
        );
        Ok(placeholder)
    }
}

impl Drop for NewGeneration {
    fn drop(&mut self) {
        if !self.committed {
            let path = data_path(&self.dir, self.files, self.gen);
            let _ = std::fs::remove_file(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILES: GenFiles = GenFiles {
        id_file: "t.id",
        base: "t",
    };
    const SPEC: TableSpec = TableSpec {
        name: "T",
        record_size: 8,
        version: 1,
    };

    #[test]
    fn swap_marks_old_stale_and_bumps_id() {
        let dir = std::env::temp_dir().join(format!(
            "afd-gen-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let id = IdFile::open(&dir.join(FILES.id_file)).unwrap();

        {
            let lock = id.lock_exclusive().unwrap();
            let ng = NewGeneration::create(&id, &lock, &dir, FILES, SPEC, 2).unwrap();
            assert_eq!(ng.generation(), 0);
            ng.commit(&id, &lock, None).unwrap();
        }
        let mut reader = attach(&dir, FILES, SPEC, Access::Passive).unwrap();
        assert_eq!(reader.generation(), Some(0));

        {
            let lock = id.lock_exclusive().unwrap();
            let old = attach_locked(&id, &dir, FILES, SPEC, Access::Active)
                .unwrap()
                .unwrap();
            let ng = NewGeneration::create(&id, &lock, &dir, FILES, SPEC, 3).unwrap();
            let live = ng.commit(&id, &lock, Some(old)).unwrap();
            assert_eq!(live.generation(), Some(1));
        }
        assert!(crate::error::is_stale(&reader.check().unwrap_err()));
        assert!(!data_path(&dir, FILES, 0).exists());
        let fresh = attach(&dir, FILES, SPEC, Access::Passive).unwrap();
        assert_eq!(fresh.entries().unwrap(), 3);
        assert_eq!(id.read_generation().unwrap(), Some(1));
    }

    #[test]
    fn dropped_generation_leaves_old_intact() {
        let dir = std::env::temp_dir().join(format!(
            "afd-gen-drop-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let id = IdFile::open(&dir.join(FILES.id_file)).unwrap();
        let lock = id.lock_exclusive().unwrap();
        NewGeneration::create(&id, &lock, &dir, FILES, SPEC, 1)
            .unwrap()
            .commit(&id, &lock, None)
            .unwrap();
        {
            let _abandoned = NewGeneration::create(&id, &lock, &dir, FILES, SPEC, 5).unwrap();
        }
        assert!(!data_path(&dir, FILES, 1).exists());
        assert_eq!(id.read_generation().unwrap(), Some(0));
    }
}
