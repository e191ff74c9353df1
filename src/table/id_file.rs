//! The single-int generation file (`fsa.id`, `fra.id`).
//!
//! fs2 advisory locks on the whole file:
//! - shared while a process reads the id and maps the generation;
//! - exclusive while the config builder creates and flips a generation.
//!
//! The lock is released when the `IdLock` guard drops.

use anyhow::{anyhow, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub struct IdFile {
    path: PathBuf,
    file: File,
}

pub struct IdLock {
    file: File,
    exclusive: bool,
}

impl IdLock {
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for IdLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl IdFile {
    /// Open (creating if necessary) the ID file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open id file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_shared(&self) -> Result<IdLock> {
        let file = self.file.try_clone()?;
        file.lock_shared()
            .with_context(|| format!("lock_shared {}", self.path.display()))?;
        Ok(IdLock {
            file,
            exclusive: false,
        })
    }

    pub fn lock_exclusive(&self) -> Result<IdLock> {
        let file = self.file.try_clone()?;
        file.lock_exclusive()
            .with_context(|| format!("lock_exclusive {}", self.path.display()))?;
        Ok(IdLock {
            file,
            exclusive: true,
        })
    }

    /// Current generation, `None` if the file was never written.
    pub fn read_generation(&self) -> Result<Option<i32>> {
        let len = self.file.metadata()?.len();
        if len == 0 {
            return Ok(None);
        }
        if len < 4 {
            return Err(anyhow!(
                "id file {} is truncated ({} bytes)",
                self.path.display(),
                len
            ));
        }
        let mut f = &self.file;
        f.seek(SeekFrom::Start(0))?;
        let gen = f
            .read_i32::<LittleEndian>()
            .with_context(|| format!("read id file {}", self.path.display()))?;
        Ok(Some(gen))
    }

    /// Flip to `gen`. The caller holds the exclusive lock.
    pub fn write_generation(&self, lock: &IdLock, gen: i32) -> Result<()> {
        if !lock.is_exclusive() {
            return Err(anyhow!(
                "writing {} requires the exclusive lock",
                self.path.display()
            ));
        }
        let mut f = &self.file;
        f.seek(SeekFrom::Start(0))?;
        f.write_i32::<LittleEndian>(gen)
            .with_context(|| format!("write id file {}", self.path.display()))?;
        self.file.set_len(4)?;
        self.file
            .sync_all()
            .with_context(|| format!("sync id file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_roundtrip() {
        let dir = std::env::temp_dir().join(format!(
            "afd-idfile-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let id = IdFile::open(&dir.join("fsa.id")).unwrap();
        assert_eq!(id.read_generation().unwrap(), None);

        {
            let shared = id.lock_shared().unwrap();
            assert!(id.write_generation(&shared, 1).is_err());
        }
        let lock = id.lock_exclusive().unwrap();
        id.write_generation(&lock, 41).unwrap();
        id.write_generation(&lock, 42).unwrap();
        drop(lock);
        assert_eq!(id.read_generation().unwrap(), Some(42));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
