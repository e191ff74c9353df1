//! Filling message directories in the outgoing spool.
//!
//! One `MessageBuilder` per job and scan. A message is closed when the
//! next file would exceed `max_copied_files` or `max_copied_file_size`;
//! the following message gets the next split number.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::message::MsgName;
use crate::spool::SpoolRoots;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenMsg {
    pub name: MsgName,
    pub dir: PathBuf,
    pub files: u32,
    pub bytes: u64,
}

pub struct MessageBuilder<'a> {
    spool: &'a SpoolRoots,
    spool_no: u16,
    job_id: u32,
    dir_id: u32,
    creation_time: i64,
    unique: u32,
    max_files: u32,
    max_size: u64,
    link: bool,
    split: u32,
    current: Option<OpenMsg>,
    /// A cap was hit at least once.
    pub split_happened: bool,
}

impl<'a> MessageBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spool: &'a SpoolRoots,
        spool_no: u16,
        job_id: u32,
        dir_id: u32,
        creation_time: i64,
        unique: u32,
        max_files: i32,
        max_size: i64,
        link: bool,
    ) -> Self {
        Self {
            spool,
            spool_no,
            job_id,
            dir_id,
            creation_time,
            unique,
            max_files: max_files.max(1) as u32,
            max_size: max_size.max(1) as u64,
            link,
            split: 0,
            current: None,
            split_happened: false,
        }
    }

    fn open_new(&mut self) -> Result<()> {
        let name = MsgName {
            job_id: self.job_id,
            dir_id: self.dir_id,
            creation_time: self.creation_time,
            unique: self.unique,
            split: self.split,
        };
        self.split += 1;
        let dir = self.spool.message_dir(self.spool_no, &name);
        fs::create_dir_all(&dir).with_context(|| format!("create message dir {}", dir.display()))?;
        self.current = Some(OpenMsg {
            name,
            dir,
            files: 0,
            bytes: 0,
        });
        Ok(())
    }

    /// Put `src` (named `name`, `size` bytes) into the current message.
    /// Returns the message that had to be closed to make room.
    pub fn add(&mut self, src: &Path, name: &str, size: u64) -> Result<Option<OpenMsg>> {
        let mut closed = None;
        if let Some(cur) = &self.current {
            if cur.files >= self.max_files || (cur.files > 0 && cur.bytes + size > self.max_size) {
                closed = self.current.take();
                self.split_happened = true;
            }
        }
        if self.current.is_none() {
            self.open_new()?;
        }
        let Some(cur) = self.current.as_mut() else {
            return Ok(closed);
        };
        let dst = cur.dir.join(name);
        place(src, &dst, self.link)?;
        cur.files += 1;
        cur.bytes += size;
        Ok(closed)
    }

    pub fn finish(self) -> Option<OpenMsg> {
        self.current.filter(|m| m.files > 0)
    }
}

/// Hardlink when allowed, else copy. A failed link across devices falls
/// back to a copy.
pub fn place(src: &Path, dst: &Path, link: bool) -> Result<()> {
    if link {
        match fs::hard_link(src, dst) {
            Ok(()) => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                log::debug!(target: "receive", "{} not on spool device, copying", src.display());
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(dst)?;
                fs::hard_link(src, dst).with_context(|| format!("link {}", src.display()))?;
                return Ok(());
            }
            Err(e) => return Err(e).with_context(|| format!("link {} -> {}", src.display(), dst.display())),
        }
    }
    fs::copy(src, dst).with_context(|| format!("copy {} -> {}", src.display(), dst.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::WorkDir;

    #[test]
    fn caps_split_messages() {
        let root = std::env::temp_dir().join(format!("afd-msgdir-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let work = WorkDir::new(&root);
        work.create_tree().unwrap();
        let src = root.join("src");
        fs::create_dir_all(&src).unwrap();
        for n in ["a", "b", "c"] {
            fs::write(src.join(n), b"12345").unwrap();
        }
        let spool = SpoolRoots::single(&work);
        let mut b = MessageBuilder::new(&spool, 0, 0xa, 0x1, 100, 7, 2, 1 << 20, true);
        assert!(b.add(&src.join("a"), "a", 5).unwrap().is_none());
        assert!(b.add(&src.join("b"), "b", 5).unwrap().is_none());
        let first = b.add(&src.join("c"), "c", 5).unwrap().unwrap();
        assert_eq!((first.files, first.bytes, first.name.split), (2, 10, 0));
        assert!(b.split_happened);
        let last = b.finish().unwrap();
        assert_eq!((last.files, last.name.split), (1, 1));
        assert!(last.dir.join("c").exists());
        assert!(last.dir.ends_with("outgoing/a/1/64_7_1"));

        let mut b = MessageBuilder::new(&spool, 0, 0xb, 0x1, 100, 8, 100, 8, false);
        b.add(&src.join("a"), "a", 5).unwrap();
        let closed = b.add(&src.join("b"), "b", 5).unwrap();
        assert_eq!(closed.map(|m| m.files), Some(1));
        fs::remove_dir_all(&root).unwrap();
    }
}
