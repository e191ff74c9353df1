//! Local-filesystem pseudo protocol (`file://<alias>/<path>`).
//!
//! Files are written as `.<name>` and renamed when complete unless the
//! job carries `lock OFF`. `create target dir` creates a missing target.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use super::transport::{TResult, TransferError, Transport};
use crate::catalog::JobDef;
use crate::exit::*;

#[derive(Default)]
pub struct LocalTransport {
    target: PathBuf,
    dot_lock: bool,
    current: Option<(File, PathBuf, PathBuf)>,
}

/// Target directory of a `file://` recipient.
pub fn target_dir(recipient: &str) -> TResult<PathBuf> {
    let url = url::Url::parse(recipient)
        .map_err(|e| TransferError::new(SYNTAX_ERROR, format!("recipient {}: {}", recipient, e)))?;
    if url.scheme() != "file" {
        return Err(TransferError::new(
            TYPE_ERROR,
            format!("{} is not a local recipient", recipient),
        ));
    }
    let path = url.path();
    if path.is_empty() {
        return Err(TransferError::new(SYNTAX_ERROR, format!("recipient {} has no path", recipient)));
    }
    Ok(PathBuf::from(path))
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for LocalTransport {
    fn connect(&mut self, job: &JobDef, _hostname: &str) -> TResult<()> {
        self.target = target_dir(&job.recipient)?;
        self.dot_lock = !job
            .soptions
            .iter()
            .any(|o| o.trim().eq_ignore_ascii_case("lock off"));
        let create = job
            .soptions
            .iter()
            .any(|o| o.trim().eq_ignore_ascii_case("create target dir"));
        if !self.target.is_dir() {
            if create {
                std::fs::create_dir_all(&self.target)
                    .map_err(|e| TransferError::io(CHDIR_ERROR, &self.target.display().to_string(), e))?;
            } else {
                return Err(TransferError::new(
                    CHDIR_ERROR,
                    format!("target {} is not a directory", self.target.display()),
                ));
            }
        }
        Ok(())
    }

    fn open_file(&mut self, name: &str, _size: u64) -> TResult<()> {
        let fin = self.target.join(name);
        let tmp = if self.dot_lock {
            self.target.join(format!(".{}", name))
        } else {
            fin.clone()
        };
        let f = File::create(&tmp).map_err(|e| TransferError::io(OPEN_REMOTE_ERROR, &tmp.display().to_string(), e))?;
        self.current = Some((f, tmp, fin));
        Ok(())
    }

    fn write_block(&mut self, data: &[u8]) -> TResult<()> {
        match self.current.as_mut() {
            Some((f, tmp, _)) => f
                .write_all(data)
                .map_err(|e| TransferError::io(WRITE_REMOTE_ERROR, &tmp.display().to_string(), e)),
            None => Err(TransferError::new(WRITE_REMOTE_ERROR, "no file open")),
        }
    }

    fn close_file(&mut self) -> TResult<()> {
        let (f, tmp, fin) = self
            .current
            .take()
            .ok_or_else(|| TransferError::new(CLOSE_REMOTE_ERROR, "no file open"))?;
        f.sync_all()
            .map_err(|e| TransferError::io(CLOSE_REMOTE_ERROR, &tmp.display().to_string(), e))?;
        drop(f);
        if tmp != fin {
            std::fs::rename(&tmp, &fin)
                .map_err(|e| TransferError::io(MOVE_REMOTE_ERROR, &fin.display().to_string(), e))?;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some((_, tmp, fin)) = self.current.take() {
            if tmp != fin {
                let _ = std::fs::remove_file(&tmp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_paths() {
        assert_eq!(target_dir("file://h1/tmp/out").unwrap(), PathBuf::from("/tmp/out"));
        assert_eq!(target_dir("file:///var/x").unwrap(), PathBuf::from("/var/x"));
        assert_eq!(target_dir("ftp://u@h/x").unwrap_err().code, TYPE_ERROR);
    }

    #[test]
    fn dot_locked_write() {
        let d = std::env::temp_dir().join(format!("afd-loc-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&d);
        let job = JobDef {
            recipient: format!("file://h{}", d.display()),
            soptions: vec!["create target dir".into()],
            ..Default::default()
        };
        let mut t = LocalTransport::new();
        t.connect(&job, "h").unwrap();
        t.open_file("a.txt", 3).unwrap();
        t.write_block(b"abc").unwrap();
        assert!(d.join(".a.txt").exists());
        t.close_file().unwrap();
        t.disconnect();
        assert_eq!(std::fs::read(d.join("a.txt")).unwrap(), b"abc");
        assert!(!d.join(".a.txt").exists());
    }
}
