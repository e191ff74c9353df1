//! Work tree layout.
//!
//! ```text
//! <work>/fifodir/   fifos, fsa.id, fsa.<gen>, fra.id, fra.<gen>, catalogs
//! <work>/etc/       afdconfig, dir_config, host_config, bul_config, rep_config, action/
//! <work>/log/       event.log
//! <work>/files/outgoing/[<mount-id>/]<job>/<dir>/<msg>/
//! <work>/files/store/{dupcheck,double}/
//! ```

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::consts::*;

pub const WORK_DIR_ENV: &str = "AFD_WORK_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `-w <path>` wins over `AFD_WORK_DIR`.
    pub fn resolve(arg: Option<PathBuf>) -> Result<Self> {
        if let Some(p) = arg {
            return Ok(Self::new(p));
        }
        match std::env::var(WORK_DIR_ENV) {
            Ok(v) if !v.trim().is_empty() => Ok(Self::new(v.trim())),
            _ => Err(anyhow!(
                "no work directory: pass -w <path> or set {}",
                WORK_DIR_ENV
            )),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fifodir(&self) -> PathBuf {
        self.root.join(FIFO_DIR)
    }

    pub fn etc(&self) -> PathBuf {
        self.root.join(ETC_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn outgoing(&self) -> PathBuf {
        self.root.join(FILES_DIR).join(OUTGOING_DIR)
    }

    pub fn store(&self) -> PathBuf {
        self.root.join(FILES_DIR).join(STORE_DIR)
    }

    pub fn dupcheck_dir(&self) -> PathBuf {
        self.store().join("dupcheck")
    }

    pub fn double_dir(&self) -> PathBuf {
        self.store().join("double")
    }

    pub fn ls_data_dir(&self) -> PathBuf {
        self.fifodir().join(LS_DATA_DIR)
    }

    pub fn action_dir(&self) -> PathBuf {
        self.etc().join(ACTION_DIR)
    }

    pub fn fifo(&self, name: &str) -> PathBuf {
        self.fifodir().join(name)
    }

    pub fn etc_file(&self, name: &str) -> PathBuf {
        self.etc().join(name)
    }

    pub fn event_log(&self) -> PathBuf {
        self.log_dir().join(EVENT_LOG_FILE)
    }

    /// Spool root for a directory: the mount subtree of its extra work dir,
    /// or the plain outgoing dir.
    pub fn spool_root(&self, mount_id: Option<u32>) -> PathBuf {
        match mount_id {
            Some(id) => self.outgoing().join(format!("{:x}", id)),
            None => self.outgoing(),
        }
    }

    /// Create every directory of the tree (idempotent).
    pub fn create_tree(&self) -> Result<()> {
        let dirs = [
            self.fifodir(),
            self.ls_data_dir(),
            self.etc(),
            self.log_dir(),
            self.outgoing(),
            self.dupcheck_dir(),
            self.double_dir(),
        ];
        for d in dirs.iter() {
            std::fs::create_dir_all(d).with_context(|| format!("create {}", d.display()))?;
        }
        for side in ["target", "source"] {
            for kind in ["start", "stop", "warn", "stop_warn", "success", "error"] {
                let d = self.action_dir().join(side).join(kind);
                std::fs::create_dir_all(&d).with_context(|| format!("create {}", d.display()))?;
            }
        }
        Ok(())
    }

    /// Link `<outgoing>/<mount-id>` to `<extra>/files/outgoing` so the whole
    /// spool is visible under one tree.
    pub fn attach_extra_work_dir(&self, extra: &Path, mount_id: u32) -> Result<PathBuf> {
        let target = extra.join(FILES_DIR).join(OUTGOING_DIR);
        std::fs::create_dir_all(&target)
            .with_context(|| format!("create {}", target.display()))?;
        let link = self.spool_root(Some(mount_id));
        if std::fs::symlink_metadata(&link).is_err() {
            std::os::unix::fs::symlink(&target, &link).with_context(|| {
                format!("symlink {} -> {}", link.display(), target.display())
            })?;
        }
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_layout() {
        let root = std::env::temp_dir().join(format!("afd-paths-{}", std::process::id()));
        let w = WorkDir::new(&root);
        w.create_tree().unwrap();
        assert!(w.fifodir().is_dir());
        assert!(w.action_dir().join("target/stop_warn").is_dir());
        assert_eq!(w.spool_root(Some(0x2a)), root.join("files/outgoing/2a"));
        assert_eq!(w.fifo(MSG_FIFO), root.join("fifodir/msg.fifo"));
        let _ = std::fs::remove_dir_all(&root);
    }
}
