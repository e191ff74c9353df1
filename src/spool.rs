//! Outgoing spool roots.
//!
//! Root 0 is `<work>/files/outgoing`. Each extra work dir gets a root
//! `<work>/files/outgoing/<mount-id hex>` (a link to the extra dir's own
//! outgoing tree), where the mount id is the extra dir's device number.
//! A watched directory uses the root whose device it shares.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::AfdConfig;
use crate::message::MsgName;
use crate::paths::WorkDir;
use crate::util::device_of;

#[derive(Debug, Clone)]
pub struct SpoolRoots {
    main: PathBuf,
    main_dev: Option<u64>,
    /// `(mount_id, device, root)` per extra work dir, in config order.
    extra: Vec<(u32, u64, PathBuf)>,
}

impl SpoolRoots {
    /// Main spool only.
    pub fn single(work: &WorkDir) -> Self {
        let main = work.outgoing();
        let main_dev = device_of(&main).ok();
        Self {
            main,
            main_dev,
            extra: Vec::new(),
        }
    }

    /// Main spool plus every configured extra work dir (linked in on the way).
    pub fn from_config(work: &WorkDir, cfg: &AfdConfig) -> Result<Self> {
        let mut roots = Self::single(work);
        for dir in &cfg.extra_work_dirs {
            let dev = match device_of(dir) {
                Ok(d) => d,
                Err(e) => {
                    log::warn!(target: "system", "extra work dir {}: {:#}", dir.display(), e);
                    continue;
                }
            };
            let mount_id = dev as u32;
            let root = work.attach_extra_work_dir(dir, mount_id)?;
            roots.extra.push((mount_id, dev, root));
        }
        Ok(roots)
    }

    /// Override the device recorded for the main spool.
    pub fn with_main_device(mut self, dev: Option<u64>) -> Self {
        self.main_dev = dev;
        self
    }

    pub fn main(&self) -> &Path {
        &self.main
    }

    /// Root by envelope `spool_no` (0 = main).
    pub fn root(&self, spool_no: u16) -> &Path {
        match spool_no {
            0 => &self.main,
            n => self
                .extra
                .get(n as usize - 1)
                .map(|(_, _, p)| p.as_path())
                .unwrap_or(&self.main),
        }
    }

    /// Extra work dir index for a directory on device `dev`.
    pub fn index_for_device(&self, dev: u64) -> Option<usize> {
        self.extra.iter().position(|(_, d, _)| *d == dev)
    }

    pub fn main_device(&self) -> Option<u64> {
        self.main_dev
    }

    pub fn mount_ids(&self) -> Vec<u32> {
        self.extra.iter().map(|(m, _, _)| *m).collect()
    }

    /// `spool_no` for FRA `ewl_pos`.
    pub fn spool_no(ewl_pos: Option<usize>) -> u16 {
        ewl_pos.map(|i| i as u16 + 1).unwrap_or(0)
    }

    pub fn message_dir(&self, spool_no: u16, name: &MsgName) -> PathBuf {
        self.root(spool_no).join(name.to_string())
    }
}
