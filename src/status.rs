//! Process-wide status record (`afd.status`).
//!
//! ```text
//!  0 i64 start_time   8 i64 jobs_in_queue  16 u64 fd_fork_counter  24 i64 last_reread
//! 32 i32 pid[amg, fd, afd_worker, atpd, wmod]  52 i32 no_of_transfers
//! 56 u8  state[amg, fd, afd_worker, atpd, wmod, sys_log]
//! ```

use anyhow::Result;
use std::path::Path;

use crate::consts::*;
use crate::table::view::record_fields;
use crate::table::{Access, Mapping, TableSpec};

pub const STATUS_RECORD_SIZE: usize = 64;

pub const STATUS_SPEC: TableSpec = TableSpec {
    name: "AFD_STATUS",
    record_size: STATUS_RECORD_SIZE,
    version: CURRENT_STATUS_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Amg,
    Fd,
    AfdWorker,
    Atpd,
    Wmod,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Amg,
        Component::Fd,
        Component::AfdWorker,
        Component::Atpd,
        Component::Wmod,
    ];

    fn index(self) -> usize {
        match self {
            Component::Amg => 0,
            Component::Fd => 1,
            Component::AfdWorker => 2,
            Component::Atpd => 3,
            Component::Wmod => 4,
        }
    }

    pub fn binary(self) -> &'static str {
        match self {
            Component::Amg => "amg",
            Component::Fd => "fd",
            Component::AfdWorker => "afd_worker",
            Component::Atpd => "atpd",
            Component::Wmod => "wmod",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

struct StatusRec<B> {
    buf: B,
}

record_fields!(StatusRec {
    start_time, set_start_time: i64 = 0;
    jobs_in_queue, set_jobs_in_queue: i64 = 8;
    fd_fork_counter, set_fd_fork_counter: u64 = 16;
    last_reread, set_last_reread: i64 = 24;
    no_of_transfers, set_no_of_transfers: i32 = 52;
    sys_log, set_sys_log: u8 = 61;
});

const OFF_PID: usize = 32;
const OFF_STATE: usize = 56;

pub struct AfdStatus {
    map: Mapping,
}

impl AfdStatus {
    pub fn attach(fifodir: &Path, access: Access) -> Result<Self> {
        let map = Mapping::open(&fifodir.join(STATUS_FILE), STATUS_SPEC, access)?;
        Ok(Self { map })
    }

    /// Attach, creating a zeroed record when the file does not exist yet.
    pub fn open_or_create(fifodir: &Path) -> Result<Self> {
        let path = fifodir.join(STATUS_FILE);
        if !path.exists() {
            let m = Mapping::create(&path, STATUS_SPEC, 1, 0)?;
            m.flush();
        }
        Self::attach(fifodir, Access::Active)
    }

    fn rec(&self) -> Result<StatusRec<&[u8]>> {
        Ok(StatusRec {
            buf: self.map.record(0)?,
        })
    }

    fn rec_mut(&mut self) -> Result<StatusRec<&mut [u8]>> {
        Ok(StatusRec {
            buf: self.map.record_mut(0)?,
        })
    }

    pub fn start_time(&self) -> Result<i64> {
        Ok(self.rec()?.start_time())
    }

    pub fn set_start_time(&mut self, t: i64) -> Result<()> {
        self.rec_mut()?.set_start_time(t);
        Ok(())
    }

    pub fn jobs_in_queue(&self) -> Result<i64> {
        Ok(self.rec()?.jobs_in_queue())
    }

    pub fn set_jobs_in_queue(&mut self, n: i64) -> Result<()> {
        self.rec_mut()?.set_jobs_in_queue(n);
        Ok(())
    }

    pub fn fd_fork_counter(&self) -> Result<u64> {
        Ok(self.rec()?.fd_fork_counter())
    }

    pub fn bump_fork_counter(&mut self) -> Result<()> {
        let mut r = self.rec_mut()?;
        r.set_fd_fork_counter(r.fd_fork_counter().wrapping_add(1));
        Ok(())
    }

    pub fn last_reread(&self) -> Result<i64> {
        Ok(self.rec()?.last_reread())
    }

    pub fn set_last_reread(&mut self, t: i64) -> Result<()> {
        self.rec_mut()?.set_last_reread(t);
        Ok(())
    }

    pub fn no_of_transfers(&self) -> Result<i32> {
        Ok(self.rec()?.no_of_transfers())
    }

    pub fn set_no_of_transfers(&mut self, n: i32) -> Result<()> {
        self.rec_mut()?.set_no_of_transfers(n);
        Ok(())
    }

    pub fn pid(&self, c: Component) -> Result<i32> {
        let b = self.map.record(0)?;
        let off = OFF_PID + c.index() * 4;
        Ok(i32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]]))
    }

    pub fn set_pid(&mut self, c: Component, pid: i32) -> Result<()> {
        let b = self.map.record_mut(0)?;
        let off = OFF_PID + c.index() * 4;
        b[off..off + 4].copy_from_slice(&pid.to_le_bytes());
        Ok(())
    }

    pub fn state(&self, c: Component) -> Result<u8> {
        Ok(self.map.record(0)?[OFF_STATE + c.index()])
    }

    pub fn set_state(&mut self, c: Component, state: u8) -> Result<()> {
        self.map.record_mut(0)?[OFF_STATE + c.index()] = state;
        Ok(())
    }

    pub fn is_running(&self, c: Component) -> Result<bool> {
        Ok(self.state(c)? == ON)
    }

    pub fn sys_log_state(&self) -> Result<u8> {
        Ok(self.rec()?.sys_log())
    }

    pub fn set_sys_log_state(&mut self, state: u8) -> Result<()> {
        self.rec_mut()?.set_sys_log(state);
        Ok(())
    }

    pub fn flush(&self) {
        self.map.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_persist_across_attach() {
        let d = std::env::temp_dir().join(format!("afd-status-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&d);
        std::fs::create_dir_all(&d).unwrap();
        {
            let mut st = AfdStatus::open_or_create(&d).unwrap();
            st.set_pid(Component::Fd, 4242).unwrap();
            st.set_state(Component::Fd, ON).unwrap();
            st.set_jobs_in_queue(17).unwrap();
            st.bump_fork_counter().unwrap();
            st.flush();
        }
        let st = AfdStatus::attach(&d, Access::Passive).unwrap();
        assert_eq!(st.pid(Component::Fd).unwrap(), 4242);
        assert!(st.is_running(Component::Fd).unwrap());
        assert!(!st.is_running(Component::Amg).unwrap());
        assert_eq!(st.jobs_in_queue().unwrap(), 17);
        assert_eq!(st.fd_fork_counter().unwrap(), 1);
    }
}
