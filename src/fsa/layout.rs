//! FSA host record layout (struct version 3).
//!
//! ```text
//!   0  i64 total_file_size        8  u64 bytes_send          16 i64 last_connection
//!  24  i64 last_retry_time       32  i64 first_error_time    40 i64 start_event_handle
//!  48  i64 end_event_handle      56  i64 transfer_rate_limit 64 i64 trl_per_process
//!  72  i64 warn_time
//!  80  u32 host_id   84 protocol  88 protocol_options  92 protocol_options2
//!  96  u32 special_flag  100 host_status  104 i32 total_file_counter
//! 108  u32 file_counter_done  112 connections  116 i32 active_transfers
//! 120  i32 allowed_transfers  124 max_errors  128 error_counter  132 total_errors
//! 136  i32 block_size  140 socksnd  144 sockrcv  148 keep_connected  152 ttl
//! 156  i32 retry_interval  160 transfer_timeout  164 max_successful_retries
//! 168  i32 successful_retries  172 u32 jobs_queued
//! 176  u8[5] error_history (0 = newest)
//! 184  u8 host_toggle  185 auto_toggle  186 original_toggle_pos  187 toggle_pos
//! 192  host_alias[9]  host_dsp_name[10]  toggle_str[6]  real_hostname[2][70]  proxy_name[81]
//! 440  job_status[5] x 352
//! ```
//!
//! Lock bytes: CON at `active_transfers`, HS at `host_status`, TFC at
//! `total_file_counter`, EC at `error_counter`.

use crate::consts::*;
use crate::table::view::{align8, record_fields, record_strings};
use crate::table::LockRegion;

pub const OFF_HOST_ALIAS: usize = 192;
pub const LEN_HOST_ALIAS: usize = MAX_HOSTNAME_LENGTH + 1;
pub const OFF_HOST_DSP_NAME: usize = OFF_HOST_ALIAS + LEN_HOST_ALIAS;
pub const LEN_HOST_DSP_NAME: usize = MAX_HOSTNAME_LENGTH + 2;
pub const OFF_TOGGLE_STR: usize = OFF_HOST_DSP_NAME + LEN_HOST_DSP_NAME;
pub const LEN_TOGGLE_STR: usize = MAX_TOGGLE_STR_LENGTH + 1;
pub const OFF_REAL_HOSTNAME: usize = OFF_TOGGLE_STR + LEN_TOGGLE_STR;
pub const LEN_REAL_HOSTNAME: usize = MAX_REAL_HOSTNAME_LENGTH;
pub const OFF_PROXY_NAME: usize = OFF_REAL_HOSTNAME + 2 * LEN_REAL_HOSTNAME;
pub const LEN_PROXY_NAME: usize = MAX_PROXY_NAME_LENGTH + 1;
pub const OFF_ERROR_HISTORY: usize = 176;
pub const OFF_JOB_STATUS: usize = align8(OFF_PROXY_NAME + LEN_PROXY_NAME);

pub const SLOT_SIZE: usize = 352;
pub const OFF_FILE_NAME_IN_USE: usize = 64;
pub const LEN_FILE_NAME_IN_USE: usize = MAX_FILENAME_LENGTH;
pub const OFF_UNIQUE_NAME: usize = OFF_FILE_NAME_IN_USE + LEN_FILE_NAME_IN_USE;
pub const LEN_UNIQUE_NAME: usize = MAX_MSG_NAME_LENGTH;

pub const HOST_RECORD_SIZE: usize = align8(OFF_JOB_STATUS + MAX_PARALLEL_JOBS * SLOT_SIZE);

const _: () = assert!(OFF_UNIQUE_NAME + LEN_UNIQUE_NAME <= SLOT_SIZE);
const _: () = assert!(OFF_JOB_STATUS == 440);

/// Lock regions of a host record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsaRegion {
    /// Connection slots: `job_status[]`, `active_transfers`, `trl_per_process`.
    Con,
    /// `host_status`.
    Hs,
    /// `total_file_counter`, `total_file_size`.
    Tfc,
    /// `error_counter`, `error_history`.
    Ec,
}

impl LockRegion for FsaRegion {
    fn offset(self) -> usize {
        match self {
            FsaRegion::Con => 116,
            FsaRegion::Hs => 100,
            FsaRegion::Tfc => 104,
            FsaRegion::Ec => 128,
        }
    }

    fn rank(self) -> u8 {
        match self {
            FsaRegion::Con => 0,
            FsaRegion::Hs => 1,
            FsaRegion::Tfc => 2,
            FsaRegion::Ec => 3,
        }
    }
}

/// View over one host record.
pub struct HostRec<B> {
    pub(crate) buf: B,
}

impl<B> HostRec<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }
}

record_fields!(HostRec {
    total_file_size, set_total_file_size: i64 = 0;
    bytes_send, set_bytes_send: u64 = 8;
    last_connection, set_last_connection: i64 = 16;
    last_retry_time, set_last_retry_time: i64 = 24;
    first_error_time, set_first_error_time: i64 = 32;
    start_event_handle, set_start_event_handle: i64 = 40;
    end_event_handle, set_end_event_handle: i64 = 48;
    transfer_rate_limit, set_transfer_rate_limit: i64 = 56;
    trl_per_process, set_trl_per_process: i64 = 64;
    warn_time, set_warn_time: i64 = 72;
    host_id, set_host_id: u32 = 80;
    protocol, set_protocol: u32 = 84;
    protocol_options, set_protocol_options: u32 = 88;
    protocol_options2, set_protocol_options2: u32 = 92;
    special_flag, set_special_flag: u32 = 96;
    host_status, set_host_status: u32 = 100;
    total_file_counter, set_total_file_counter: i32 = 104;
    file_counter_done, set_file_counter_done: u32 = 108;
    connections, set_connections: u32 = 112;
    active_transfers, set_active_transfers: i32 = 116;
    allowed_transfers, set_allowed_transfers: i32 = 120;
    max_errors, set_max_errors: i32 = 124;
    error_counter, set_error_counter: i32 = 128;
    total_errors, set_total_errors: u32 = 132;
    block_size, set_block_size: i32 = 136;
    socksnd_bufsize, set_socksnd_bufsize: i32 = 140;
    sockrcv_bufsize, set_sockrcv_bufsize: i32 = 144;
    keep_connected, set_keep_connected: u32 = 148;
    ttl, set_ttl: i32 = 152;
    retry_interval, set_retry_interval: i32 = 156;
    transfer_timeout, set_transfer_timeout: i32 = 160;
    max_successful_retries, set_max_successful_retries: i32 = 164;
    successful_retries, set_successful_retries: i32 = 168;
    jobs_queued, set_jobs_queued: u32 = 172;
    host_toggle, set_host_toggle: u8 = 184;
    auto_toggle, set_auto_toggle: u8 = 185;
    original_toggle_pos, set_original_toggle_pos: u8 = 186;
    toggle_pos, set_toggle_pos: u8 = 187;
});

record_strings!(HostRec {
    host_alias, set_host_alias = OFF_HOST_ALIAS, LEN_HOST_ALIAS;
    host_dsp_name, set_host_dsp_name = OFF_HOST_DSP_NAME, LEN_HOST_DSP_NAME;
    toggle_str, set_toggle_str = OFF_TOGGLE_STR, LEN_TOGGLE_STR;
    real_hostname_1, set_real_hostname_1 = OFF_REAL_HOSTNAME, LEN_REAL_HOSTNAME;
    real_hostname_2, set_real_hostname_2 = OFF_REAL_HOSTNAME + LEN_REAL_HOSTNAME, LEN_REAL_HOSTNAME;
    proxy_name, set_proxy_name = OFF_PROXY_NAME, LEN_PROXY_NAME;
});

impl<B: AsRef<[u8]>> HostRec<B> {
    pub fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn is_group_header(&self) -> bool {
        self.buf.as_ref()[OFF_REAL_HOSTNAME] == GROUP_IDENTIFIER
    }

    /// `real_hostname[i]` for i in 0..2.
    pub fn real_hostname(&self, i: usize) -> String {
        if i == 0 {
            self.real_hostname_1()
        } else {
            self.real_hostname_2()
        }
    }

    /// Hostname selected by `host_toggle`.
    pub fn active_hostname(&self) -> String {
        if self.host_toggle() == HOST_TWO && !self.real_hostname_2().is_empty() {
            self.real_hostname_2()
        } else {
            self.real_hostname_1()
        }
    }

    pub fn error_history(&self) -> [u8; ERROR_HISTORY_LENGTH] {
        let mut h = [0u8; ERROR_HISTORY_LENGTH];
        h.copy_from_slice(&self.buf.as_ref()[OFF_ERROR_HISTORY..OFF_ERROR_HISTORY + ERROR_HISTORY_LENGTH]);
        h
    }

    pub fn slot(&self, i: usize) -> SlotRec<&[u8]> {
        let off = OFF_JOB_STATUS + i * SLOT_SIZE;
        SlotRec {
            buf: &self.buf.as_ref()[off..off + SLOT_SIZE],
        }
    }

    /// Slots with index below `allowed_transfers`.
    pub fn usable_slots(&self) -> usize {
        (self.allowed_transfers().max(0) as usize).min(MAX_PARALLEL_JOBS)
    }

    /// Number of slots with a live `proc_id > 0`.
    pub fn live_slots(&self) -> i32 {
        (0..MAX_PARALLEL_JOBS)
            .filter(|&i| self.slot(i).proc_id() > 0)
            .count() as i32
    }

    pub fn is_queue_paused(&self) -> bool {
        self.host_status() & (PAUSE_QUEUE | AUTO_PAUSE_QUEUE | DANGER_PAUSE_QUEUE) != 0
    }

    pub fn is_disabled(&self) -> bool {
        self.special_flag() & HOST_DISABLED != 0
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HostRec<B> {
    pub fn set_real_hostname(&mut self, i: usize, v: &str) {
        if i == 0 {
            self.set_real_hostname_1(v)
        } else {
            self.set_real_hostname_2(v)
        }
    }

    pub fn mark_group_header(&mut self) {
        let b = self.buf.as_mut();
        b[OFF_REAL_HOSTNAME..OFF_REAL_HOSTNAME + LEN_REAL_HOSTNAME].fill(0);
        b[OFF_REAL_HOSTNAME] = GROUP_IDENTIFIER;
    }

    pub fn set_error_history(&mut self, h: &[u8; ERROR_HISTORY_LENGTH]) {
        self.buf.as_mut()[OFF_ERROR_HISTORY..OFF_ERROR_HISTORY + ERROR_HISTORY_LENGTH].copy_from_slice(h);
    }

    /// Push `code` as the newest entry (position 0); the oldest drops off.
    pub fn push_error_history(&mut self, code: u8) {
        let mut h = self.error_history();
        h.copy_within(0..ERROR_HISTORY_LENGTH - 1, 1);
        h[0] = code;
        self.set_error_history(&h);
    }

    pub fn slot_mut(&mut self, i: usize) -> SlotRec<&mut [u8]> {
        let off = OFF_JOB_STATUS + i * SLOT_SIZE;
        SlotRec {
            buf: &mut self.buf.as_mut()[off..off + SLOT_SIZE],
        }
    }

    /// Refresh `host_dsp_name` from alias, toggle string and `host_toggle`.
    pub fn update_dsp_name(&mut self) {
        let alias = self.host_alias();
        let toggle = self.toggle_str();
        let mut dsp = alias.clone();
        if !toggle.is_empty() && !self.real_hostname_2().is_empty() {
            let idx = self.host_toggle() as usize;
            if let Some(c) = toggle.chars().nth(idx) {
                dsp.push(c);
            }
        }
        self.set_toggle_pos(alias.len() as u8);
        self.set_host_dsp_name(&dsp);
    }

    /// Zero runtime fields of every slot, mark slots above
    /// `allowed_transfers` unusable.
    pub fn init_slots(&mut self) {
        let usable = self.usable_slots();
        for i in 0..MAX_PARALLEL_JOBS {
            let mut s = self.slot_mut(i);
            s.clear();
            if i >= usable {
                s.set_no_of_files(-1);
                s.set_proc_id(-1);
            }
        }
    }

    /// `trl_per_process = ceil(transfer_rate_limit / max(1, active_transfers))`.
    pub fn recompute_trl(&mut self) {
        let limit = self.transfer_rate_limit();
        if limit <= 0 {
            self.set_trl_per_process(0);
            return;
        }
        let n = self.active_transfers().max(1) as i64;
        let v = (limit + n - 1) / n;
        self.set_trl_per_process(v.max(1));
    }
}

/// View over one `job_status` slot.
pub struct SlotRec<B> {
    pub(crate) buf: B,
}

record_fields!(SlotRec {
    file_size, set_file_size: i64 = 0;
    file_size_done, set_file_size_done: i64 = 8;
    file_size_in_use, set_file_size_in_use: i64 = 16;
    file_size_in_use_done, set_file_size_in_use_done: i64 = 24;
    bytes_send, set_bytes_send: u64 = 32;
    proc_id, set_proc_id: i32 = 40;
    no_of_files, set_no_of_files: i32 = 44;
    no_of_files_done, set_no_of_files_done: i32 = 48;
    job_id, set_job_id: u32 = 52;
    connect_status, set_connect_status: u8 = 56;
});

record_strings!(SlotRec {
    file_name_in_use, set_file_name_in_use = OFF_FILE_NAME_IN_USE, LEN_FILE_NAME_IN_USE;
    unique_name, set_unique_name = OFF_UNIQUE_NAME, LEN_UNIQUE_NAME;
});

impl<B: AsRef<[u8]>> SlotRec<B> {
    pub fn is_free(&self) -> bool {
        self.proc_id() < 1 && self.no_of_files() != -1
    }

    pub fn is_unusable(&self) -> bool {
        self.no_of_files() == -1
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> SlotRec<B> {
    pub fn clear(&mut self) {
        self.buf.as_mut().fill(0);
    }

    /// Copy another slot verbatim (used when carrying a generation forward).
    pub fn copy_from(&mut self, other: &SlotRec<&[u8]>) {
        self.buf.as_mut().copy_from_slice(other.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_geometry() {
        assert_eq!(OFF_HOST_DSP_NAME, 201);
        assert_eq!(OFF_PROXY_NAME, 357);
        assert_eq!(HOST_RECORD_SIZE, 440 + 5 * 352);
        assert_eq!(HOST_RECORD_SIZE % 8, 0);
    }

    #[test]
    fn error_history_ring_and_trl() {
        let mut raw = vec![0u8; HOST_RECORD_SIZE];
        let mut h = HostRec::new(&mut raw[..]);
        for code in [1u8, 2, 3, 4, 5, 6] {
            h.push_error_history(code);
        }
        assert_eq!(h.error_history(), [6, 5, 4, 3, 2]);

        h.set_transfer_rate_limit(10);
        h.set_active_transfers(3);
        h.recompute_trl();
        assert_eq!(h.trl_per_process(), 4);
        h.set_active_transfers(0);
        h.recompute_trl();
        assert_eq!(h.trl_per_process(), 10);
    }

    #[test]
    fn slots_and_dsp_name() {
        let mut raw = vec![0u8; HOST_RECORD_SIZE];
        let mut h = HostRec::new(&mut raw[..]);
        h.set_allowed_transfers(2);
        h.init_slots();
        assert!(h.slot(1).is_free());
        assert!(h.slot(2).is_unusable());
        assert_eq!(h.slot(4).proc_id(), -1);

        h.set_host_alias("alpha");
        h.set_toggle_str("[12]");
        h.set_real_hostname(0, "a1.example");
        h.set_real_hostname(1, "a2.example");
        h.set_host_toggle(HOST_TWO);
        h.update_dsp_name();
        assert_eq!(h.host_dsp_name(), "alpha2");
        assert_eq!(h.active_hostname(), "a2.example");
        assert!(!h.is_group_header());
        h.mark_group_header();
        assert!(h.is_group_header());
    }
}
