//! FRA directory record layout (struct version 4).
//!
//! 8-byte fields at 0..88, 4-byte fields at 88..200, bytes at 200..210,
//! `te[12]` + `ate` at 216, strings from 528. Lock bytes: counters at
//! `files_received`, status at `dir_flag`, errors at `error_counter`.

use crate::consts::*;
use crate::fra::time_entry::{TimeEntry, TIME_ENTRY_SIZE};
use crate::table::view::{align8, record_fields, record_strings};
use crate::table::LockRegion;

pub const OFF_TE: usize = 216;
pub const OFF_ATE: usize = OFF_TE + MAX_TIME_ENTRIES * TIME_ENTRY_SIZE;
pub const OFF_DIR_ALIAS: usize = OFF_ATE + TIME_ENTRY_SIZE;
pub const LEN_DIR_ALIAS: usize = MAX_DIR_ALIAS_LENGTH + 1;
pub const OFF_HOST_ALIAS: usize = OFF_DIR_ALIAS + LEN_DIR_ALIAS;
pub const LEN_HOST_ALIAS: usize = MAX_HOSTNAME_LENGTH + 1;
pub const OFF_LS_DATA_ALIAS: usize = OFF_HOST_ALIAS + LEN_HOST_ALIAS;
pub const LEN_LS_DATA_ALIAS: usize = MAX_DIR_ALIAS_LENGTH + 1;
pub const OFF_TIMEZONE: usize = OFF_LS_DATA_ALIAS + LEN_LS_DATA_ALIAS;
pub const LEN_TIMEZONE: usize = MAX_TIMEZONE_LENGTH + 1;
pub const OFF_WAIT_FOR: usize = OFF_TIMEZONE + LEN_TIMEZONE;
pub const LEN_WAIT_FOR: usize = MAX_WAIT_FOR_LENGTH + 1;
pub const OFF_URL: usize = OFF_WAIT_FOR + LEN_WAIT_FOR;
pub const LEN_URL: usize = MAX_RECIPIENT_LENGTH;
pub const OFF_RETRIEVE_WORK_DIR: usize = OFF_URL + LEN_URL;
pub const LEN_RETRIEVE_WORK_DIR: usize = MAX_PATH_LENGTH;

pub const DIR_RECORD_SIZE: usize = align8(OFF_RETRIEVE_WORK_DIR + LEN_RETRIEVE_WORK_DIR);

const _: () = assert!(OFF_DIR_ALIAS == 528);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FraRegion {
    /// files/bytes received, in dir, queued.
    Counters,
    /// `dir_flag`, `dir_status`.
    Status,
    /// `error_counter`.
    Errors,
}

impl LockRegion for FraRegion {
    fn offset(self) -> usize {
        match self {
            FraRegion::Counters => 104,
            FraRegion::Status => 148,
            FraRegion::Errors => 140,
        }
    }

    fn rank(self) -> u8 {
        match self {
            FraRegion::Counters => 0,
            FraRegion::Status => 1,
            FraRegion::Errors => 2,
        }
    }
}

pub struct DirRec<B> {
    pub(crate) buf: B,
}

impl<B> DirRec<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }
}

record_fields!(DirRec {
    bytes_received, set_bytes_received: u64 = 0;
    bytes_in_dir, set_bytes_in_dir: u64 = 8;
    bytes_in_queue, set_bytes_in_queue: u64 = 16;
    accumulate_size, set_accumulate_size: i64 = 24;
    ignore_size, set_ignore_size: i64 = 32;
    max_copied_file_size, set_max_copied_file_size: i64 = 40;
    info_time, set_info_time: i64 = 48;
    warn_time, set_warn_time: i64 = 56;
    next_check_time, set_next_check_time: i64 = 64;
    last_retrieval, set_last_retrieval: i64 = 72;
    dir_mtime, set_dir_mtime: i64 = 80;
    dir_id, set_dir_id: u32 = 88;
    fsa_pos, set_fsa_pos: i32 = 92;
    no_of_process, set_no_of_process: i32 = 96;
    max_process, set_max_process: i32 = 100;
    files_received, set_files_received: u32 = 104;
    files_in_dir, set_files_in_dir: u32 = 108;
    files_queued, set_files_queued: u32 = 112;
    accumulate, set_accumulate: u32 = 116;
    ignore_file_time, set_ignore_file_time: u32 = 120;
    gt_lt_sign, set_gt_lt_sign: u32 = 124;
    max_copied_files, set_max_copied_files: i32 = 128;
    dir_mode, set_dir_mode: u32 = 132;
    max_errors, set_max_errors: i32 = 136;
    error_counter, set_error_counter: i32 = 140;
    keep_connected, set_keep_connected: u32 = 144;
    dir_flag, set_dir_flag: u32 = 148;
    dir_options, set_dir_options: u32 = 152;
    in_dc_flag, set_in_dc_flag: u32 = 156;
    dup_check_flag, set_dup_check_flag: u32 = 160;
    dup_check_timeout, set_dup_check_timeout: u32 = 164;
    protocol, set_protocol: u32 = 168;
    unknown_file_time, set_unknown_file_time: i32 = 172;
    unreadable_file_time, set_unreadable_file_time: i32 = 176;
    queued_file_time, set_queued_file_time: i32 = 180;
    locked_file_time, set_locked_file_time: i32 = 184;
    no_of_time_entries, set_no_of_time_entries: i32 = 188;
    ewl_pos, set_ewl_pos: i32 = 192;
    end_character, set_end_character: i32 = 196;
    priority, set_priority: u8 = 200;
    dir_status, set_dir_status: u8 = 201;
    force_reread, set_force_reread: u8 = 202;
    queued, set_queued: u8 = 203;
    remove, set_remove: u8 = 204;
    stupid_mode, set_stupid_mode: u8 = 205;
    delete_files_flag, set_delete_files_flag: u8 = 206;
    report_unknown_files, set_report_unknown_files: u8 = 207;
    important_dir, set_important_dir: u8 = 208;
});

record_strings!(DirRec {
    dir_alias, set_dir_alias = OFF_DIR_ALIAS, LEN_DIR_ALIAS;
    host_alias, set_host_alias = OFF_HOST_ALIAS, LEN_HOST_ALIAS;
    ls_data_alias, set_ls_data_alias = OFF_LS_DATA_ALIAS, LEN_LS_DATA_ALIAS;
    timezone, set_timezone = OFF_TIMEZONE, LEN_TIMEZONE;
    wait_for_filename, set_wait_for_filename = OFF_WAIT_FOR, LEN_WAIT_FOR;
    url, set_url = OFF_URL, LEN_URL;
    retrieve_work_dir, set_retrieve_work_dir = OFF_RETRIEVE_WORK_DIR, LEN_RETRIEVE_WORK_DIR;
});

impl<B: AsRef<[u8]>> DirRec<B> {
    pub fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn time_entry(&self, i: usize) -> TimeEntry {
        let off = OFF_TE + i * TIME_ENTRY_SIZE;
        TimeEntry::read(&self.buf.as_ref()[off..off + TIME_ENTRY_SIZE])
    }

    pub fn time_entries(&self) -> Vec<TimeEntry> {
        let n = (self.no_of_time_entries().max(0) as usize).min(MAX_TIME_ENTRIES);
        (0..n).map(|i| self.time_entry(i)).collect()
    }

    pub fn additional_time_entry(&self) -> TimeEntry {
        TimeEntry::read(&self.buf.as_ref()[OFF_ATE..OFF_ATE + TIME_ENTRY_SIZE])
    }

    pub fn is_local(&self) -> bool {
        self.protocol() & LOC != 0
    }

    pub fn is_externally_scheduled(&self) -> bool {
        self.next_check_time() == EXTERNAL_SCHEDULE
    }

    /// `Some(index)` into the extra work dirs, `None` for the main spool.
    pub fn extra_work_dir(&self) -> Option<usize> {
        let p = self.ewl_pos();
        if p < 0 {
            None
        } else {
            Some(p as usize)
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DirRec<B> {
    pub fn set_time_entries(&mut self, entries: &[TimeEntry]) {
        let n = entries.len().min(MAX_TIME_ENTRIES);
        for (i, te) in entries.iter().take(n).enumerate() {
            let off = OFF_TE + i * TIME_ENTRY_SIZE;
            te.write(&mut self.buf.as_mut()[off..off + TIME_ENTRY_SIZE]);
        }
        self.set_no_of_time_entries(n as i32);
    }

    pub fn set_additional_time_entry(&mut self, te: &TimeEntry) {
        te.write(&mut self.buf.as_mut()[OFF_ATE..OFF_ATE + TIME_ENTRY_SIZE]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_and_time_entries() {
        assert_eq!(OFF_ATE, 504);
        assert_eq!(DIR_RECORD_SIZE % 8, 0);
        let mut raw = vec![0u8; DIR_RECORD_SIZE];
        let mut d = DirRec::new(&mut raw[..]);
        d.set_dir_alias("incoming_long_alias");
        assert_eq!(d.dir_alias(), "incoming_l");
        let te = TimeEntry::parse("0 6 * * *").unwrap();
        d.set_time_entries(&[te, te]);
        assert_eq!(d.time_entries(), vec![te, te]);
        d.set_ewl_pos(-1);
        assert_eq!(d.extra_work_dir(), None);
        d.set_next_check_time(EXTERNAL_SCHEDULE);
        assert!(d.is_externally_scheduled());
    }
}
