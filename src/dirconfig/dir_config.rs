//! DIR_CONFIG: directories, their file groups, destinations and recipients.
//!
//! ```text
//! [directory] <path or url> [<alias>]
//! [dir options]
//! <option line>...
//!    [files]
//!    <mask>...
//!       [destination]
//!          [recipient]
//!          <url>...
//!          [options]
//!          <option line>...
//! ```
//!
//! Directory options understood (anything else is logged and ignored):
//!
//! ```text
//! delete unknown files [<h>]      delete queued files [<h>]
//! delete old locked files [<h>]   delete unreadable files [<h>]
//! report unknown files            do not report unknown files
//! max copied files <n>            max copied file size <KiB>
//! warn time <s>                   info time <s>
//! max process <n>                 max errors <n>
//! keep connected <s>              priority <0-9>
//! ignore size [<|>|=]<bytes>      ignore file time [<|>|=]<s>
//! end character <n>               wait for <file name>
//! time <m h dom mon dow>          time external
//! timezone <tz>                   dupcheck <timeout> [<key>] [<action>]
//! accumulate <n>                  accumulate size <bytes>
//! force reread [remote|local]     do not remove
//! stupid mode                     store retrieve list once
//! important dir                   accept dot files
//! ignore empty files              accept changed size
//! ```

use anyhow::{anyhow, bail, Context, Result};

use crate::config::AfdConfig;
use crate::consts::*;
use crate::fra::time_entry::TimeEntry;
use crate::fra::DirRec;
use crate::table::view::truncate_str;
use crate::util::checksum_str;

const DEFAULT_OLD_FILE_HOURS: i32 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirOptions {
    /// Which options were given explicitly (and will be dumped).
    pub in_dc_flag: u32,
    pub delete_files_flag: u8,
    pub unknown_file_time: i32,
    pub queued_file_time: i32,
    pub locked_file_time: i32,
    pub unreadable_file_time: i32,
    pub report_unknown_files: bool,
    pub max_copied_files: i32,
    pub max_copied_file_size: i64,
    pub warn_time: i64,
    pub info_time: i64,
    pub max_process: i32,
    pub max_errors: i32,
    pub keep_connected: u32,
    pub priority: u8,
    pub ignore_size: i64,
    pub ignore_file_time: u32,
    pub gt_lt_sign: u32,
    pub end_character: i32,
    pub wait_for_filename: String,
    pub time_entries: Vec<TimeEntry>,
    pub time_external: bool,
    pub timezone: String,
    pub dup_check_timeout: u32,
    pub dup_check_flag: u32,
    pub accumulate: u32,
    pub accumulate_size: i64,
    pub force_reread: u8,
    pub remove: bool,
    pub stupid_mode: u8,
    pub important_dir: bool,
    pub dir_options: u32,
}

impl DirOptions {
    pub fn defaults(cfg: &AfdConfig) -> Self {
        Self {
            in_dc_flag: 0,
            delete_files_flag: 0,
            unknown_file_time: DEFAULT_OLD_FILE_HOURS,
            queued_file_time: DEFAULT_OLD_FILE_HOURS,
            locked_file_time: DEFAULT_OLD_FILE_HOURS,
            unreadable_file_time: DEFAULT_OLD_FILE_HOURS,
            report_unknown_files: true,
            max_copied_files: cfg.max_copied_files,
            max_copied_file_size: cfg.max_copied_file_size,
            warn_time: 0,
            info_time: 0,
            max_process: 10,
            max_errors: cfg.max_errors,
            keep_connected: 0,
            priority: DEFAULT_PRIORITY,
            ignore_size: -1,
            ignore_file_time: 0,
            gt_lt_sign: 0,
            end_character: -1,
            wait_for_filename: String::new(),
            time_entries: Vec::new(),
            time_external: false,
            timezone: String::new(),
            dup_check_timeout: 0,
            dup_check_flag: 0,
            accumulate: 0,
            accumulate_size: 0,
            force_reread: REREAD_NO,
            remove: true,
            stupid_mode: STUPID_NO,
            important_dir: false,
            dir_options: 0,
        }
    }

    /// Apply one option line.
    pub fn apply(&mut self, line: &str) -> Result<()> {
        let l = line.trim();
        let lower = l.to_ascii_lowercase();
        let rest = |kw: &str| l[kw.len()..].trim();
        let hours = |kw: &str| -> Result<i32> {
            let r = rest(kw);
            if r.is_empty() {
                Ok(DEFAULT_OLD_FILE_HOURS)
            } else {
                r.parse().map_err(|_| anyhow!("'{}': hours expected", l))
            }
        };
        macro_rules! n {
            ($kw:expr) => {
                rest($kw).parse().map_err(|_| anyhow!("'{}': number expected", l))?
            };
        }
        if lower.starts_with("delete unknown files") {
            self.unknown_file_time = hours("delete unknown files")?;
            self.delete_files_flag |= UNKNOWN_FILES;
            self.in_dc_flag |= UNKNOWN_FILES_IDC;
        } else if lower.starts_with("delete queued files") {
            self.queued_file_time = hours("delete queued files")?;
            self.delete_files_flag |= QUEUED_FILES;
            self.in_dc_flag |= QUEUED_FILES_IDC;
        } else if lower.starts_with("delete old locked files") {
            self.locked_file_time = hours("delete old locked files")?;
            self.delete_files_flag |= OLD_LOCKED_FILES;
            self.in_dc_flag |= OLD_LOCKED_FILES_IDC;
        } else if lower.starts_with("delete unreadable files") {
            self.unreadable_file_time = hours("delete unreadable files")?;
            self.delete_files_flag |= UNREADABLE_FILES;
            self.in_dc_flag |= UNREADABLE_FILES_IDC;
        } else if lower == "report unknown files" {
            self.report_unknown_files = true;
            self.in_dc_flag |= REPORT_UNKNOWN_FILES_IDC;
        } else if lower == "do not report unknown files" {
            self.report_unknown_files = false;
            self.in_dc_flag |= REPORT_UNKNOWN_FILES_IDC;
        } else if lower.starts_with("max copied file size") {
            let kib: i64 = n!("max copied file size");
            self.max_copied_file_size = kib * 1024;
            self.in_dc_flag |= MAX_CP_FILE_SIZE_IDC;
        } else if lower.starts_with("max copied files") {
            self.max_copied_files = n!("max copied files");
            self.in_dc_flag |= MAX_CP_FILES_IDC;
        } else if lower.starts_with("warn time") {
            self.warn_time = n!("warn time");
            self.in_dc_flag |= WARN_TIME_IDC;
        } else if lower.starts_with("info time") {
            self.info_time = n!("info time");
            self.in_dc_flag |= INFO_TIME_IDC;
        } else if lower.starts_with("max process") {
            self.max_process = n!("max process");
            self.in_dc_flag |= MAX_PROCESS_IDC;
        } else if lower.starts_with("max errors") {
            self.max_errors = n!("max errors");
            self.in_dc_flag |= MAX_ERRORS_IDC;
        } else if lower.starts_with("keep connected") {
            self.keep_connected = n!("keep connected");
            self.in_dc_flag |= KEEP_CONNECTED_IDC;
        } else if lower.starts_with("priority") {
            let p = rest("priority").as_bytes();
            if p.len() != 1 || !p[0].is_ascii_digit() {
                bail!("'{}': priority must be 0-9", l);
            }
            self.priority = p[0];
            self.in_dc_flag |= PRIORITY_IDC;
        } else if lower.starts_with("ignore size") {
            let (sign, v) = comparator(rest("ignore size"), ISIZE_EQUAL, ISIZE_LESS_THEN, ISIZE_GREATER_THEN)?;
            self.gt_lt_sign = (self.gt_lt_sign & !(ISIZE_EQUAL | ISIZE_LESS_THEN | ISIZE_GREATER_THEN)) | sign;
            self.ignore_size = v;
            self.in_dc_flag |= IGNORE_SIZE_IDC;
        } else if lower.starts_with("ignore file time") {
            let (sign, v) = comparator(
                rest("ignore file time"),
                IFTIME_EQUAL,
                IFTIME_LESS_THEN,
                IFTIME_GREATER_THEN,
            )?;
            self.gt_lt_sign = (self.gt_lt_sign & !(IFTIME_EQUAL | IFTIME_LESS_THEN | IFTIME_GREATER_THEN)) | sign;
            self.ignore_file_time = v.max(0) as u32;
            self.in_dc_flag |= IGNORE_FILE_TIME_IDC;
        } else if lower == "ignore empty files" {
            self.dir_options |= IGNORE_EMPTY;
            self.in_dc_flag |= IGNORE_EMPTY_IDC;
        } else if lower.starts_with("end character") {
            self.end_character = n!("end character");
            self.in_dc_flag |= END_CHARACTER_IDC;
        } else if lower.starts_with("wait for") {
            let name = rest("wait for");
            if name.is_empty() || name.len() > MAX_WAIT_FOR_LENGTH {
                bail!("'{}': bad file name", l);
            }
            self.wait_for_filename = name.to_string();
            self.in_dc_flag |= WAIT_FOR_IDC;
        } else if lower == "time external" {
            self.time_external = true;
            self.in_dc_flag |= TIME_IDC;
        } else if lower.starts_with("timezone") {
            let tz = rest("timezone");
            crate::fra::Zone::parse(tz)?;
            self.timezone = tz.to_string();
            self.in_dc_flag |= TIMEZONE_IDC;
        } else if lower.starts_with("time ") {
            if self.time_entries.len() >= MAX_TIME_ENTRIES {
                bail!("more than {} time entries", MAX_TIME_ENTRIES);
            }
            self.time_entries.push(TimeEntry::parse(rest("time"))?);
            self.in_dc_flag |= TIME_IDC;
        } else if lower.starts_with("dupcheck") {
            let (t, f) = parse_dupcheck(rest("dupcheck"))?;
            self.dup_check_timeout = t;
            self.dup_check_flag = f;
            self.in_dc_flag |= DUPCHECK_IDC;
        } else if lower.starts_with("accumulate size") {
            self.accumulate_size = n!("accumulate size");
            self.in_dc_flag |= ACCUMULATE_SIZE_IDC;
        } else if lower.starts_with("accumulate") {
            self.accumulate = n!("accumulate");
            self.in_dc_flag |= ACCUMULATE_IDC;
        } else if lower.starts_with("force reread") {
            self.force_reread = match rest("force reread").to_ascii_lowercase().as_str() {
                "" => REREAD_YES,
                "remote" => REREAD_REMOTE_ONLY,
                "local" => REREAD_LOCAL_ONLY,
                other => bail!("force reread: unknown mode '{}'", other),
            };
            self.in_dc_flag |= FORCE_REREAD_IDC;
        } else if lower == "do not remove" {
            self.remove = false;
            self.in_dc_flag |= REMOVE_IDC;
        } else if lower == "stupid mode" {
            self.stupid_mode = STUPID_YES;
            self.in_dc_flag |= STUPID_MODE_IDC;
        } else if lower == "store retrieve list once" {
            self.stupid_mode = GET_ONCE_ONLY;
            self.in_dc_flag |= STUPID_MODE_IDC;
        } else if lower == "important dir" {
            self.important_dir = true;
            self.in_dc_flag |= IMPORTANT_DIR_IDC;
        } else if lower == "accept dot files" {
            self.dir_options |= ACCEPT_DOT_FILES;
            self.in_dc_flag |= ACCEPT_DOT_FILES_IDC;
        } else if lower == "accept changed size" {
            self.dir_options |= DIR_ADJUST_RL_SIZE;
            self.in_dc_flag |= ADJUST_RL_SIZE_IDC;
        } else {
            bail!("unknown directory option '{}'", l);
        }
        Ok(())
    }

    /// Fill the configuration part of an FRA record.
    pub fn write_to<B: AsRef<[u8]> + AsMut<[u8]>>(&self, d: &mut DirRec<B>) {
        d.set_in_dc_flag(self.in_dc_flag);
        d.set_delete_files_flag(self.delete_files_flag);
        d.set_unknown_file_time(self.unknown_file_time);
        d.set_queued_file_time(self.queued_file_time);
        d.set_locked_file_time(self.locked_file_time);
        d.set_unreadable_file_time(self.unreadable_file_time);
        d.set_report_unknown_files(self.report_unknown_files as u8);
        d.set_max_copied_files(self.max_copied_files);
        d.set_max_copied_file_size(self.max_copied_file_size);
        d.set_warn_time(self.warn_time);
        d.set_info_time(self.info_time);
        d.set_max_process(self.max_process);
        d.set_max_errors(self.max_errors);
        d.set_keep_connected(self.keep_connected);
        d.set_priority(self.priority);
        d.set_ignore_size(self.ignore_size);
        d.set_ignore_file_time(self.ignore_file_time);
        d.set_gt_lt_sign(self.gt_lt_sign);
        d.set_end_character(self.end_character);
        d.set_wait_for_filename(&self.wait_for_filename);
        d.set_time_entries(&self.time_entries);
        d.set_timezone(&self.timezone);
        d.set_dup_check_timeout(self.dup_check_timeout);
        d.set_dup_check_flag(self.dup_check_flag);
        d.set_accumulate(self.accumulate);
        d.set_accumulate_size(self.accumulate_size);
        d.set_force_reread(self.force_reread);
        d.set_remove(self.remove as u8);
        d.set_stupid_mode(self.stupid_mode);
        d.set_important_dir(self.important_dir as u8);
        d.set_dir_options(self.dir_options);
        let flag = d.dir_flag() & !TIME_EXTERNAL;
        if self.time_external {
            d.set_dir_flag(flag | TIME_EXTERNAL);
            d.set_next_check_time(EXTERNAL_SCHEDULE);
        } else {
            d.set_dir_flag(flag);
        }
    }

    /// Read the options back from an FRA record.
    pub fn from_dir<B: AsRef<[u8]>>(d: &DirRec<B>) -> Self {
        Self {
            in_dc_flag: d.in_dc_flag(),
            delete_files_flag: d.delete_files_flag(),
            unknown_file_time: d.unknown_file_time(),
            queued_file_time: d.queued_file_time(),
            locked_file_time: d.locked_file_time(),
            unreadable_file_time: d.unreadable_file_time(),
            report_unknown_files: d.report_unknown_files() != 0,
            max_copied_files: d.max_copied_files(),
            max_copied_file_size: d.max_copied_file_size(),
            warn_time: d.warn_time(),
            info_time: d.info_time(),
            max_process: d.max_process(),
            max_errors: d.max_errors(),
            keep_connected: d.keep_connected(),
            priority: d.priority(),
            ignore_size: d.ignore_size(),
            ignore_file_time: d.ignore_file_time(),
            gt_lt_sign: d.gt_lt_sign(),
            end_character: d.end_character(),
            wait_for_filename: d.wait_for_filename(),
            time_entries: d.time_entries(),
            time_external: d.dir_flag() & TIME_EXTERNAL != 0,
            timezone: d.timezone(),
            dup_check_timeout: d.dup_check_timeout(),
            dup_check_flag: d.dup_check_flag(),
            accumulate: d.accumulate(),
            accumulate_size: d.accumulate_size(),
            force_reread: d.force_reread(),
            remove: d.remove() != 0,
            stupid_mode: d.stupid_mode(),
            important_dir: d.important_dir() != 0,
            dir_options: d.dir_options(),
        }
    }

    /// Option lines for every explicitly given option.
    pub fn render(&self) -> Vec<String> {
        let f = self.in_dc_flag;
        let mut out = Vec::new();
        if f & UNKNOWN_FILES_IDC != 0 {
            out.push(format!("delete unknown files {}", self.unknown_file_time));
        }
        if f & QUEUED_FILES_IDC != 0 {
            out.push(format!("delete queued files {}", self.queued_file_time));
        }
        if f & OLD_LOCKED_FILES_IDC != 0 {
            out.push(format!("delete old locked files {}", self.locked_file_time));
        }
        if f & UNREADABLE_FILES_IDC != 0 {
            out.push(format!("delete unreadable files {}", self.unreadable_file_time));
        }
        if f & REPORT_UNKNOWN_FILES_IDC != 0 {
            out.push(if self.report_unknown_files {
                "report unknown files".to_string()
            } else {
                "do not report unknown files".to_string()
            });
        }
        if f & MAX_CP_FILES_IDC != 0 {
            out.push(format!("max copied files {}", self.max_copied_files));
        }
        if f & MAX_CP_FILE_SIZE_IDC != 0 {
            out.push(format!("max copied file size {}", self.max_copied_file_size / 1024));
        }
        if f & WARN_TIME_IDC != 0 {
            out.push(format!("warn time {}", self.warn_time));
        }
        if f & INFO_TIME_IDC != 0 {
            out.push(format!("info time {}", self.info_time));
        }
        if f & MAX_PROCESS_IDC != 0 {
            out.push(format!("max process {}", self.max_process));
        }
        if f & MAX_ERRORS_IDC != 0 {
            out.push(format!("max errors {}", self.max_errors));
        }
        if f & KEEP_CONNECTED_IDC != 0 {
            out.push(format!("keep connected {}", self.keep_connected));
        }
        if f & PRIORITY_IDC != 0 {
            out.push(format!("priority {}", self.priority as char));
        }
        if f & IGNORE_SIZE_IDC != 0 {
            out.push(format!(
                "ignore size {}{}",
                sign_str(self.gt_lt_sign, ISIZE_LESS_THEN, ISIZE_GREATER_THEN),
                self.ignore_size
            ));
        }
        if f & IGNORE_FILE_TIME_IDC != 0 {
            out.push(format!(
                "ignore file time {}{}",
                sign_str(self.gt_lt_sign, IFTIME_LESS_THEN, IFTIME_GREATER_THEN),
                self.ignore_file_time
            ));
        }
        if f & IGNORE_EMPTY_IDC != 0 {
            out.push("ignore empty files".into());
        }
        if f & END_CHARACTER_IDC != 0 {
            out.push(format!("end character {}", self.end_character));
        }
        if f & WAIT_FOR_IDC != 0 {
            out.push(format!("wait for {}", self.wait_for_filename));
        }
        if f & TIME_IDC != 0 {
            if self.time_external {
                out.push("time external".into());
            }
            for te in &self.time_entries {
                out.push(format!("time {}", te.render()));
            }
        }
        if f & TIMEZONE_IDC != 0 {
            out.push(format!("timezone {}", self.timezone));
        }
        if f & DUPCHECK_IDC != 0 {
            out.push(render_dupcheck(self.dup_check_timeout, self.dup_check_flag));
        }
        if f & ACCUMULATE_IDC != 0 {
            out.push(format!("accumulate {}", self.accumulate));
        }
        if f & ACCUMULATE_SIZE_IDC != 0 {
            out.push(format!("accumulate size {}", self.accumulate_size));
        }
        if f & FORCE_REREAD_IDC != 0 {
            out.push(
                match self.force_reread {
                    REREAD_REMOTE_ONLY => "force reread remote",
                    REREAD_LOCAL_ONLY => "force reread local",
                    _ => "force reread",
                }
                .into(),
            );
        }
        if f & REMOVE_IDC != 0 && !self.remove {
            out.push("do not remove".into());
        }
        if f & STUPID_MODE_IDC != 0 {
            out.push(
                if self.stupid_mode == GET_ONCE_ONLY {
                    "store retrieve list once"
                } else {
                    "stupid mode"
                }
                .into(),
            );
        }
        if f & IMPORTANT_DIR_IDC != 0 {
            out.push("important dir".into());
        }
        if f & ACCEPT_DOT_FILES_IDC != 0 {
            out.push("accept dot files".into());
        }
        if f & ADJUST_RL_SIZE_IDC != 0 {
            out.push("accept changed size".into());
        }
        out
    }
}

fn sign_str(flags: u32, less: u32, greater: u32) -> &'static str {
    if flags & less != 0 {
        "<"
    } else if flags & greater != 0 {
        ">"
    } else {
        ""
    }
}

fn comparator(s: &str, eq: u32, lt: u32, gt: u32) -> Result<(u32, i64)> {
    let s = s.trim();
    let (flag, num) = match s.as_bytes().first() {
        Some(b'<') => (lt, &s[1..]),
        Some(b'>') => (gt, &s[1..]),
        Some(b'=') => (eq, &s[1..]),
        _ => (eq, s),
    };
    let v = num.trim().parse().map_err(|_| anyhow!("'{}': number expected", s))?;
    Ok((flag, v))
}

/// `<timeout> [<key 1-4>] [<action 24-26>]`.
pub fn parse_dupcheck(s: &str) -> Result<(u32, u32)> {
    let f: Vec<&str> = s.split_whitespace().collect();
    let timeout: u32 = f
        .first()
        .ok_or_else(|| anyhow!("dupcheck: timeout missing"))?
        .parse()
        .map_err(|_| anyhow!("dupcheck: bad timeout '{}'", s))?;
    let key = match f.get(1).copied().unwrap_or("1") {
        "1" => DC_FILENAME_ONLY,
        "2" => DC_FILE_CONTENT,
        "3" => DC_FILE_CONT_NAME,
        "4" => DC_NAME_NO_SUFFIX,
        other => bail!("dupcheck: unknown key '{}'", other),
    };
    let action = match f.get(2).copied().unwrap_or("24") {
        "24" => DC_DELETE,
        "25" => DC_STORE,
        "26" => DC_WARN,
        other => bail!("dupcheck: unknown action '{}'", other),
    };
    Ok((timeout, key | action))
}

fn render_dupcheck(timeout: u32, flag: u32) -> String {
    let key = if flag & DC_FILE_CONTENT != 0 {
        2
    } else if flag & DC_FILE_CONT_NAME != 0 {
        3
    } else if flag & DC_NAME_NO_SUFFIX != 0 {
        4
    } else {
        1
    };
    let action = if flag & DC_STORE != 0 {
        25
    } else if flag & DC_WARN != 0 {
        26
    } else {
        24
    };
    format!("dupcheck {} {} {}", timeout, key, action)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub recipients: Vec<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub masks: Vec<String>,
    pub destinations: Vec<Destination>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Absolute path, or URL for a remote source.
    pub location: String,
    pub alias: String,
    pub alias_given: bool,
    pub options: DirOptions,
    pub groups: Vec<FileGroup>,
}

impl DirEntry {
    /// Spool and DNB name: the path of a local directory, the URL otherwise.
    pub fn dir_name(&self) -> String {
        local_dir_of(&self.location)
    }

    pub fn is_local(&self) -> bool {
        self.location.starts_with('/') || self.location.starts_with("file://")
    }
}

/// Filesystem path of a directory location (`/path` or `file://host/path`).
pub fn local_dir_of(location: &str) -> String {
    match location.strip_prefix("file://") {
        Some(rest) => match rest.find('/') {
            Some(i) => rest[i..].to_string(),
            None => rest.to_string(),
        },
        None => location.to_string(),
    }
}

/// Alias of a directory given without one.
pub fn default_dir_alias(location: &str) -> String {
    format!("{:08x}", checksum_str(location))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    DirOptions,
    Files,
    Destination,
    Recipient,
    Options,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirConfig {
    pub dirs: Vec<DirEntry>,
}

impl DirConfig {
    /// Bad options are logged and skipped; incomplete directories, groups
    /// and destinations are dropped with a warning.
    pub fn parse(text: &str, cfg: &AfdConfig) -> Self {
        let mut dirs: Vec<DirEntry> = Vec::new();
        let mut section = Section::None;
        for (no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let lower = line.to_ascii_lowercase();
            if lower.starts_with("[directory]") {
                let rest = line["[directory]".len()..].trim();
                let mut it = rest.split_whitespace();
                let location = match it.next() {
                    Some(l) => l.to_string(),
                    None => {
                        log::warn!(target: "system", "DIR_CONFIG line {}: directory without path", no + 1);
                        section = Section::None;
                        continue;
                    }
                };
                let (alias, given) = match it.next() {
                    Some(a) => (truncate_str(a, MAX_DIR_ALIAS_LENGTH).to_string(), true),
                    None => (default_dir_alias(&location), false),
                };
                dirs.push(DirEntry {
                    location,
                    alias,
                    alias_given: given,
                    options: DirOptions::defaults(cfg),
                    groups: Vec::new(),
                });
                section = Section::None;
                continue;
            }
            let dir = match dirs.last_mut() {
                Some(d) => d,
                None => {
                    log::warn!(target: "system", "DIR_CONFIG line {}: '{}' outside a directory", no + 1, line);
                    continue;
                }
            };
            match lower.as_str() {
                "[dir options]" => {
                    section = Section::DirOptions;
                    continue;
                }
                "[files]" => {
                    dir.groups.push(FileGroup {
                        masks: Vec::new(),
                        destinations: Vec::new(),
                    });
                    section = Section::Files;
                    continue;
                }
                "[destination]" => {
                    match dir.groups.last_mut() {
                        Some(g) => g.destinations.push(Destination {
                            recipients: Vec::new(),
                            options: Vec::new(),
                        }),
                        None => {
                            log::warn!(target: "system", "DIR_CONFIG line {}: destination without [files]", no + 1);
                            section = Section::None;
                            continue;
                        }
                    }
                    section = Section::Destination;
                    continue;
                }
                "[recipient]" => {
                    section = Section::Recipient;
                    continue;
                }
                "[options]" => {
                    section = Section::Options;
                    continue;
                }
                _ => {}
            }
            let dest = dir.groups.last_mut().and_then(|g| g.destinations.last_mut());
            match section {
                Section::DirOptions => {
                    if let Err(e) = dir.options.apply(line) {
                        log::warn!(target: "system", "DIR_CONFIG line {}: {:#}", no + 1, e);
                    }
                }
                Section::Files => {
                    if let Some(g) = dir.groups.last_mut() {
                        g.masks.push(line.to_string());
                    }
                }
                Section::Recipient => match dest {
                    Some(d) => match check_recipient(line) {
                        Ok(()) => d.recipients.push(line.to_string()),
                        Err(e) => log::warn!(target: "system", "DIR_CONFIG line {}: {:#}", no + 1, e),
                    },
                    None => log::warn!(target: "system", "DIR_CONFIG line {}: recipient without destination", no + 1),
                },
                Section::Options => {
                    if let Some(d) = dest {
                        d.options.push(line.to_string());
                    }
                }
                Section::None | Section::Destination => {
                    log::warn!(target: "system", "DIR_CONFIG line {}: unexpected '{}'", no + 1, line);
                }
            }
        }
        for d in dirs.iter_mut() {
            for g in d.groups.iter_mut() {
                g.destinations.retain(|dst| !dst.recipients.is_empty());
            }
            let loc = d.location.clone();
            d.groups.retain(|g| {
                let keep = !g.masks.is_empty() && !g.destinations.is_empty();
                if !keep {
                    log::warn!(target: "system", "{}: dropping file group without masks or recipients", loc);
                }
                keep
            });
        }
        dirs.retain(|d| {
            if d.groups.is_empty() {
                log::warn!(target: "system", "{}: directory has no usable destination", d.location);
            }
            !d.groups.is_empty()
        });
        Self { dirs }
    }

    pub fn load(path: &std::path::Path, cfg: &AfdConfig) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self::parse(&text, cfg))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for d in &self.dirs {
            if d.alias_given {
                out.push_str(&format!("[directory] {} {}\n", d.location, d.alias));
            } else {
                out.push_str(&format!("[directory] {}\n", d.location));
            }
            let opts = d.options.render();
            if !opts.is_empty() {
                out.push_str("[dir options]\n");
                for o in opts {
                    out.push_str(&o);
                    out.push('\n');
                }
            }
            for g in &d.groups {
                out.push_str("   [files]\n");
                for m in &g.masks {
                    out.push_str(&format!("   {}\n", m));
                }
                for dst in &g.destinations {
                    out.push_str("      [destination]\n         [recipient]\n");
                    for r in &dst.recipients {
                        out.push_str(&format!("         {}\n", r));
                    }
                    if !dst.options.is_empty() {
                        out.push_str("         [options]\n");
                        for o in &dst.options {
                            out.push_str(&format!("         {}\n", o));
                        }
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}

fn check_recipient(s: &str) -> Result<()> {
    let url = url::Url::parse(s).map_err(|e| anyhow!("recipient '{}': {}", s, e))?;
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        bail!("recipient '{}' has no host", s);
    }
    Ok(())
}
