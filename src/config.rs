//! Process-wide tunables read from `<work>/etc/afdconfig`.
//!
//! Format: one `KEY value` pair per line, `#` starts a comment. Repeatable
//! keys (`ATPD_TRUSTED_REMOTE_IP`, `EXTRA_WORK_DIR`) accumulate.
//!
//! Environment overrides (applied after the file):
//! - AFD_MAX_COPIED_FILES
//! - AFD_RESCAN_TIME
//! - AFD_ATPD_PORT

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::paths::WorkDir;

#[derive(Clone, Debug, PartialEq)]
pub struct AfdConfig {
    /// Files per message before the watcher starts a new one.
    /// Key: MAX_COPIED_FILES (default 100)
    pub max_copied_files: i32,

    /// Bytes per message. Key: MAX_COPIED_FILE_SIZE in KiB (default 100 MiB)
    pub max_copied_file_size: i64,

    /// Directory rescan interval in seconds. Key: AMG_DIR_RESCAN_TIME (default 5)
    pub rescan_time: i64,

    pub default_transfer_timeout: i32,
    pub default_retry_interval: i32,
    pub max_errors: i32,

    /// Seconds after which a queued file is too old to send (0 = off).
    /// Key: DEFAULT_AGE_LIMIT
    pub default_age_limit: i64,

    pub atpd_port: u16,
    /// Glob patterns over the peer IP. Empty list accepts every peer.
    pub atpd_trusted_ips: Vec<String>,
    pub atpd_cmd_timeout: u64,

    /// Spool roots on other filesystems (multi-filesystem support).
    pub extra_work_dirs: Vec<PathBuf>,

    pub max_check_file_dirs: u64,
    pub max_file_dir_check_time: i64,

    pub wmo_port: u16,
    pub wmo_ack: bool,
    pub wmo_check_sequence: bool,
    /// Where the WMO receiver stores bulletins. Default `<work>/wmo`.
    pub wmo_target_dir: Option<PathBuf>,
}

impl Default for AfdConfig {
    fn default() -> Self {
        Self {
            max_copied_files: DEFAULT_MAX_COPIED_FILES,
            max_copied_file_size: DEFAULT_MAX_COPIED_FILE_SIZE,
            rescan_time: DEFAULT_RESCAN_TIME,
            default_transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            default_retry_interval: DEFAULT_RETRY_INTERVAL,
            max_errors: DEFAULT_MAX_ERRORS,
            default_age_limit: 0,
            atpd_port: DEFAULT_ATP_PORT_NO,
            atpd_trusted_ips: Vec::new(),
            atpd_cmd_timeout: ATPD_CMD_TIMEOUT,
            extra_work_dirs: Vec::new(),
            max_check_file_dirs: MAX_CHECK_FILE_DIRS,
            max_file_dir_check_time: MAX_FILE_DIR_CHECK_TIME,
            wmo_port: DEFAULT_WMO_PORT_NO,
            wmo_ack: true,
            wmo_check_sequence: false,
            wmo_target_dir: None,
        }
    }
}

fn flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "on" || s == "yes"
}

impl AfdConfig {
    /// Read `<work>/etc/afdconfig` (missing file = defaults) and apply the
    /// environment overrides.
    pub fn from_work_dir(work: &WorkDir) -> Result<Self> {
        let path = work.etc_file(AFD_CONFIG_FILE);
        let mut cfg = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Unknown keys and unparsable values are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut cfg = Self::default();
        for (no, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(i) => &raw[..i],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let (key, val) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => (line, ""),
            };
            let ok = match key {
                "MAX_COPIED_FILES" => val.parse().map(|v| cfg.max_copied_files = v).is_ok(),
                "MAX_COPIED_FILE_SIZE" => val
                    .parse::<i64>()
                    .map(|v| cfg.max_copied_file_size = v * 1024)
                    .is_ok(),
                "AMG_DIR_RESCAN_TIME" => val.parse().map(|v| cfg.rescan_time = v).is_ok(),
                "DEFAULT_TRANSFER_TIMEOUT" => val
                    .parse()
                    .map(|v| cfg.default_transfer_timeout = v)
                    .is_ok(),
                "DEFAULT_RETRY_INTERVAL" => val
                    .parse()
                    .map(|v| cfg.default_retry_interval = v)
                    .is_ok(),
                "MAX_ERRORS" => val.parse().map(|v| cfg.max_errors = v).is_ok(),
                "DEFAULT_AGE_LIMIT" => val.parse().map(|v| cfg.default_age_limit = v).is_ok(),
                "ATPD_PORT" => val.parse().map(|v| cfg.atpd_port = v).is_ok(),
                "ATPD_TRUSTED_REMOTE_IP" => {
                    cfg.atpd_trusted_ips.push(val.to_string());
                    !val.is_empty()
                }
                "ATPD_CMD_TIMEOUT" => val.parse().map(|v| cfg.atpd_cmd_timeout = v).is_ok(),
                "EXTRA_WORK_DIR" => {
                    cfg.extra_work_dirs.push(PathBuf::from(val));
                    !val.is_empty()
                }
                "MAX_CHECK_FILE_DIRS" => {
                    val.parse().map(|v| cfg.max_check_file_dirs = v).is_ok()
                }
                "MAX_FILE_DIR_CHECK_TIME" => val
                    .parse()
                    .map(|v| cfg.max_file_dir_check_time = v)
                    .is_ok(),
                "WMO_PORT" => val.parse().map(|v| cfg.wmo_port = v).is_ok(),
                "WMO_ACK" => {
                    cfg.wmo_ack = flag(val);
                    true
                }
                "WMO_CHECK_SEQUENCE" => {
                    cfg.wmo_check_sequence = flag(val);
                    true
                }
                "WMO_TARGET_DIR" => {
                    cfg.wmo_target_dir = Some(PathBuf::from(val));
                    !val.is_empty()
                }
                _ => {
                    log::warn!(target: "system", "afdconfig line {}: unknown key {}", no + 1, key);
                    true
                }
            };
            if !ok {
                log::warn!(target: "system", "afdconfig line {}: bad value for {}: '{}'", no + 1, key, val);
            }
        }
        cfg
    }

    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("AFD_MAX_COPIED_FILES") {
            if let Ok(n) = v.trim().parse::<i32>() {
                self.max_copied_files = n;
            }
        }
        if let Ok(v) = std::env::var("AFD_RESCAN_TIME") {
            if let Ok(n) = v.trim().parse::<i64>() {
                self.rescan_time = n;
            }
        }
        if let Ok(v) = std::env::var("AFD_ATPD_PORT") {
            if let Ok(n) = v.trim().parse::<u16>() {
                self.atpd_port = n;
            }
        }
    }

    /// Files a single host may hold before the danger pause arms.
    pub fn danger_no_of_files(&self) -> i64 {
        2 * self.max_copied_files as i64
    }

    pub fn with_max_copied_files(mut self, n: i32) -> Self {
        self.max_copied_files = n;
        self
    }

    pub fn with_max_copied_file_size(mut self, bytes: i64) -> Self {
        self.max_copied_file_size = bytes;
        self
    }

    pub fn with_rescan_time(mut self, secs: i64) -> Self {
        self.rescan_time = secs;
        self
    }

    pub fn with_max_errors(mut self, n: i32) -> Self {
        self.max_errors = n;
        self
    }

    pub fn with_atpd_port(mut self, port: u16) -> Self {
        self.atpd_port = port;
        self
    }

    pub fn with_trusted_ip<S: Into<String>>(mut self, pattern: S) -> Self {
        self.atpd_trusted_ips.push(pattern.into());
        self
    }

    pub fn with_extra_work_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.extra_work_dirs.push(dir.into());
        self
    }

    pub fn with_max_check_file_dirs(mut self, n: u64) -> Self {
        self.max_check_file_dirs = n;
        self
    }

    pub fn with_wmo_check_sequence(mut self, on: bool) -> Self {
        self.wmo_check_sequence = on;
        self
    }

    pub fn with_wmo_target_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.wmo_target_dir = dir.map(Into::into);
        self
    }
}

impl fmt::Display for AfdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AfdConfig {{ \
             max_copied_files: {}, \
             max_copied_file_size: {}, \
             rescan_time: {}, \
             transfer_timeout: {}, \
             retry_interval: {}, \
             max_errors: {}, \
             atpd_port: {}, \
             trusted_ips: [{}], \
             extra_work_dirs: {}, \
             wmo_port: {}, \
             wmo_target_dir: {} \
             }}",
            self.max_copied_files,
            self.max_copied_file_size,
            self.rescan_time,
            self.default_transfer_timeout,
            self.default_retry_interval,
            self.max_errors,
            self.atpd_port,
            self.atpd_trusted_ips.join(","),
            self.extra_work_dirs.len(),
            self.wmo_port,
            self.wmo_target_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "default(<work>/wmo)".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keys_and_comments() {
        let cfg = AfdConfig::parse(
            "# comment\n\
             MAX_COPIED_FILES 10\n\
             MAX_COPIED_FILE_SIZE 2   # KiB\n\
             ATPD_TRUSTED_REMOTE_IP 127.0.0.*\n\
             ATPD_TRUSTED_REMOTE_IP 10.*\n\
             EXTRA_WORK_DIR /data2\n\
             WMO_CHECK_SEQUENCE yes\n\
             MAX_ERRORS notanumber\n",
        );
        assert_eq!(cfg.max_copied_files, 10);
        assert_eq!(cfg.max_copied_file_size, 2048);
        assert_eq!(cfg.atpd_trusted_ips, vec!["127.0.0.*", "10.*"]);
        assert_eq!(cfg.extra_work_dirs, vec![PathBuf::from("/data2")]);
        assert!(cfg.wmo_check_sequence);
        assert_eq!(cfg.max_errors, DEFAULT_MAX_ERRORS);
        assert_eq!(cfg.danger_no_of_files(), 20);
    }

    #[test]
    fn builder_and_display() {
        let cfg = AfdConfig::default().with_max_copied_files(3).with_atpd_port(5000);
        let s = cfg.to_string();
        assert!(s.contains("max_copied_files: 3"));
        assert!(s.contains("atpd_port: 5000"));
    }
}
