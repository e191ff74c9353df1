//! HOST_CONFIG: one colon separated line per host, `[name]` group headers.
//!
//! ```text
//! alias:host1:host2:toggle:proxy:allowed_transfers:max_errors:retry_interval:
//! block_size:max_successful_retries:transfer_timeout:host_status:
//! protocol_options:transfer_rate_limit:ttl:socksnd:sockrcv:keep_connected:
//! warn_time:special_flag
//! ```
//!
//! `toggle` is `{12}` for automatic or `[12]` for manual switching between
//! `host1` and `host2`; empty means no second host. Missing trailing fields
//! take their defaults.

use anyhow::{anyhow, bail, Context, Result};

use crate::config::AfdConfig;
use crate::consts::*;
use crate::table::view::truncate_str;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub alias: String,
    pub group_header: bool,
    pub real_hostname: [String; 2],
    pub toggle_str: String,
    pub proxy_name: String,
    pub allowed_transfers: i32,
    pub max_errors: i32,
    pub retry_interval: i32,
    pub block_size: i32,
    pub max_successful_retries: i32,
    pub transfer_timeout: i32,
    pub host_status: u32,
    pub protocol_options: u32,
    pub transfer_rate_limit: i64,
    pub ttl: i32,
    pub socksnd_bufsize: i32,
    pub sockrcv_bufsize: i32,
    pub keep_connected: u32,
    pub warn_time: i64,
    pub special_flag: u32,
}

impl HostEntry {
    /// A host known only from DIR_CONFIG.
    pub fn with_defaults(alias: &str, cfg: &AfdConfig) -> Self {
        let alias = truncate_str(alias, MAX_HOSTNAME_LENGTH).to_string();
        Self {
            real_hostname: [alias.clone(), String::new()],
            alias,
            group_header: false,
            toggle_str: String::new(),
            proxy_name: String::new(),
            allowed_transfers: DEFAULT_ALLOWED_TRANSFERS,
            max_errors: cfg.max_errors,
            retry_interval: cfg.default_retry_interval,
            block_size: DEFAULT_BLOCK_SIZE,
            max_successful_retries: DEFAULT_SUCCESSFUL_RETRIES,
            transfer_timeout: cfg.default_transfer_timeout,
            host_status: 0,
            protocol_options: 0,
            transfer_rate_limit: 0,
            ttl: 0,
            socksnd_bufsize: 0,
            sockrcv_bufsize: 0,
            keep_connected: 0,
            warn_time: 0,
            special_flag: 0,
        }
    }

    fn group(name: &str, cfg: &AfdConfig) -> Self {
        let mut h = Self::with_defaults(name, cfg);
        h.group_header = true;
        h.real_hostname = [String::new(), String::new()];
        h
    }

    pub fn auto_toggle(&self) -> bool {
        self.toggle_str.starts_with('{')
    }

    pub fn render(&self) -> String {
        if self.group_header {
            return format!("[{}]", self.alias);
        }
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.alias,
            self.real_hostname[0],
            self.real_hostname[1],
            self.toggle_str,
            self.proxy_name,
            self.allowed_transfers,
            self.max_errors,
            self.retry_interval,
            self.block_size,
            self.max_successful_retries,
            self.transfer_timeout,
            self.host_status,
            self.protocol_options,
            self.transfer_rate_limit,
            self.ttl,
            self.socksnd_bufsize,
            self.sockrcv_bufsize,
            self.keep_connected,
            self.warn_time,
            self.special_flag
        )
    }
}

fn num<T: std::str::FromStr>(fields: &[&str], i: usize, default: T, what: &str) -> Result<T> {
    match fields.get(i).map(|s| s.trim()) {
        None | Some("") => Ok(default),
        Some(s) => s.parse().map_err(|_| anyhow!("{} '{}' is not a number", what, s)),
    }
}

fn parse_line(line: &str, cfg: &AfdConfig) -> Result<HostEntry> {
    let f: Vec<&str> = line.split(':').collect();
    let alias = f[0].trim();
    if alias.is_empty() {
        bail!("empty host alias");
    }
    if alias.len() > MAX_HOSTNAME_LENGTH {
        bail!("host alias '{}' longer than {}", alias, MAX_HOSTNAME_LENGTH);
    }
    let mut h = HostEntry::with_defaults(alias, cfg);
    let s = |i: usize| f.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
    let host1 = s(1);
    h.real_hostname = [if host1.is_empty() { h.alias.clone() } else { host1 }, s(2)];
    h.toggle_str = s(3);
    if !h.toggle_str.is_empty() {
        let t = h.toggle_str.as_bytes();
        let ok = t.len() <= MAX_TOGGLE_STR_LENGTH
            && t.len() >= 3
            && matches!((t[0], t[t.len() - 1]), (b'{', b'}') | (b'[', b']'));
        if !ok {
            bail!("invalid toggle '{}'", h.toggle_str);
        }
    }
    h.proxy_name = s(4);
    h.allowed_transfers = num(&f, 5, h.allowed_transfers, "allowed transfers")?;
    if h.allowed_transfers < 1 || h.allowed_transfers as usize > MAX_PARALLEL_JOBS {
        log::warn!(
            target: "system",
            "{}: allowed transfers {} out of range, using {}",
            h.alias,
            h.allowed_transfers,
            h.allowed_transfers.clamp(1, MAX_PARALLEL_JOBS as i32)
        );
        h.allowed_transfers = h.allowed_transfers.clamp(1, MAX_PARALLEL_JOBS as i32);
    }
    h.max_errors = num(&f, 6, h.max_errors, "max errors")?;
    h.retry_interval = num(&f, 7, h.retry_interval, "retry interval")?;
    h.block_size = num(&f, 8, h.block_size, "block size")?;
    h.max_successful_retries = num(&f, 9, h.max_successful_retries, "successful retries")?;
    h.transfer_timeout = num(&f, 10, h.transfer_timeout, "transfer timeout")?;
    h.host_status = num(&f, 11, 0u32, "host status")? & HOST_CONFIG_STATUS_MASK;
    h.protocol_options = num(&f, 12, 0, "protocol options")?;
    h.transfer_rate_limit = num(&f, 13, 0, "transfer rate limit")?;
    h.ttl = num(&f, 14, 0, "ttl")?;
    h.socksnd_bufsize = num(&f, 15, 0, "socket send buffer")?;
    h.sockrcv_bufsize = num(&f, 16, 0, "socket receive buffer")?;
    h.keep_connected = num(&f, 17, 0, "keep connected")?;
    h.warn_time = num(&f, 18, 0, "warn time")?;
    h.special_flag = num(&f, 19, 0u32, "special flag")? & HOST_CONFIG_SPECIAL_MASK;
    Ok(h)
}

/// Hosts in FSA order: ungrouped hosts first, then each group header
/// followed by its members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    pub hosts: Vec<HostEntry>,
}

impl HostConfig {
    /// Bad lines are logged and skipped.
    pub fn parse(text: &str, cfg: &AfdConfig) -> Self {
        let mut ungrouped = Vec::new();
        let mut groups: Vec<(HostEntry, Vec<HostEntry>)> = Vec::new();
        let mut in_group = false;
        for (no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim();
                if name.is_empty() {
                    in_group = false;
                } else {
                    groups.push((HostEntry::group(name, cfg), Vec::new()));
                    in_group = true;
                }
                continue;
            }
            match parse_line(line, cfg) {
                Ok(h) => match groups.last_mut() {
                    Some((_, members)) if in_group => members.push(h),
                    _ => ungrouped.push(h),
                },
                Err(e) => log::warn!(target: "system", "HOST_CONFIG line {}: {:#}", no + 1, e),
            }
        }
        let mut hosts = ungrouped;
        for (g, members) in groups {
            hosts.push(g);
            hosts.extend(members);
        }
        Self { hosts }
    }

    pub fn load(path: &std::path::Path, cfg: &AfdConfig) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self::parse(&text, cfg))
    }

    pub fn position(&self, alias: &str) -> Option<usize> {
        self.hosts.iter().position(|h| !h.group_header && h.alias == alias)
    }

    /// Text form. Ungrouped hosts come first, so no `[]` is needed.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for h in &self.hosts {
            out.push_str(&h.render());
            out.push('\n');
        }
        out
    }
}
