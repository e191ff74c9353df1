use anyhow::{Context, Result};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Wall clock in seconds. Everything time-dependent takes `now` as a
/// parameter; only binaries call this.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// CRC32 over the NUL-joined parts. Used for job, dir, host and mask ids.
pub fn checksum_parts(parts: &[&[u8]]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            h.update(&[0]);
        }
        h.update(p);
    }
    h.finalize()
}

pub fn checksum_str(s: &str) -> u32 {
    crc32fast::hash(s.as_bytes())
}

pub fn parse_hex_u32(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 8 {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

pub fn parse_hex_i64(s: &str) -> Option<i64> {
    if s.is_empty() || s.len() > 16 {
        return None;
    }
    i64::from_str_radix(s, 16).ok()
}

static UNIQUE: AtomicU32 = AtomicU32::new(0);

/// Process-local unique counter for message names; mixed with the pid so
/// two watchers never collide within one second.
pub fn next_unique_number() -> u32 {
    let n = UNIQUE.fetch_add(1, Ordering::Relaxed);
    (std::process::id() << 16) ^ n
}

/// Remove a directory tree; a missing tree is not an error.
pub fn rec_rmdir(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("rec_rmdir {}", path.display())),
    }
}

/// Number and total size of regular files directly inside `dir`. Stops early
/// (and returns what it has) once `deadline` passes.
pub fn count_files(dir: &Path, deadline: Option<Instant>) -> Result<(u32, u64)> {
    let mut files = 0u32;
    let mut bytes = 0u64;
    let rd = std::fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))?;
    for ent in rd {
        let ent = match ent {
            Ok(e) => e,
            Err(_) => continue,
        };
        if let Ok(md) = ent.metadata() {
            if md.is_file() {
                files += 1;
                bytes += md.len();
            }
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                log::debug!("count_files {} stopped at deadline", dir.display());
                break;
            }
        }
    }
    Ok((files, bytes))
}

/// Kernel per-inode hardlink ceiling for the filesystem holding `path`.
pub fn link_max(path: &Path) -> i64 {
    let c = match CString::new(path.as_os_str().as_bytes()) {
        Ok(c) => c,
        Err(_) => return DEFAULT_LINK_MAX,
    };
    // SAFETY: `c` is a valid NUL-terminated path for the duration of the call.
    let v = unsafe { libc::pathconf(c.as_ptr(), libc::_PC_LINK_MAX) };
    if v <= 0 {
        DEFAULT_LINK_MAX
    } else {
        v as i64
    }
}

const DEFAULT_LINK_MAX: i64 = 32000;

/// Clock ticks per second (`sysconf(_SC_CLK_TCK)`).
pub fn clk_tck() -> i64 {
    // SAFETY: sysconf has no preconditions.
    let v = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if v <= 0 {
        100
    } else {
        v as i64
    }
}

pub fn sleep_secs(secs: f64) {
    if secs > 0.0 {
        std::thread::sleep(Duration::from_secs_f64(secs));
    }
}

/// Device number of `path`.
pub fn device_of(path: &Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    let md = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    Ok(md.dev())
}

/// True for a regular file with at least one execute bit.
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(md) => md.is_file() && md.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Login name used to stamp operator actions.
pub fn login_name() -> String {
    std::env::var("LOGNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "unknown".to_string())
}
