//! Diagnostic logging for the binaries.

use env_logger::{Builder, Env};

/// Filter variable that takes precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "AFD_LOG";

/// Level from `AFD_LOG`, else `RUST_LOG`, else info.
/// Example: AFD_LOG=trans_db=debug,info afd -w /srv/afd
pub fn init_logger() {
    let env = if std::env::var_os(LOG_ENV).is_some() {
        Env::new().filter(LOG_ENV)
    } else {
        Env::default().default_filter_or("info")
    };
    Builder::from_env(env).format_timestamp_millis().init();
}
