use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Operator tool for a running (or stopped) AFD.
#[derive(Parser, Debug)]
#[command(name = "afdctl", version, about = "AFD control CLI")]
pub struct Cli {
    /// Work directory (default: $AFD_WORK_DIR)
    #[arg(short = 'w', long = "work-dir", global = true)]
    pub work_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create the work tree, FIFOs and tables from etc/host_config and etc/dir_config
    Init,
    /// Print HOST_CONFIG and DIR_CONFIG rebuilt from the live tables
    DumpConfig {
        /// Write etc-style files into this directory instead of stdout
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Restore recipient passwords from the password buffer
        #[arg(long)]
        passwords: bool,
    },
    /// Component states and per-host counters. --json prints one JSON object.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Acknowledge or park a host's error state
    HandleEvent {
        /// Host alias
        host: String,
        /// ack | ack-timed | offline | offline-timed | offline-static | unset
        action: String,
        /// End of a timed action, seconds from now
        #[arg(long)]
        for_secs: Option<i64>,
    },
    /// Ask AFD to reread HOST_CONFIG and DIR_CONFIG
    Reread,
    /// Stop AFD and all its components
    Shutdown,
    /// Run one spool janitor pass now
    Janitor,
}
