//! AFD: automatic file distribution.
//!
//! Cooperating processes share state through memory-mapped tables in the
//! fifo directory and talk over named pipes:
//! - `afd` supervises the others,
//! - `amg` watches source directories and turns new files into messages,
//! - `fd` queues messages and starts one transfer worker per job,
//! - `afd_worker` handles host maintenance and the spool janitor.

// Shared tables and their plumbing
pub mod table;
pub mod consts;
pub mod error;
pub mod exit;
pub mod util;
pub mod paths;
pub mod config;
pub mod logging;

pub mod fsa;
pub mod fra;
pub mod catalog;
pub mod status;

// Inter-process messages
pub mod fifo;
pub mod message;
pub mod spool;

// Events and actions
pub mod event;
pub mod action;
pub mod error_queue;
pub mod host_state;
pub mod handle_event;

// Processes
pub mod dirconfig;
pub mod builder;
pub mod watch;
pub mod dispatch;
pub mod worker;
pub mod janitor;
pub mod supervisor;
pub mod atpd;
pub mod wmo;

// Operator tools and startup checks
pub mod dump;
pub mod typesize;

pub use config::AfdConfig;
pub use error::{is_stale, TableError};
pub use fra::Fra;
pub use fsa::Fsa;
pub use paths::WorkDir;
pub use status::{AfdStatus, Component};
