//! Configuration text: DIR_CONFIG, HOST_CONFIG and the routing rule files.

pub mod bulletin;
pub mod dir_config;
pub mod host_config;
pub mod recipient;

pub use bulletin::{BulletinRule, RoutingTable, RuleType};
pub use dir_config::{default_dir_alias, local_dir_of, Destination, DirConfig, DirEntry, DirOptions, FileGroup};
pub use host_config::{HostConfig, HostEntry};
pub use recipient::Recipient;
