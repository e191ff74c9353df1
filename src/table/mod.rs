//! Shared table layer: mapped files with the common header, record views,
//! byte-range locks and generational swap.

pub mod generation;
pub mod header;
pub mod id_file;
pub mod lock;
pub mod mapping;
pub mod view;

pub use generation::{attach, attach_locked, data_path, GenFiles, NewGeneration};
pub use header::{system_page_size, TableHeader};
pub use id_file::{IdFile, IdLock};
pub use lock::{lock_byte, LockRegion, RecordLock};
pub use mapping::{Access, Mapping, TableSpec};

use anyhow::Result;
use std::path::Path;

/// Replace a non-generational table file (`jid_data`, `dnb_data`, ...):
/// the new content is written to `<name>.tmp` by `fill`, renamed over the
/// old file, and the previous mapping is marked stale.
pub fn rewrite_table<F>(
    path: &Path,
    spec: TableSpec,
    entries: usize,
    body_len: usize,
    fill: F,
) -> Result<Mapping>
where
    F: FnOnce(&mut Mapping) -> Result<()>,
{
    let tmp = path.with_extension("tmp");
    let mut fresh = Mapping::create(&tmp, spec, entries, body_len)?;
    if let Err(e) = fill(&mut fresh) {
        drop(fresh);
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    fresh.flush();

    let old = if path.exists() {
        Mapping::open(path, spec, Access::Active).ok()
    } else {
        None
    };
    std::fs::rename(&tmp, path)?;
    if let Some(mut old) = old {
        if let Err(e) = old.mark_stale() {
            log::warn!("mark {} stale: {:#}", path.display(), e);
        }
    }
    Mapping::open(path, spec, Access::Active)
}
