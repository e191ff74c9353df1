//! `typesize_data`: the shapes this build was compiled with.
//!
//! Written on first start. On later starts the stored shapes are compared
//! with the compiled ones. A change of the user or real hostname length is
//! converted (PWB rewritten, the FSA generation dropped so the builder
//! creates a fresh one); any other change refuses to start.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::catalog::{pwb, Pwb, PwbLayout, DNB_SPEC, JID_SPEC};
use crate::consts::*;
use crate::dispatch::queue::QUEUE_SPEC;
use crate::fra::FRA_SPEC;
use crate::fsa::{FSA_FILES, FSA_SPEC};
use crate::paths::WorkDir;
use crate::status::STATUS_SPEC;
use crate::table::{self, IdFile};
use crate::watch::retrieve_list::RL_SPEC;

/// Lengths a PWB conversion can absorb.
const CONVERTIBLE: [&str; 2] = ["MAX_USER_NAME_LENGTH", "MAX_REAL_HOSTNAME_LENGTH"];
/// Records whose size follows the convertible lengths.
const DERIVED: [&str; 2] = ["FSA", "PWB"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSizes {
    pub lengths: BTreeMap<String, usize>,
    pub records: BTreeMap<String, usize>,
}

impl TypeSizes {
    pub fn compiled() -> Self {
        let lengths = [
            ("MAX_HOSTNAME_LENGTH", MAX_HOSTNAME_LENGTH),
            ("MAX_REAL_HOSTNAME_LENGTH", MAX_REAL_HOSTNAME_LENGTH),
            ("MAX_PROXY_NAME_LENGTH", MAX_PROXY_NAME_LENGTH),
            ("MAX_TOGGLE_STR_LENGTH", MAX_TOGGLE_STR_LENGTH),
            ("MAX_DIR_ALIAS_LENGTH", MAX_DIR_ALIAS_LENGTH),
            ("MAX_RECIPIENT_LENGTH", MAX_RECIPIENT_LENGTH),
            ("MAX_FILENAME_LENGTH", MAX_FILENAME_LENGTH),
            ("MAX_MSG_NAME_LENGTH", MAX_MSG_NAME_LENGTH),
            ("MAX_PARALLEL_JOBS", MAX_PARALLEL_JOBS),
            ("ERROR_HISTORY_LENGTH", ERROR_HISTORY_LENGTH),
            ("MAX_TIME_ENTRIES", MAX_TIME_ENTRIES),
            ("MAX_USER_NAME_LENGTH", MAX_USER_NAME_LENGTH),
            ("MAX_PATH_LENGTH", MAX_PATH_LENGTH),
            ("MAX_OPTION_LENGTH", MAX_OPTION_LENGTH),
            ("MAX_WAIT_FOR_LENGTH", MAX_WAIT_FOR_LENGTH),
            ("MAX_TIMEZONE_LENGTH", MAX_TIMEZONE_LENGTH),
        ];
        let records = [
            (FSA_SPEC.name, FSA_SPEC.record_size),
            (FRA_SPEC.name, FRA_SPEC.record_size),
            (JID_SPEC.name, JID_SPEC.record_size),
            (DNB_SPEC.name, DNB_SPEC.record_size),
            ("PWB", PwbLayout::current().record_size()),
            (QUEUE_SPEC.name, QUEUE_SPEC.record_size),
            (STATUS_SPEC.name, STATUS_SPEC.record_size),
            (RL_SPEC.name, RL_SPEC.record_size),
        ];
        Self {
            lengths: lengths.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            records: records.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn pwb_layout(&self) -> Option<PwbLayout> {
        Some(PwbLayout {
            user_len: *self.lengths.get("MAX_USER_NAME_LENGTH")?,
            host_len: *self.lengths.get("MAX_REAL_HOSTNAME_LENGTH")?,
        })
    }

    /// Names of every length and record that differs from `other`.
    pub fn diff(&self, other: &TypeSizes) -> Vec<String> {
        fn keys<'a>(a: &'a BTreeMap<String, usize>, b: &'a BTreeMap<String, usize>) -> Vec<&'a String> {
            let mut k: Vec<&String> = a.keys().chain(b.keys()).collect();
            k.sort();
            k.dedup();
            k.into_iter().filter(|k| a.get(*k) != b.get(*k)).collect()
        }
        keys(&self.lengths, &other.lengths)
            .into_iter()
            .chain(keys(&self.records, &other.records))
            .cloned()
            .collect()
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let t = serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(t))
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, text).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("rename {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written,
    Unchanged,
    /// PWB converted; true when entries had to be truncated.
    Converted { truncated: bool },
}

/// Compare the sidecar in `fifodir` with `compiled` and act on it.
pub fn check_with(fifodir: &Path, compiled: &TypeSizes) -> Result<Outcome> {
    let path = fifodir.join(TYPESIZE_FILE);
    let stored = match TypeSizes::load(&path)? {
        None => {
            compiled.store(&path)?;
            log::info!(target: "system", "wrote {}", path.display());
            return Ok(Outcome::Written);
        }
        Some(s) => s,
    };
    let diff = stored.diff(compiled);
    if diff.is_empty() {
        return Ok(Outcome::Unchanged);
    }
    let convertible = diff
        .iter()
        .all(|k| CONVERTIBLE.contains(&k.as_str()) || DERIVED.contains(&k.as_str()));
    if !convertible {
        bail!(
            "compiled sizes differ from {} ({}); refusing to start without a conversion",
            path.display(),
            diff.join(", ")
        );
    }
    let old = stored
        .pwb_layout()
        .with_context(|| format!("{} lacks the PWB lengths", path.display()))?;
    let new = compiled
        .pwb_layout()
        .with_context(|| "compiled sizes lack the PWB lengths".to_string())?;
    let pwb_path = Pwb::path_in(fifodir);
    let truncated = if pwb_path.exists() {
        pwb::convert(&pwb_path, old, new)?
    } else {
        false
    };
    drop_fsa(fifodir)?;
    compiled.store(&path)?;
    log::warn!(target: "system", "converted to new sizes ({})", diff.join(", "));
    Ok(Outcome::Converted { truncated })
}

pub fn check(work: &WorkDir) -> Result<Outcome> {
    check_with(&work.fifodir(), &TypeSizes::compiled())
}

/// The FSA record changes with the hostname length; remove the live
/// generation so the next build starts from HOST_CONFIG.
fn drop_fsa(fifodir: &Path) -> Result<()> {
    let id_path = fifodir.join(FSA_FILES.id_file);
    if !id_path.exists() {
        return Ok(());
    }
    let id = IdFile::open(&id_path)?;
    if let Some(gen) = id.read_generation()? {
        let data = table::data_path(fifodir, FSA_FILES, gen);
        if data.exists() {
            std::fs::remove_file(&data).with_context(|| format!("remove {}", data.display()))?;
        }
    }
    drop(id);
    std::fs::remove_file(&id_path).with_context(|| format!("remove {}", id_path.display()))?;
    log::warn!(target: "system", "FSA dropped, host counters restart from zero");
    Ok(())
}
