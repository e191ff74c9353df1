//! Config builder: text configuration -> new FSA/FRA generation plus the
//! JID/DNB/FMD/PWB catalog.
//!
//! Both generations are created and filled under their exclusive ID locks,
//! the catalogs are written, and only then are the ID files flipped. An
//! error before the flip leaves the previous generation live.

pub mod carry;
pub mod jobs;

pub use jobs::{decide_options, flatten, is_local_option, OptionDecision, PlannedJob};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::catalog::{Dnb, FileMask, Fmd, Jid, JobDef, Pwb};
use crate::config::AfdConfig;
use crate::consts::*;
use crate::dirconfig::{DirConfig, DirEntry, HostConfig, HostEntry, Recipient};
use crate::fra::{DirRec, Fra, FRA_FILES, FRA_SPEC};
use crate::fsa::{Fsa, HostRec, FSA_FILES, FSA_SPEC};
use crate::paths::WorkDir;
use crate::spool::SpoolRoots;
use crate::table::{self, Access, IdFile, NewGeneration};
use crate::util::{checksum_str, device_of};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub hosts: usize,
    pub dirs: usize,
    pub jobs: usize,
    pub fsa_generation: i32,
    pub fra_generation: i32,
    /// Hosts kept only because they still had files queued.
    pub retained_hosts: Vec<String>,
    /// Dropped jobs and options, one line each.
    pub rejected: Vec<String>,
    pub passwords_changed: bool,
}

/// Read `etc/host_config` and `etc/dir_config` and build from them.
pub fn reread(work: &WorkDir, cfg: &AfdConfig) -> Result<BuildReport> {
    let hc = HostConfig::load(&work.etc_file(HOST_CONFIG_FILE), cfg)?;
    let path = work.etc_file(DIR_CONFIG_FILE);
    let text = if path.exists() {
        std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?
    } else {
        log::warn!(target: "system", "{} does not exist", path.display());
        String::new()
    };
    let dc = DirConfig::parse(&text, cfg);
    build(work, cfg, &hc, &dc, checksum_str(&text))
}

/// Host list in FSA order with the protocol bits the jobs need.
struct HostPlan {
    entries: Vec<HostEntry>,
    protocol: HashMap<String, u32>,
    retained: Vec<String>,
}

impl HostPlan {
    fn new(hc: &HostConfig) -> Self {
        Self {
            entries: hc.hosts.clone(),
            protocol: HashMap::new(),
            retained: Vec::new(),
        }
    }

    fn has(&self, alias: &str) -> bool {
        self.entries.iter().any(|h| !h.group_header && h.alias == alias)
    }

    /// Ungrouped hosts go before the first group header.
    fn insert_ungrouped(&mut self, e: HostEntry) {
        let at = self
            .entries
            .iter()
            .position(|h| h.group_header)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, e);
    }

    fn need(&mut self, alias: &str, real_host: &str, protocol: u32, cfg: &AfdConfig) {
        if !self.has(alias) {
            let mut e = HostEntry::with_defaults(alias, cfg);
            e.real_hostname[0] = real_host.to_string();
            log::info!(target: "system", "host {} not in HOST_CONFIG, using defaults", alias);
            self.insert_ungrouped(e);
        }
        *self.protocol.entry(alias.to_string()).or_insert(0) |= protocol;
    }
}

fn dir_protocol(d: &DirEntry) -> Result<(u32, Option<Recipient>)> {
    if d.is_local() {
        return Ok((LOC, None));
    }
    let r = Recipient::parse(&d.location)?;
    Ok((r.protocol | RETRIEVE_FLAG, Some(r)))
}

/// Lock, create and fill a new FSA generation; does not commit.
fn stage_fsa(
    fifodir: &Path,
    plan: &mut HostPlan,
    cfg: &AfdConfig,
) -> Result<(IdFile, table::IdLock, Option<Fsa>, NewGeneration)> {
    let id = IdFile::open(&fifodir.join(FSA_ID_FILE))?;
    let lock = id.lock_exclusive()?;
    let old = table::attach_locked(&id, fifodir, FSA_FILES, FSA_SPEC, Access::Active)?
        .map(|m| Fsa::from_mapping(fifodir, m));

    if let Some(old) = &old {
        for pos in old.iter_hosts(false)? {
            let h = old.host(pos)?;
            let alias = h.host_alias();
            if plan.has(&alias) || h.total_file_counter() <= 0 {
                continue;
            }
            let e = carry::entry_of(&h);
            log::warn!(
                target: "system",
                "host {} removed from configuration but still has {} files queued, keeping it",
                alias,
                h.total_file_counter()
            );
            plan.retained.push(alias.clone());
            *plan.protocol.entry(alias).or_insert(0) |= h.protocol();
            plan.insert_ungrouped(e);
        }
    }

    let mut ng = NewGeneration::create(&id, &lock, fifodir, FSA_FILES, FSA_SPEC, plan.entries.len())
        .with_context(|| format!("create FSA for {} hosts", plan.entries.len()))?;
    for (pos, e) in plan.entries.iter().enumerate() {
        let mut h = HostRec::new(ng.mapping.record_mut(pos)?);
        carry::init_host(&mut h, e);
        if e.group_header {
            continue;
        }
        let proto = plan.protocol.get(&e.alias).copied().unwrap_or(0);
        h.set_protocol(proto);
        let in_dc = if plan.retained.contains(&e.alias) {
            HOST_NOT_IN_DIR_CONFIG
        } else if proto != 0 {
            HOST_IN_DIR_CONFIG
        } else {
            0
        };
        h.set_special_flag(h.special_flag() | in_dc);
        if e.max_errors <= 0 {
            h.set_max_errors(cfg.max_errors);
        }
        h.init_slots();
        if let Some(old) = &old {
            if let Some(opos) = old.position(&e.alias)? {
                carry::carry_host(&mut h, &old.host(opos)?);
            }
        }
        h.recompute_trl();
        h.update_dsp_name();
    }
    Ok((id, lock, old, ng))
}

fn stage_fra(
    fifodir: &Path,
    dc: &DirConfig,
    host_pos: &HashMap<String, usize>,
    spool: &SpoolRoots,
) -> Result<(IdFile, table::IdLock, Option<Fra>, NewGeneration)> {
    let id = IdFile::open(&fifodir.join(FRA_ID_FILE))?;
    let lock = id.lock_exclusive()?;
    let old = table::attach_locked(&id, fifodir, FRA_FILES, FRA_SPEC, Access::Active)?
        .map(|m| Fra::from_mapping(fifodir, m));
    let mut ng = NewGeneration::create(&id, &lock, fifodir, FRA_FILES, FRA_SPEC, dc.dirs.len())
        .with_context(|| format!("create FRA for {} directories", dc.dirs.len()))?;
    for (pos, d) in dc.dirs.iter().enumerate() {
        let mut r = DirRec::new(ng.mapping.record_mut(pos)?);
        let name = d.dir_name();
        r.set_dir_alias(&d.alias);
        r.set_dir_id(crate::catalog::dnb::dir_id_of(&name));
        r.set_url(&d.location);
        r.set_ls_data_alias(&d.alias);
        r.set_fsa_pos(-1);
        r.set_ewl_pos(-1);
        d.options.write_to(&mut r);
        match dir_protocol(d) {
            Ok((proto, rcpt)) => {
                r.set_protocol(proto);
                if let Some(rcpt) = rcpt {
                    r.set_host_alias(&rcpt.host_alias);
                    if let Some(&p) = host_pos.get(&rcpt.host_alias) {
                        r.set_fsa_pos(p as i32);
                    }
                }
            }
            Err(e) => log::warn!(target: "system", "{}: {:#}", d.alias, e),
        }
        if r.is_local() {
            let path = Path::new(&name);
            if !path.is_dir() {
                if let Err(e) = std::fs::create_dir_all(path) {
                    log::warn!(target: "system", "create {}: {}", path.display(), e);
                }
            }
            if let Ok(dev) = device_of(path) {
                if let Some(i) = spool.index_for_device(dev) {
                    r.set_ewl_pos(i as i32);
                    r.set_dir_flag(r.dir_flag() | IN_SAME_FILESYSTEM);
                } else if spool.main_device() == Some(dev) {
                    r.set_dir_flag(r.dir_flag() | IN_SAME_FILESYSTEM);
                }
            }
        }
        if let Some(old) = &old {
            if let Some(opos) = old.position(&d.alias)? {
                carry::carry_dir(&mut r, &old.dir(opos)?);
            }
        }
    }
    Ok((id, lock, old, ng))
}

/// Build and commit a new generation from parsed configuration.
pub fn build(work: &WorkDir, cfg: &AfdConfig, hc: &HostConfig, dc: &DirConfig, dir_config_id: u32) -> Result<BuildReport> {
    let spool = SpoolRoots::from_config(work, cfg)?;
    build_with(work, cfg, hc, dc, dir_config_id, &spool)
}

/// `build` against explicit spool roots; their devices decide which
/// directories may hardlink into the spool.
pub fn build_with(
    work: &WorkDir,
    cfg: &AfdConfig,
    hc: &HostConfig,
    dc: &DirConfig,
    dir_config_id: u32,
    spool: &SpoolRoots,
) -> Result<BuildReport> {
    let fifodir = work.fifodir();
    std::fs::create_dir_all(&fifodir).with_context(|| format!("create {}", fifodir.display()))?;

    let flat = flatten(dc, dir_config_id);
    for r in &flat.rejected {
        log::warn!(target: "system", "DIR_CONFIG: {}", r);
    }
    let mut plan = HostPlan::new(hc);
    for j in &flat.jobs {
        plan.need(&j.def.host_alias, &j.real_host, j.def.protocol | SEND_FLAG, cfg);
    }
    for d in &dc.dirs {
        if let Ok((proto, Some(r))) = dir_protocol(d) {
            plan.need(&r.host_alias, &r.host, proto, cfg);
        }
    }

    let (fsa_id, fsa_lock, old_fsa, fsa_ng) = stage_fsa(&fifodir, &mut plan, cfg)?;
    let host_pos: HashMap<String, usize> = plan
        .entries
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.group_header)
        .map(|(i, h)| (h.alias.clone(), i))
        .collect();
    let (fra_id, fra_lock, old_fra, fra_ng) = stage_fra(&fifodir, dc, &host_pos, spool)?;

    let names: Vec<String> = dc.dirs.iter().map(DirEntry::dir_name).collect();
    Dnb::merge(&fifodir, &names)?;
    let masks: Vec<FileMask> = flat.jobs.iter().map(|j| j.masks.clone()).collect();
    let (_, offsets) = Fmd::merge(&fifodir, &masks)?;
    let jobs: Vec<JobDef> = flat
        .jobs
        .iter()
        .zip(offsets.iter())
        .map(|(j, &off)| {
            let mut def = j.def.clone();
            def.dir_pos = j.dir_index as i32;
            def.fmd_offset = off;
            def
        })
        .collect();
    Jid::write(&fifodir, &jobs).context("WRITTING_JID_STRUCT")?;
    let passwords_changed = Pwb::update(&fifodir, &flat.passwords)?;

    let fsa = fsa_ng
        .commit(&fsa_id, &fsa_lock, old_fsa.map(Fsa::into_mapping))
        .context("flip FSA generation")?;
    let fra = fra_ng
        .commit(&fra_id, &fra_lock, old_fra.map(Fra::into_mapping))
        .context("flip FRA generation")?;

    let report = BuildReport {
        hosts: host_pos.len(),
        dirs: dc.dirs.len(),
        jobs: jobs.len(),
        fsa_generation: fsa.generation().unwrap_or(0),
        fra_generation: fra.generation().unwrap_or(0),
        retained_hosts: plan.retained,
        rejected: flat.rejected,
        passwords_changed,
    };
    log::info!(
        target: "system",
        "Found {} directories with {} jobs for {} hosts (FSA {}, FRA {})",
        report.dirs,
        report.jobs,
        report.hosts,
        report.fsa_generation,
        report.fra_generation
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(tag: &str) -> WorkDir {
        let root = std::env::temp_dir().join(format!(
            "afd-build-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let w = WorkDir::new(root);
        w.create_tree().unwrap();
        w
    }

    #[test]
    fn missing_hosts_are_added_and_old_busy_hosts_retained() {
        let w = work("retain");
        let cfg = AfdConfig::default();
        let src = w.root().join("in");
        let text = |host: &str| {
            format!(
                "[directory] {} d\n[files]\n*\n[destination]\n[recipient]\nfile://{}/{}\n",
                src.display(),
                host,
                w.root().join("out").display()
            )
        };
        let hc = HostConfig::parse("[grp]\ng1\n", &cfg);
        let dc = DirConfig::parse(&text("a"), &cfg);
        let r = build(&w, &cfg, &hc, &dc, 1).unwrap();
        assert_eq!((r.hosts, r.dirs, r.jobs), (2, 1, 1));

        let mut fsa = Fsa::attach_active(&w.fifodir()).unwrap();
        assert_eq!(fsa.host(0).unwrap().host_alias(), "a");
        assert!(fsa.host(1).unwrap().is_group_header());
        let a = fsa.host(0).unwrap();
        assert_ne!(a.special_flag() & HOST_IN_DIR_CONFIG, 0);
        assert_ne!(a.protocol() & (LOC | SEND_FLAG), 0);
        fsa.add_tfc(0, 3, 30).unwrap();
        drop(fsa);

        let dc = DirConfig::parse(&text("b"), &cfg);
        let r = build(&w, &cfg, &hc, &dc, 2).unwrap();
        assert_eq!(r.retained_hosts, ["a"]);
        let fsa = Fsa::attach_passive(&w.fifodir()).unwrap();
        let pos = fsa.position("a").unwrap().unwrap();
        let a = fsa.host(pos).unwrap();
        assert_eq!(a.total_file_counter(), 3);
        assert_ne!(a.special_flag() & HOST_NOT_IN_DIR_CONFIG, 0);
        assert!(fsa.position("b").unwrap().is_some());

        let fra = Fra::attach_passive(&w.fifodir()).unwrap();
        let d = fra.dir(0).unwrap();
        assert_eq!(d.dir_alias(), "d");
        assert!(d.is_local());
        assert_ne!(d.dir_flag() & IN_SAME_FILESYSTEM, 0);
        assert!(src.is_dir());
    }
}
