//! Flattening DIR_CONFIG into jobs and the option decision pass.

use anyhow::{bail, Result};
use zeroize::Zeroizing;

use crate::catalog::{dnb::dir_id_of, FileMask, JobDef, PwEntry};
use crate::consts::*;
use crate::dirconfig::{DirConfig, Recipient};
use crate::fra::TimeEntry;

/// First words of options the watcher executes.
const LOCAL_OPTION_WORDS: &[&str] = &[
    "delete",
    "exec",
    "basename",
    "extension",
    "prefix",
    "toupper",
    "tolower",
    "rename",
    "srename",
    "extract",
    "assemble",
    "convert",
    "grib2wmo",
    "gts2tiff",
    "afw2wmo",
    "tiff2gts",
    "wmo2ascii",
    "time",
    "time-no-collect",
];

const COPY_FORCING: &[&str] = &["exec", "extract", "convert", "grib2wmo", "gts2tiff", "afw2wmo"];
const LONG_RUNNING: &[&str] = &["exec", "extract", "convert", "grib2wmo", "gts2tiff"];

fn first_word(opt: &str) -> String {
    opt.split_whitespace().next().unwrap_or("").to_ascii_lowercase()
}

pub fn is_local_option(opt: &str) -> bool {
    LOCAL_OPTION_WORDS.contains(&first_word(opt).as_str())
}

/// Outcome of looking at a job's local options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionDecision {
    pub special_flag: u32,
    pub time_entries: Vec<TimeEntry>,
}

pub fn decide_options(loptions: &[String]) -> Result<OptionDecision> {
    let mut d = OptionDecision::default();
    for o in loptions {
        let w = first_word(o);
        if COPY_FORCING.contains(&w.as_str()) {
            d.special_flag |= DO_NOT_LINK_FILES;
        }
        if LONG_RUNNING.contains(&w.as_str()) {
            d.special_flag |= GO_PARALLEL;
        }
        match w.as_str() {
            "delete" => d.special_flag |= DELETE_ALL_FILES,
            "time" | "time-no-collect" => {
                if d.time_entries.len() >= MAX_TIME_ENTRIES {
                    bail!("more than {} time entries", MAX_TIME_ENTRIES);
                }
                let spec = o.trim()[w.len()..].trim();
                d.time_entries.push(TimeEntry::parse(spec)?);
                d.special_flag |= TIME_JOB;
                if w == "time-no-collect" {
                    d.special_flag |= TIME_NO_COLLECT;
                }
            }
            _ => {}
        }
    }
    if !loptions.is_empty() {
        d.special_flag |= LOCAL_OPTIONS;
    }
    Ok(d)
}

/// A job before table positions are known.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub def: JobDef,
    /// Index into `DirConfig::dirs`.
    pub dir_index: usize,
    pub masks: FileMask,
    /// Real hostname from the URL, for hosts missing in HOST_CONFIG.
    pub real_host: String,
}

#[derive(Debug, Default)]
pub struct Flattened {
    pub jobs: Vec<PlannedJob>,
    pub passwords: Vec<PwEntry>,
    /// `(dir index, error)` for every dropped piece.
    pub rejected: Vec<String>,
}

/// Directory x file group x destination x recipient. A bad recipient or
/// option set drops only its own job.
pub fn flatten(dc: &DirConfig, dir_config_id: u32) -> Flattened {
    let mut out = Flattened::default();
    for (di, dir) in dc.dirs.iter().enumerate() {
        let dir_id = dir_id_of(&dir.dir_name());
        for (gi, group) in dir.groups.iter().enumerate() {
            let masks = FileMask::new(group.masks.clone());
            for (ti, dest) in group.destinations.iter().enumerate() {
                let (loptions, soptions): (Vec<String>, Vec<String>) =
                    dest.options.iter().cloned().partition(|o| is_local_option(o));
                let mut priority = dir.options.priority;
                let mut std_opts = Vec::with_capacity(soptions.len());
                for o in soptions {
                    if first_word(&o) == "priority" {
                        match o.split_whitespace().nth(1).map(str::as_bytes) {
                            Some([p]) if p.is_ascii_digit() => priority = *p,
                            _ => out.rejected.push(format!("{}: bad option '{}'", dir.alias, o)),
                        }
                    } else {
                        std_opts.push(o);
                    }
                }
                let decision = match decide_options(&loptions) {
                    Ok(d) => d,
                    Err(e) => {
                        out.rejected.push(format!("{}: {:#}", dir.alias, e));
                        continue;
                    }
                };
                for r in &dest.recipients {
                    let rcpt = match Recipient::parse(r) {
                        Ok(x) => x,
                        Err(e) => {
                            out.rejected.push(format!("{}: {:#}", dir.alias, e));
                            continue;
                        }
                    };
                    if let Some(pw) = &rcpt.password {
                        let uh = rcpt.uh_name();
                        if !out.passwords.iter().any(|p| p.uh_name == uh) {
                            out.passwords.push(PwEntry {
                                uh_name: uh,
                                passwd: Zeroizing::new(pw.as_str().to_string()),
                                dup_check: 0,
                            });
                        }
                    }
                    let def = JobDef {
                        dir_id,
                        dir_config_id,
                        dir_pos: -1,
                        file_mask_id: masks.id,
                        fmd_offset: -1,
                        host_alias: rcpt.host_alias.clone(),
                        host_id: crate::util::checksum_str(&rcpt.host_alias),
                        recipient: rcpt.url.clone(),
                        priority,
                        loptions: loptions.clone(),
                        soptions: std_opts.clone(),
                        special_flag: decision.special_flag,
                        protocol: rcpt.protocol,
                        time_entries: decision.time_entries.clone(),
                        files_group: gi as u8,
                        destination: ti as u8,
                    };
                    let id = def.job_id();
                    if out.jobs.iter().any(|j| j.def.job_id() == id) {
                        log::debug!(target: "system", "{}: duplicate job #{:x} ignored", dir.alias, id);
                        continue;
                    }
                    out.jobs.push(PlannedJob {
                        def,
                        dir_index: di,
                        masks: masks.clone(),
                        real_host: rcpt.host.clone(),
                    });
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AfdConfig;

    #[test]
    fn option_decision_flags() {
        let d = decide_options(&[
            "exec gzip %s".to_string(),
            "delete".to_string(),
            "time 0 * * * *".to_string(),
        ])
        .unwrap();
        for f in [DO_NOT_LINK_FILES, GO_PARALLEL, DELETE_ALL_FILES, TIME_JOB, LOCAL_OPTIONS] {
            assert_ne!(d.special_flag & f, 0, "flag {:x}", f);
        }
        assert_eq!(d.time_entries.len(), 1);
        let d = decide_options(&["afw2wmo".to_string()]).unwrap();
        assert_ne!(d.special_flag & DO_NOT_LINK_FILES, 0);
        assert_eq!(d.special_flag & GO_PARALLEL, 0);
    }

    #[test]
    fn cross_product_with_bad_recipient_dropped() {
        let text = "\
[directory] /in d1
[files]
*.a
[destination]
[recipient]
file://h1/out1
ftp://u:pw@h2.example/x
[options]
priority 2
tolower
[files]
*.b
[destination]
[recipient]
file://h1/out2
";
        let dc = DirConfig::parse(text, &AfdConfig::default());
        let f = flatten(&dc, 7);
        assert_eq!(f.jobs.len(), 3);
        let j0 = &f.jobs[0].def;
        assert_eq!(j0.priority, b'2');
        assert_eq!(j0.loptions, ["tolower"]);
        assert!(j0.soptions.is_empty());
        assert_eq!(f.jobs[1].def.host_alias, "h2.examp");
        assert_eq!(f.jobs[1].def.recipient, "ftp://u@h2.example/x");
        assert_eq!(f.passwords.len(), 1);
        assert_eq!(f.jobs[2].def.files_group, 1);
        assert_ne!(f.jobs[0].masks.id, f.jobs[2].masks.id);
    }
}
