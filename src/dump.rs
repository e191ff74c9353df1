//! Configuration dump: HOST_CONFIG and DIR_CONFIG text rebuilt from the
//! live tables.
//!
//! Directory options come from the FRA and only those given explicitly
//! (`in_dc_flag`) are printed. File groups and destinations are rebuilt
//! from the job catalog using the group and destination indices each job
//! carries.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

use crate::builder::carry;
use crate::catalog::{Dnb, Fmd, Jid, JobDef, Pwb};
use crate::dirconfig::{default_dir_alias, Destination, DirConfig, DirEntry, DirOptions, FileGroup, HostConfig, Recipient};
use crate::fra::Fra;
use crate::fsa::Fsa;
use crate::table::Access;

pub fn host_config(fifodir: &Path) -> Result<HostConfig> {
    let fsa = Fsa::attach_passive(fifodir)?;
    let mut hosts = Vec::new();
    for pos in fsa.iter_hosts(true)? {
        hosts.push(carry::entry_of(&fsa.host(pos)?));
    }
    Ok(HostConfig { hosts })
}

/// With `passwords` set, recipients get their password back from the PWB.
pub fn dir_config(fifodir: &Path, passwords: bool) -> Result<DirConfig> {
    let fra = Fra::attach_passive(fifodir)?;
    let jid = Jid::open(fifodir, Access::Passive)?;
    let fmd = Fmd::open(fifodir, Access::Passive)?;
    let dnb = Dnb::open(fifodir, Access::Passive)?;
    let pwb = if passwords {
        Some(Pwb::open(fifodir, Access::Passive)?)
    } else {
        None
    };
    let jobs = jid.jobs()?;

    let mut dirs = Vec::new();
    for pos in 0..fra.no_of_dirs()? {
        let d = fra.dir(pos)?;
        let alias = d.dir_alias();
        let options = DirOptions::from_dir(&d);
        let dir_id = d.dir_id();
        let mut location = d.url();
        if location.is_empty() {
            location = dnb
                .lookup(dir_id)?
                .ok_or_else(|| anyhow!("{}: no URL and no DNB entry for #{:x}", alias, dir_id))?;
        }

        // group index -> (mask id, destination index -> jobs)
        let mut groups: BTreeMap<u8, (u32, BTreeMap<u8, Vec<&JobDef>>)> = BTreeMap::new();
        for j in jobs.iter().filter(|j| j.dir_id == dir_id) {
            groups
                .entry(j.files_group)
                .or_insert_with(|| (j.file_mask_id, BTreeMap::new()))
                .1
                .entry(j.destination)
                .or_default()
                .push(j);
        }

        let mut file_groups = Vec::with_capacity(groups.len());
        for (mask_id, dests) in groups.into_values() {
            let masks = fmd
                .by_id(mask_id)?
                .ok_or_else(|| anyhow!("{}: file mask #{:x} missing from FMD", alias, mask_id))?
                .masks;
            let mut destinations = Vec::with_capacity(dests.len());
            for members in dests.into_values() {
                let first = members[0];
                let mut opts = first.loptions.clone();
                opts.extend(first.soptions.iter().cloned());
                if first.priority != options.priority {
                    opts.push(format!("priority {}", first.priority as char));
                }
                let mut recipients = Vec::with_capacity(members.len());
                for j in members {
                    recipients.push(match &pwb {
                        Some(p) => with_password(&j.recipient, p)?,
                        None => j.recipient.clone(),
                    });
                }
                destinations.push(Destination {
                    recipients,
                    options: opts,
                });
            }
            file_groups.push(FileGroup { masks, destinations });
        }
        if file_groups.is_empty() {
            log::debug!(target: "system", "{}: no jobs in catalog", alias);
        }

        dirs.push(DirEntry {
            alias_given: alias != default_dir_alias(&location),
            location,
            alias,
            options,
            groups: file_groups,
        });
    }
    Ok(DirConfig { dirs })
}

fn with_password(recipient: &str, pwb: &Pwb) -> Result<String> {
    let r = Recipient::parse(recipient)?;
    if r.user.is_empty() || r.scheme == "mailto" {
        return Ok(recipient.to_string());
    }
    let pw = match pwb.lookup(&r.user, &r.host)? {
        Some(pw) => pw,
        None => return Ok(recipient.to_string()),
    };
    let mut url = Url::parse(recipient)?;
    url.set_password(Some(pw.as_str()))
        .map_err(|_| anyhow!("'{}': cannot set password", recipient))?;
    Ok(url.to_string())
}

/// Both files as one text, HOST_CONFIG first.
pub fn render_all(fifodir: &Path, passwords: bool) -> Result<(String, String)> {
    Ok((host_config(fifodir)?.render(), dir_config(fifodir, passwords)?.render()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build, flatten};
    use crate::config::AfdConfig;
    use crate::paths::WorkDir;

    fn work(tag: &str) -> WorkDir {
        let root = std::env::temp_dir().join(format!("afd-dump-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let w = WorkDir::new(root);
        w.create_tree().unwrap();
        w
    }

    fn job_ids(dc: &DirConfig) -> Vec<u32> {
        let mut ids: Vec<u32> = flatten(dc, 0).jobs.iter().map(|j| j.def.job_id()).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn dump_parses_back_to_the_same_configuration() {
        let w = work("rt");
        let cfg = AfdConfig::default();
        let src = w.root().join("in");
        let out = w.root().join("out");
        let host_text = "a:ha::::2:5\n[grp]\nb:hb::::1:3\n";
        let dir_text = format!(
            "# incoming
[directory] {src} d1
[dir options]
max copied files 50
warn time 600
   [files]
   *.txt
   !*.tmp
      [destination]
         [recipient]
         file://a{out}/x
         file://b{out}/y
         [options]
         priority 3
         rename r1
      [destination]
         [recipient]
         ftp://anna:secret@hb/z
   [files]
   *
      [destination]
         [recipient]
         file://a{out}/all
[directory] {src2}
   [files]
   data*
      [destination]
         [recipient]
         file://b{out}/data
",
            src = src.display(),
            src2 = w.root().join("in2").display(),
            out = out.display(),
        );
        let hc = HostConfig::parse(host_text, &cfg);
        let dc = DirConfig::parse(&dir_text, &cfg);
        build(&w, &cfg, &hc, &dc, 7).unwrap();

        let (hosts, dirs) = render_all(&w.fifodir(), true).unwrap();
        let hc2 = HostConfig::parse(&hosts, &cfg);
        let dc2 = DirConfig::parse(&dirs, &cfg);

        let aliases: Vec<_> = hc2.hosts.iter().map(|h| h.alias.as_str()).collect();
        assert_eq!(aliases, ["a", "grp", "b"]);
        assert_eq!(hc2.hosts[0].allowed_transfers, hc.hosts[0].allowed_transfers);
        assert_eq!(hc2.hosts[2].max_errors, 3);

        assert_eq!(dc2.dirs.len(), 2);
        assert_eq!(dc2.dirs[0].alias, "d1");
        assert!(dc2.dirs[0].alias_given);
        assert!(!dc2.dirs[1].alias_given);
        assert_eq!(dc2.dirs[0].options.max_copied_files, 50);
        assert_eq!(dc2.dirs[0].options.render(), dc.dirs[0].options.render());
        assert_eq!(dc2.dirs[0].groups[0].masks, ["*.txt", "!*.tmp"]);
        assert_eq!(dc2.dirs[0].groups.len(), 2);
        assert_eq!(dc2.dirs[0].groups[0].destinations.len(), 2);
        assert!(dc2.dirs[0].groups[0].destinations[1].recipients[0].contains("anna:secret@"));
        assert_eq!(job_ids(&dc2), job_ids(&dc));

        let no_pw = dir_config(&w.fifodir(), false).unwrap().render();
        assert!(!no_pw.contains("secret"));
        std::fs::remove_dir_all(w.root()).unwrap();
    }
}
