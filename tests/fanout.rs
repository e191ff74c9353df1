use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use afd::builder;
use afd::catalog::{Jid, JobDef};
use afd::dirconfig::{DirConfig, HostConfig};
use afd::message::Envelope;
use afd::spool::SpoolRoots;
use afd::table::Access;
use afd::watch::{MaskSet, Watcher};
use afd::{AfdConfig, WorkDir};

#[test]
fn exclusion_mask_selects_files() -> Result<()> {
    let masks: Vec<String> = ["*.grib", "!*.tmp.grib"].iter().map(|s| s.to_string()).collect();
    let set = MaskSet::compile(&masks)?;
    let got: Vec<&str> = ["a.grib", "b.tmp.grib", "c.grib.tmp"]
        .into_iter()
        .filter(|n| set.matches(n))
        .collect();
    assert_eq!(got, ["a.grib", "c.grib.tmp"]);
    Ok(())
}

#[test]
fn each_file_group_feeds_its_own_host() -> Result<()> {
    let root = unique_root("groups");
    let work = WorkDir::new(&root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let text = format!(
        "[directory] {r}/in in
   [files]
   *.grib
   !*.tmp.grib
      [destination]
         [recipient]
         file://h1{r}/out1
   [files]
   *
      [destination]
         [recipient]
         file://h2{r}/out2
",
        r = root.display()
    );
    builder::build(&work, &cfg, &HostConfig::default(), &DirConfig::parse(&text, &cfg), 1)?;
    for n in ["a.grib", "b.tmp.grib", "c.grib.tmp"] {
        fs::write(root.join("in").join(n), b"grib")?;
    }

    let mut w = Watcher::new(&work, &cfg)?;
    let mut sink: Vec<Envelope> = Vec::new();
    let r = w.scan_dir(0, 1000, &mut sink)?;
    assert_eq!(r.messages, 2);
    assert_eq!(sink.len(), 2);

    let jid = Jid::open(&work.fifodir(), Access::Passive)?;
    let spool = SpoolRoots::single(&work);
    let mut by_host: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for env in &sink {
        let pos = jid.position(env.name.job_id)?.expect("job of a fresh message is in the JID");
        let job = JobDef::from_rec(&jid.job(pos)?);
        let mut names: Vec<String> = fs::read_dir(spool.message_dir(env.spool_no, &env.name))?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        names.sort();
        assert_eq!(env.files_to_send as usize, names.len());
        by_host.insert(job.host_alias, names);
    }
    assert_eq!(by_host["h1"], ["a.grib", "c.grib.tmp"]);
    assert_eq!(by_host["h2"], ["a.grib", "b.tmp.grib", "c.grib.tmp"]);

    // Every file matched some group, so the source is empty.
    assert_eq!(fs::read_dir(root.join("in"))?.count(), 0);

    fs::remove_dir_all(&root)?;
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let pid = std::process::id();
    std::env::temp_dir().join(format!("afd-fanout-{}-{}-{}", prefix, pid, t))
}
