use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use afd::builder;
use afd::dirconfig::{DirConfig, HostConfig};
use afd::dump;
use afd::{AfdConfig, WorkDir};

const HOSTS: &str = "# transfer hosts
a:ha::::2:5:120
b:hb::::1:3
[grp]
c:hc::::3:10:60:2048
";

fn dirs(root: &PathBuf) -> String {
    format!(
        "# incoming data
[directory] {r}/in d1
[dir options]
max copied files 50
warn time 600

   [files]
   *.txt
   !*.tmp
      [destination]
         [recipient]
         file://a{r}/out/x
         file://c{r}/out/y
         [options]
         rename r1
         priority 3
      [destination]
         [recipient]
         ftp://anna:secret@b/z

   [files]
   *
      [destination]
         [recipient]
         file://a{r}/out/all

[directory] {r}/in2
   [files]
   data*
      [destination]
         [recipient]
         file://c{r}/out/data
",
        r = root.display()
    )
}

#[test]
fn dumped_configuration_equals_the_input() -> Result<()> {
    let root = unique_root("p5");
    let work = WorkDir::new(root.join("first"));
    work.create_tree()?;
    let cfg = AfdConfig::default();
    let hc = HostConfig::parse(HOSTS, &cfg);
    let dc = DirConfig::parse(&dirs(&root), &cfg);
    builder::build(&work, &cfg, &hc, &dc, 1)?;

    let (hosts, dirs_out) = dump::render_all(&work.fifodir(), true)?;
    assert_eq!(hosts, hc.render());
    assert_eq!(DirConfig::parse(&dirs_out, &cfg).render(), dc.render());
    assert_eq!(dirs_out, dc.render());

    // Feeding the dump back in reaches a fixed point.
    let again = WorkDir::new(root.join("second"));
    again.create_tree()?;
    builder::build(
        &again,
        &cfg,
        &HostConfig::parse(&hosts, &cfg),
        &DirConfig::parse(&dirs_out, &cfg),
        2,
    )?;
    let (hosts2, dirs2) = dump::render_all(&again.fifodir(), true)?;
    assert_eq!(hosts2, hosts);
    assert_eq!(dirs2, dirs_out);

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn passwords_stay_out_unless_asked_for() -> Result<()> {
    let root = unique_root("pw");
    let work = WorkDir::new(&root);
    work.create_tree()?;
    let cfg = AfdConfig::default();
    builder::build(&work, &cfg, &HostConfig::parse(HOSTS, &cfg), &DirConfig::parse(&dirs(&root), &cfg), 1)?;
    let plain = dump::dir_config(&work.fifodir(), false)?.render();
    assert!(plain.contains("ftp://anna@b/z"));
    assert!(!plain.contains("secret"));
    let full = dump::dir_config(&work.fifodir(), true)?.render();
    assert!(full.contains("ftp://anna:secret@b/z"));
    fs::remove_dir_all(&root)?;
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let pid = std::process::id();
    std::env::temp_dir().join(format!("afd-dump-{}-{}-{}", prefix, pid, t))
}
