use anyhow::Result;
use serde_json::{json, Value};

use afd::consts::{OFF, ON, SHUTDOWN_STATE, STOPPED};
use afd::table::Access;
use afd::{AfdStatus, Component, Fra, Fsa, WorkDir};

fn state_name(s: u8) -> &'static str {
    match s {
        OFF => "off",
        ON => "on",
        STOPPED => "stopped",
        SHUTDOWN_STATE => "shutdown",
        _ => "unknown",
    }
}

pub fn exec(work: &WorkDir, json: bool) -> Result<()> {
    let fifodir = work.fifodir();
    let status = AfdStatus::attach(&fifodir, Access::Passive)?;

    let mut components = Vec::new();
    for c in Component::ALL {
        components.push(json!({
            "name": c.binary(),
            "state": state_name(status.state(c)?),
            "pid": status.pid(c)?,
        }));
    }

    // Tables may not exist before the first build.
    let mut hosts = Vec::new();
    if let Ok(fsa) = Fsa::attach_passive(&fifodir) {
        for pos in fsa.iter_hosts(false)? {
            let h = fsa.host(pos)?;
            hosts.push(json!({
                "alias": h.host_alias(),
                "status": format!("{:#x}", h.host_status()),
                "active_transfers": h.active_transfers(),
                "allowed_transfers": h.allowed_transfers(),
                "total_file_counter": h.total_file_counter(),
                "total_file_size": h.total_file_size(),
                "jobs_queued": h.jobs_queued(),
                "error_counter": h.error_counter(),
                "files_done": h.file_counter_done(),
                "bytes_send": h.bytes_send(),
            }));
        }
    }
    let mut dirs = Vec::new();
    if let Ok(fra) = Fra::attach_passive(&fifodir) {
        for pos in 0..fra.no_of_dirs()? {
            let d = fra.dir(pos)?;
            dirs.push(json!({
                "alias": d.dir_alias(),
                "flag": format!("{:#x}", d.dir_flag()),
                "files_in_dir": d.files_in_dir(),
                "bytes_in_dir": d.bytes_in_dir(),
            }));
        }
    }

    if json {
        let v = json!({
            "start_time": status.start_time()?,
            "jobs_in_queue": status.jobs_in_queue()?,
            "last_reread": status.last_reread()?,
            "components": components,
            "hosts": hosts,
            "dirs": dirs,
        });
        println!("{}", serde_json::to_string(&v)?);
        return Ok(());
    }

    println!("work dir:      {}", work.root().display());
    println!("jobs in queue: {}", status.jobs_in_queue()?);
    for c in &components {
        println!("  {:<11} {:<8} pid {}", field(c, "name"), field(c, "state"), c["pid"]);
    }
    if !hosts.is_empty() {
        println!("hosts:");
        for h in &hosts {
            println!(
                "  {:<9} {:>8} active {}/{} queued {} files ({} bytes) errors {}",
                field(h, "alias"),
                field(h, "status"),
                h["active_transfers"],
                h["allowed_transfers"],
                h["total_file_counter"],
                h["total_file_size"],
                h["error_counter"]
            );
        }
    }
    if !dirs.is_empty() {
        println!("directories:");
        for d in &dirs {
            println!(
                "  {:<11} {:>8} {} files ({} bytes)",
                field(d, "alias"),
                field(d, "flag"),
                d["files_in_dir"],
                d["bytes_in_dir"]
            );
        }
    }
    Ok(())
}

fn field<'a>(v: &'a Value, key: &str) -> &'a str {
    v[key].as_str().unwrap_or("")
}
