//! `wmod`: receives bulletins over a WMO socket and drops them as files
//! into a directory the watcher distributes from.

use anyhow::{Context, Result};
use chrono::{Timelike, Utc};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{parse_heading, read_frame, Heading, SequenceCheck, ACK_OK, ACK_REJECTED};
use crate::config::AfdConfig;
use crate::consts::*;
use crate::dirconfig::{RoutingTable, RuleType};
use crate::paths::WorkDir;
use crate::status::{AfdStatus, Component};
use crate::watch::dupcheck::DupStore;

/// Seconds a bulletin heading is remembered for the duplicate check.
const WMO_DUP_TIMEOUT: u32 = 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored {
    File(PathBuf),
    Ignored,
    OutsideWindow,
    Duplicate,
    Malformed,
}

impl Stored {
    pub fn is_stored(&self) -> bool {
        matches!(self, Stored::File(_))
    }
}

pub struct Receiver {
    target: PathBuf,
    routing: RoutingTable,
    dups: DupStore,
    request_file: PathBuf,
    check_sequence: bool,
    seq: SequenceCheck,
}

impl Receiver {
    pub fn new(work: &WorkDir, cfg: &AfdConfig, routing: RoutingTable) -> Result<Self> {
        let target = cfg
            .wmo_target_dir
            .clone()
            .unwrap_or_else(|| work.root().join("wmo"));
        fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        Ok(Self {
            target,
            routing,
            dups: DupStore::at(&work.dupcheck_dir().join("wmo")),
            request_file: work.etc_file(REQUEST_FILE),
            check_sequence: cfg.wmo_check_sequence,
            seq: SequenceCheck::default(),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// A new connection starts a new sequence.
    pub fn reset_sequence(&mut self) {
        self.seq = SequenceCheck::default();
    }

    /// Route and store one bulletin. `hour` is the current UTC hour.
    pub fn accept(&mut self, payload: &[u8], now: i64, hour: u8) -> Result<Stored> {
        let h = match parse_heading(payload) {
            Ok(h) => h,
            Err(e) => {
                log::warn!(target: "receive", "wmo: dropped bulletin: {:#}", e);
                return Ok(Stored::Malformed);
            }
        };
        if self.check_sequence {
            if let Some(seq) = h.seq {
                if let Some((from, to)) = self.seq.observe(seq) {
                    self.request(from, to)?;
                }
            }
        }
        let rule = self.routing.lookup(&h.ttaaii, &h.cccc);
        if let Some(r) = rule {
            if r.rule_type() == RuleType::Ignore {
                log::debug!(target: "receive", "wmo: ignoring {}", h.key());
                return Ok(Stored::Ignored);
            }
            if !r.in_window(hour) {
                log::debug!(target: "receive", "wmo: {} outside its window", h.key());
                return Ok(Stored::OutsideWindow);
            }
            if r.dup_check() && self.dups.check(crc32fast::hash(h.key().as_bytes()), WMO_DUP_TIMEOUT, now)? {
                log::info!(target: "receive", "wmo: duplicate {}", h.key());
                return Ok(Stored::Duplicate);
            }
        }
        let path = self.store(&h, payload)?;
        log::info!(target: "receive", "wmo: stored {} ({} bytes)", h.key(), payload.len());
        Ok(Stored::File(path))
    }

    /// Write under a dot name, then rename so the watcher never sees a
    /// partial file.
    fn store(&self, h: &Heading, payload: &[u8]) -> Result<PathBuf> {
        let base = h.file_name();
        let mut name = base.clone();
        let mut n = 1;
        while self.target.join(&name).exists() {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        let tmp = self.target.join(format!(".{}", name));
        let dst = self.target.join(&name);
        fs::write(&tmp, payload).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &dst).with_context(|| format!("rename {}", dst.display()))?;
        Ok(dst)
    }

    /// Append a replay request for `from..=to`.
    fn request(&self, from: u16, to: u16) -> Result<()> {
        log::warn!(target: "receive", "wmo: missing sequence {:03}-{:03}, requesting", from, to);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.request_file)
            .with_context(|| format!("open {}", self.request_file.display()))?;
        f.lock_exclusive()
            .with_context(|| format!("lock_exclusive {}", self.request_file.display()))?;
        writeln!(f, "{:03}-{:03}", from, to)?;
        let _ = f.unlock();
        Ok(())
    }

    /// Read frames until the peer closes or `stop` says so.
    pub fn serve_connection(&mut self, mut s: TcpStream, ack: bool, stop: &dyn Fn() -> bool) -> Result<usize> {
        self.reset_sequence();
        s.set_nonblocking(false)?;
        let mut stored = 0;
        loop {
            if stop() {
                return Ok(stored);
            }
            let frame = match read_frame(&mut s) {
                Ok(Some(f)) => f,
                Ok(None) => return Ok(stored),
                Err(e) => match e.downcast_ref::<std::io::Error>() {
                    Some(io) if matches!(io.kind(), ErrorKind::ConnectionReset) => return Ok(stored),
                    _ => return Err(e),
                },
            };
            let now = Utc::now();
            let out = self.accept(&frame, now.timestamp(), now.hour() as u8)?;
            if out.is_stored() {
                stored += 1;
            }
            if ack {
                s.write_all(if out.is_stored() { ACK_OK } else { ACK_REJECTED })?;
            }
        }
    }
}

/// `wmod` main: one sender at a time until SIGTERM.
pub fn run(work: &WorkDir, cfg: &AfdConfig) -> Result<()> {
    crate::worker::signals::install()?;
    let mut status = AfdStatus::open_or_create(&work.fifodir())?;
    status.set_pid(Component::Wmod, std::process::id() as i32)?;
    status.set_state(Component::Wmod, ON)?;
    let routing = RoutingTable::load(&work.etc_file(BUL_CONFIG_FILE), &work.etc_file(REP_CONFIG_FILE))?;
    log::info!(target: "system", "wmod: {} routing rules", routing.len());
    let mut rx = Receiver::new(work, cfg, routing)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.wmo_port));
    let listener = TcpListener::bind(addr).with_context(|| format!("bind wmod {}", addr))?;
    listener.set_nonblocking(true)?;
    log::info!(target: "system", "wmod listening on {}, storing in {}", addr, rx.target().display());
    let killed = crate::worker::signals::killed;
    while !killed() {
        match listener.accept() {
            Ok((s, peer)) => {
                log::info!(target: "receive", "wmod: connection from {}", peer);
                // Reads block; SIGTERM interrupts them.
                match rx.serve_connection(s, cfg.wmo_ack, &killed) {
                    Ok(n) => log::info!(target: "receive", "wmod: {} closed after {} bulletins", peer, n),
                    Err(e) => log::warn!(target: "receive", "wmod: {}: {:#}", peer, e),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(Duration::from_millis(100)),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e).context("wmod accept"),
        }
    }
    status.set_state(Component::Wmod, OFF)?;
    log::info!(target: "system", "wmod stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wmo::write_frame;
    use std::io::Read;

    fn setup(tag: &str, check_seq: bool, rules: &str) -> (WorkDir, Receiver) {
        let root = std::env::temp_dir().join(format!("afd-wmo-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let work = WorkDir::new(&root);
        work.create_tree().unwrap();
        let cfg = AfdConfig::default().with_wmo_check_sequence(check_seq);
        let rx = Receiver::new(&work, &cfg, RoutingTable::parse(rules)).unwrap();
        (work, rx)
    }

    fn bulletin(seq: u16, heading: &str) -> Vec<u8> {
        format!("\x01\r\r\n{:03}\r\r\n{}\r\r\nTEXT=\r\r\n\x03", seq, heading).into_bytes()
    }

    #[test]
    fn routing_decides_what_is_stored() {
        let (work, mut rx) = setup("route", false, "SM,*,INP,Y,*\nFT,*,IGN,N,*\nSA,*,INP,N,0-1\n");
        let b = bulletin(1, "SMDL01 EDZW 141200");
        assert!(rx.accept(&b, 100, 12).unwrap().is_stored());
        assert_eq!(rx.accept(&b, 101, 12).unwrap(), Stored::Duplicate);
        assert_eq!(rx.accept(&bulletin(2, "FTDL31 EDZW 141100"), 102, 12).unwrap(), Stored::Ignored);
        assert_eq!(rx.accept(&bulletin(3, "SADL10 EDZW 141100"), 103, 12).unwrap(), Stored::OutsideWindow);
        assert_eq!(rx.accept(b"junk", 104, 12).unwrap(), Stored::Malformed);
        // no rule stores, and the same heading gets a distinct name
        assert!(rx.accept(&bulletin(4, "USDL01 EDZW 141200"), 105, 12).unwrap().is_stored());
        assert!(rx.accept(&bulletin(5, "USDL01 EDZW 141200"), 106, 12).unwrap().is_stored());
        assert!(rx.target().join("USDL01_EDZW_141200-1").exists());
        assert!(rx.target().join("SMDL01_EDZW_141200").exists());
        fs::remove_dir_all(work.root()).unwrap();
    }

    #[test]
    fn sequence_gap_writes_request() {
        let (work, mut rx) = setup("seq", true, "");
        rx.accept(&bulletin(10, "SMDL01 EDZW 141200"), 1, 0).unwrap();
        rx.accept(&bulletin(13, "SMDL02 EDZW 141200"), 2, 0).unwrap();
        let req = fs::read_to_string(work.etc_file(REQUEST_FILE)).unwrap();
        assert_eq!(req, "011-012\n");
        fs::remove_dir_all(work.root()).unwrap();
    }

    #[test]
    fn acknowledges_each_frame() {
        let (work, mut rx) = setup("ack", false, "FT,*,IGN,N,*\n");
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = l.local_addr().unwrap();
        let client = std::thread::spawn(move || {
            let mut c = TcpStream::connect(addr).unwrap();
            write_frame(&mut c, &bulletin(1, "SMDL01 EDZW 141200")).unwrap();
            write_frame(&mut c, &bulletin(2, "FTDL01 EDZW 141200")).unwrap();
            let mut acks = [0u8; 8];
            c.read_exact(&mut acks).unwrap();
            acks
        });
        let (s, _) = l.accept().unwrap();
        let stored = rx.serve_connection(s, true, &|| false).unwrap();
        assert_eq!(stored, 1);
        assert_eq!(&client.join().unwrap(), b"00000001");
        fs::remove_dir_all(work.root()).unwrap();
    }
}
