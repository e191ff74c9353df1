//! ATPD: line based TCP control daemon.
//!
//! Commands are case-insensitive. Replies follow the FTP convention of a
//! three digit code and text; multi-line replies use `NNN-` on every line
//! except the last.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AfdConfig;
use crate::consts::ON;
use crate::paths::WorkDir;
use crate::status::{AfdStatus, Component};

const IMPLEMENTED: [&str; 3] = ["HELP", "NOP", "QUIT"];
const RESERVED: [&str; 10] = [
    "AFDSTAT", "DISC", "HSTAT", "ILOG", "OLOG", "SLOG", "TLOG", "PROC", "INFO", "STAT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Send the text and close.
    Close(String),
}

/// Answer one command line.
pub fn handle_line(line: &str) -> Reply {
    let line = line.trim();
    let word = line.split_whitespace().next().unwrap_or("");
    let cmd = word.to_ascii_uppercase();
    match cmd.as_str() {
        "QUIT" => Reply::Close("221 Goodbye.".into()),
        "NOP" => Reply::Text("200 OK".into()),
        "HELP" => {
            let mut s = String::from("214- The following commands are recognized (* => unimplemented).\r\n");
            let mut all: Vec<String> = IMPLEMENTED.iter().map(|c| format!("  {}", c)).collect();
            all.extend(RESERVED.iter().map(|c| format!(" *{}", c)));
            all.sort_by(|a, b| a.trim_start_matches([' ', '*']).cmp(b.trim_start_matches([' ', '*'])));
            s.push_str("214-");
            s.push_str(&all.join(""));
            s.push_str("\r\n214 End of help.");
            Reply::Text(s)
        }
        c if RESERVED.contains(&c) => Reply::Text(format!("502 '{}': command not implemented.", word)),
        _ => Reply::Text(format!("500 '{}': command not understood.", line)),
    }
}

/// Peer filter built from `ATPD_TRUSTED_REMOTE_IP` globs. No patterns
/// means every peer is accepted.
#[derive(Debug, Clone)]
pub struct TrustedPeers {
    set: Option<GlobSet>,
}

impl TrustedPeers {
    pub fn new(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self { set: None });
        }
        let mut b = GlobSetBuilder::new();
        for p in patterns {
            b.add(Glob::new(p).with_context(|| format!("trusted ip pattern '{}'", p))?);
        }
        Ok(Self { set: Some(b.build()?) })
    }

    pub fn accepts(&self, ip: IpAddr) -> bool {
        match &self.set {
            None => true,
            Some(s) => s.is_match(ip.to_string()),
        }
    }
}

pub struct AtpdServer {
    listener: TcpListener,
    trusted: TrustedPeers,
    cmd_timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl AtpdServer {
    pub fn bind(addr: SocketAddr, cfg: &AfdConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("bind atpd {}", addr))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            trusted: TrustedPeers::new(&cfg.atpd_trusted_ips)?,
            cmd_timeout: Duration::from_secs(cfg.atpd_cmd_timeout.max(1)),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_cmd_timeout(mut self, t: Duration) -> Self {
        self.cmd_timeout = t;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Setting the flag makes `serve` return and every client get
    /// `500 ATPD shutdown.`.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Accept until stopped. Each client gets its own thread.
    pub fn serve(&self, external_stop: impl Fn() -> bool) -> Result<()> {
        let mut clients = Vec::new();
        while !self.stop.load(Ordering::SeqCst) {
            if external_stop() {
                self.stop.store(true, Ordering::SeqCst);
                break;
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if !self.trusted.accepts(peer.ip()) {
                        log::debug!(target: "system", "atpd: rejected connection from {}", peer);
                        continue;
                    }
                    log::info!(target: "system", "atpd: connection from {}", peer);
                    let stop = self.stop.clone();
                    let timeout = self.cmd_timeout;
                    clients.push(std::thread::spawn(move || {
                        if let Err(e) = serve_client(stream, timeout, &stop) {
                            log::debug!(target: "system", "atpd client {}: {:#}", peer, e);
                        }
                    }));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(Duration::from_millis(50)),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e).context("atpd accept"),
            }
            clients.retain(|h| !h.is_finished());
        }
        for h in clients {
            let _ = h.join();
        }
        Ok(())
    }
}

fn send(w: &mut TcpStream, text: &str) -> Result<()> {
    w.write_all(text.as_bytes())?;
    w.write_all(b"\r\n")?;
    w.flush()?;
    Ok(())
}

fn serve_client(stream: TcpStream, cmd_timeout: Duration, stop: &AtomicBool) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(200)))?;
    let mut out = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    send(&mut out, "220 ATPD ready.")?;
    let mut last = Instant::now();
    let mut line = String::new();
    loop {
        if stop.load(Ordering::SeqCst) {
            send(&mut out, "500 ATPD shutdown.")?;
            return Ok(());
        }
        if last.elapsed() >= cmd_timeout {
            send(&mut out, &format!("421 Timeout ({} seconds): closing connection.", cmd_timeout.as_secs()))?;
            return Ok(());
        }
        match reader.read_line(&mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                if !line.ends_with('\n') {
                    continue;
                }
                last = Instant::now();
                let reply = handle_line(&line);
                line.clear();
                match reply {
                    Reply::Text(t) => send(&mut out, &t)?,
                    Reply::Close(t) => {
                        send(&mut out, &t)?;
                        return Ok(());
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// `atpd` main: serve until SIGTERM.
pub fn run(work: &WorkDir, cfg: &AfdConfig) -> Result<()> {
    crate::worker::signals::install()?;
    let mut status = AfdStatus::open_or_create(&work.fifodir())?;
    status.set_pid(Component::Atpd, std::process::id() as i32)?;
    status.set_state(Component::Atpd, ON)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.atpd_port));
    let server = AtpdServer::bind(addr, cfg)?;
    log::info!(target: "system", "atpd listening on {}", server.local_addr()?);
    server.serve(crate::worker::signals::killed)?;
    status.set_state(Component::Atpd, crate::consts::OFF)?;
    log::info!(target: "system", "atpd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn command_replies() {
        assert_eq!(handle_line("nop\r\n"), Reply::Text("200 OK".into()));
        assert_eq!(handle_line("Quit"), Reply::Close("221 Goodbye.".into()));
        assert_eq!(
            handle_line("frobnicate x"),
            Reply::Text("500 'frobnicate x': command not understood.".into())
        );
        assert!(matches!(handle_line("hstat"), Reply::Text(t) if t.starts_with("502")));
        match handle_line("HELP") {
            Reply::Text(t) => {
                assert!(t.starts_with("214-"));
                assert!(t.ends_with("214 End of help."));
                assert!(t.contains("NOP"));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn trusted_peers_glob() {
        let t = TrustedPeers::new(&["192.168.1.*".to_string()]).unwrap();
        assert!(t.accepts("192.168.1.7".parse().unwrap()));
        assert!(!t.accepts("10.0.0.1".parse().unwrap()));
        assert!(TrustedPeers::new(&[]).unwrap().accepts("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn session_over_tcp() {
        let server = AtpdServer::bind("127.0.0.1:0".parse().unwrap(), &AfdConfig::default())
            .unwrap()
            .with_cmd_timeout(Duration::from_secs(1));
        let addr = server.local_addr().unwrap();
        let stop = server.stop_flag();
        let h = std::thread::spawn(move || server.serve(|| false).unwrap());

        let mut c = TcpStream::connect(addr).unwrap();
        c.write_all(b"NOP\r\nQUIT\r\n").unwrap();
        let mut got = String::new();
        c.read_to_string(&mut got).unwrap();
        assert_eq!(got, "220 ATPD ready.\r\n200 OK\r\n221 Goodbye.\r\n");

        let mut idle = TcpStream::connect(addr).unwrap();
        let mut got = String::new();
        idle.read_to_string(&mut got).unwrap();
        assert!(got.ends_with("421 Timeout (1 seconds): closing connection.\r\n"));

        stop.store(true, Ordering::SeqCst);
        h.join().unwrap();
    }
}
