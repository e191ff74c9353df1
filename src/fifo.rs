//! Named pipes between the components: one byte per command, plus the
//! fixed-size message envelopes on `msg.fifo`.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::consts::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ackn,
    Shutdown,
    FlushMsgFifoDumpQueue,
    QueueListReady,
    QueueListEmpty,
    QueueListDone,
    CheckFsaEntries,
    BusyWorking,
    WakeUp,
    RereadConfig,
}

impl Command {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            ACKN => Command::Ackn,
            SHUTDOWN => Command::Shutdown,
            FLUSH_MSG_FIFO_DUMP_QUEUE => Command::FlushMsgFifoDumpQueue,
            QUEUE_LIST_READY => Command::QueueListReady,
            QUEUE_LIST_EMPTY => Command::QueueListEmpty,
            QUEUE_LIST_DONE => Command::QueueListDone,
            CHECK_FSA_ENTRIES => Command::CheckFsaEntries,
            BUSY_WORKING => Command::BusyWorking,
            WAKE_UP => Command::WakeUp,
            REREAD_CONFIG => Command::RereadConfig,
            _ => return None,
        })
    }

    pub fn byte(self) -> u8 {
        match self {
            Command::Ackn => ACKN,
            Command::Shutdown => SHUTDOWN,
            Command::FlushMsgFifoDumpQueue => FLUSH_MSG_FIFO_DUMP_QUEUE,
            Command::QueueListReady => QUEUE_LIST_READY,
            Command::QueueListEmpty => QUEUE_LIST_EMPTY,
            Command::QueueListDone => QUEUE_LIST_DONE,
            Command::CheckFsaEntries => CHECK_FSA_ENTRIES,
            Command::BusyWorking => BUSY_WORKING,
            Command::WakeUp => WAKE_UP,
            Command::RereadConfig => REREAD_CONFIG,
        }
    }
}

/// Create a FIFO; an existing one is kept.
pub fn make_fifo(path: &Path) -> Result<()> {
    match nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IWGRP) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("mkfifo {}", path.display())),
    }
}

/// Every FIFO the components talk over.
pub fn make_all(fifodir: &Path) -> Result<()> {
    for name in [
        SYS_LOG_FIFO,
        SYSTEM_LOG_FIFO,
        TRANSFER_LOG_FIFO,
        TRANS_DB_LOG_FIFO,
        RECEIVE_LOG_FIFO,
        REQUEST_FIFO,
        AFD_CMD_FIFO,
        AFD_WORKER_CMD_FIFO,
        AFD_WORKER_RESP_FIFO,
        AMG_CMD_FIFO,
        FD_CMD_FIFO,
        FD_WAKE_UP_FIFO,
        MSG_FIFO,
        QUEUE_LIST_READY_FIFO,
        QUEUE_LIST_DONE_FIFO,
    ] {
        make_fifo(&fifodir.join(name))?;
    }
    Ok(())
}

/// Reading end of a FIFO. Opened read-write so it never sees EOF while no
/// writer is attached.
pub struct FifoReader {
    path: PathBuf,
    file: File,
}

impl FifoReader {
    pub fn open(path: &Path) -> Result<Self> {
        make_fifo(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("open fifo {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until data is readable or `timeout` passed.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let ms = left.as_millis().min(u16::MAX as u128) as u16;
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(ms)) {
                Ok(n) if n > 0 => return Ok(true),
                Ok(_) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).with_context(|| format!("poll {}", self.path.display())),
            }
        }
    }

    /// Drain whatever is currently buffered.
    pub fn read_available(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut buf = [0u8; 4096];
        let mut total = 0;
        loop {
            match self.file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&buf[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_context(|| format!("read {}", self.path.display())),
            }
        }
        Ok(total)
    }

    /// Read pending command bytes; unknown bytes are logged and dropped.
    pub fn read_commands(&mut self) -> Result<Vec<Command>> {
        let mut raw = Vec::new();
        self.read_available(&mut raw)?;
        let mut out = Vec::with_capacity(raw.len());
        for b in raw {
            match Command::from_byte(b) {
                Some(c) => out.push(c),
                None => log::warn!(
                    target: "system",
                    "reading garbage ({}) on fifo {}",
                    b,
                    self.path.display()
                ),
            }
        }
        Ok(out)
    }
}

/// Writing end.
pub struct FifoWriter {
    path: PathBuf,
    file: File,
}

impl FifoWriter {
    /// Open without requiring a reader; data is buffered by the pipe.
    pub fn open(path: &Path) -> Result<Self> {
        make_fifo(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open fifo {} for writing", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Open only if a reader is attached (`ENXIO` otherwise).
    pub fn open_reader_present(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("no reader on fifo {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.file
            .write_all(b)
            .with_context(|| format!("write fifo {}", self.path.display()))
    }

    pub fn send(&mut self, cmd: Command) -> Result<()> {
        self.write_bytes(&[cmd.byte()])
    }
}

/// One-shot: write `cmd` to the FIFO at `path` if somebody listens.
pub fn send_command(path: &Path, cmd: Command) -> Result<()> {
    FifoWriter::open_reader_present(path)?.send(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_roundtrip_through_pipe() {
        let d = std::env::temp_dir().join(format!("afd-fifo-{}", std::process::id()));
        std::fs::create_dir_all(&d).unwrap();
        let p = d.join("t.fifo");
        let mut r = FifoReader::open(&p).unwrap();
        assert!(!r.wait(Duration::from_millis(10)).unwrap());
        send_command(&p, Command::Shutdown).unwrap();
        let mut w = FifoWriter::open(&p).unwrap();
        w.write_bytes(&[0xee, ACKN]).unwrap();
        assert!(r.wait(Duration::from_millis(500)).unwrap());
        assert_eq!(r.read_commands().unwrap(), vec![Command::Shutdown, Command::Ackn]);
        assert!(r.read_commands().unwrap().is_empty());
    }
}
