//! Transfer dispatcher (`fd`).

pub mod dispatcher;
pub mod launcher;
pub mod queue;

pub use dispatcher::{host_accepts, Dispatcher};
pub use launcher::{worker_binary, ProcessLauncher, WorkerLauncher};
pub use queue::{read_queue, write_queue, QueueEntry};

use anyhow::Result;
use std::time::Duration;

use crate::catalog::Jid;
use crate::config::AfdConfig;
use crate::consts::*;
use crate::fifo::{Command, FifoReader, FifoWriter};
use crate::fra::Fra;
use crate::fsa::Fsa;
use crate::message::{Envelope, ENVELOPE_SIZE};
use crate::paths::WorkDir;
use crate::spool::SpoolRoots;
use crate::status::{AfdStatus, Component};
use crate::table::Access;
use crate::util::now;

/// Split a byte stream from `msg.fifo` into envelopes; a trailing partial
/// envelope stays in `buf`.
pub fn take_envelopes(buf: &mut Vec<u8>) -> Vec<Envelope> {
    let whole = buf.len() / ENVELOPE_SIZE * ENVELOPE_SIZE;
    let out: Vec<Envelope> = buf[..whole].chunks_exact(ENVELOPE_SIZE).map(Envelope::decode).collect();
    buf.drain(..whole);
    out
}

/// Hand the queue to the janitor: dump, signal ready, wait for done.
fn serve_queue_list(d: &Dispatcher, work: &WorkDir, done: &mut FifoReader) -> Result<()> {
    d.dump_queue()?;
    let mut ready = FifoWriter::open(&work.fifo(QUEUE_LIST_READY_FIFO))?;
    ready.send(if d.queue().is_empty() {
        Command::QueueListEmpty
    } else {
        Command::QueueListReady
    })?;
    if done.wait(Duration::from_secs(QUEUE_LIST_READY_TIMEOUT))? {
        for c in done.read_commands()? {
            if c != Command::QueueListDone {
                log::debug!(target: "system", "unexpected {:?} on queue list fifo", c);
            }
        }
    } else {
        log::warn!(target: "system", "janitor did not confirm queue list");
    }
    Ok(())
}

/// Dispatcher main loop. Returns on `SHUTDOWN`.
pub fn run(work: &WorkDir, cfg: &AfdConfig) -> Result<()> {
    let fifodir = work.fifodir();
    let spool = SpoolRoots::from_config(work, cfg)?;
    let fsa = Fsa::attach_active(&fifodir)?;
    let fra = Fra::attach_active(&fifodir)?;
    let jid = Jid::open(&fifodir, Access::Passive)?;
    let mut status = AfdStatus::open_or_create(&fifodir)?;
    status.set_pid(Component::Fd, std::process::id() as i32)?;
    status.set_state(Component::Fd, ON)?;
    let mut d = Dispatcher::new(work, spool, fsa, fra, jid).with_status(status);
    d.restore()?;

    let mut launcher = ProcessLauncher::new(work)?;
    let mut msg = FifoReader::open(&work.fifo(MSG_FIFO))?;
    let mut cmd = FifoReader::open(&work.fifo(FD_CMD_FIFO))?;
    let mut wake = FifoReader::open(&work.fifo(FD_WAKE_UP_FIFO))?;
    let mut done = FifoReader::open(&work.fifo(QUEUE_LIST_DONE_FIFO))?;
    let mut pending = Vec::new();
    let mut last_purge = 0i64;
    log::info!(target: "system", "FD started, {} messages queued", d.queue().len());

    loop {
        if msg.wait(Duration::from_millis(500))? {
            msg.read_available(&mut pending)?;
            // Positions in the queue must come from the current generation.
            if d.check_tables()? {
                log::info!(target: "system", "FD attached to new tables");
            }
            for e in take_envelopes(&mut pending) {
                d.enqueue(&e)?;
            }
        }
        for c in cmd.read_commands()? {
            match c {
                Command::Shutdown => {
                    log::info!(target: "system", "FD shutting down with {} running workers", launcher.running());
                    launcher.terminate_all();
                    std::thread::sleep(Duration::from_millis(200));
                    d.reap(&mut launcher, now())?;
                    d.dump_queue()?;
                    return Ok(());
                }
                Command::FlushMsgFifoDumpQueue => serve_queue_list(&d, work, &mut done)?,
                Command::CheckFsaEntries => {
                    d.check_tables()?;
                }
                other => log::debug!(target: "system", "fd: ignoring {:?}", other),
            }
        }
        if !wake.read_commands()?.is_empty() {
            d.wake_up()?;
        }
        let t = now();
        if d.check_tables()? {
            log::info!(target: "system", "FD attached to new tables");
        }
        d.reap(&mut launcher, t)?;
        d.dispatch(&mut launcher, t)?;
        if t - last_purge >= 60 {
            d.purge_queued_files(t)?;
            d.correct_counters(t)?;
            last_purge = t;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MsgName, Originator};

    #[test]
    fn partial_envelopes_wait_for_the_rest() {
        let e = Envelope {
            name: MsgName {
                job_id: 0xa,
                dir_id: 0x77,
                creation_time: 5,
                unique: 1,
                split: 0,
            },
            files_to_send: 1,
            file_size_to_send: 3,
            dir_no: 2,
            priority: b'3',
            originator: Originator::Janitor,
            spool_no: 0,
        };
        let mut buf = e.encode().to_vec();
        buf.extend_from_slice(&e.encode()[..10]);
        let got = take_envelopes(&mut buf);
        assert_eq!(got, [e]);
        assert_eq!(buf.len(), 10);
        buf.extend_from_slice(&e.encode()[10..]);
        assert_eq!(take_envelopes(&mut buf), [e]);
        assert!(buf.is_empty());
    }
}
