//! Dispatcher queue and its dump file `msg_queue_data`.
//!
//! ```text
//!  0 i64 creation_time  8 i64 file_size_to_send  16 i64 next_start_time
//! 24 u32 job_id  28 i32 jid_pos  32 i32 fsa_pos  36 i32 pid
//! 40 u32 files_to_send  44 u32 retries
//! 48 u8 priority  49 u8 special  50 u8 slot (255 = none)  51 u8 spool_no
//! 52 msg_name[52]
//! ```

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::message::MsgName;
use crate::table::view::{record_fields, record_strings};
use crate::table::{rewrite_table, Access, Mapping, TableSpec};

pub const QUEUE_RECORD_SIZE: usize = 104;
const OFF_MSG_NAME: usize = 52;
const LEN_MSG_NAME: usize = QUEUE_RECORD_SIZE - OFF_MSG_NAME;
const NO_SLOT: u8 = 255;

pub const QUEUE_SPEC: TableSpec = TableSpec {
    name: "MSG_QUEUE",
    record_size: QUEUE_RECORD_SIZE,
    version: CURRENT_QUEUE_VERSION,
};

/// Held back until one of the job's time entries matches.
pub const HELD_FOR_TIME: u8 = 0x01;
/// Last attempt failed; waits for `next_start_time`.
pub const IN_ERROR: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub msg_name: MsgName,
    pub file_size_to_send: i64,
    pub next_start_time: i64,
    pub jid_pos: i32,
    pub fsa_pos: i32,
    /// Worker pid while a transfer runs, 0 otherwise.
    pub pid: i32,
    pub files_to_send: u32,
    pub retries: u32,
    pub priority: u8,
    pub special: u8,
    pub slot: Option<usize>,
    pub spool_no: u16,
}

impl QueueEntry {
    pub fn is_running(&self) -> bool {
        self.pid > 0
    }
}

struct QueueRec<B> {
    buf: B,
}

record_fields!(QueueRec {
    creation_time, set_creation_time: i64 = 0;
    file_size_to_send, set_file_size_to_send: i64 = 8;
    next_start_time, set_next_start_time: i64 = 16;
    job_id, set_job_id: u32 = 24;
    jid_pos, set_jid_pos: i32 = 28;
    fsa_pos, set_fsa_pos: i32 = 32;
    pid, set_pid: i32 = 36;
    files_to_send, set_files_to_send: u32 = 40;
    retries, set_retries: u32 = 44;
    priority, set_priority: u8 = 48;
    special, set_special: u8 = 49;
    slot, set_slot: u8 = 50;
    spool_no, set_spool_no: u8 = 51;
});

record_strings!(QueueRec {
    msg_name, set_msg_name = OFF_MSG_NAME, LEN_MSG_NAME;
});

fn encode(e: &QueueEntry, buf: &mut [u8]) {
    buf.fill(0);
    let mut r = QueueRec { buf };
    r.set_creation_time(e.msg_name.creation_time);
    r.set_file_size_to_send(e.file_size_to_send);
    r.set_next_start_time(e.next_start_time);
    r.set_job_id(e.msg_name.job_id);
    r.set_jid_pos(e.jid_pos);
    r.set_fsa_pos(e.fsa_pos);
    r.set_pid(e.pid);
    r.set_files_to_send(e.files_to_send);
    r.set_retries(e.retries);
    r.set_priority(e.priority);
    r.set_special(e.special);
    r.set_slot(e.slot.map(|s| s as u8).unwrap_or(NO_SLOT));
    r.set_spool_no(e.spool_no.min(u8::MAX as u16) as u8);
    r.set_msg_name(&e.msg_name.to_string());
}

fn decode(buf: &[u8]) -> Option<QueueEntry> {
    let r = QueueRec { buf };
    let name = match MsgName::parse(&r.msg_name()) {
        Ok(n) => n,
        Err(e) => {
            log::debug!(target: "system", "queue dump: {:#}", e);
            return None;
        }
    };
    if name.job_id != r.job_id() || name.creation_time != r.creation_time() {
        log::debug!(
            target: "system",
            "queue dump: {} does not match job {:x} created {:x}, skipped",
            name,
            r.job_id(),
            r.creation_time()
        );
        return None;
    }
    Some(QueueEntry {
        msg_name: name,
        file_size_to_send: r.file_size_to_send(),
        next_start_time: r.next_start_time(),
        jid_pos: r.jid_pos(),
        fsa_pos: r.fsa_pos(),
        pid: r.pid(),
        files_to_send: r.files_to_send(),
        retries: r.retries(),
        priority: r.priority(),
        special: r.special(),
        slot: match r.slot() {
            NO_SLOT => None,
            s => Some(s as usize),
        },
        spool_no: r.spool_no() as u16,
    })
}

pub fn queue_path(fifodir: &Path) -> PathBuf {
    fifodir.join(MSG_QUEUE_FILE)
}

/// Replace `msg_queue_data` with `entries`.
pub fn write_queue(fifodir: &Path, entries: &[QueueEntry]) -> Result<()> {
    let m = rewrite_table(&queue_path(fifodir), QUEUE_SPEC, entries.len(), 0, |m| {
        for (i, e) in entries.iter().enumerate() {
            encode(e, m.record_mut(i)?);
        }
        Ok(())
    })?;
    m.detach();
    Ok(())
}

/// Read the last dump; a missing file is an empty queue.
pub fn read_queue(fifodir: &Path) -> Result<Vec<QueueEntry>> {
    let path = queue_path(fifodir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let m = Mapping::open(&path, QUEUE_SPEC, Access::Passive)?;
    let n = m.entries()?;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        if let Some(e) = decode(m.record(i)?) {
            out.push(e);
        }
    }
    Ok(out)
}

/// Dispatch order: priority character first (`'0'` is most urgent), then
/// the oldest message.
pub fn sort_for_dispatch(q: &mut [QueueEntry]) {
    q.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.msg_name.creation_time.cmp(&b.msg_name.creation_time))
            .then(a.msg_name.unique.cmp(&b.msg_name.unique))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(job: u32, ct: i64, prio: u8) -> QueueEntry {
        QueueEntry {
            msg_name: MsgName {
                job_id: job,
                dir_id: 1,
                creation_time: ct,
                unique: 0,
                split: 0,
            },
            file_size_to_send: 10,
            next_start_time: 0,
            jid_pos: 0,
            fsa_pos: 0,
            pid: 0,
            files_to_send: 1,
            retries: 0,
            priority: prio,
            special: 0,
            slot: None,
            spool_no: 0,
        }
    }

    #[test]
    fn dump_and_reload() {
        let d = std::env::temp_dir().join(format!("afd-queue-{}", std::process::id()));
        std::fs::create_dir_all(&d).unwrap();
        let mut a = entry(0xa, 1_700_000_000, b'5');
        a.slot = Some(2);
        a.pid = 77;
        let b = entry(0xb, 1_700_000_100, b'1');
        write_queue(&d, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(read_queue(&d).unwrap(), vec![a, b]);
        write_queue(&d, &[]).unwrap();
        assert!(read_queue(&d).unwrap().is_empty());
    }

    #[test]
    fn priority_before_age() {
        let mut q = vec![entry(1, 10, b'9'), entry(2, 30, b'1'), entry(3, 20, b'1')];
        sort_for_dispatch(&mut q);
        let jobs: Vec<u32> = q.iter().map(|e| e.msg_name.job_id).collect();
        assert_eq!(jobs, vec![3, 2, 1]);
    }

    #[test]
    fn record_disagreeing_with_its_name_is_skipped() {
        let e = entry(0xa, 1_700_000_000, b'5');
        let mut buf = vec![0u8; QUEUE_RECORD_SIZE];
        encode(&e, &mut buf);
        assert_eq!(decode(&buf), Some(e.clone()));
        QueueRec { buf: &mut buf[..] }.set_job_id(0xb);
        assert_eq!(decode(&buf), None);
        encode(&e, &mut buf);
        QueueRec { buf: &mut buf[..] }.set_creation_time(1);
        assert_eq!(decode(&buf), None);
    }
}
