//! Messages: spool directory names and the envelope announcing them to the
//! dispatcher.
//!
//! Envelope (48 bytes, little-endian):
//! `i64 creation_time | u32 job_id | u32 split_job_counter | u32 files_to_send |
//!  u32 unique_number | i64 file_size_to_send | u32 dir_no | u8 priority |
//!  u8 originator | u16 spool_no | u32 dir_id | 4 reserved`.
//!
//! `dir_id` names the source directory; `dir_no` is only its FRA position
//! when the message was sent and goes out of date with the next reload.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use std::path::Path;

use crate::consts::MSG_FIFO;
use crate::fifo::FifoWriter;
use crate::util::{parse_hex_i64, parse_hex_u32};

pub const ENVELOPE_SIZE: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    Watcher,
    Janitor,
    Dispatcher,
}

impl Originator {
    fn byte(self) -> u8 {
        match self {
            Originator::Watcher => 1,
            Originator::Janitor => 2,
            Originator::Dispatcher => 3,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            2 => Originator::Janitor,
            3 => Originator::Dispatcher,
            _ => Originator::Watcher,
        }
    }
}

/// `<job_id hex>/<dir_id hex>/<creation_time hex>_<unique hex>_<split hex>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgName {
    pub job_id: u32,
    pub dir_id: u32,
    pub creation_time: i64,
    pub unique: u32,
    pub split: u32,
}

impl MsgName {
    /// Last path component only.
    pub fn leaf(&self) -> String {
        format!("{:x}_{:x}_{:x}", self.creation_time, self.unique, self.split)
    }

    /// Parse `<ct>_<unique>_<split>` for a known job and directory.
    pub fn parse_leaf(job_id: u32, dir_id: u32, leaf: &str) -> Option<Self> {
        let mut it = leaf.split('_');
        let ct = parse_hex_i64(it.next()?)?;
        let unique = parse_hex_u32(it.next()?)?;
        let split = parse_hex_u32(it.next()?)?;
        if it.next().is_some() {
            return None;
        }
        Some(Self {
            job_id,
            dir_id,
            creation_time: ct,
            unique,
            split,
        })
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut it = s.splitn(3, '/');
        let job = it.next().and_then(parse_hex_u32);
        let dir = it.next().and_then(parse_hex_u32);
        let leaf = it.next();
        match (job, dir, leaf) {
            (Some(j), Some(d), Some(l)) => {
                Self::parse_leaf(j, d, l).ok_or_else(|| anyhow!("bad message name '{}'", s))
            }
            _ => Err(anyhow!("bad message name '{}'", s)),
        }
    }
}

impl fmt::Display for MsgName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}/{:x}/{}", self.job_id, self.dir_id, self.leaf())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub name: MsgName,
    pub files_to_send: u32,
    pub file_size_to_send: i64,
    /// FRA position of the source directory at send time.
    pub dir_no: u32,
    pub priority: u8,
    pub originator: Originator,
    /// 0 = main spool, `n` = extra work dir `n - 1`.
    pub spool_no: u16,
}

impl Envelope {
    pub fn encode(&self) -> [u8; ENVELOPE_SIZE] {
        let mut b = [0u8; ENVELOPE_SIZE];
        LittleEndian::write_i64(&mut b[0..8], self.name.creation_time);
        LittleEndian::write_u32(&mut b[8..12], self.name.job_id);
        LittleEndian::write_u32(&mut b[12..16], self.name.split);
        LittleEndian::write_u32(&mut b[16..20], self.files_to_send);
        LittleEndian::write_u32(&mut b[20..24], self.name.unique);
        LittleEndian::write_i64(&mut b[24..32], self.file_size_to_send);
        LittleEndian::write_u32(&mut b[32..36], self.dir_no);
        b[36] = self.priority;
        b[37] = self.originator.byte();
        LittleEndian::write_u16(&mut b[38..40], self.spool_no);
        LittleEndian::write_u32(&mut b[40..44], self.name.dir_id);
        b
    }

    pub fn decode(b: &[u8]) -> Self {
        Self {
            name: MsgName {
                job_id: LittleEndian::read_u32(&b[8..12]),
                dir_id: LittleEndian::read_u32(&b[40..44]),
                creation_time: LittleEndian::read_i64(&b[0..8]),
                unique: LittleEndian::read_u32(&b[20..24]),
                split: LittleEndian::read_u32(&b[12..16]),
            },
            files_to_send: LittleEndian::read_u32(&b[16..20]),
            file_size_to_send: LittleEndian::read_i64(&b[24..32]),
            dir_no: LittleEndian::read_u32(&b[32..36]),
            priority: b[36],
            originator: Originator::from_byte(b[37]),
            spool_no: LittleEndian::read_u16(&b[38..40]),
        }
    }
}

/// Where ready messages go.
pub trait MessageSink {
    fn send(&mut self, env: &Envelope) -> Result<()>;
}

impl MessageSink for Vec<Envelope> {
    fn send(&mut self, env: &Envelope) -> Result<()> {
        self.push(*env);
        Ok(())
    }
}

/// `msg.fifo` writer.
pub struct FifoSink {
    w: FifoWriter,
}

impl FifoSink {
    pub fn open(fifodir: &Path) -> Result<Self> {
        Ok(Self {
            w: FifoWriter::open(&fifodir.join(MSG_FIFO))?,
        })
    }
}

impl MessageSink for FifoSink {
    fn send(&mut self, env: &Envelope) -> Result<()> {
        self.w.write_bytes(&env.encode())
    }
}

/// Announce a message to the dispatcher.
pub fn send_message(sink: &mut dyn MessageSink, env: &Envelope) -> Result<()> {
    log::debug!(
        target: "trans_db",
        "send message {} ({} files, {} bytes, {:?})",
        env.name,
        env.files_to_send,
        env.file_size_to_send,
        env.originator
    );
    sink.send(env)
}
