//! Job id database.
//!
//! ```text
//!   0 u32 job_id        4 dir_id       8 dir_config_id   12 file_mask_id
//!  16 u32 host_id      20 recipient_id 24 i32 dir_pos    28 i32 fmd_offset
//!  32 u32 special_flag 36 no_of_loptions 40 no_of_soptions 44 no_of_time_entries
//!  48 u32 protocol     52 u8 priority   53 u8 files_group 54 u8 destination
//!  56 host_alias[9]  recipient[256]  loptions[256]  soptions[256]  te[12] @ 840
//! ```
//!
//! Option blobs are newline separated. The recipient is stored without its
//! password (that lives in PWB).

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::consts::*;
use crate::fra::time_entry::{TimeEntry, TIME_ENTRY_SIZE};
use crate::table::view::{align8, record_fields, record_strings};
use crate::table::{rewrite_table, Access, Mapping, TableSpec};
use crate::util::checksum_parts;

pub const OFF_HOST_ALIAS: usize = 56;
pub const LEN_HOST_ALIAS: usize = MAX_HOSTNAME_LENGTH + 1;
pub const OFF_RECIPIENT: usize = OFF_HOST_ALIAS + LEN_HOST_ALIAS;
pub const LEN_RECIPIENT: usize = MAX_RECIPIENT_LENGTH;
pub const OFF_LOPTIONS: usize = OFF_RECIPIENT + LEN_RECIPIENT;
pub const LEN_OPTIONS: usize = MAX_OPTION_LENGTH;
pub const OFF_SOPTIONS: usize = OFF_LOPTIONS + LEN_OPTIONS;
pub const OFF_TE: usize = align8(OFF_SOPTIONS + LEN_OPTIONS);
pub const JOB_RECORD_SIZE: usize = OFF_TE + MAX_TIME_ENTRIES * TIME_ENTRY_SIZE;

const _: () = assert!(OFF_TE == 840);

pub const JID_SPEC: TableSpec = TableSpec {
    name: "JID",
    record_size: JOB_RECORD_SIZE,
    version: CURRENT_JID_VERSION,
};

pub struct JobRec<B> {
    pub(crate) buf: B,
}

impl<B> JobRec<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }
}

record_fields!(JobRec {
    job_id, set_job_id: u32 = 0;
    dir_id, set_dir_id: u32 = 4;
    dir_config_id, set_dir_config_id: u32 = 8;
    file_mask_id, set_file_mask_id: u32 = 12;
    host_id, set_host_id: u32 = 16;
    recipient_id, set_recipient_id: u32 = 20;
    dir_pos, set_dir_pos: i32 = 24;
    fmd_offset, set_fmd_offset: i32 = 28;
    special_flag, set_special_flag: u32 = 32;
    no_of_loptions, set_no_of_loptions: i32 = 36;
    no_of_soptions, set_no_of_soptions: i32 = 40;
    no_of_time_entries, set_no_of_time_entries: i32 = 44;
    protocol, set_protocol: u32 = 48;
    priority, set_priority: u8 = 52;
    files_group, set_files_group: u8 = 53;
    destination, set_destination: u8 = 54;
});

record_strings!(JobRec {
    host_alias, set_host_alias = OFF_HOST_ALIAS, LEN_HOST_ALIAS;
    recipient, set_recipient = OFF_RECIPIENT, LEN_RECIPIENT;
    loptions_raw, set_loptions_raw = OFF_LOPTIONS, LEN_OPTIONS;
    soptions_raw, set_soptions_raw = OFF_SOPTIONS, LEN_OPTIONS;
});

fn split_options(raw: &str) -> Vec<String> {
    raw.split('\n')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

impl<B: AsRef<[u8]>> JobRec<B> {
    pub fn loptions(&self) -> Vec<String> {
        split_options(&self.loptions_raw())
    }

    pub fn soptions(&self) -> Vec<String> {
        split_options(&self.soptions_raw())
    }

    pub fn time_entries(&self) -> Vec<TimeEntry> {
        let n = (self.no_of_time_entries().max(0) as usize).min(MAX_TIME_ENTRIES);
        (0..n)
            .map(|i| {
                let off = OFF_TE + i * TIME_ENTRY_SIZE;
                TimeEntry::read(&self.buf.as_ref()[off..off + TIME_ENTRY_SIZE])
            })
            .collect()
    }
}

/// One job as the builder produces it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobDef {
    pub dir_id: u32,
    pub dir_config_id: u32,
    pub dir_pos: i32,
    pub file_mask_id: u32,
    pub fmd_offset: i32,
    pub host_alias: String,
    pub host_id: u32,
    /// Recipient URL with the password removed.
    pub recipient: String,
    pub priority: u8,
    pub loptions: Vec<String>,
    pub soptions: Vec<String>,
    pub special_flag: u32,
    pub protocol: u32,
    pub time_entries: Vec<TimeEntry>,
    pub files_group: u8,
    pub destination: u8,
}

impl JobDef {
    /// Checksum over the normalized definition. Two jobs with the same
    /// directory, host, recipient, priority, options and masks share an id.
    pub fn job_id(&self) -> u32 {
        let lo = self.loptions.join("\n");
        let so = self.soptions.join("\n");
        let prio = [self.priority];
        let mask = self.file_mask_id.to_le_bytes();
        let dir = self.dir_id.to_le_bytes();
        checksum_parts(&[
            &dir,
            self.host_alias.as_bytes(),
            self.recipient.as_bytes(),
            &prio,
            lo.as_bytes(),
            so.as_bytes(),
            &mask,
        ])
    }

    pub fn write_to<B: AsRef<[u8]> + AsMut<[u8]>>(&self, rec: &mut JobRec<B>) {
        rec.buf.as_mut().fill(0);
        rec.set_job_id(self.job_id());
        rec.set_dir_id(self.dir_id);
        rec.set_dir_config_id(self.dir_config_id);
        rec.set_file_mask_id(self.file_mask_id);
        rec.set_host_id(self.host_id);
        rec.set_recipient_id(crate::util::checksum_str(&self.recipient));
        rec.set_dir_pos(self.dir_pos);
        rec.set_fmd_offset(self.fmd_offset);
        rec.set_special_flag(self.special_flag);
        rec.set_no_of_loptions(self.loptions.len() as i32);
        rec.set_no_of_soptions(self.soptions.len() as i32);
        rec.set_protocol(self.protocol);
        rec.set_priority(self.priority);
        rec.set_files_group(self.files_group);
        rec.set_destination(self.destination);
        rec.set_host_alias(&self.host_alias);
        rec.set_recipient(&self.recipient);
        rec.set_loptions_raw(&self.loptions.join("\n"));
        rec.set_soptions_raw(&self.soptions.join("\n"));
        let n = self.time_entries.len().min(MAX_TIME_ENTRIES);
        for (i, te) in self.time_entries.iter().take(n).enumerate() {
            let off = OFF_TE + i * TIME_ENTRY_SIZE;
            te.write(&mut rec.buf.as_mut()[off..off + TIME_ENTRY_SIZE]);
        }
        rec.set_no_of_time_entries(n as i32);
    }

    pub fn from_rec<B: AsRef<[u8]>>(rec: &JobRec<B>) -> Self {
        Self {
            dir_id: rec.dir_id(),
            dir_config_id: rec.dir_config_id(),
            dir_pos: rec.dir_pos(),
            file_mask_id: rec.file_mask_id(),
            fmd_offset: rec.fmd_offset(),
            host_alias: rec.host_alias(),
            host_id: rec.host_id(),
            recipient: rec.recipient(),
            priority: rec.priority(),
            loptions: rec.loptions(),
            soptions: rec.soptions(),
            special_flag: rec.special_flag(),
            protocol: rec.protocol(),
            time_entries: rec.time_entries(),
            files_group: rec.files_group(),
            destination: rec.destination(),
        }
    }
}

pub struct Jid {
    path: PathBuf,
    map: Mapping,
}

impl Jid {
    pub fn path_in(fifodir: &Path) -> PathBuf {
        fifodir.join(JID_FILE)
    }

    pub fn open(fifodir: &Path, access: Access) -> Result<Self> {
        let path = Self::path_in(fifodir);
        let map = Mapping::open(&path, JID_SPEC, access)?;
        Ok(Self { path, map })
    }

    /// Replace the catalog with `jobs` (duplicates by job id are dropped).
    pub fn write(fifodir: &Path, jobs: &[JobDef]) -> Result<Self> {
        let path = Self::path_in(fifodir);
        let mut seen = std::collections::HashSet::new();
        let unique: Vec<&JobDef> = jobs.iter().filter(|j| seen.insert(j.job_id())).collect();
        let map = rewrite_table(&path, JID_SPEC, unique.len(), 0, |m| {
            for (pos, job) in unique.iter().enumerate() {
                let mut rec = JobRec::new(m.record_mut(pos)?);
                job.write_to(&mut rec);
            }
            Ok(())
        })?;
        log::debug!(target: "system", "wrote {} jobs to {}", unique.len(), path.display());
        Ok(Self { path, map })
    }

    pub fn check_reattach(&mut self) -> Result<bool> {
        if !self.map.is_stale() {
            return Ok(false);
        }
        self.map = Mapping::open(&self.path, JID_SPEC, self.map.access())?;
        Ok(true)
    }

    pub fn is_stale(&self) -> bool {
        self.map.is_stale()
    }

    pub fn no_of_jobs(&self) -> Result<usize> {
        self.map.entries()
    }

    pub fn job(&self, pos: usize) -> Result<JobRec<&[u8]>> {
        Ok(JobRec::new(self.map.record(pos)?))
    }

    pub fn position(&self, job_id: u32) -> Result<Option<usize>> {
        for pos in 0..self.no_of_jobs()? {
            if self.job(pos)?.job_id() == job_id {
                return Ok(Some(pos));
            }
        }
        Ok(None)
    }

    pub fn contains(&self, job_id: u32) -> Result<bool> {
        Ok(self.position(job_id)?.is_some())
    }

    pub fn jobs(&self) -> Result<Vec<JobDef>> {
        (0..self.no_of_jobs()?)
            .map(|pos| Ok(JobDef::from_rec(&self.job(pos)?)))
            .collect()
    }

    /// Positions of the jobs fed by directory `dir_id`, in catalog order.
    pub fn jobs_of_dir(&self, dir_id: u32) -> Result<Vec<usize>> {
        let mut out = Vec::new();
        for pos in 0..self.no_of_jobs()? {
            if self.job(pos)?.dir_id() == dir_id {
                out.push(pos);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(host: &str, prio: u8) -> JobDef {
        JobDef {
            dir_id: 0x10,
            host_alias: host.into(),
            recipient: format!("file://{}/tmp/out", host),
            priority: prio,
            loptions: vec!["toupper".into(), "prefix add x_".into()],
            soptions: vec!["lock DOT".into()],
            time_entries: vec![TimeEntry::parse("0 * * * *").unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn id_depends_on_definition() {
        let a = job("h1", b'5');
        assert_eq!(a.job_id(), job("h1", b'5').job_id());
        assert_ne!(a.job_id(), job("h1", b'6').job_id());
        assert_ne!(a.job_id(), job("h2", b'5').job_id());
    }

    #[test]
    fn write_dedups_and_reads_back() {
        let d = std::env::temp_dir().join(format!("afd-jid-{}", std::process::id()));
        std::fs::create_dir_all(&d).unwrap();
        let jobs = vec![job("h1", b'5'), job("h1", b'5'), job("h2", b'1')];
        let jid = Jid::write(&d, &jobs).unwrap();
        assert_eq!(jid.no_of_jobs().unwrap(), 2);
        let back = jid.jobs().unwrap();
        assert_eq!(back[1], jobs[2]);
        assert_eq!(jid.job(0).unwrap().loptions(), vec!["toupper", "prefix add x_"]);
        assert_eq!(jid.position(jobs[2].job_id()).unwrap(), Some(1));
        assert!(!jid.contains(0xdead).unwrap());
        assert_eq!(jid.jobs_of_dir(0x10).unwrap(), vec![0, 1]);
    }
}
