//! Append-only event log `<work>/log/event.log`.
//!
//! Line: `<unix-time hex>|<class>|<type>|<alias>|<level>|<text>` where class
//! is `H` (host), `D` (directory) or `G` (global). Writers append under an
//! exclusive fs2 lock so lines from different processes never interleave.

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::paths::WorkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Host,
    Dir,
    Global,
}

impl EventClass {
    fn as_char(self) -> char {
        match self {
            EventClass::Host => 'H',
            EventClass::Dir => 'D',
            EventClass::Global => 'G',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    ErrorStart,
    ErrorEnd,
    WarnTimeSet,
    WarnTimeUnset,
    DangerPauseQueueSet,
    DangerPauseQueueUnset,
    AutoPauseQueueSet,
    AutoPauseQueueUnset,
    ErrorAcknowledged,
    ErrorOffline,
    UnsetAckOffl,
    CounterCorrected,
    DirErrorStart,
    DirErrorEnd,
    AutoToggle,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ErrorStart => "ERROR_START",
            EventType::ErrorEnd => "ERROR_END",
            EventType::WarnTimeSet => "WARN_TIME_SET",
            EventType::WarnTimeUnset => "WARN_TIME_UNSET",
            EventType::DangerPauseQueueSet => "DANGER_PAUSE_QUEUE_SET",
            EventType::DangerPauseQueueUnset => "DANGER_PAUSE_QUEUE_UNSET",
            EventType::AutoPauseQueueSet => "AUTO_PAUSE_QUEUE_SET",
            EventType::AutoPauseQueueUnset => "AUTO_PAUSE_QUEUE_UNSET",
            EventType::ErrorAcknowledged => "ERROR_ACKNOWLEDGED",
            EventType::ErrorOffline => "ERROR_OFFLINE",
            EventType::UnsetAckOffl => "UNSET_ACK_OFFL",
            EventType::CounterCorrected => "COUNTER_CORRECTED",
            EventType::DirErrorStart => "DIR_ERROR_START",
            EventType::DirErrorEnd => "DIR_ERROR_END",
            EventType::AutoToggle => "AUTO_TOGGLE",
        }
    }

    const ALL: [EventType; 15] = [
        EventType::ErrorStart,
        EventType::ErrorEnd,
        EventType::WarnTimeSet,
        EventType::WarnTimeUnset,
        EventType::DangerPauseQueueSet,
        EventType::DangerPauseQueueUnset,
        EventType::AutoPauseQueueSet,
        EventType::AutoPauseQueueUnset,
        EventType::ErrorAcknowledged,
        EventType::ErrorOffline,
        EventType::UnsetAckOffl,
        EventType::CounterCorrected,
        EventType::DirErrorStart,
        EventType::DirErrorEnd,
        EventType::AutoToggle,
    ];
}

impl FromStr for EventType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow!("unknown event type '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    fn as_str(self) -> &'static str {
        match self {
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub time: i64,
    pub class: EventClass,
    pub kind: EventType,
    pub alias: String,
    pub level: EventLevel,
    pub text: String,
}

impl Event {
    pub fn host(time: i64, kind: EventType, alias: &str, level: EventLevel, text: impl Into<String>) -> Self {
        Self {
            time,
            class: EventClass::Host,
            kind,
            alias: alias.to_string(),
            level,
            text: text.into(),
        }
    }

    pub fn dir(time: i64, kind: EventType, alias: &str, level: EventLevel, text: impl Into<String>) -> Self {
        Self {
            time,
            class: EventClass::Dir,
            kind,
            alias: alias.to_string(),
            level,
            text: text.into(),
        }
    }

    pub fn global(time: i64, kind: EventType, level: EventLevel, text: impl Into<String>) -> Self {
        Self {
            time,
            class: EventClass::Global,
            kind,
            alias: String::new(),
            level,
            text: text.into(),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let mut it = line.splitn(6, '|');
        let mut next = |what: &str| it.next().ok_or_else(|| anyhow!("event line lacks {}: {}", what, line));
        let time = i64::from_str_radix(next("time")?, 16)?;
        let class = match next("class")? {
            "H" => EventClass::Host,
            "D" => EventClass::Dir,
            "G" => EventClass::Global,
            other => return Err(anyhow!("bad event class '{}'", other)),
        };
        let kind: EventType = next("type")?.parse()?;
        let alias = next("alias")?.to_string();
        let level = match next("level")? {
            "INFO" => EventLevel::Info,
            "WARN" => EventLevel::Warn,
            "ERROR" => EventLevel::Error,
            other => return Err(anyhow!("bad event level '{}'", other)),
        };
        let text = next("text").unwrap_or("").to_string();
        Ok(Self {
            time,
            class,
            kind,
            alias,
            level,
            text,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}|{}|{}|{}|{}|{}",
            self.time,
            self.class.as_char(),
            self.kind.as_str(),
            self.alias,
            self.level.as_str(),
            self.text.replace('\n', " ")
        )
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(work: &WorkDir) -> Self {
        Self {
            path: work.event_log(),
        }
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, ev: &Event) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open event log {}", self.path.display()))?;
        f.lock_exclusive()
            .with_context(|| format!("lock_exclusive {}", self.path.display()))?;
        let line = format!("{}\n", ev);
        let res = f.write_all(line.as_bytes());
        let _ = f.unlock();
        res.with_context(|| format!("append event log {}", self.path.display()))?;
        log::debug!(target: "system", "event {}", line.trim_end());
        Ok(())
    }

    /// Append and log on failure; event logging never aborts a state change.
    pub fn emit(&self, ev: Event) {
        if let Err(e) = self.append(&ev) {
            log::warn!(target: "system", "event log: {:#}", e);
        }
    }

    pub fn read_all(&self) -> Result<Vec<Event>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("read {}", self.path.display())),
        };
        let mut out = Vec::new();
        for line in text.lines().filter(|l| !l.is_empty()) {
            match Event::parse(line) {
                Ok(ev) => out.push(ev),
                Err(e) => log::debug!("skip event line: {:#}", e),
            }
        }
        Ok(out)
    }

    pub fn count(&self, kind: EventType, alias: &str) -> Result<usize> {
        Ok(self
            .read_all()?
            .iter()
            .filter(|e| e.kind == kind && e.alias == alias)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_format_roundtrip() {
        let ev = Event::host(0x6553f100, EventType::ErrorStart, "hostA", EventLevel::Error, "3 errors");
        let line = ev.to_string();
        assert_eq!(line, "6553f100|H|ERROR_START|hostA|ERROR|3 errors");
        assert_eq!(Event::parse(&line).unwrap(), ev);
        assert!(Event::parse("zz|H|ERROR_START|a|INFO|x").is_err());
    }

    #[test]
    fn append_and_count() {
        let p = std::env::temp_dir().join(format!("afd-event-{}/event.log", std::process::id()));
        let _ = std::fs::remove_file(&p);
        let log = EventLog::at(&p);
        log.emit(Event::host(1, EventType::WarnTimeSet, "h", EventLevel::Warn, ""));
        log.emit(Event::host(2, EventType::WarnTimeSet, "h", EventLevel::Warn, "again"));
        log.emit(Event::global(3, EventType::CounterCorrected, EventLevel::Info, "x"));
        assert_eq!(log.count(EventType::WarnTimeSet, "h").unwrap(), 2);
        assert_eq!(log.read_all().unwrap().len(), 3);
        let _ = std::fs::remove_file(&p);
    }
}
