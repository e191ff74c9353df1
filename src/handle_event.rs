//! Operator acknowledgement and offline marking of host errors.
//!
//! Timed variants record `start_event_handle`/`end_event_handle`; the
//! supervisor tick clears the `_T` flags once the end has passed.

use anyhow::{bail, Result};
use std::str::FromStr;

use crate::consts::*;
use crate::event::{Event, EventLevel, EventLog, EventType};
use crate::fsa::{Fsa, FsaRegion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleAction {
    Acknowledge,
    AcknowledgeTimed,
    Offline,
    OfflineTimed,
    OfflineStatic,
    Unset,
}

impl FromStr for HandleAction {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "ack" | "acknowledge" => HandleAction::Acknowledge,
            "ack-timed" | "acknowledge-timed" => HandleAction::AcknowledgeTimed,
            "offline" => HandleAction::Offline,
            "offline-timed" => HandleAction::OfflineTimed,
            "offline-static" => HandleAction::OfflineStatic,
            "unset" => HandleAction::Unset,
            other => bail!("unknown event action '{}'", other),
        })
    }
}

const ALL_HANDLE_FLAGS: u32 = EVENT_STATUS_FLAGS | HOST_ERROR_OFFLINE_STATIC;

impl HandleAction {
    fn flag(self) -> u32 {
        match self {
            HandleAction::Acknowledge => HOST_ERROR_ACKNOWLEDGED,
            HandleAction::AcknowledgeTimed => HOST_ERROR_ACKNOWLEDGED_T,
            HandleAction::Offline => HOST_ERROR_OFFLINE,
            HandleAction::OfflineTimed => HOST_ERROR_OFFLINE_T,
            HandleAction::OfflineStatic => HOST_ERROR_OFFLINE_STATIC,
            HandleAction::Unset => 0,
        }
    }

    fn is_timed(self) -> bool {
        matches!(self, HandleAction::AcknowledgeTimed | HandleAction::OfflineTimed)
    }

    fn event(self) -> EventType {
        match self {
            HandleAction::Acknowledge | HandleAction::AcknowledgeTimed => EventType::ErrorAcknowledged,
            HandleAction::Offline | HandleAction::OfflineTimed | HandleAction::OfflineStatic => {
                EventType::ErrorOffline
            }
            HandleAction::Unset => EventType::UnsetAckOffl,
        }
    }
}

/// Apply `action` to host `pos`. `until` is required for the timed forms.
pub fn handle_event(
    fsa: &mut Fsa,
    pos: usize,
    action: HandleAction,
    until: Option<i64>,
    now: i64,
    events: &EventLog,
) -> Result<()> {
    if action.is_timed() {
        match until {
            Some(t) if t > now => {}
            Some(t) => bail!("end time {} is not after now ({})", t, now),
            None => bail!("{:?} needs an end time", action),
        }
    }
    let alias = {
        let _g = fsa.lock(pos, FsaRegion::Hs)?;
        let mut h = fsa.host_mut(pos)?;
        // The event flags are exclusive; a new one replaces the old.
        let st = h.host_status() & !ALL_HANDLE_FLAGS;
        h.set_host_status(st | action.flag());
        if action.is_timed() {
            h.set_start_event_handle(now);
            h.set_end_event_handle(until.unwrap_or(now));
        } else {
            h.set_start_event_handle(0);
            h.set_end_event_handle(0);
        }
        h.host_alias()
    };
    let text = match until {
        Some(t) if action.is_timed() => format!("until {}", t),
        _ => String::new(),
    };
    events.emit(Event::host(now, action.event(), &alias, EventLevel::Info, text));
    log::info!(target: "system", "{}: {:?}", alias, action);
    Ok(())
}

/// Clear timed event flags whose end has passed. Returns true if cleared.
pub fn expire_timed(fsa: &mut Fsa, pos: usize, now: i64, events: &EventLog) -> Result<bool> {
    let alias = {
        let _g = fsa.lock(pos, FsaRegion::Hs)?;
        let mut h = fsa.host_mut(pos)?;
        let st = h.host_status();
        let timed = HOST_ERROR_ACKNOWLEDGED_T | HOST_ERROR_OFFLINE_T;
        if st & timed == 0 || h.end_event_handle() == 0 || now <= h.end_event_handle() {
            return Ok(false);
        }
        h.set_host_status(st & !timed);
        h.set_start_event_handle(0);
        h.set_end_event_handle(0);
        h.host_alias()
    };
    events.emit(Event::host(now, EventType::UnsetAckOffl, &alias, EventLevel::Info, "time elapsed"));
    Ok(true)
}
