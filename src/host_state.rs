//! Per-host error and warn-time transitions driven by transfer outcomes.
//!
//! Lock order inside one host record is CON < HS < TFC < EC; every
//! function here takes the regions it needs in one `lock_all` call.

use anyhow::Result;

use crate::action::{ActionKind, ActionSide, Actions};
use crate::consts::*;
use crate::event::{Event, EventLevel, EventLog, EventType};
use crate::fsa::{Fsa, FsaRegion};

/// Sinks for the side effects of a host transition.
pub struct Notify<'a> {
    pub events: &'a EventLog,
    pub actions: &'a Actions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorOutcome {
    /// `error_counter` just reached `max_errors`.
    pub error_start: bool,
    pub toggled: bool,
}

/// Account one failed transfer attempt with exit `code`.
pub fn record_error(fsa: &mut Fsa, pos: usize, code: i32, now: i64, n: &Notify) -> Result<ErrorOutcome> {
    let mut out = ErrorOutcome::default();
    let alias;
    {
        let _g = fsa.lock_all(pos, &[FsaRegion::Hs, FsaRegion::Ec])?;
        let mut h = fsa.host_mut(pos)?;
        alias = h.host_alias();
        let ec = h.error_counter() + 1;
        h.set_error_counter(ec);
        h.set_total_errors(h.total_errors().wrapping_add(1));
        h.push_error_history(code.clamp(0, u8::MAX as i32) as u8);
        h.set_last_retry_time(now);
        if h.first_error_time() == 0 {
            h.set_first_error_time(now);
        }
        let max = h.max_errors();
        if max > 0 && ec == max {
            h.set_host_status(h.host_status() | PENDING_ERRORS | AUTO_PAUSE_QUEUE);
            out.error_start = true;
        }
        if max > 0
            && ec % max == 0
            && h.auto_toggle() == AUTO_TOGGLE_ON
            && !h.real_hostname_2().is_empty()
        {
            let next = if h.host_toggle() == HOST_TWO { HOST_ONE } else { HOST_TWO };
            h.set_host_toggle(next);
            h.update_dsp_name();
            out.toggled = true;
        }
    }
    log::warn!(
        target: "transfer",
        "{}: {} (error counter now {})",
        alias,
        crate::exit::describe(code),
        fsa.host(pos)?.error_counter()
    );
    if out.error_start {
        n.events.emit(Event::host(
            now,
            EventType::ErrorStart,
            &alias,
            EventLevel::Error,
            crate::exit::describe(code),
        ));
        n.events.emit(Event::host(now, EventType::AutoPauseQueueSet, &alias, EventLevel::Warn, ""));
        n.actions.fire(ActionSide::Target, ActionKind::Start, &alias);
    }
    if out.toggled {
        let h = fsa.host(pos)?;
        n.events.emit(Event::host(
            now,
            EventType::AutoToggle,
            &alias,
            EventLevel::Info,
            format!("switched to {}", h.active_hostname()),
        ));
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuccessOutcome {
    /// Errors were pending and are now cleared; the dispatcher should be woken.
    pub errors_cleared: bool,
    pub warn_cleared: bool,
}

/// Account a completed message. `own_slot` is the worker's slot and is
/// left alone when clearing `NOT_WORKING` from its peers.
pub fn record_success(
    fsa: &mut Fsa,
    pos: usize,
    own_slot: Option<usize>,
    now: i64,
    n: &Notify,
) -> Result<SuccessOutcome> {
    let mut out = SuccessOutcome::default();
    let alias;
    let was_error;
    let action_success;
    {
        let _g = fsa.lock_all(pos, &[FsaRegion::Con, FsaRegion::Hs, FsaRegion::Ec])?;
        let mut h = fsa.host_mut(pos)?;
        alias = h.host_alias();
        h.set_last_connection(now);
        let st = h.host_status();
        was_error = h.error_counter() > 0 || st & (PENDING_ERRORS | AUTO_PAUSE_QUEUE) != 0;
        if was_error {
            h.set_error_counter(0);
            h.set_first_error_time(0);
            let mut hist = h.error_history();
            hist[0] = 0;
            hist[1] = 0;
            h.set_error_history(&hist);
            for i in 0..MAX_PARALLEL_JOBS {
                if Some(i) == own_slot {
                    continue;
                }
                let mut s = h.slot_mut(i);
                if s.connect_status() == NOT_WORKING {
                    s.set_connect_status(DISCONNECT);
                }
            }
            out.errors_cleared = true;
        }
        let mut st2 = st & !(PENDING_ERRORS | AUTO_PAUSE_QUEUE);
        if st & HOST_WARN_TIME_REACHED != 0 {
            st2 &= !HOST_WARN_TIME_REACHED;
            out.warn_cleared = true;
        }
        if st & EVENT_STATUS_FLAGS != 0 && h.end_event_handle() > 0 && now > h.end_event_handle() {
            st2 &= !EVENT_STATUS_FLAGS;
            h.set_start_event_handle(0);
            h.set_end_event_handle(0);
        }
        action_success = st & HOST_ACTION_SUCCESS != 0;
        h.set_host_status(st2);
        h.set_successful_retries(0);
    }
    if out.errors_cleared {
        n.events.emit(Event::host(now, EventType::ErrorEnd, &alias, EventLevel::Info, ""));
        n.events.emit(Event::host(now, EventType::AutoPauseQueueUnset, &alias, EventLevel::Info, ""));
        n.actions.fire(ActionSide::Target, ActionKind::Stop, &alias);
    }
    if out.warn_cleared {
        n.events.emit(Event::host(now, EventType::WarnTimeUnset, &alias, EventLevel::Info, ""));
        n.actions.fire(ActionSide::Target, ActionKind::StopWarn, &alias);
    }
    if action_success {
        n.actions.fire(ActionSide::Target, ActionKind::Success, &alias);
    }
    Ok(out)
}

/// Warn-time check of one host; returns true when the flag was just set.
pub fn check_warn_time(fsa: &mut Fsa, pos: usize, now: i64, n: &Notify) -> Result<bool> {
    let (alias, fire) = {
        let h = fsa.host(pos)?;
        let wt = h.warn_time();
        let due = wt > 0
            && h.special_flag() & DISABLE_HOST_WARN_TIME == 0
            && h.last_connection() > 0
            && now - h.last_connection() > wt
            && h.host_status() & HOST_WARN_TIME_REACHED == 0;
        (h.host_alias(), due)
    };
    if !fire {
        return Ok(false);
    }
    fsa.update_status(pos, HOST_WARN_TIME_REACHED, 0)?;
    n.events.emit(Event::host(
        now,
        EventType::WarnTimeSet,
        &alias,
        EventLevel::Warn,
        "no connection within warn time",
    ));
    n.actions.fire(ActionSide::Target, ActionKind::Warn, &alias);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsa::testutil::make_fsa;
    use crate::paths::WorkDir;

    fn setup(name: &str) -> (WorkDir, Fsa) {
        let root = std::env::temp_dir().join(format!(
            "afd-hoststate-{}-{}-{}",
            name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let work = WorkDir::new(&root);
        work.create_tree().unwrap();
        let fsa = make_fsa(&work.fifodir(), &["h"], 2);
        (work, fsa)
    }

    #[test]
    fn errors_pause_and_success_recovers() {
        let (work, mut fsa) = setup("pause");
        let events = EventLog::new(&work);
        let actions = Actions::new(&work);
        let n = Notify {
            events: &events,
            actions: &actions,
        };
        for i in 0..3 {
            let o = record_error(&mut fsa, 0, crate::exit::CONNECT_ERROR, 100 + i, &n).unwrap();
            assert_eq!(o.error_start, i == 2);
        }
        let h = fsa.host(0).unwrap();
        assert_ne!(h.host_status() & AUTO_PAUSE_QUEUE, 0);
        assert_eq!(h.error_history()[0], crate::exit::CONNECT_ERROR as u8);
        assert_eq!(h.first_error_time(), 100);
        assert_eq!(events.count(EventType::ErrorStart, "h").unwrap(), 1);

        let o = record_success(&mut fsa, 0, Some(0), 200, &n).unwrap();
        assert!(o.errors_cleared);
        let h = fsa.host(0).unwrap();
        assert_eq!(h.host_status() & (AUTO_PAUSE_QUEUE | PENDING_ERRORS), 0);
        assert_eq!(h.error_counter(), 0);
        assert_eq!(h.last_connection(), 200);
        assert_eq!(events.count(EventType::ErrorEnd, "h").unwrap(), 1);
    }

    #[test]
    fn auto_toggle_switches_hostname() {
        let (work, mut fsa) = setup("toggle");
        let events = EventLog::new(&work);
        let actions = Actions::new(&work);
        let n = Notify {
            events: &events,
            actions: &actions,
        };
        {
            let mut h = fsa.host_mut(0).unwrap();
            h.set_real_hostname(1, "backup");
            h.set_auto_toggle(AUTO_TOGGLE_ON);
            h.set_host_toggle(HOST_ONE);
            h.set_toggle_str("{12}");
        }
        for t in 0..3 {
            record_error(&mut fsa, 0, crate::exit::CONNECT_ERROR, t, &n).unwrap();
        }
        assert_eq!(fsa.host(0).unwrap().active_hostname(), "backup");
        assert_eq!(events.count(EventType::AutoToggle, "h").unwrap(), 1);
    }
}
