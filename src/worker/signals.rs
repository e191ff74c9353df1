//! SIGINT/SIGTERM: cooperative cancellation of a transfer worker.

use anyhow::{Context, Result};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

static KILLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    KILLED.store(true, Ordering::SeqCst);
}

/// Install the handlers. The transfer loop polls `killed()` between blocks
/// and releases its slot before exiting with `GOT_KILLED`.
pub fn install() -> Result<()> {
    let act = SigAction::new(SigHandler::Handler(on_signal), SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores into an atomic.
        unsafe { sigaction(sig, &act) }.with_context(|| format!("sigaction {:?}", sig))?;
    }
    Ok(())
}

pub fn killed() -> bool {
    KILLED.load(Ordering::SeqCst)
}
