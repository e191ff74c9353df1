use anyhow::{anyhow, Result};

use afd::event::EventLog;
use afd::handle_event::{handle_event, HandleAction};
use afd::{Fsa, WorkDir};

pub fn exec(work: &WorkDir, host: &str, action: &str, for_secs: Option<i64>) -> Result<()> {
    let action: HandleAction = action.parse()?;
    let mut fsa = Fsa::attach_active(&work.fifodir())?;
    let pos = fsa
        .position(host)?
        .ok_or_else(|| anyhow!("host '{}' not in FSA", host))?;
    let now = afd::util::now();
    let until = for_secs.map(|s| now + s);
    handle_event(&mut fsa, pos, action, until, now, &EventLog::new(work))?;
    fsa.flush();
    println!("{}: {:?}", host, action);
    Ok(())
}
