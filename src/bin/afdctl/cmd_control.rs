use anyhow::{Context, Result};

use afd::consts::AFD_CMD_FIFO;
use afd::fifo::{send_command, Command};
use afd::WorkDir;

fn send(work: &WorkDir, cmd: Command) -> Result<()> {
    send_command(&work.fifo(AFD_CMD_FIFO), cmd).context("AFD does not seem to be running")
}

pub fn reread(work: &WorkDir) -> Result<()> {
    send(work, Command::RereadConfig)?;
    println!("reread requested");
    Ok(())
}

pub fn shutdown(work: &WorkDir) -> Result<()> {
    send(work, Command::Shutdown)?;
    println!("shutdown requested");
    Ok(())
}
