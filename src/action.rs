//! Operator action hooks: `<etc>/action/{target|source}/<kind>/<alias>`.
//!
//! A hook runs only if it is a regular executable file. It gets the alias
//! and the event name as arguments and `LOGNAME` in its environment.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;

use crate::paths::WorkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSide {
    /// Hosts.
    Target,
    /// Directories.
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Start,
    Stop,
    Warn,
    StopWarn,
    Success,
    Error,
}

impl ActionKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Warn => "warn",
            ActionKind::StopWarn => "stop_warn",
            ActionKind::Success => "success",
            ActionKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actions {
    root: PathBuf,
}

impl Actions {
    pub fn new(work: &WorkDir) -> Self {
        Self {
            root: work.action_dir(),
        }
    }

    pub fn hook_path(&self, side: ActionSide, kind: ActionKind, alias: &str) -> PathBuf {
        let side = match side {
            ActionSide::Target => "target",
            ActionSide::Source => "source",
        };
        self.root.join(side).join(kind.dir_name()).join(alias)
    }

    pub fn exists(&self, side: ActionSide, kind: ActionKind, alias: &str) -> bool {
        crate::util::is_executable(&self.hook_path(side, kind, alias))
    }

    /// Run the hook if present. Returns whether it ran.
    pub fn run(&self, side: ActionSide, kind: ActionKind, alias: &str) -> Result<bool> {
        let hook = self.hook_path(side, kind, alias);
        if !crate::util::is_executable(&hook) {
            return Ok(false);
        }
        let status = Command::new(&hook)
            .arg(alias)
            .arg(kind.dir_name())
            .env("LOGNAME", crate::util::login_name())
            .status()
            .with_context(|| format!("run action {}", hook.display()))?;
        if !status.success() {
            log::warn!(target: "system", "action {} exited with {}", hook.display(), status);
        } else {
            log::info!(target: "system", "action {} {} for {}", kind.dir_name(), hook.display(), alias);
        }
        Ok(true)
    }

    /// `run` without an error path for callers inside a state transition.
    pub fn fire(&self, side: ActionSide, kind: ActionKind, alias: &str) {
        if let Err(e) = self.run(side, kind, alias) {
            log::warn!(target: "system", "{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn only_executables_run() {
        let root = std::env::temp_dir().join(format!("afd-action-{}", std::process::id()));
        let work = WorkDir::new(&root);
        work.create_tree().unwrap();
        let acts = Actions::new(&work);
        let out = root.join("ran");
        let hook = acts.hook_path(ActionSide::Target, ActionKind::Warn, "h1");
        std::fs::write(&hook, format!("#!/bin/sh\necho \"$1 $2\" >> {}\n", out.display())).unwrap();
        assert!(!acts.run(ActionSide::Target, ActionKind::Warn, "h1").unwrap());

        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(acts.run(ActionSide::Target, ActionKind::Warn, "h1").unwrap());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "h1 warn\n");
        assert!(!acts.run(ActionSide::Source, ActionKind::Warn, "h1").unwrap());
        let _ = std::fs::remove_dir_all(&root);
    }
}
