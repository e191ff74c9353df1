//! Local options applied to a message directory before it is announced.
//!
//! Options run in their configured order. With `GO_PARALLEL` an `exec`
//! is started in the background and the options after it are applied
//! once it has exited (`Pending::finish`).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use crate::consts::*;

#[derive(Debug)]
pub enum Outcome {
    /// Announce the message with these totals.
    Send { files: u32, bytes: u64 },
    /// Every file was removed; nothing to announce.
    Discard,
    /// A background command still runs in the message directory.
    Pending(Pending),
}

#[derive(Debug)]
pub struct Pending {
    pub msg_dir: PathBuf,
    child: Child,
    rest: Vec<String>,
}

impl Pending {
    /// `Some(outcome)` once the child has exited.
    pub fn poll(&mut self) -> Result<Option<Outcome>> {
        match self.child.try_wait()? {
            None => Ok(None),
            Some(st) => {
                if !st.success() {
                    log::warn!(target: "receive", "exec in {} exited with {}", self.msg_dir.display(), st);
                }
                let rest = std::mem::take(&mut self.rest);
                apply(&self.msg_dir, &rest, 0).map(Some)
            }
        }
    }
}

/// Files in a message directory as `(name, size)`, sorted by name.
pub fn list_message(dir: &Path) -> Result<Vec<(String, u64)>> {
    let mut out = Vec::new();
    for e in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let e = e?;
        let md = e.metadata()?;
        if md.is_file() {
            out.push((e.file_name().to_string_lossy().into_owned(), md.len()));
        }
    }
    out.sort();
    Ok(out)
}

fn rename_all(dir: &Path, f: impl Fn(&str) -> Option<String>) -> Result<()> {
    for (name, _) in list_message(dir)? {
        if let Some(new) = f(&name) {
            if new != name && !new.is_empty() {
                fs::rename(dir.join(&name), dir.join(&new))
                    .with_context(|| format!("rename {} -> {}", name, new))?;
            }
        }
    }
    Ok(())
}

fn exec_script(dir: &Path, cmd: &str) -> Result<String> {
    let mut script = String::new();
    for (name, _) in list_message(dir)? {
        if cmd.contains("%s") {
            script.push_str(&cmd.replace("%s", &shell_quote(&name)));
        } else {
            script.push_str(cmd);
            script.push(' ');
            script.push_str(&shell_quote(&name));
        }
        script.push('\n');
    }
    Ok(script)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn totals(dir: &Path) -> Result<Outcome> {
    let files = list_message(dir)?;
    if files.is_empty() {
        return Ok(Outcome::Discard);
    }
    Ok(Outcome::Send {
        files: files.len() as u32,
        bytes: files.iter().map(|(_, s)| *s).sum(),
    })
}

/// Apply `options` to the files in `msg_dir`.
pub fn apply(msg_dir: &Path, options: &[String], special_flag: u32) -> Result<Outcome> {
    for (i, opt) in options.iter().enumerate() {
        let opt = opt.trim();
        let (word, arg) = opt.split_once(char::is_whitespace).unwrap_or((opt, ""));
        let arg = arg.trim();
        match word.to_ascii_lowercase().as_str() {
            "delete" => {
                for (name, _) in list_message(msg_dir)? {
                    fs::remove_file(msg_dir.join(&name))?;
                }
                return Ok(Outcome::Discard);
            }
            "exec" => {
                let script = exec_script(msg_dir, arg)?;
                if script.is_empty() {
                    continue;
                }
                let mut c = Command::new("/bin/sh");
                c.arg("-c").arg(&script).current_dir(msg_dir);
                if special_flag & GO_PARALLEL != 0 {
                    let child = c.spawn().with_context(|| format!("spawn exec '{}'", arg))?;
                    return Ok(Outcome::Pending(Pending {
                        msg_dir: msg_dir.to_path_buf(),
                        child,
                        rest: options[i + 1..].to_vec(),
                    }));
                }
                let st = c.status().with_context(|| format!("exec '{}'", arg))?;
                if !st.success() {
                    log::warn!(target: "receive", "exec '{}' exited with {}", arg, st);
                }
            }
            "toupper" => rename_all(msg_dir, |n| Some(n.to_uppercase()))?,
            "tolower" => rename_all(msg_dir, |n| Some(n.to_lowercase()))?,
            "prefix" => {
                let (how, p) = arg.split_once(char::is_whitespace).unwrap_or((arg, ""));
                let p = p.trim().to_string();
                match how {
                    "add" => rename_all(msg_dir, |n| Some(format!("{}{}", p, n)))?,
                    "del" => rename_all(msg_dir, |n| n.strip_prefix(p.as_str()).map(str::to_string))?,
                    _ => log::warn!(target: "receive", "unknown prefix option '{}'", opt),
                }
            }
            "time" | "time-no-collect" => {}
            _ => log::debug!(target: "receive", "local option '{}' passes files unchanged", opt),
        }
    }
    totals(msg_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(tag: &str, files: &[&str]) -> PathBuf {
        let d = std::env::temp_dir().join(format!("afd-lopt-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&d);
        fs::create_dir_all(&d).unwrap();
        for f in files {
            fs::write(d.join(f), b"abc").unwrap();
        }
        d
    }

    fn names(d: &Path) -> Vec<String> {
        list_message(d).unwrap().into_iter().map(|(n, _)| n).collect()
    }

    #[test]
    fn renames_in_order() {
        let d = msg("ren", &["Ab.txt"]);
        let out = apply(&d, &["tolower".into(), "prefix add x_".into()], 0).unwrap();
        assert!(matches!(out, Outcome::Send { files: 1, bytes: 3 }));
        assert_eq!(names(&d), ["x_ab.txt"]);
        apply(&d, &["prefix del x_".into(), "toupper".into()], 0).unwrap();
        assert_eq!(names(&d), ["AB.TXT"]);
        assert!(matches!(apply(&d, &["delete".into()], 0).unwrap(), Outcome::Discard));
        fs::remove_dir_all(&d).unwrap();
    }

    #[test]
    fn exec_runs_in_message_dir() {
        let d = msg("exec", &["a", "b"]);
        apply(&d, &["exec mv %s %s.done".into()], 0).unwrap();
        assert_eq!(names(&d), ["a.done", "b.done"]);

        let mut p = match apply(&d, &["exec rm %s".into(), "prefix add z".into()], GO_PARALLEL).unwrap() {
            Outcome::Pending(p) => p,
            other => panic!("{:?}", other),
        };
        let out = loop {
            if let Some(o) = p.poll().unwrap() {
                break o;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        };
        assert!(matches!(out, Outcome::Discard));
        fs::remove_dir_all(&d).unwrap();
    }
}
