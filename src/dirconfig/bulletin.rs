//! Bulletin and report routing rules (`bul_config`, `rep_config`).
//!
//! `TTAAii,CCCC,TYPE,DUP,WINDOW[,HEADER]` per line, e.g.
//! `SMDL,EDZW,INP,Y,0-23,SMDL01`. `CCCC` may be `*`.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;

pub const RT_INP: u8 = 0x01;
pub const RT_IGN: u8 = 0x02;
pub const RT_CMP: u8 = 0x04;
pub const RT_DUP: u8 = 0x08;
const RT_TYPE_MASK: u8 = RT_INP | RT_IGN | RT_CMP;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Input,
    Ignore,
    Compare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletinRule {
    pub ttaaii: String,
    /// `None` matches any origin.
    pub cccc: Option<String>,
    pub flags: u8,
    /// Inclusive hour range; `None` is `*`.
    pub window: Option<(u8, u8)>,
    pub header: Option<String>,
}

impl BulletinRule {
    pub fn parse(line: &str) -> Result<Self> {
        let f: Vec<&str> = line.split(',').map(str::trim).collect();
        if f.len() < 5 {
            bail!("'{}': expected at least 5 fields", line);
        }
        if f[0].is_empty() || f[0].len() > 6 {
            bail!("'{}': bad TTAAii '{}'", line, f[0]);
        }
        let cccc = match f[1] {
            "*" => None,
            c if c.len() == 4 => Some(c.to_ascii_uppercase()),
            c => bail!("'{}': bad CCCC '{}'", line, c),
        };
        let mut flags = match f[2].to_ascii_uppercase().as_str() {
            "INP" => RT_INP,
            "IGN" => RT_IGN,
            "CMP" => RT_CMP,
            t => bail!("'{}': unknown type '{}'", line, t),
        };
        match f[3] {
            "Y" | "y" => flags |= RT_DUP,
            "N" | "n" => {}
            d => bail!("'{}': dup flag must be Y or N, not '{}'", line, d),
        }
        let window = if f[4] == "*" {
            None
        } else {
            let (a, b) = f[4]
                .split_once('-')
                .ok_or_else(|| anyhow!("'{}': window must be <from>-<to> or *", line))?;
            let a: u8 = a.parse().map_err(|_| anyhow!("'{}': bad window start", line))?;
            let b: u8 = b.parse().map_err(|_| anyhow!("'{}': bad window end", line))?;
            if a > 23 || b > 23 {
                bail!("'{}': window hours must be 0-23", line);
            }
            Some((a, b))
        };
        let header = f.get(5).filter(|h| !h.is_empty()).map(|h| h.to_string());
        Ok(Self {
            ttaaii: f[0].to_ascii_uppercase(),
            cccc,
            flags,
            window,
            header,
        })
    }

    pub fn rule_type(&self) -> RuleType {
        match self.flags & RT_TYPE_MASK {
            RT_IGN => RuleType::Ignore,
            RT_CMP => RuleType::Compare,
            _ => RuleType::Input,
        }
    }

    pub fn dup_check(&self) -> bool {
        self.flags & RT_DUP != 0
    }

    /// Whether `hour` lies in the window; a window may wrap midnight.
    pub fn in_window(&self, hour: u8) -> bool {
        match self.window {
            None => true,
            Some((a, b)) if a <= b => hour >= a && hour <= b,
            Some((a, b)) => hour >= a || hour <= b,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    rules: Vec<BulletinRule>,
}

impl RoutingTable {
    /// Bad lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut rules = Vec::new();
        for (no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match BulletinRule::parse(line) {
                Ok(r) => rules.push(r),
                Err(e) => log::warn!(target: "system", "routing rule line {}: {:#}", no + 1, e),
            }
        }
        Self { rules }
    }

    /// Both files; a missing file contributes nothing.
    pub fn load(bul: &Path, rep: &Path) -> Result<Self> {
        let mut rules = Vec::new();
        for p in [bul, rep] {
            if !p.exists() {
                continue;
            }
            let text = std::fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
            rules.extend(Self::parse(&text).rules);
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Longest TTAAii prefix wins; among equal prefixes an exact CCCC beats
    /// the wildcard.
    pub fn lookup(&self, ttaaii: &str, cccc: &str) -> Option<&BulletinRule> {
        let tt = ttaaii.to_ascii_uppercase();
        let cc = cccc.to_ascii_uppercase();
        self.rules
            .iter()
            .filter(|r| tt.starts_with(&r.ttaaii))
            .filter(|r| r.cccc.as_deref().map(|c| c == cc).unwrap_or(true))
            .max_by_key(|r| (r.ttaaii.len(), r.cccc.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_then_exact_origin() {
        let t = RoutingTable::parse(
            "\
SM,*,INP,N,*
SMDL,*,IGN,N,*
SMDL,EDZW,CMP,Y,6-18,SMDL99
bad,line
",
        );
        assert_eq!(t.len(), 3);
        assert_eq!(t.lookup("SMDL01", "LFPW").map(|r| r.rule_type()), Some(RuleType::Ignore));
        let r = t.lookup("smdl01", "edzw").unwrap();
        assert_eq!(r.rule_type(), RuleType::Compare);
        assert!(r.dup_check());
        assert_eq!(r.header.as_deref(), Some("SMDL99"));
        assert_eq!(t.lookup("SMAA10", "EDZW").map(|r| r.rule_type()), Some(RuleType::Input));
        assert!(t.lookup("FTDL", "EDZW").is_none());
    }

    #[test]
    fn window_wraps_midnight() {
        let r = BulletinRule::parse("SA,*,INP,N,22-2").unwrap();
        assert!(r.in_window(23) && r.in_window(1));
        assert!(!r.in_window(12));
    }
}
