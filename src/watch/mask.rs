//! File-mask groups compiled with globset.
//!
//! A name is rejected if any `!` pattern matches it. Otherwise it is
//! accepted if a positive pattern matches, or if a `!` pattern does not
//! match (an exclusion that does not apply counts as acceptance).

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};

#[derive(Debug, Clone)]
pub struct MaskSet {
    patterns: Vec<(GlobMatcher, bool)>,
    all_files: bool,
}

impl MaskSet {
    pub fn compile(masks: &[String]) -> Result<Self> {
        let all_files = !masks.is_empty() && masks.iter().all(|m| m == "*");
        let mut patterns = Vec::with_capacity(masks.len());
        if !all_files {
            for m in masks {
                let (pat, neg) = match m.strip_prefix('!') {
                    Some(rest) => (rest, true),
                    None => (m.as_str(), false),
                };
                let g = GlobBuilder::new(pat)
                    .literal_separator(true)
                    .backslash_escape(true)
                    .build()
                    .with_context(|| format!("file mask '{}'", m))?;
                patterns.push((g.compile_matcher(), neg));
            }
        }
        Ok(Self { patterns, all_files })
    }

    pub fn is_all_files(&self) -> bool {
        self.all_files
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.all_files {
            return true;
        }
        let mut accepted = false;
        for (g, neg) in &self.patterns {
            let hit = g.is_match(name);
            match (neg, hit) {
                (true, true) => return false,
                (true, false) | (false, true) => accepted = true,
                (false, false) => {}
            }
        }
        accepted
    }
}
