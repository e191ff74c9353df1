//! Per-file admission gates applied before mask matching.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::consts::*;
use crate::fra::DirRec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Take,
    Empty,
    Size,
    Age,
    EndCharacter,
}

/// Gate settings copied out of a directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gates {
    pub ignore_empty: bool,
    pub ignore_size: i64,
    pub ignore_file_time: u32,
    pub gt_lt_sign: u32,
    pub end_character: i32,
    pub wait_for: String,
}

impl Gates {
    pub fn from_dir<B: AsRef<[u8]>>(d: &DirRec<B>) -> Self {
        Self {
            ignore_empty: d.dir_options() & IGNORE_EMPTY != 0,
            ignore_size: d.ignore_size(),
            ignore_file_time: d.ignore_file_time(),
            gt_lt_sign: d.gt_lt_sign(),
            end_character: d.end_character(),
            wait_for: d.wait_for_filename(),
        }
    }

    /// `path` is only read for the end-character gate.
    pub fn admit(&self, f: &FileInfo, path: &Path, now: i64) -> Verdict {
        if f.size == 0 && self.ignore_empty {
            return Verdict::Empty;
        }
        if self.ignore_size >= 0 && self.size_ignored(f.size as i64) {
            return Verdict::Size;
        }
        if self.ignore_file_time > 0 && self.age_ignored(now - f.mtime) {
            return Verdict::Age;
        }
        if self.end_character >= 0 && last_byte(path, f.size) != Some(self.end_character as u8) {
            return Verdict::EndCharacter;
        }
        Verdict::Take
    }

    fn size_ignored(&self, size: i64) -> bool {
        let s = self.gt_lt_sign;
        if s & ISIZE_LESS_THEN != 0 {
            size < self.ignore_size
        } else if s & ISIZE_GREATER_THEN != 0 {
            size > self.ignore_size
        } else {
            size == self.ignore_size
        }
    }

    fn age_ignored(&self, age: i64) -> bool {
        let t = self.ignore_file_time as i64;
        let s = self.gt_lt_sign;
        if s & IFTIME_LESS_THEN != 0 {
            age < t
        } else if s & IFTIME_GREATER_THEN != 0 {
            age > t
        } else {
            age == t
        }
    }

    /// Whether the batch may be released given the names in the directory.
    pub fn wait_for_satisfied<'a>(&self, mut names: impl Iterator<Item = &'a str>) -> bool {
        self.wait_for.is_empty() || names.any(|n| n == self.wait_for)
    }
}

fn last_byte(path: &Path, size: u64) -> Option<u8> {
    if size == 0 {
        return None;
    }
    let mut f = File::open(path).ok()?;
    f.seek(SeekFrom::Start(size - 1)).ok()?;
    let mut b = [0u8; 1];
    f.read_exact(&mut b).ok()?;
    Some(b[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gates() -> Gates {
        Gates {
            ignore_empty: false,
            ignore_size: -1,
            ignore_file_time: 0,
            gt_lt_sign: 0,
            end_character: -1,
            wait_for: String::new(),
        }
    }

    fn info(size: u64, mtime: i64) -> FileInfo {
        FileInfo {
            name: "f".into(),
            size,
            mtime,
        }
    }

    #[test]
    fn comparators() {
        let p = Path::new("/nonexistent");
        let mut g = gates();
        g.ignore_empty = true;
        assert_eq!(g.admit(&info(0, 0), p, 0), Verdict::Empty);
        g.ignore_size = 100;
        g.gt_lt_sign = ISIZE_GREATER_THEN;
        assert_eq!(g.admit(&info(101, 0), p, 0), Verdict::Size);
        assert_eq!(g.admit(&info(100, 0), p, 0), Verdict::Take);
        g.ignore_file_time = 60;
        g.gt_lt_sign = IFTIME_LESS_THEN;
        assert_eq!(g.admit(&info(5, 970), p, 1000), Verdict::Age);
        assert_eq!(g.admit(&info(5, 900), p, 1000), Verdict::Take);
    }

    #[test]
    fn end_character_reads_last_byte() {
        let dir = std::env::temp_dir().join(format!("afd-gates-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let p = dir.join("x");
        std::fs::write(&p, b"abc\x03").unwrap();
        let mut g = gates();
        g.end_character = 3;
        assert_eq!(g.admit(&info(4, 0), &p, 0), Verdict::Take);
        std::fs::write(&p, b"abcd").unwrap();
        assert_eq!(g.admit(&info(4, 0), &p, 0), Verdict::EndCharacter);
        g.wait_for = "ready".into();
        assert!(!g.wait_for_satisfied(["a", "b"].into_iter()));
        assert!(g.wait_for_satisfied(["a", "ready"].into_iter()));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
