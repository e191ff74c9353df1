//! Cron-like schedule entries (`bd_time_entry`).
//!
//! Canonical form is the struct below; on disk it is 24 bytes:
//! `minute u64 | hour u32 | day_of_month u32 | month u16 | day_of_week u8 | pad`.
//! Bit `n` of `minute` is minute `n`, bit `d-1` of `day_of_month` is day `d`,
//! bit `m-1` of `month` is month `m`, bit 0 of `day_of_week` is Sunday.

use anyhow::{anyhow, bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Datelike, FixedOffset, Local, TimeZone, Timelike, Utc};

pub const TIME_ENTRY_SIZE: usize = 24;

const ALL_MINUTES: u64 = (1u64 << 60) - 1;
const ALL_HOURS: u32 = (1u32 << 24) - 1;
const ALL_DAYS: u32 = (1u32 << 31) - 1;
const ALL_MONTHS: u16 = (1u16 << 12) - 1;
const ALL_DOW: u8 = (1u8 << 7) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeEntry {
    pub minute: u64,
    pub hour: u32,
    pub day_of_month: u32,
    pub month: u16,
    pub day_of_week: u8,
}

fn parse_field(s: &str, lo: u32, hi: u32, what: &str) -> Result<u64> {
    let mut bits = 0u64;
    for part in s.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, st)) => {
                let st: u32 = st.parse().map_err(|_| anyhow!("bad step '{}' in {}", st, what))?;
                if st == 0 {
                    bail!("zero step in {}", what);
                }
                (r, st)
            }
            None => (part, 1),
        };
        let (a, b) = if range == "*" {
            (lo, hi)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u32 = a.parse().map_err(|_| anyhow!("bad value '{}' in {}", a, what))?;
            let b: u32 = b.parse().map_err(|_| anyhow!("bad value '{}' in {}", b, what))?;
            (a, b)
        } else {
            let v: u32 = range
                .parse()
                .map_err(|_| anyhow!("bad value '{}' in {}", range, what))?;
            if step > 1 {
                (v, hi)
            } else {
                (v, v)
            }
        };
        if a < lo || b > hi || a > b {
            bail!("{} range {}-{} outside {}-{}", what, a, b, lo, hi);
        }
        let mut v = a;
        while v <= b {
            bits |= 1u64 << (v - lo);
            v += step;
        }
    }
    Ok(bits)
}

/// Render a bit set back to cron text (`*`, lists and ranges).
fn render_field(bits: u64, lo: u32, count: u32) -> String {
    let full = if count == 64 { u64::MAX } else { (1u64 << count) - 1 };
    if bits & full == full {
        return "*".to_string();
    }
    let mut parts = Vec::new();
    let mut i = 0;
    while i < count {
        if bits & (1u64 << i) != 0 {
            let start = i;
            while i + 1 < count && bits & (1u64 << (i + 1)) != 0 {
                i += 1;
            }
            if start == i {
                parts.push(format!("{}", start + lo));
            } else {
                parts.push(format!("{}-{}", start + lo, i + lo));
            }
        }
        i += 1;
    }
    parts.join(",")
}

impl TimeEntry {
    /// Parse `minute hour day_of_month month day_of_week`.
    pub fn parse(s: &str) -> Result<Self> {
        let f: Vec<&str> = s.split_whitespace().collect();
        if f.len() != 5 {
            bail!("time entry '{}' needs 5 fields, has {}", s, f.len());
        }
        let minute = parse_field(f[0], 0, 59, "minute")?;
        let hour = parse_field(f[1], 0, 23, "hour")? as u32;
        let day_of_month = parse_field(f[2], 1, 31, "day of month")? as u32;
        let month = parse_field(f[3], 1, 12, "month")? as u16;
        let mut dow = parse_field(f[4], 0, 7, "day of week")? as u8;
        if dow & 0x80 != 0 {
            dow = (dow & 0x7f) | 1;
        }
        Ok(Self {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week: dow,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "{} {} {} {} {}",
            render_field(self.minute, 0, 60),
            render_field(self.hour as u64, 0, 24),
            render_field(self.day_of_month as u64, 1, 31),
            render_field(self.month as u64, 1, 12),
            render_field(self.day_of_week as u64, 0, 7)
        )
    }

    pub fn is_every_minute(&self) -> bool {
        self.minute & ALL_MINUTES == ALL_MINUTES
            && self.hour & ALL_HOURS == ALL_HOURS
            && self.day_of_month & ALL_DAYS == ALL_DAYS
            && self.month & ALL_MONTHS == ALL_MONTHS
            && self.day_of_week & ALL_DOW == ALL_DOW
    }

    pub fn read(buf: &[u8]) -> Self {
        Self {
            minute: LittleEndian::read_u64(&buf[0..8]),
            hour: LittleEndian::read_u32(&buf[8..12]),
            day_of_month: LittleEndian::read_u32(&buf[12..16]),
            month: LittleEndian::read_u16(&buf[16..18]),
            day_of_week: buf[18],
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[..TIME_ENTRY_SIZE].fill(0);
        LittleEndian::write_u64(&mut buf[0..8], self.minute);
        LittleEndian::write_u32(&mut buf[8..12], self.hour);
        LittleEndian::write_u32(&mut buf[12..16], self.day_of_month);
        LittleEndian::write_u16(&mut buf[16..18], self.month);
        buf[18] = self.day_of_week;
    }

    fn matches_fields(&self, minute: u32, hour: u32, dom: u32, month: u32, dow: u32) -> bool {
        self.minute & (1u64 << minute) != 0
            && self.hour & (1u32 << hour) != 0
            && self.day_of_month & (1u32 << (dom - 1)) != 0
            && self.month & (1u16 << (month - 1)) != 0
            && self.day_of_week & (1u8 << dow) != 0
    }

    /// Does the minute containing `now` (in `tz`) match?
    pub fn matches(&self, now: i64, tz: &Zone) -> bool {
        let (mi, h, d, mo, w) = tz.fields(now);
        self.matches_fields(mi, h, d, mo, w)
    }

    /// First matching minute strictly after `now`, searching up to one year.
    pub fn next_time(&self, now: i64, tz: &Zone) -> Option<i64> {
        let mut t = now - now.rem_euclid(60) + 60;
        let limit = now + 366 * 86400;
        while t <= limit {
            let (mi, h, d, mo, w) = tz.fields(t);
            if self.month & (1u16 << (mo - 1)) == 0 {
                t += 86400 - (h as i64 * 3600 + mi as i64 * 60);
                continue;
            }
            if self.day_of_month & (1u32 << (d - 1)) == 0 || self.day_of_week & (1u8 << w) == 0 {
                t += 86400 - (h as i64 * 3600 + mi as i64 * 60);
                continue;
            }
            if self.hour & (1u32 << h) == 0 {
                t += 3600 - mi as i64 * 60;
                continue;
            }
            if self.minute & (1u64 << mi) != 0 {
                return Some(t);
            }
            t += 60;
        }
        None
    }
}

/// Earliest `next_time` across several entries.
pub fn next_time(entries: &[TimeEntry], now: i64, tz: &Zone) -> Option<i64> {
    entries.iter().filter_map(|e| e.next_time(now, tz)).min()
}

pub fn any_matches(entries: &[TimeEntry], now: i64, tz: &Zone) -> bool {
    entries.iter().any(|e| e.matches(now, tz))
}

/// Timezone of a directory's schedule: empty = local, `UTC`, or `+HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Zone {
    Local,
    Fixed(FixedOffset),
}

impl Zone {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("local") {
            return Ok(Zone::Local);
        }
        if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("gmt") || s == "Z" {
            return Ok(Zone::Fixed(FixedOffset::east_opt(0).ok_or_else(|| anyhow!("offset"))?));
        }
        let (sign, rest) = match s.as_bytes()[0] {
            b'+' => (1, &s[1..]),
            b'-' => (-1, &s[1..]),
            _ => bail!("unsupported timezone '{}'", s),
        };
        let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
        let h: i32 = h.parse().map_err(|_| anyhow!("bad timezone '{}'", s))?;
        let m: i32 = m.parse().map_err(|_| anyhow!("bad timezone '{}'", s))?;
        let off = FixedOffset::east_opt(sign * (h * 3600 + m * 60))
            .ok_or_else(|| anyhow!("timezone '{}' out of range", s))?;
        Ok(Zone::Fixed(off))
    }

    /// `(minute, hour, day_of_month, month, day_of_week)` of `t`.
    fn fields(&self, t: i64) -> (u32, u32, u32, u32, u32) {
        fn f<T: TimeZone>(d: DateTime<T>) -> (u32, u32, u32, u32, u32) {
            (
                d.minute(),
                d.hour(),
                d.day(),
                d.month(),
                d.weekday().num_days_from_sunday(),
            )
        }
        let utc = Utc.timestamp_opt(t, 0).single().unwrap_or_default();
        match self {
            Zone::Local => f(utc.with_timezone(&Local)),
            Zone::Fixed(off) => f(utc.with_timezone(off)),
        }
    }

    pub fn hour_of(&self, t: i64) -> u32 {
        self.fields(t).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> Zone {
        Zone::parse("UTC").unwrap()
    }

    #[test]
    fn parse_render_and_bits() {
        let te = TimeEntry::parse("*/15 8-17 * * 1-5").unwrap();
        assert_eq!(te.minute, (1 << 0) | (1 << 15) | (1 << 30) | (1 << 45));
        assert_eq!(te.hour, 0x3ff00);
        assert_eq!(te.day_of_week, 0b0111110);
        assert_eq!(te.render(), "0,15,30,45 8-17 * * 1-5");
        assert!(TimeEntry::parse("* * * *").is_err());
        assert!(TimeEntry::parse("61 * * * *").is_err());
        assert!(TimeEntry::parse("* * * * *").unwrap().is_every_minute());
        assert_eq!(TimeEntry::parse("0 0 * * 7").unwrap().day_of_week, 1);
    }

    #[test]
    fn on_disk_form() {
        let te = TimeEntry::parse("5 4 3 2 1").unwrap();
        let mut b = [0xffu8; TIME_ENTRY_SIZE];
        te.write(&mut b);
        assert_eq!(&b[0..8], &(1u64 << 5).to_le_bytes());
        assert_eq!(b[19..], [0u8; 5]);
        assert_eq!(TimeEntry::read(&b), te);
    }

    #[test]
    fn matching_and_next() {
        // 2023-11-14 22:13:20 UTC, a Tuesday.
        let t = 1_700_000_000;
        let te = TimeEntry::parse("30 22 * * 2").unwrap();
        assert!(!te.matches(t, &utc()));
        let next = te.next_time(t, &utc()).unwrap();
        assert_eq!(next, t - 13 * 60 - 20 + 30 * 60);
        assert!(te.matches(next, &utc()));

        let plus2 = Zone::parse("+02:00").unwrap();
        assert_eq!(plus2.hour_of(t), 0);
        assert!(Zone::parse("Europe/Berlin").is_err());
    }
}
