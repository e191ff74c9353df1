//! WMO socket protocol: length-prefixed frames carrying one bulletin each.
//!
//! ```text
//! frame    = u32 BE length | payload
//! payload  = [SOH CR CR LF nnn CR CR LF] TTAAii SP CCCC SP YYGGgg [SP BBB] CR CR LF text [CR CR LF ETX]
//! ```
//! The optional acknowledgement is four ASCII digits per frame.

pub mod receiver;

pub use receiver::{Receiver, Stored};

use anyhow::{anyhow, bail, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};

pub const SOH: u8 = 0x01;
pub const ETX: u8 = 0x03;
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

pub const ACK_OK: &[u8; 4] = b"0000";
pub const ACK_REJECTED: &[u8; 4] = b"0001";

/// Read one frame; `None` on a clean end of stream before the length.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match r.read_u32::<BigEndian>() {
        Ok(n) => n as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME {
        bail!("frame of {} bytes exceeds {}", len, MAX_FRAME);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(Some(buf))
}

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME {
        bail!("payload too large: {}", payload.len());
    }
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    w.write_all(payload)?;
    Ok(())
}

/// The abbreviated heading of a bulletin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// Channel sequence number, when the starting line is present.
    pub seq: Option<u16>,
    pub ttaaii: String,
    pub cccc: String,
    pub yygggg: String,
    pub bbb: Option<String>,
}

impl Heading {
    /// File name for the stored bulletin.
    pub fn file_name(&self) -> String {
        let mut s = format!("{}_{}_{}", self.ttaaii, self.cccc, self.yygggg);
        if let Some(b) = &self.bbb {
            s.push('_');
            s.push_str(b);
        }
        s
    }

    /// Key for the duplicate check.
    pub fn key(&self) -> String {
        format!("{} {} {} {}", self.ttaaii, self.cccc, self.yygggg, self.bbb.as_deref().unwrap_or(""))
    }
}

fn split_line(b: &[u8]) -> (&[u8], &[u8]) {
    match b.iter().position(|&c| c == b'\n') {
        Some(i) => (&b[..i], &b[i + 1..]),
        None => (b, &[]),
    }
}

fn trim_cr(b: &[u8]) -> &[u8] {
    let mut end = b.len();
    while end > 0 && (b[end - 1] == b'\r' || b[end - 1] == b' ') {
        end -= 1;
    }
    &b[..end]
}

pub fn parse_heading(payload: &[u8]) -> Result<Heading> {
    let mut rest = payload;
    let mut seq = None;
    if rest.first() == Some(&SOH) {
        let (_, after) = split_line(rest);
        let (num, after) = split_line(after);
        let num = std::str::from_utf8(trim_cr(num))?.trim();
        if num.len() != 3 && num.len() != 5 {
            bail!("bad starting line '{}'", num);
        }
        let n = num.parse::<u32>().map_err(|_| anyhow!("bad sequence number '{}'", num))?;
        seq = Some((n % 1000) as u16);
        rest = after;
    }
    let (line, _) = split_line(rest);
    let line = std::str::from_utf8(trim_cr(line))?;
    let mut f = line.split_whitespace();
    let ttaaii = f.next().ok_or_else(|| anyhow!("empty heading"))?;
    let cccc = f.next().ok_or_else(|| anyhow!("heading '{}' lacks CCCC", line))?;
    let yygggg = f.next().ok_or_else(|| anyhow!("heading '{}' lacks YYGGgg", line))?;
    if !(4..=6).contains(&ttaaii.len()) || cccc.len() != 4 || yygggg.len() != 6 {
        bail!("malformed heading '{}'", line);
    }
    Ok(Heading {
        seq,
        ttaaii: ttaaii.to_ascii_uppercase(),
        cccc: cccc.to_ascii_uppercase(),
        yygggg: yygggg.to_string(),
        bbb: f.next().map(|s| s.to_ascii_uppercase()),
    })
}

/// Channel sequence numbers run 000..=999 and wrap.
#[derive(Debug, Clone, Default)]
pub struct SequenceCheck {
    expected: Option<u16>,
}

impl SequenceCheck {
    /// Record `seq`; returns the missing range when numbers were skipped.
    pub fn observe(&mut self, seq: u16) -> Option<(u16, u16)> {
        let seq = seq % 1000;
        let gap = match self.expected {
            Some(e) if e != seq => Some((e, (seq + 999) % 1000)),
            _ => None,
        };
        self.expected = Some((seq + 1) % 1000);
        gap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_with_starting_line() {
        let p = b"\x01\r\r\n042\r\r\nSMDL01 EDZW 141200 RRA\r\r\nAAXX 14121\r\r\n\x03";
        let h = parse_heading(p).unwrap();
        assert_eq!(h.seq, Some(42));
        assert_eq!(h.file_name(), "SMDL01_EDZW_141200_RRA");
        let h = parse_heading(b"FTDL31 EDZW 141100\r\r\nTAF").unwrap();
        assert_eq!((h.seq, h.bbb), (None, None));
        assert!(parse_heading(b"garbage").is_err());
    }

    #[test]
    fn frames_and_short_reads() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 3]);
        let mut r = &buf[..];
        assert_eq!(read_frame(&mut r).unwrap().unwrap(), b"abc");
        assert!(read_frame(&mut r).unwrap().is_none());
        let mut cut = &buf[..5];
        assert!(read_frame(&mut cut).is_err());
    }

    #[test]
    fn sequence_gaps_wrap() {
        let mut s = SequenceCheck::default();
        assert_eq!(s.observe(5), None);
        assert_eq!(s.observe(6), None);
        assert_eq!(s.observe(9), Some((7, 8)));
        let mut s = SequenceCheck::default();
        s.observe(997);
        assert_eq!(s.observe(1), Some((998, 0)));
    }
}
