// src/table/header.rs
//
// Header prefix carried by every mapped data file (AFD_WORD_OFFSET = 16 B, LE):
//   i32 no_of_entries      (-1 = stale)
//   u8  feature_flag
//   u8  reserved
//   u8  ignore_first_errors
//   u8  struct_version
//   i32 pagesize
//   4B  reserved

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    AFD_WORD_OFFSET, HDR_OFF_ENTRIES, HDR_OFF_FEATURE_FLAG, HDR_OFF_IGNORE_FIRST_ERRORS,
    HDR_OFF_PAGESIZE, HDR_OFF_VERSION, STALE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub no_of_entries: i32,
    pub feature_flag: u8,
    pub ignore_first_errors: u8,
    pub struct_version: u8,
    pub pagesize: i32,
}

impl TableHeader {
    pub fn new(no_of_entries: i32, struct_version: u8) -> Self {
        Self {
            no_of_entries,
            feature_flag: 0,
            ignore_first_errors: 0,
            struct_version,
            pagesize: system_page_size(),
        }
    }

    pub fn read(buf: &[u8]) -> Self {
        Self {
            no_of_entries: LittleEndian::read_i32(&buf[HDR_OFF_ENTRIES..HDR_OFF_ENTRIES + 4]),
            feature_flag: buf[HDR_OFF_FEATURE_FLAG],
            ignore_first_errors: buf[HDR_OFF_IGNORE_FIRST_ERRORS],
            struct_version: buf[HDR_OFF_VERSION],
            pagesize: LittleEndian::read_i32(&buf[HDR_OFF_PAGESIZE..HDR_OFF_PAGESIZE + 4]),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[..AFD_WORD_OFFSET].fill(0);
        LittleEndian::write_i32(&mut buf[HDR_OFF_ENTRIES..HDR_OFF_ENTRIES + 4], self.no_of_entries);
        buf[HDR_OFF_FEATURE_FLAG] = self.feature_flag;
        buf[HDR_OFF_IGNORE_FIRST_ERRORS] = self.ignore_first_errors;
        buf[HDR_OFF_VERSION] = self.struct_version;
        LittleEndian::write_i32(&mut buf[HDR_OFF_PAGESIZE..HDR_OFF_PAGESIZE + 4], self.pagesize);
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.no_of_entries == STALE
    }

    pub fn to_bytes(&self) -> [u8; AFD_WORD_OFFSET] {
        let mut b = [0u8; AFD_WORD_OFFSET];
        self.write(&mut b);
        b
    }
}

/// Raw `no_of_entries` of a mapped header.
#[inline]
pub fn read_entries(buf: &[u8]) -> i32 {
    LittleEndian::read_i32(&buf[HDR_OFF_ENTRIES..HDR_OFF_ENTRIES + 4])
}

#[inline]
pub fn write_entries(buf: &mut [u8], n: i32) {
    LittleEndian::write_i32(&mut buf[HDR_OFF_ENTRIES..HDR_OFF_ENTRIES + 4], n);
}

pub fn system_page_size() -> i32 {
    // SAFETY: sysconf has no preconditions.
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ps <= 0 {
        4096
    } else {
        ps as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_fixed() {
        let h = TableHeader {
            no_of_entries: 7,
            feature_flag: 0x81,
            ignore_first_errors: 2,
            struct_version: 3,
            pagesize: 4096,
        };
        let b = h.to_bytes();
        assert_eq!(&b[0..4], &7i32.to_le_bytes());
        assert_eq!(b[4], 0x81);
        assert_eq!(b[5], 0);
        assert_eq!(b[6], 2);
        assert_eq!(b[7], 3);
        assert_eq!(&b[8..12], &4096i32.to_le_bytes());
        assert_eq!(&b[12..16], &[0, 0, 0, 0]);
        assert_eq!(TableHeader::read(&b), h);
    }

    #[test]
    fn stale_marker() {
        let mut b = TableHeader::new(3, 1).to_bytes();
        assert!(!TableHeader::read(&b).is_stale());
        write_entries(&mut b, STALE);
        assert!(TableHeader::read(&b).is_stale());
        assert_eq!(read_entries(&b), -1);
    }
}
