//! Typed record views over mapped bytes.
//!
//! A record is a fixed-size byte slice; fields live at explicit offsets and
//! are read and written little-endian. No native pointers ever go into a
//! mapped file: relations between records are positions or 32-bit ids.

use byteorder::{ByteOrder, LittleEndian};

/// Scalar that can be loaded from / stored into a record at an offset.
pub trait Field: Sized + Copy {
    const SIZE: usize;
    fn load(buf: &[u8], off: usize) -> Self;
    fn store(buf: &mut [u8], off: usize, v: Self);
}

impl Field for u8 {
    const SIZE: usize = 1;
    #[inline]
    fn load(buf: &[u8], off: usize) -> Self {
        buf[off]
    }
    #[inline]
    fn store(buf: &mut [u8], off: usize, v: Self) {
        buf[off] = v;
    }
}

macro_rules! le_field {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl Field for $ty {
            const SIZE: usize = $size;
            #[inline]
            fn load(buf: &[u8], off: usize) -> Self {
                LittleEndian::$read(&buf[off..off + $size])
            }
            #[inline]
            fn store(buf: &mut [u8], off: usize, v: Self) {
                LittleEndian::$write(&mut buf[off..off + $size], v)
            }
        }
    };
}

le_field!(u16, 2, read_u16, write_u16);
le_field!(i32, 4, read_i32, write_i32);
le_field!(u32, 4, read_u32, write_u32);
le_field!(i64, 8, read_i64, write_i64);
le_field!(u64, 8, read_u64, write_u64);

/// Generates getters on `$rec<B: AsRef<[u8]>>` and setters on
/// `$rec<B: AsRef<[u8]> + AsMut<[u8]>>` for fixed-offset scalar fields.
macro_rules! record_fields {
    ($rec:ident { $( $get:ident, $set:ident : $ty:ty = $off:expr; )* }) => {
        impl<B: AsRef<[u8]>> $rec<B> {
            $(
                #[inline]
                pub fn $get(&self) -> $ty {
                    <$ty as $crate::table::view::Field>::load(self.buf.as_ref(), $off)
                }
            )*
        }
        impl<B: AsRef<[u8]> + AsMut<[u8]>> $rec<B> {
            $(
                #[inline]
                pub fn $set(&mut self, v: $ty) {
                    <$ty as $crate::table::view::Field>::store(self.buf.as_mut(), $off, v)
                }
            )*
        }
    };
}
pub(crate) use record_fields;

/// Same for NUL-padded fixed-length strings.
macro_rules! record_strings {
    ($rec:ident { $( $get:ident, $set:ident = $off:expr, $len:expr; )* }) => {
        impl<B: AsRef<[u8]>> $rec<B> {
            $(
                pub fn $get(&self) -> String {
                    $crate::table::view::get_str(self.buf.as_ref(), $off, $len)
                }
            )*
        }
        impl<B: AsRef<[u8]> + AsMut<[u8]>> $rec<B> {
            $(
                pub fn $set(&mut self, v: &str) {
                    $crate::table::view::put_str(self.buf.as_mut(), $off, $len, v)
                }
            )*
        }
    };
}
pub(crate) use record_strings;

/// Read a NUL-terminated string from a `len`-byte field.
pub fn get_str(buf: &[u8], off: usize, len: usize) -> String {
    let field = &buf[off..off + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Store `s` into a `len`-byte field, truncated to `len - 1` bytes (on a
/// char boundary) and NUL padded.
pub fn put_str(buf: &mut [u8], off: usize, len: usize, s: &str) {
    let field = &mut buf[off..off + len];
    field.fill(0);
    let bytes = truncate_str(s, len.saturating_sub(1)).as_bytes();
    field[..bytes.len()].copy_from_slice(bytes);
}

pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub const fn align8(n: usize) -> usize {
    (n + 7) & !7
}
