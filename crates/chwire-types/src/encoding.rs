//! Wire primitives: unsigned LEB128 varints and little-endian scalars.
//!
//! | Primitive      | Encoding                                          |
//! |----------------|---------------------------------------------------|
//! | varint         | 7 payload bits per byte, MSB = continuation, <= 10 bytes |
//! | fixed integers | little-endian, natural width                      |
//! | floats         | IEEE 754 bits, little-endian                      |
//! | string         | varint byte length followed by raw bytes          |
//!
//! Writers append to a `Vec<u8>` via [`WireWrite`]. Readers implement
//! [`WireRead`], which only needs `read_exact`; every other accessor has a
//! default built on it so a multi-envelope decompressing source and a plain
//! byte slice decode identically.

use chwire_error::{ChError, Result};

use crate::limits::{MAX_STRING_LEN, MAX_VARINT_LEN, WIRE_READ_CHUNK};

/// Number of bytes `value` occupies as a varint.
#[must_use]
pub const fn varint_len(value: u64) -> usize {
    let mut len = 1;
    let mut v = value >> 7;
    while v != 0 {
        len += 1;
        v >>= 7;
    }
    len
}

/// Decode a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// slice ends early or the encoding is longer than [`MAX_VARINT_LEN`].
#[must_use]
pub fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        let payload = u64::from(byte & 0x7f);
        if i == MAX_VARINT_LEN - 1 && payload > 1 {
            return None;
        }
        value |= payload << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Append-only byte sink used by every encoder.
pub trait WireWrite {
    fn put_bytes(&mut self, bytes: &[u8]);

    fn put_u8(&mut self, v: u8) {
        self.put_bytes(&[v]);
    }

    fn put_varint(&mut self, mut value: u64) {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let mut i = 0;
        loop {
            #[allow(clippy::cast_possible_truncation)]
            let low = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                buf[i] = low;
                i += 1;
                break;
            }
            buf[i] = low | 0x80;
            i += 1;
        }
        self.put_bytes(&buf[..i]);
    }

    /// Length-prefixed byte string.
    fn put_string(&mut self, bytes: &[u8]) {
        self.put_varint(bytes.len() as u64);
        self.put_bytes(bytes);
    }

    fn put_str(&mut self, s: &str) {
        self.put_string(s.as_bytes());
    }
}

impl WireWrite for Vec<u8> {
    fn put_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

macro_rules! put_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        /// Little-endian scalar writers.
        pub trait WireWriteExt: WireWrite {
            $(
                fn $name(&mut self, v: $ty) {
                    self.put_bytes(&v.to_le_bytes());
                }
            )*
        }
        impl<W: WireWrite + ?Sized> WireWriteExt for W {}
    };
}

put_le!(
    put_u16_le: u16,
    put_u32_le: u32,
    put_u64_le: u64,
    put_u128_le: u128,
    put_i8: i8,
    put_i16_le: i16,
    put_i32_le: i32,
    put_i64_le: i64,
    put_i128_le: i128,
    put_f32_le: f32,
    put_f64_le: f64,
);

/// Byte source every decoder reads from.
pub trait WireRead {
    /// Fill `buf` completely or fail.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]>
    where
        Self: Sized,
    {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read `len` bytes whose count came off the wire.
    ///
    /// The buffer grows chunk by chunk, so a bogus length fails on the
    /// missing bytes instead of allocating up front.
    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(WIRE_READ_CHUNK));
        self.read_append(&mut buf, len)?;
        Ok(buf)
    }

    /// Append `len` bytes to `out`, one bounded chunk at a time.
    fn read_append(&mut self, out: &mut Vec<u8>, len: usize) -> Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            let start = out.len();
            let take = remaining.min(WIRE_READ_CHUNK);
            out.resize(start + take, 0);
            if let Err(err) = self.read_exact(&mut out[start..]) {
                out.truncate(start);
                return Err(err);
            }
            remaining -= take;
        }
        Ok(())
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let payload = u64::from(byte & 0x7f);
            if i == MAX_VARINT_LEN - 1 && payload > 1 {
                return Err(ChError::corrupt("varint overflows 64 bits"));
            }
            value |= payload << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ChError::corrupt("varint longer than 10 bytes"))
    }

    /// Varint used as a length or count, bounded by `limit`.
    fn read_len(&mut self, limit: usize) -> Result<usize> {
        let raw = self.read_varint()?;
        match usize::try_from(raw) {
            Ok(len) if len <= limit => Ok(len),
            _ => Err(ChError::corrupt(format!(
                "length {raw} exceeds limit {limit}"
            ))),
        }
    }

    /// Length-prefixed byte string.
    fn read_string_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len(MAX_STRING_LEN)?;
        self.read_vec(len)
    }

    /// Length-prefixed UTF-8 string (protocol identifiers, not column data).
    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_string_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| ChError::corrupt(format!("protocol string is not UTF-8: {e}")))
    }
}

macro_rules! read_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        /// Little-endian scalar readers.
        pub trait WireReadExt: WireRead {
            $(
                fn $name(&mut self) -> Result<$ty> {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    self.read_exact(&mut buf)?;
                    Ok(<$ty>::from_le_bytes(buf))
                }
            )*
        }
        impl<R: WireRead + ?Sized> WireReadExt for R {}
    };
}

read_le!(
    read_u16_le: u16,
    read_u32_le: u32,
    read_u64_le: u64,
    read_u128_le: u128,
    read_i8: i8,
    read_i16_le: i16,
    read_i32_le: i32,
    read_i64_le: i64,
    read_i128_le: i128,
    read_f32_le: f32,
    read_f64_le: f64,
);

/// Cursor over an in-memory byte slice.
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

impl WireRead for SliceReader<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return Err(ChError::corrupt(format!(
                "unexpected end of data: need {} bytes at offset {}, have {}",
                buf.len(),
                self.pos,
                self.data.len() - self.pos
            )));
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}
