// Git delta size varint (the two header sizes at the front of a delta).
//
// Base-128, little-endian: least-significant group first.
// Each byte has bit 7 set except the final byte.
// Same layout as `get_delta_hdr_size` in git's delta.h.

use std::io::{self, Read, Write};

use thiserror::Error;

use super::error::DeltaError;

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a `u64` as a size varint into `buf`.
/// Returns the number of bytes written (1..=10), starting at `buf[0]`.
#[inline]
pub fn encode_size(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    loop {
        let group = (num & 0x7F) as u8;
        num >>= 7;
        if num == 0 {
            buf[i] = group;
            return i + 1;
        }
        buf[i] = group | 0x80;
        i += 1;
    }
}

/// Encode a `u64` and write to a `Write` sink.
pub fn write_size<W: Write>(w: &mut W, num: u64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_size(num, &mut buf);
    w.write_all(&buf[..len])
}

/// Return the encoded byte-length of a `u64` value.
#[inline]
pub fn sizeof_size(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    (bits.max(1).div_ceil(7) as usize).min(MAX_VARINT_LEN)
}

// ---------------------------------------------------------------------------
// Decoding from byte slices
// ---------------------------------------------------------------------------

/// Decode a size from a byte slice.
/// Returns `(value, bytes_consumed)` or an error.
pub fn read_size(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut acc = Accumulator::default();
    for (i, &byte) in data.iter().enumerate() {
        if acc.push(byte)? {
            return Ok((acc.value, i + 1));
        }
    }
    Err(VarIntError::Underflow)
}

// ---------------------------------------------------------------------------
// Decoding from `Read` (streaming)
// ---------------------------------------------------------------------------

/// Read a size varint from a streaming source, one byte at a time.
///
/// The source may hand out bytes in arbitrary chunks; end of input in the
/// middle of a varint is `TruncatedStream`.
pub fn stream_read_size<R: Read>(r: &mut R) -> Result<u64, DeltaError> {
    let mut acc = Accumulator::default();
    loop {
        let byte = read_byte(r)?.ok_or(DeltaError::TruncatedStream("varint"))?;
        if acc.push(byte)? {
            return Ok(acc.value);
        }
    }
}

/// Read a single byte, retrying on `Interrupted`.
/// Returns `Ok(None)` at end of input.
pub(crate) fn read_byte<R: Read>(r: &mut R) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match r.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[derive(Default)]
struct Accumulator {
    value: u64,
    shift: u32,
}

impl Accumulator {
    /// Feed one byte. Returns `true` once the terminating byte is seen.
    #[inline]
    fn push(&mut self, byte: u8) -> Result<bool, VarIntError> {
        let group = u64::from(byte & 0x7F);
        if self.shift >= 64 || (group << self.shift) >> self.shift != group {
            return Err(VarIntError::Overflow);
        }
        self.value |= group << self.shift;
        self.shift += 7;
        Ok(byte & 0x80 == 0)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarIntError {
    /// Not enough input bytes to complete the integer.
    #[error("varint underflow (truncated input)")]
    Underflow,
    /// Value would overflow a `u64`.
    #[error("varint overflow")]
    Overflow,
}

impl From<VarIntError> for io::Error {
    fn from(e: VarIntError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
