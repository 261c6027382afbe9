// Delta header: declared base size followed by declared result size.

use std::io::{self, Read, Write};

use super::error::{DeltaError, SizeField};
use super::varint;

/// The two sizes at the front of every delta stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaHeader {
    /// Length the base buffer must have.
    pub base_size: u64,
    /// Length of the reconstructed output.
    pub result_size: u64,
}

impl DeltaHeader {
    /// Read the header without checking it against any base buffer.
    pub fn read<R: Read>(r: &mut R) -> Result<Self, DeltaError> {
        let base_size = varint::stream_read_size(r)?;
        let result_size = varint::stream_read_size(r)?;
        Ok(Self {
            base_size,
            result_size,
        })
    }

    /// Read the header and require `base_size == base_len`.
    pub fn read_for_base<R: Read>(r: &mut R, base_len: u64) -> Result<Self, DeltaError> {
        let header = Self::read(r)?;
        header.check_base(base_len)?;
        log::debug!(
            "delta header: base {} bytes, result {} bytes",
            header.base_size,
            header.result_size
        );
        Ok(header)
    }

    /// Fail with `SizeMismatch` unless the declared base size is `base_len`.
    pub fn check_base(&self, base_len: u64) -> Result<(), DeltaError> {
        if self.base_size != base_len {
            return Err(DeltaError::SizeMismatch {
                field: SizeField::Base,
                declared: self.base_size,
                actual: base_len,
            });
        }
        Ok(())
    }

    /// Decode from a byte slice. Returns the header and the bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), DeltaError> {
        let (base_size, n1) = varint::read_size(data)?;
        let (result_size, n2) = varint::read_size(&data[n1..])?;
        Ok((
            Self {
                base_size,
                result_size,
            },
            n1 + n2,
        ))
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        varint::write_size(w, self.base_size)?;
        varint::write_size(w, self.result_size)
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        varint::sizeof_size(self.base_size) + varint::sizeof_size(self.result_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_two_sizes() {
        let mut c = Cursor::new(vec![0x80, 0x40, 0x85, 0x40, 0xA0]);
        let h = DeltaHeader::read(&mut c).unwrap();
        assert_eq!(h.base_size, 8192);
        assert_eq!(h.result_size, 8197);
        // Opcode byte left untouched.
        assert_eq!(c.position(), 4);
    }

    #[test]
    fn base_length_must_match() {
        let mut c = Cursor::new(vec![0x80, 0x40, 0x85, 0x40]);
        let err = DeltaHeader::read_for_base(&mut c, 8191).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::SizeMismatch {
                field: SizeField::Base,
                declared: 8192,
                actual: 8191
            }
        ));
    }

    #[test]
    fn result_size_is_not_validated() {
        let mut c = Cursor::new(vec![0x03, 0x00]);
        let h = DeltaHeader::read_for_base(&mut c, 3).unwrap();
        assert_eq!(h.result_size, 0);
    }

    #[test]
    fn truncated_header() {
        let mut c = Cursor::new(vec![0x05]);
        assert!(matches!(
            DeltaHeader::read(&mut c),
            Err(DeltaError::TruncatedStream(_))
        ));
    }

    #[test]
    fn write_then_parse() {
        let h = DeltaHeader {
            base_size: 300,
            result_size: 1 << 40,
        };
        let mut out = Vec::new();
        h.write(&mut out).unwrap();
        assert_eq!(out.len(), h.encoded_len());
        let (parsed, used) = DeltaHeader::parse(&out).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(used, out.len());
    }
}
