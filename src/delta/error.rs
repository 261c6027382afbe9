// Error kinds for delta application.
//
// Every variant is fatal to the decode in progress: the delta does not
// describe a transformation of the supplied base buffer.

use std::io;

use thiserror::Error;

use super::varint::VarIntError;

/// Which declared size a [`DeltaError::SizeMismatch`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeField {
    /// Declared base size vs. the supplied base buffer length.
    Base,
    /// Declared result size vs. the bytes the instructions produce.
    Result,
}

impl std::fmt::Display for SizeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeField::Base => f.write_str("base"),
            SizeField::Result => f.write_str("result"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeltaError {
    /// A declared size disagrees with reality.
    #[error("{field} size mismatch: declared {declared}, actual {actual}")]
    SizeMismatch {
        field: SizeField,
        declared: u64,
        actual: u64,
    },

    /// COPY reaches past the end of the base buffer.
    #[error("copy out of range: offset {offset} + size {size} exceeds base length {base_len}")]
    OffsetOutOfRange { offset: u64, size: u64, base_len: u64 },

    /// The instruction source ended early.
    #[error("truncated delta stream: {0}")]
    TruncatedStream(&'static str),

    /// Reserved opcode 0.
    #[error("corrupt delta: reserved opcode 0x00")]
    CorruptHeader,

    /// A size varint does not fit in 64 bits.
    #[error("varint overflow")]
    VarintOverflow,

    /// The instruction source itself failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A previous call already failed; the applier refuses to continue.
    #[error("delta application already failed: {0}")]
    Poisoned(String),
}

impl DeltaError {
    /// True for errors that indicate the delta does not match the base.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, DeltaError::Io(_))
    }
}

impl From<VarIntError> for DeltaError {
    fn from(e: VarIntError) -> Self {
        match e {
            VarIntError::Underflow => DeltaError::TruncatedStream("varint"),
            VarIntError::Overflow => DeltaError::VarintOverflow,
        }
    }
}

/// Source failures pass through unchanged; every corruption kind, a
/// truncated stream and a repeated (`Poisoned`) failure included, becomes
/// `InvalidData`.
impl From<DeltaError> for io::Error {
    fn from(e: DeltaError) -> io::Error {
        match e {
            DeltaError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_errors_map_to_delta_kinds() {
        assert!(matches!(
            DeltaError::from(VarIntError::Underflow),
            DeltaError::TruncatedStream("varint")
        ));
        assert!(matches!(
            DeltaError::from(VarIntError::Overflow),
            DeltaError::VarintOverflow
        ));
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let e: io::Error = DeltaError::CorruptHeader.into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);

        let e: io::Error = DeltaError::TruncatedStream("opcode").into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);

        let e: io::Error = DeltaError::Poisoned("earlier failure".into()).into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);

        let e: io::Error = DeltaError::Io(io::Error::other("boom")).into();
        assert_eq!(e.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn display_names_the_field() {
        let e = DeltaError::SizeMismatch {
            field: SizeField::Base,
            declared: 10,
            actual: 9,
        };
        assert_eq!(e.to_string(), "base size mismatch: declared 10, actual 9");
        assert!(e.is_corruption());
    }
}
