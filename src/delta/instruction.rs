// Delta instructions: opcode decoding, owned instructions, and serialization.
//
// Opcode byte layout:
//   1xxxxxxx  COPY.  Low 7 bits say which offset/size bytes follow.
//   0nnnnnnn  INSERT n literal bytes (n = 1..=127).
//   00000000  reserved, always invalid.

use std::fmt;
use std::io::{self, Read, Write};

use bitflags::bitflags;

use super::error::{DeltaError, SizeField};
use super::header::DeltaHeader;
use super::varint::read_byte;

/// COPY size used when no size bytes are present.
pub const DEFAULT_COPY_SIZE: u64 = 0x10000;

/// Longest literal one INSERT opcode can carry.
pub const MAX_INSERT_LEN: usize = 0x7F;

/// Largest size a single COPY opcode can encode (three size bytes).
pub const MAX_COPY_SIZE: u64 = 0xFF_FFFF;

const COPY_OPCODE: u8 = 0x80;

bitflags! {
    /// Presence bits in a COPY opcode. Bytes follow least-significant first,
    /// all offset bytes before any size byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CopyFlags: u8 {
        const OFFSET0 = 0x01;
        const OFFSET1 = 0x02;
        const OFFSET2 = 0x04;
        const OFFSET3 = 0x08;
        const SIZE0 = 0x10;
        const SIZE1 = 0x20;
        const SIZE2 = 0x40;
    }
}

const OFFSET_BYTES: [CopyFlags; 4] = [
    CopyFlags::OFFSET0,
    CopyFlags::OFFSET1,
    CopyFlags::OFFSET2,
    CopyFlags::OFFSET3,
];

const SIZE_BYTES: [CopyFlags; 3] = [CopyFlags::SIZE0, CopyFlags::SIZE1, CopyFlags::SIZE2];

// ---------------------------------------------------------------------------
// Opcode decoding
// ---------------------------------------------------------------------------

/// A decoded opcode. For INSERT the literal bytes are still in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Copy { offset: u64, size: u64 },
    Insert { len: u8 },
}

impl Opcode {
    /// Number of output bytes this opcode produces.
    pub fn output_len(&self) -> u64 {
        match *self {
            Opcode::Copy { size, .. } => size,
            Opcode::Insert { len } => u64::from(len),
        }
    }
}

/// Read the next opcode from `r`.
///
/// Returns `Ok(None)` when the source is exhausted before an opcode byte;
/// whether that is a clean end is the caller's decision.
pub fn read_opcode<R: Read>(r: &mut R, base_len: u64) -> Result<Option<Opcode>, DeltaError> {
    match read_byte(r)? {
        None => Ok(None),
        Some(cmd) => decode_opcode(cmd, r, base_len).map(Some),
    }
}

/// Decode opcode byte `cmd`, reading any COPY operand bytes from `r`.
pub fn decode_opcode<R: Read>(cmd: u8, r: &mut R, base_len: u64) -> Result<Opcode, DeltaError> {
    if cmd & COPY_OPCODE == 0 {
        if cmd == 0 {
            return Err(DeltaError::CorruptHeader);
        }
        return Ok(Opcode::Insert { len: cmd });
    }

    let flags = CopyFlags::from_bits_truncate(cmd);

    let mut offset: u64 = 0;
    for (i, flag) in OFFSET_BYTES.iter().enumerate() {
        if flags.contains(*flag) {
            let b = read_byte(r)?.ok_or(DeltaError::TruncatedStream("copy offset"))?;
            offset |= u64::from(b) << (8 * i);
        }
    }

    let mut size: u64 = 0;
    for (i, flag) in SIZE_BYTES.iter().enumerate() {
        if flags.contains(*flag) {
            let b = read_byte(r)?.ok_or(DeltaError::TruncatedStream("copy size"))?;
            size |= u64::from(b) << (8 * i);
        }
    }
    if size == 0 {
        size = DEFAULT_COPY_SIZE;
    }

    // offset < 2^32 and size < 2^24, so the sum cannot overflow.
    if offset + size > base_len {
        return Err(DeltaError::OffsetOutOfRange {
            offset,
            size,
            base_len,
        });
    }

    Ok(Opcode::Copy { offset, size })
}

// ---------------------------------------------------------------------------
// Owned instructions
// ---------------------------------------------------------------------------

/// A complete instruction, literal payload included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Copy { offset: u64, size: u64 },
    Insert(Vec<u8>),
}

impl Instruction {
    pub fn output_len(&self) -> u64 {
        match self {
            Instruction::Copy { size, .. } => *size,
            Instruction::Insert(data) => data.len() as u64,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Copy { offset, size } => write!(f, "COPY {offset} {size}"),
            Instruction::Insert(data) => write!(f, "INSERT {}", data.len()),
        }
    }
}

/// Iterator over the instructions of a delta stream.
///
/// COPY ranges are checked against the declared base size; the iterator
/// never touches a base buffer. Stops after the first error.
pub struct Instructions<R: Read> {
    reader: R,
    header: DeltaHeader,
    produced: u64,
    done: bool,
}

impl<R: Read> Instructions<R> {
    /// Parse the header and position at the first instruction.
    pub fn new(mut reader: R) -> Result<Self, DeltaError> {
        let header = DeltaHeader::read(&mut reader)?;
        Ok(Self {
            reader,
            header,
            produced: 0,
            done: false,
        })
    }

    pub fn header(&self) -> &DeltaHeader {
        &self.header
    }

    /// Output bytes described by the instructions yielded so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn next_instruction(&mut self) -> Result<Option<Instruction>, DeltaError> {
        let op = match read_opcode(&mut self.reader, self.header.base_size)? {
            Some(op) => op,
            None if self.produced == self.header.result_size => return Ok(None),
            None => return Err(DeltaError::TruncatedStream("opcode")),
        };

        let produced = self.produced + op.output_len();
        if produced > self.header.result_size {
            return Err(DeltaError::SizeMismatch {
                field: SizeField::Result,
                declared: self.header.result_size,
                actual: produced,
            });
        }
        self.produced = produced;

        Ok(Some(match op {
            Opcode::Copy { offset, size } => Instruction::Copy { offset, size },
            Opcode::Insert { len } => {
                let mut data = vec![0u8; len as usize];
                self.reader.read_exact(&mut data).map_err(|e| match e.kind() {
                    io::ErrorKind::UnexpectedEof => DeltaError::TruncatedStream("insert payload"),
                    _ => DeltaError::Io(e),
                })?;
                Instruction::Insert(data)
            }
        }))
    }
}

impl<R: Read> Iterator for Instructions<R> {
    type Item = Result<Instruction, DeltaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_instruction() {
            Ok(Some(inst)) => Some(Ok(inst)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Writes a header followed by caller-chosen instructions.
///
/// Long COPYs and INSERTs are split into as many opcodes as needed.
pub struct DeltaWriter<W: Write> {
    inner: W,
    header: DeltaHeader,
    written: u64,
}

impl<W: Write> DeltaWriter<W> {
    pub fn new(mut inner: W, header: DeltaHeader) -> io::Result<Self> {
        header.write(&mut inner)?;
        Ok(Self {
            inner,
            header,
            written: 0,
        })
    }

    /// Copy `size` bytes starting at `offset` of the base.
    pub fn copy(&mut self, mut offset: u64, mut size: u64) -> io::Result<()> {
        while size > 0 {
            let chunk = size.min(MAX_COPY_SIZE);
            let off = u32::try_from(offset).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("copy offset {offset} does not fit in 32 bits"),
                )
            })?;
            write_copy_opcode(&mut self.inner, off, chunk as u32)?;
            offset += chunk;
            size -= chunk;
            self.written += chunk;
        }
        Ok(())
    }

    /// Insert literal bytes.
    pub fn insert(&mut self, data: &[u8]) -> io::Result<()> {
        for chunk in data.chunks(MAX_INSERT_LEN) {
            self.inner.write_all(&[chunk.len() as u8])?;
            self.inner.write_all(chunk)?;
            self.written += chunk.len() as u64;
        }
        Ok(())
    }

    pub fn push(&mut self, inst: &Instruction) -> io::Result<()> {
        match inst {
            Instruction::Copy { offset, size } => self.copy(*offset, *size),
            Instruction::Insert(data) => self.insert(data),
        }
    }

    /// Check the declared result size and return the sink.
    pub fn finish(mut self) -> io::Result<W> {
        if self.written != self.header.result_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "instructions produce {} bytes, header declares {}",
                    self.written, self.header.result_size
                ),
            ));
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn write_copy_opcode<W: Write>(w: &mut W, offset: u32, size: u32) -> io::Result<()> {
    let mut buf = [0u8; 8];
    let mut n = 1;
    let mut flags = CopyFlags::empty();

    for (i, flag) in OFFSET_BYTES.iter().enumerate() {
        let b = (offset >> (8 * i)) as u8;
        if b != 0 {
            flags |= *flag;
            buf[n] = b;
            n += 1;
        }
    }

    // The default size needs no size bytes at all.
    let size_field = if u64::from(size) == DEFAULT_COPY_SIZE { 0 } else { size };
    for (i, flag) in SIZE_BYTES.iter().enumerate() {
        let b = (size_field >> (8 * i)) as u8;
        if b != 0 {
            flags |= *flag;
            buf[n] = b;
            n += 1;
        }
    }

    buf[0] = COPY_OPCODE | flags.bits();
    w.write_all(&buf[..n])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
