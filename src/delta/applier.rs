// Streaming delta applier.
//
// Pull-based: the caller hands in an output buffer, the applier fills as
// much of it as it can and remembers any half-applied instruction for the
// next call. Nothing happens between calls.
//
// State progression:
//   new()  -> header parsed and checked against the base
//   fill() -> Applying (with at most one pending COPY/INSERT remainder)
//          -> Done       once the source ends right at the declared size
//          -> Failed     on the first error; every later call fails too

use std::io::{self, Read};

use super::error::{DeltaError, SizeField};
use super::header::DeltaHeader;
use super::instruction::{self, Opcode};

/// Outcome of one [`DeltaApplier::fill`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// This many bytes at the front of the buffer are valid output.
    Written(usize),
    /// The result is complete and the instruction stream ended cleanly.
    End,
}

/// Unfinished remainder of the instruction being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Copy { offset: usize, remaining: usize },
    Insert { remaining: usize },
}

#[derive(Debug)]
enum State {
    Applying,
    Done,
    Failed(String),
}

/// Reconstructs a result from a base buffer and a delta instruction source.
///
/// The base is borrowed read-only, so several appliers can share one base.
/// The source must yield the plain (already decompressed) delta bytes.
/// Dropping the applier releases the source and abandons any pending work.
///
/// # Consumption
///
/// [`is_fully_consumed`](Self::is_fully_consumed) only turns true once the
/// caller has pulled until [`Fill::End`]: that is the point where the source
/// was seen to end exactly after the declared result. An applier released
/// before that reports `false` even if the remaining source bytes would have
/// been empty. Use [`finish`](Self::finish) to perform that last check
/// explicitly.
pub struct DeltaApplier<'a, R: Read> {
    base: &'a [u8],
    source: R,
    header: DeltaHeader,
    produced: u64,
    pending: Option<Pending>,
    state: State,
}

impl<'a, R: Read> DeltaApplier<'a, R> {
    /// Parse the delta header from `source` and check it against `base`.
    ///
    /// Fails with `SizeMismatch` before any instruction is read if the
    /// declared base size differs from `base.len()`.
    pub fn new(base: &'a [u8], mut source: R) -> Result<Self, DeltaError> {
        let header = DeltaHeader::read_for_base(&mut source, base.len() as u64)?;
        Ok(Self {
            base,
            source,
            header,
            produced: 0,
            pending: None,
            state: State::Applying,
        })
    }

    /// Declared size of the reconstructed result.
    pub fn expected_result_size(&self) -> u64 {
        self.header.result_size
    }

    pub fn header(&self) -> &DeltaHeader {
        &self.header
    }

    /// Output bytes handed out so far.
    pub fn bytes_produced(&self) -> u64 {
        self.produced
    }

    /// True once the result matched its declared size and the source ended
    /// immediately after it.
    pub fn is_fully_consumed(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// True if a previous call failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed(_))
    }

    /// Fill `buf` with the next chunk of output.
    ///
    /// Returns `Fill::End` once the result is complete, on this and every
    /// later call. An empty `buf` makes no progress. After an error all
    /// further calls fail with `Poisoned`.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<Fill, DeltaError> {
        match &self.state {
            State::Done => return Ok(Fill::End),
            State::Failed(msg) => return Err(DeltaError::Poisoned(msg.clone())),
            State::Applying => {}
        }
        if buf.is_empty() {
            return Ok(Fill::Written(0));
        }

        match self.fill_inner(buf) {
            Ok(fill) => Ok(fill),
            Err(e) => {
                log::debug!("delta application failed after {} bytes: {e}", self.produced);
                self.pending = None;
                self.state = State::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn fill_inner(&mut self, buf: &mut [u8]) -> Result<Fill, DeltaError> {
        let mut pos = 0;
        while pos < buf.len() {
            if self.pending.is_none() {
                match self.next_pending()? {
                    Some(p) => self.pending = Some(p),
                    None => {
                        self.state = State::Done;
                        break;
                    }
                }
            }
            pos += self.resume(&mut buf[pos..])?;
        }

        if pos == 0 && matches!(self.state, State::Done) {
            return Ok(Fill::End);
        }
        Ok(Fill::Written(pos))
    }

    /// Decode the next instruction. `None` is the clean end of the stream.
    fn next_pending(&mut self) -> Result<Option<Pending>, DeltaError> {
        let op = match instruction::read_opcode(&mut self.source, self.header.base_size)? {
            Some(op) => op,
            None if self.produced == self.header.result_size => {
                log::debug!("delta applied: {} bytes", self.produced);
                return Ok(None);
            }
            None => return Err(DeltaError::TruncatedStream("instructions end before result")),
        };

        let end = self.produced + op.output_len();
        if end > self.header.result_size {
            return Err(DeltaError::SizeMismatch {
                field: SizeField::Result,
                declared: self.header.result_size,
                actual: end,
            });
        }
        log::trace!("delta op at {}: {op:?}", self.produced);

        // Copy ranges were checked against the base length, so they fit in usize.
        Ok(Some(match op {
            Opcode::Copy { offset, size } => Pending::Copy {
                offset: offset as usize,
                remaining: size as usize,
            },
            Opcode::Insert { len } => Pending::Insert {
                remaining: len as usize,
            },
        }))
    }

    /// Apply as much of the pending instruction as fits in `out`.
    fn resume(&mut self, out: &mut [u8]) -> Result<usize, DeltaError> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(0);
        };

        let (n, finished) = match pending {
            Pending::Copy { offset, remaining } => {
                let n = (*remaining).min(out.len());
                out[..n].copy_from_slice(&self.base[*offset..*offset + n]);
                *offset += n;
                *remaining -= n;
                (n, *remaining == 0)
            }
            Pending::Insert { remaining } => {
                let want = (*remaining).min(out.len());
                let n = read_some(&mut self.source, &mut out[..want])?;
                if n == 0 {
                    return Err(DeltaError::TruncatedStream("insert payload"));
                }
                *remaining -= n;
                (n, *remaining == 0)
            }
        };

        if finished {
            self.pending = None;
        }
        self.produced += n as u64;
        Ok(n)
    }

    /// Confirm the decode completed cleanly and hand back the source.
    ///
    /// All output must already have been pulled; this only performs the
    /// final end-of-stream check that `is_fully_consumed` depends on.
    pub fn finish(mut self) -> Result<R, DeltaError> {
        if !self.is_fully_consumed() {
            if self.pending.is_some() || self.produced < self.header.result_size {
                return Err(DeltaError::SizeMismatch {
                    field: SizeField::Result,
                    declared: self.header.result_size,
                    actual: self.produced,
                });
            }
            let mut probe = [0u8; 1];
            if self.fill(&mut probe)? != Fill::End {
                return Err(DeltaError::SizeMismatch {
                    field: SizeField::Result,
                    declared: self.header.result_size,
                    actual: self.produced,
                });
            }
        }
        Ok(self.source)
    }

    /// Release the source without any checks.
    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: Read> Read for DeltaApplier<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.fill(buf)? {
            Fill::Written(n) => Ok(n),
            Fill::End => Ok(0),
        }
    }
}

fn read_some<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, DeltaError> {
    loop {
        match r.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DeltaError::Io(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most one byte per read, and interrupts every other call.
    struct Trickle<'a> {
        data: &'a [u8],
        interrupt: bool,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::ErrorKind::Interrupted.into());
            }
            if self.data.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[0];
            self.data = &self.data[1..];
            Ok(1)
        }
    }

    fn drain<R: Read>(applier: &mut DeltaApplier<'_, R>, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            match applier.fill(&mut buf).unwrap() {
                Fill::Written(n) => out.extend_from_slice(&buf[..n]),
                Fill::End => return out,
            }
        }
    }

    const BASE: &[u8] = b"0123456789";

    // base 10, result 7: COPY 2 3, INSERT "ab", COPY 8 2
    const DELTA: &[u8] = &[0x0A, 0x07, 0x91, 0x02, 0x03, 0x02, b'a', b'b', 0x91, 0x08, 0x02];

    #[test]
    fn applies_copy_and_insert() {
        let mut a = DeltaApplier::new(BASE, Cursor::new(DELTA)).unwrap();
        assert_eq!(a.expected_result_size(), 7);
        assert_eq!(drain(&mut a, 64), b"234ab89");
        assert!(a.is_fully_consumed());
        assert_eq!(a.bytes_produced(), 7);
    }

    #[test]
    fn every_chunk_size_gives_same_output() {
        for chunk in 1..=8 {
            let mut a = DeltaApplier::new(BASE, Cursor::new(DELTA)).unwrap();
            assert_eq!(drain(&mut a, chunk), b"234ab89", "chunk {chunk}");
            assert!(a.is_fully_consumed());
        }
    }

    #[test]
    fn trickling_source() {
        let src = Trickle {
            data: DELTA,
            interrupt: false,
        };
        let mut a = DeltaApplier::new(BASE, src).unwrap();
        assert_eq!(drain(&mut a, 3), b"234ab89");
        assert!(a.is_fully_consumed());
    }

    #[test]
    fn pending_copy_survives_small_buffers() {
        let mut a = DeltaApplier::new(BASE, Cursor::new(DELTA)).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::Written(2));
        assert_eq!(&buf, b"23");
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::Written(2));
        assert_eq!(&buf, b"4a");
        assert_eq!(a.bytes_produced(), 4);
        assert!(!a.is_fully_consumed());
    }

    #[test]
    fn end_is_sticky() {
        let mut a = DeltaApplier::new(BASE, Cursor::new(DELTA)).unwrap();
        drain(&mut a, 16);
        let mut buf = [0u8; 4];
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::End);
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::End);
        assert_eq!(a.expected_result_size(), 7);
    }

    #[test]
    fn empty_buffer_makes_no_progress() {
        let mut a = DeltaApplier::new(BASE, Cursor::new(DELTA)).unwrap();
        assert_eq!(a.fill(&mut []).unwrap(), Fill::Written(0));
        assert_eq!(a.bytes_produced(), 0);
    }

    #[test]
    fn empty_result() {
        let mut a = DeltaApplier::new(b"", Cursor::new(&[0x00, 0x00][..])).unwrap();
        assert_eq!(a.fill(&mut [0u8; 4]).unwrap(), Fill::End);
        assert!(a.is_fully_consumed());
    }

    #[test]
    fn base_size_checked_eagerly() {
        let err = DeltaApplier::new(&BASE[..9], Cursor::new(DELTA))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            DeltaError::SizeMismatch {
                field: SizeField::Base,
                declared: 10,
                actual: 9
            }
        ));
    }

    #[test]
    fn trailing_instruction_is_size_mismatch() {
        let mut delta = DELTA.to_vec();
        delta.extend_from_slice(&[0x01, b'!']);
        let mut a = DeltaApplier::new(BASE, Cursor::new(delta)).unwrap();
        let mut buf = [0u8; 64];
        let err = a.fill(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::SizeMismatch {
                field: SizeField::Result,
                ..
            }
        ));
        assert!(!a.is_fully_consumed());
    }

    #[test]
    fn trailing_zero_is_corrupt() {
        let mut delta = DELTA.to_vec();
        delta.push(0x00);
        let mut a = DeltaApplier::new(BASE, Cursor::new(delta)).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::Written(7));
        assert!(matches!(a.fill(&mut buf), Err(DeltaError::CorruptHeader)));
    }

    #[test]
    fn errors_are_sticky() {
        let delta = [0x0A, 0x07, 0x91, 0x09, 0x03];
        let mut a = DeltaApplier::new(BASE, Cursor::new(&delta[..])).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(
            a.fill(&mut buf),
            Err(DeltaError::OffsetOutOfRange { .. })
        ));
        assert!(a.is_failed());
        assert!(matches!(a.fill(&mut buf), Err(DeltaError::Poisoned(_))));
        assert!(!a.is_fully_consumed());
    }

    #[test]
    fn short_stream_is_truncated() {
        // Declares 8 result bytes, instructions only produce 7.
        let mut delta = DELTA.to_vec();
        delta[1] = 0x08;
        let mut a = DeltaApplier::new(BASE, Cursor::new(delta)).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::Written(7));
        assert!(matches!(
            a.fill(&mut buf),
            Err(DeltaError::TruncatedStream(_))
        ));
    }

    #[test]
    fn truncated_insert_payload() {
        let delta = [0x0A, 0x07, 0x91, 0x02, 0x03, 0x02, b'a'];
        let mut a = DeltaApplier::new(BASE, Cursor::new(&delta[..])).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(
            a.fill(&mut buf),
            Err(DeltaError::TruncatedStream("insert payload"))
        ));
    }

    #[test]
    fn finish_checks_end_of_stream() {
        let mut a = DeltaApplier::new(BASE, Cursor::new(DELTA)).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::Written(7));
        assert!(!a.is_fully_consumed());
        let source = a.finish().unwrap();
        assert_eq!(source.position(), DELTA.len() as u64);
    }

    #[test]
    fn finish_rejects_trailing_instruction() {
        let mut delta = DELTA.to_vec();
        delta.extend_from_slice(&[0x01, b'!']);
        let mut a = DeltaApplier::new(BASE, Cursor::new(delta)).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::Written(7));
        assert_eq!(&buf, b"234ab89");
        assert!(matches!(
            a.finish(),
            Err(DeltaError::SizeMismatch {
                field: SizeField::Result,
                declared: 7,
                ..
            })
        ));
    }

    #[test]
    fn finish_rejects_trailing_zero() {
        let mut delta = DELTA.to_vec();
        delta.push(0x00);
        let mut a = DeltaApplier::new(BASE, Cursor::new(delta)).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(a.fill(&mut buf).unwrap(), Fill::Written(7));
        assert!(matches!(a.finish(), Err(DeltaError::CorruptHeader)));
    }

    #[test]
    fn finish_before_output_is_drained() {
        let mut a = DeltaApplier::new(BASE, Cursor::new(DELTA)).unwrap();
        let mut buf = [0u8; 3];
        a.fill(&mut buf).unwrap();
        assert!(matches!(
            a.finish(),
            Err(DeltaError::SizeMismatch {
                field: SizeField::Result,
                declared: 7,
                actual: 3
            })
        ));
    }

    #[test]
    fn read_trait_maps_end_to_zero() {
        let mut a = DeltaApplier::new(BASE, Cursor::new(DELTA)).unwrap();
        let mut out = Vec::new();
        a.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"234ab89");
        assert!(a.is_fully_consumed());
    }

    #[test]
    fn read_trait_reports_invalid_data() {
        let delta = [0x0A, 0x01, 0x00];
        let mut a = DeltaApplier::new(BASE, Cursor::new(&delta[..])).unwrap();
        let mut out = Vec::new();
        let err = a.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_trait_error_kind_is_stable() {
        // INSERT 2 with only one payload byte.
        let delta = [0x0A, 0x07, 0x91, 0x02, 0x03, 0x02, b'a'];
        let mut a = DeltaApplier::new(BASE, Cursor::new(&delta[..])).unwrap();
        let mut out = Vec::new();
        let first = a.read_to_end(&mut out).unwrap_err();
        assert_eq!(first.kind(), io::ErrorKind::InvalidData);

        let second = a.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(second.kind(), io::ErrorKind::InvalidData);
    }
}
