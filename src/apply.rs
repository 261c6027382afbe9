// High-level delta application.
//
// DeltaPatcher wraps DeltaApplier with:
//   - Streaming output via Write trait (doesn't accumulate full result)
//   - Progress tracking (bytes written, fill calls)
//   - Optional zlib unwrapping of the delta source (Git stores deltas
//     deflated in packs and binary patches)

use std::io::{Read, Write};

use crate::delta::{DeltaApplier, DeltaError, Fill};

/// Default output chunk handed to the applier per call.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024; // 64 KiB

/// Upper bound for up-front output allocation; a hostile header can
/// declare any result size.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How the delta bytes are wrapped before they reach the applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain instruction bytes.
    #[default]
    None,
    /// zlib stream (RFC 1950).
    #[cfg(feature = "zlib")]
    Zlib,
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Output bytes requested from the applier per call.
    pub chunk_size: usize,
    /// Wrapping of the delta stream.
    pub compression: Compression,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: Compression::None,
        }
    }
}

/// Unwrap `reader` according to `compression`.
pub fn delta_source<'r, R: Read + 'r>(reader: R, compression: Compression) -> Box<dyn Read + 'r> {
    match compression {
        Compression::None => Box::new(reader),
        #[cfg(feature = "zlib")]
        Compression::Zlib => Box::new(flate2::read::ZlibDecoder::new(reader)),
    }
}

// ---------------------------------------------------------------------------
// DeltaPatcher
// ---------------------------------------------------------------------------

/// Streaming delta application with progress tracking.
///
/// Output is produced `chunk_size` bytes at a time and written to any
/// `impl Write`; only one chunk is in memory at a time.
pub struct DeltaPatcher<'a, R: Read> {
    applier: DeltaApplier<'a, R>,
    chunk: Vec<u8>,
    bytes_written: u64,
    fill_calls: u64,
}

impl<'a, R: Read> DeltaPatcher<'a, R> {
    /// Create a patcher with the default chunk size.
    pub fn new(base: &'a [u8], source: R) -> Result<Self, DeltaError> {
        Self::with_chunk_size(base, source, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(
        base: &'a [u8],
        source: R,
        chunk_size: usize,
    ) -> Result<Self, DeltaError> {
        Ok(Self {
            applier: DeltaApplier::new(base, source)?,
            chunk: vec![0u8; chunk_size.max(1)],
            bytes_written: 0,
            fill_calls: 0,
        })
    }

    /// Apply the whole delta, writing output to `writer`.
    ///
    /// Succeeds only if the instruction stream ended cleanly right after
    /// the declared result. Returns the number of bytes written.
    pub fn patch_to<W: Write>(&mut self, writer: &mut W) -> Result<u64, DeltaError> {
        while self.patch_chunk_to(writer)?.is_some() {}
        Ok(self.bytes_written)
    }

    /// Produce and write the next chunk.
    ///
    /// Returns `Some(len)` if output was written, or `None` once the result
    /// is complete.
    pub fn patch_chunk_to<W: Write>(&mut self, writer: &mut W) -> Result<Option<usize>, DeltaError> {
        self.fill_calls += 1;
        match self.applier.fill(&mut self.chunk)? {
            Fill::Written(n) => {
                writer.write_all(&self.chunk[..n])?;
                self.bytes_written += n as u64;
                Ok(Some(n))
            }
            Fill::End => Ok(None),
        }
    }

    pub fn expected_result_size(&self) -> u64 {
        self.applier.expected_result_size()
    }

    /// Total bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Number of fill calls issued so far.
    pub fn fill_calls(&self) -> u64 {
        self.fill_calls
    }

    pub fn is_fully_consumed(&self) -> bool {
        self.applier.is_fully_consumed()
    }

    /// Check for a clean end and release the source.
    pub fn finish(self) -> Result<R, DeltaError> {
        self.applier.finish()
    }
}

// ---------------------------------------------------------------------------
// Convenience functions
// ---------------------------------------------------------------------------

/// Apply a delta held in memory to `base`.
pub fn apply_all(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let applier = DeltaApplier::new(base, delta)?;
    collect(applier)
}

/// Apply a zlib-wrapped delta held in memory to `base`.
#[cfg(feature = "zlib")]
pub fn apply_zlib(base: &[u8], compressed: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let applier = DeltaApplier::new(base, flate2::read::ZlibDecoder::new(compressed))?;
    collect(applier)
}

/// Drain an applier into a Vec, filling the Vec's spare capacity directly.
fn collect<R: Read>(mut applier: DeltaApplier<'_, R>) -> Result<Vec<u8>, DeltaError> {
    let expected = applier.expected_result_size().min(MAX_PREALLOC) as usize;
    let mut out = Vec::with_capacity(expected.max(1));
    loop {
        if out.len() == out.capacity() {
            out.reserve(DEFAULT_CHUNK_SIZE);
        }
        let start = out.len();
        out.resize(out.capacity(), 0);
        match applier.fill(&mut out[start..])? {
            Fill::Written(n) => out.truncate(start + n),
            Fill::End => {
                out.truncate(start);
                return Ok(out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
