// File-level I/O helpers for delta application.
//
// Provides `apply_file()`, which wraps the streaming patcher with proper
// buffered I/O, and `StagedOutput`, which keeps a failed apply from
// leaving a partial output file behind. Optionally computes a streaming
// SHA-256 checksum of the output (feature-gated behind `file-io`).

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::apply::{self, ApplyOptions, DeltaPatcher};
use crate::delta::DeltaError;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `apply_file()`.
#[derive(Debug, Clone)]
pub struct ApplyStats {
    /// Base file size in bytes.
    pub base_size: u64,
    /// Delta file size in bytes (as stored, before any unwrapping).
    pub delta_size: u64,
    /// Reconstructed output size in bytes.
    pub output_size: u64,
    /// Number of applier fill calls.
    pub fill_calls: u64,
    /// SHA-256 of the reconstructed output (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file I/O operations.
#[derive(Debug, Error)]
pub enum IoError {
    /// I/O error (file open, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Delta application error.
    #[error("delta error: {0}")]
    Delta(#[from] DeltaError),
}

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

// ---------------------------------------------------------------------------
// apply_file
// ---------------------------------------------------------------------------

/// Apply the delta in `delta_path` to the base in `base_path`, writing the
/// result to `output_path`.
///
/// The base is read fully into memory and checked against the delta header
/// before the output is touched. The delta is streamed via `BufReader` (and
/// unwrapped per `opts.compression`). Output goes to a staged file next to
/// `output_path` that replaces it only after the whole delta applied
/// cleanly; on any error `output_path` is left as it was.
///
/// When the `file-io` feature is enabled, a SHA-256 checksum of the output
/// is computed incrementally.
pub fn apply_file(
    base_path: &Path,
    delta_path: &Path,
    output_path: &Path,
    opts: ApplyOptions,
) -> Result<ApplyStats, IoError> {
    let base = std::fs::read(base_path)?;
    let base_size = base.len() as u64;

    let delta_file = File::open(delta_path)?;
    let delta_size = delta_file.metadata()?.len();
    let delta_reader = apply::delta_source(
        BufReader::with_capacity(BUF_SIZE, delta_file),
        opts.compression,
    );

    let mut patcher = DeltaPatcher::with_chunk_size(&base, delta_reader, opts.chunk_size)?;
    let mut output = StagedOutput::create(output_path)?;

    #[cfg(feature = "file-io")]
    let mut output_hasher = <sha2::Sha256 as sha2::Digest>::new();

    #[cfg(feature = "file-io")]
    let output_size = {
        let mut hashing_writer = HashingWriter {
            inner: &mut output,
            hasher: &mut output_hasher,
        };
        patcher.patch_to(&mut hashing_writer)?
    };

    #[cfg(not(feature = "file-io"))]
    let output_size = patcher.patch_to(&mut output)?;

    let fill_calls = patcher.fill_calls();
    output.commit()?;

    #[cfg(feature = "file-io")]
    let output_sha256 = Some(sha2::Digest::finalize(output_hasher).into());
    #[cfg(not(feature = "file-io"))]
    let output_sha256: Option<[u8; 32]> = None;

    log::debug!(
        "applied {} ({delta_size} bytes) to {} ({base_size} bytes): {output_size} bytes",
        delta_path.display(),
        base_path.display()
    );

    Ok(ApplyStats {
        base_size,
        delta_size,
        output_size,
        fill_calls,
        output_sha256,
    })
}

// ---------------------------------------------------------------------------
// Staged output
// ---------------------------------------------------------------------------

/// Output file written under a temporary name in the target's directory.
///
/// [`commit`](Self::commit) renames it over the final path. Dropping it
/// uncommitted removes the temporary file, so readers of the final path
/// never see a partial result.
pub struct StagedOutput {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl StagedOutput {
    pub fn create(final_path: &Path) -> io::Result<Self> {
        let mut name = final_path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("gitdelta-output"));
        name.push(format!(".{}.tmp", std::process::id()));
        let tmp_path = final_path.with_file_name(name);

        let file = File::create(&tmp_path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(BUF_SIZE, file),
            tmp_path,
            final_path: final_path.to_path_buf(),
            committed: false,
        })
    }

    /// Flush and move the staged file into place.
    pub fn commit(mut self) -> io::Result<()> {
        self.writer.flush()?;
        std::fs::rename(&self.tmp_path, &self.final_path)?;
        self.committed = true;
        Ok(())
    }
}

impl Write for StagedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

// ---------------------------------------------------------------------------
// Hashing writer (used with file-io feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "file-io")]
struct HashingWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: &'a mut sha2::Sha256,
}

#[cfg(feature = "file-io")]
impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        use sha2::Digest;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
