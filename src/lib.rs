//! Gitdelta: streaming application of Git binary deltas.
//!
//! A Git delta is a compact instruction stream (`COPY` ranges of a base
//! buffer, `INSERT` literal bytes) that rebuilds a target from a base. It is
//! the format behind `OBJ_OFS_DELTA`/`OBJ_REF_DELTA` pack entries and the
//! `delta` hunks of `GIT binary patch` diffs.
//!
//! The crate provides:
//! - The delta format and a pull-based streaming applier (`delta`)
//! - Higher-level application helpers, including zlib-wrapped input (`apply`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use gitdelta::delta::{DeltaApplier, Fill};
//!
//! let base = b"hello old world";
//! // base 15 bytes, result 15 bytes: COPY 0 6, INSERT "new", COPY 9 6
//! let delta: &[u8] = &[15, 15, 0x90, 6, 3, b'n', b'e', b'w', 0x91, 9, 6];
//!
//! let mut applier = DeltaApplier::new(base, delta).unwrap();
//! let mut out = Vec::new();
//! let mut buf = [0u8; 4];
//! while let Fill::Written(n) = applier.fill(&mut buf).unwrap() {
//!     out.extend_from_slice(&buf[..n]);
//! }
//! assert_eq!(out, b"hello new world");
//! assert!(applier.is_fully_consumed());
//! ```

pub mod apply;
pub mod delta;
pub mod io;

#[cfg(feature = "cli")]
pub mod cli;
