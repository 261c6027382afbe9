// Git binary delta format (pack objects, `GIT binary patch` deltas).
//
// This module applies an already-decompressed delta instruction stream to
// a fully materialized base buffer.
//
// # Modules
//
// - `varint`: Size varints (base-128, little-endian)
// - `header`: Declared base/result sizes at the front of a delta
// - `instruction`: COPY/INSERT opcode decoding, listing, and serialization
// - `applier`: Pull-based streaming reconstruction
// - `error`: Error kinds shared by all of the above

pub mod applier;
pub mod error;
pub mod header;
pub mod instruction;
pub mod varint;

// Re-export key types for convenience.
pub use applier::{DeltaApplier, Fill};
pub use error::{DeltaError, SizeField};
pub use header::DeltaHeader;
pub use instruction::{CopyFlags, DeltaWriter, Instruction, Instructions, Opcode};
