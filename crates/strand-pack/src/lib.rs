//! Pack file format for Strand.
//!
//! A pack is a batch of chunks, each zstd-compressed and CRC-checked, closed
//! by a BLAKE3 checksum over the whole file. The puller stages fetched chunks
//! in packs under its temporary directory before handing them to the sink.
//!
//! # Architecture
//!
//! - **Pack file** (`.pack`): header, compressed entries, checksum trailer
//! - **Pack index** (`.idx`): fan-out table + sorted addresses for O(log n) lookups
//! - **PackWriter**: builds packs incrementally from chunks
//! - **PackReader**: verified random access, over owned bytes or a memory map

pub mod entry;
pub mod error;
pub mod index;
pub mod reader;
pub mod writer;

pub use error::{PackError, PackResult};
pub use index::PackIndex;
pub use reader::PackReader;
pub use writer::{PackFile, PackWriter};
