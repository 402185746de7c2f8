//! Foundation types for Strand.
//!
//! Every chunk in a Strand store is identified by an [`Address`]: the BLAKE3
//! digest of its serialized bytes. Every other Strand crate depends on
//! `strand-types`.

pub mod address;
pub mod error;

pub use address::{Address, ADDRESS_LEN};
pub use error::TypeError;
