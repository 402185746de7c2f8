//! Content-addressed chunk storage for Strand.
//!
//! Every piece of Strand data (commits, tags, parent closures, ordered-map
//! nodes, blobs) is an immutable [`Chunk`]: a 4-byte file id naming its
//! schema, followed by the payload. A chunk's [`Address`] is the BLAKE3 hash
//! of those bytes.
//!
//! # Storage Backends
//!
//! All backends implement the [`ContentStore`] trait:
//!
//! - [`InMemoryChunkStore`]: `HashMap`-based store for tests and embedding
//! - [`FileChunkStore`]: one durable file per chunk
//! - [`GhostChunkStore`]: wrapper that fails loudly on archived chunks
//!
//! # Design Rules
//!
//! 1. Chunks are immutable once written; `put` is idempotent.
//! 2. A miss is a value (`None`/`false`), never an error.
//! 3. Corruption and ghost reads are errors and are never papered over.
//! 4. The store never retries; callers decide.
//!
//! [`Address`]: strand_types::Address

pub mod chunk;
pub mod error;
pub mod file;
pub mod ghost;
pub mod memory;
pub mod object;
pub mod traits;
pub mod walk;

pub use chunk::{Chunk, ChunkKind, FILE_ID_LEN};
pub use error::{StoreError, StoreResult};
pub use file::FileChunkStore;
pub use ghost::GhostChunkStore;
pub use memory::InMemoryChunkStore;
pub use object::{
    Blob, ClosureKey, CommitMeta, CommitObject, NodeObject, TagMeta, TagObject, CLOSURE_KEY_LEN,
};
pub use traits::ContentStore;
pub use walk::{ChunkRefWalker, RefWalker};
