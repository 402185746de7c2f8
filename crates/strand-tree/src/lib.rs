//! Content-addressed ordered maps for Strand.
//!
//! An [`OrderedMap`] is a prolly-style search tree stored as chunks in a
//! [`ContentStore`](strand_store::ContentStore). Node boundaries are chosen
//! from the keys themselves, so two maps with the same entries always share
//! the same root address regardless of how they were built.
//!
//! # Operations
//!
//! - [`OrderedMap::from_sorted_entries`]: bulk build
//! - [`OrderedMap::get`], [`OrderedMap::iter`], [`OrderedMap::iter_rev`]: reads
//! - [`diff_maps`]: structural diff that skips shared subtrees
//! - [`apply_edits`]: batched, concurrent rewrite from an [`EditProvider`]

pub mod apply;
pub mod chunker;
pub mod diff;
pub mod edits;
pub mod error;
pub mod map;

pub use apply::{apply_edits, BATCH_SIZE_MAX, BATCH_SIZE_MULT, BATCH_SIZE_START, WORKER_COUNT};
pub use chunker::{is_boundary, NodeRef, MAX_NODE_ENTRIES, MIN_NODE_ENTRIES, TARGET_NODE_ENTRIES};
pub use diff::{diff_maps, MapChange, MapDiff};
pub use edits::{
    AppliedEditStats, Edit, EditAccumulator, EditProvider, InMemoryEditAccumulator, VecEditProvider,
};
pub use error::{TreeError, TreeResult};
pub use map::{MapIter, OrderedMap};
