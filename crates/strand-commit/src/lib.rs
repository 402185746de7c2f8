//! Commit graph for Strand.
//!
//! Commits and tags are immutable chunks. Every commit with parents also
//! records a [`ParentClosure`]: an ordered map of all its ancestors keyed by
//! `(height, address)`, built at write time from the parents' closures. The
//! closure makes ancestor queries a merge of two descending streams instead
//! of a graph search.
//!
//! # Ancestor resolution
//!
//! [`find_common_ancestor`] picks a strategy by what the two commits
//! recorded; [`find_common_ancestor_with`] forces one. Commits written
//! without closures are always resolved by walking parent lists.

pub mod ancestor;
pub mod closure;
pub mod commit;
pub mod error;
pub mod source;

pub use ancestor::{find_common_ancestor, find_common_ancestor_with, AncestorStrategy};
pub use closure::{ClosureDiff, ParentClosure};
pub use commit::{
    load_commit, load_tag, write_commit, write_commit_without_closure, write_tag, Commit, Tag,
};
pub use error::{GraphError, GraphResult};
pub use source::{LazyClosure, MaterializedClosure, ParentClosureSource, ParentListClosure};
