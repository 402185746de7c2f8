//! Writing and loading commits and tags.

use strand_store::{
    ChunkKind, ClosureKey, CommitMeta, CommitObject, ContentStore, TagMeta, TagObject,
};
use strand_types::Address;
use tracing::debug;

use crate::closure::union_closures;
use crate::error::{GraphError, GraphResult};

/// A decoded commit together with its address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    address: Address,
    object: CommitObject,
}

impl Commit {
    /// Address of the commit chunk.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Length of the longest parent chain down to a root, counting this
    /// commit. Roots have height 1.
    pub fn height(&self) -> u64 {
        self.object.height
    }

    /// Direct parents, in the order they were given when committing.
    pub fn parents(&self) -> &[Address] {
        &self.object.parents
    }

    /// Root of the recorded parent closure. `None` for roots and legacy
    /// commits.
    pub fn parent_closure(&self) -> Option<Address> {
        self.object.parent_closure
    }

    /// The root value this commit points at.
    pub fn value(&self) -> Address {
        self.object.value
    }

    /// Author metadata, if any was recorded.
    pub fn meta(&self) -> Option<&CommitMeta> {
        self.object.meta.as_ref()
    }

    /// Whether the commit has no parents.
    pub fn is_root(&self) -> bool {
        self.object.parents.is_empty()
    }

    /// Whether the recorded closure (or its absence) describes this
    /// commit's full ancestry. False only for commits written before
    /// closures existed.
    pub fn has_closure(&self) -> bool {
        self.is_root() || self.object.parent_closure.is_some()
    }

    /// This commit's key in a descendant's parent closure.
    pub fn closure_key(&self) -> ClosureKey {
        ClosureKey::new(self.object.height, self.address)
    }

    /// The decoded chunk payload.
    pub fn object(&self) -> &CommitObject {
        &self.object
    }
}

/// Load a commit, failing if the store lacks it or holds something else.
pub fn load_commit(store: &dyn ContentStore, address: &Address) -> GraphResult<Commit> {
    let chunk = store
        .get(address)?
        .ok_or(GraphError::UnreachableCommit(*address))?;
    if chunk.kind() != ChunkKind::Commit {
        return Err(GraphError::NotACommit {
            address: *address,
            kind: chunk.kind(),
        });
    }
    Ok(Commit {
        address: *address,
        object: CommitObject::from_chunk(&chunk)?,
    })
}

fn load_parents(store: &dyn ContentStore, parents: &[Address]) -> GraphResult<Vec<Commit>> {
    parents.iter().map(|p| load_commit(store, p)).collect()
}

fn height_over(parents: &[Commit]) -> u64 {
    parents.iter().map(Commit::height).max().map_or(1, |h| h + 1)
}

fn put_commit(store: &dyn ContentStore, object: CommitObject) -> GraphResult<Address> {
    let address = store.put(&object.to_chunk()?)?;
    debug!(
        commit = %address.short_hex(),
        height = object.height,
        parents = object.parents.len(),
        closure = object.parent_closure.is_some(),
        "wrote commit"
    );
    Ok(address)
}

/// Write a commit over `value` with the given parents.
///
/// The parent closure is built and persisted first: the union of every
/// parent's closure plus the parents themselves. Root commits get height 1
/// and no closure chunk.
pub fn write_commit(
    store: &dyn ContentStore,
    value: Address,
    parents: &[Address],
    meta: Option<CommitMeta>,
) -> GraphResult<Address> {
    let loaded = load_parents(store, parents)?;
    let parent_closure = if loaded.is_empty() {
        None
    } else {
        Some(union_closures(store, &loaded)?)
    };
    put_commit(
        store,
        CommitObject {
            height: height_over(&loaded),
            parents: parents.to_vec(),
            parent_closure,
            value,
            meta,
        },
    )
}

/// Write a commit that records no parent closure, as stores predating
/// closures did. Ancestor queries over such commits walk parent lists.
pub fn write_commit_without_closure(
    store: &dyn ContentStore,
    value: Address,
    parents: &[Address],
    meta: Option<CommitMeta>,
) -> GraphResult<Address> {
    let loaded = load_parents(store, parents)?;
    put_commit(
        store,
        CommitObject {
            height: height_over(&loaded),
            parents: parents.to_vec(),
            parent_closure: None,
            value,
            meta,
        },
    )
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// A decoded tag together with its address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    address: Address,
    object: TagObject,
}

impl Tag {
    /// Address of the tag chunk.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The tagged commit.
    pub fn commit(&self) -> Address {
        self.object.commit
    }

    /// Tagger metadata, if any was recorded.
    pub fn meta(&self) -> Option<&TagMeta> {
        self.object.meta.as_ref()
    }
}

/// Tag an existing commit.
pub fn write_tag(
    store: &dyn ContentStore,
    commit: &Address,
    meta: Option<TagMeta>,
) -> GraphResult<Address> {
    load_commit(store, commit)?;
    let object = TagObject {
        commit: *commit,
        meta,
    };
    let address = store.put(&object.to_chunk()?)?;
    debug!(tag = %address.short_hex(), commit = %commit.short_hex(), "wrote tag");
    Ok(address)
}

/// Load a tag, failing if the store lacks it or holds something else.
pub fn load_tag(store: &dyn ContentStore, address: &Address) -> GraphResult<Tag> {
    let chunk = store
        .get(address)?
        .ok_or(GraphError::UnreachableTag(*address))?;
    if chunk.kind() != ChunkKind::Tag {
        return Err(GraphError::NotATag {
            address: *address,
            kind: chunk.kind(),
        });
    }
    Ok(Tag {
        address: *address,
        object: TagObject::from_chunk(&chunk)?,
    })
}
