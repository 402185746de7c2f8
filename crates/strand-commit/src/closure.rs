//! Parent closures: the persisted ancestor set of a commit.
//!
//! A commit's closure is an ordered map keyed by [`ClosureKey`] holding
//! every strict ancestor. It satisfies
//! `closure(C) = closure(P1) ∪ … ∪ closure(Pn) ∪ {P1, …, Pn}` and is read in
//! descending `(height, address)` order, which is the order ancestor
//! resolution consumes it in.

use std::collections::HashSet;

use strand_store::{ChunkKind, ClosureKey, ContentStore, StoreError};
use strand_tree::{
    apply_edits, diff_maps, EditAccumulator, InMemoryEditAccumulator, MapChange, OrderedMap,
};
use strand_types::Address;
use tracing::debug;

use crate::commit::Commit;
use crate::error::{GraphError, GraphResult};

/// Handle to a commit's parent closure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParentClosure {
    map: OrderedMap,
}

/// Keys present in one closure but not the other.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClosureDiff {
    /// In the other closure only.
    pub added: Vec<ClosureKey>,
    /// In this closure only.
    pub removed: Vec<ClosureKey>,
}

impl ParentClosure {
    /// The closure of a root commit.
    pub fn empty() -> Self {
        Self {
            map: OrderedMap::empty(ChunkKind::Closure),
        }
    }

    /// The closure `commit` recorded. Commits that recorded none (roots and
    /// legacy commits) have the empty closure.
    pub fn load(store: &dyn ContentStore, commit: &Commit) -> GraphResult<Self> {
        let Some(address) = commit.parent_closure() else {
            return Ok(Self::empty());
        };
        let chunk = store.get(&address)?.ok_or(GraphError::DanglingClosure {
            closure: address,
            commit: commit.address(),
        })?;
        if chunk.kind() != ChunkKind::Closure {
            return Err(StoreError::CorruptChunk {
                address,
                reason: format!("expected closure node, got {}", chunk.kind()),
            }
            .into());
        }
        Ok(Self {
            map: OrderedMap::from_root(ChunkKind::Closure, address),
        })
    }

    /// The underlying ordered map, keyed by encoded [`ClosureKey`]s.
    pub fn map(&self) -> &OrderedMap {
        &self.map
    }

    /// Root chunk address, `None` for the empty closure.
    pub fn address(&self) -> Option<Address> {
        (!self.map.is_empty()).then(|| self.map.root())
    }

    /// Whether the commit has no ancestors recorded.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of ancestors. Walks every leaf.
    pub fn len(&self, store: &dyn ContentStore) -> GraphResult<usize> {
        Ok(self.map.len(store)?)
    }

    /// Whether `key` is a strict ancestor.
    pub fn contains(&self, store: &dyn ContentStore, key: &ClosureKey) -> GraphResult<bool> {
        Ok(self.map.contains_key(store, &key.encode())?)
    }

    /// Ancestors from the tallest down, ties broken by descending address.
    pub fn iter_desc<'a>(
        &self,
        store: &'a dyn ContentStore,
    ) -> impl Iterator<Item = GraphResult<ClosureKey>> + 'a {
        self.map.iter_rev(store).map(|entry| {
            let (key, _) = entry?;
            Ok(ClosureKey::decode(&key)?)
        })
    }

    /// Keys only `other` has (`added`) and keys only `self` has (`removed`),
    /// each in ascending order.
    pub fn diff(&self, store: &dyn ContentStore, other: &ParentClosure) -> GraphResult<ClosureDiff> {
        let mut out = ClosureDiff::default();
        for change in diff_maps(store, &self.map, &other.map)?.changes {
            match change {
                MapChange::Added { key, .. } => out.added.push(ClosureKey::decode(&key)?),
                MapChange::Deleted { key, .. } => out.removed.push(ClosureKey::decode(&key)?),
                MapChange::Modified { .. } => {}
            }
        }
        Ok(out)
    }
}

/// Build and persist the closure of a commit with the given (non-empty)
/// parents, returning its root address.
pub(crate) fn union_closures(store: &dyn ContentStore, parents: &[Commit]) -> GraphResult<Address> {
    let closures = parents
        .iter()
        .map(|p| ParentClosure::load(store, p))
        .collect::<GraphResult<Vec<_>>>()?;
    let Some((base, rest)) = closures.split_first() else {
        return Ok(Address::empty());
    };

    // The running union is `base` plus `queued`; each further closure only
    // contributes the keys that union lacks.
    let mut acc = InMemoryEditAccumulator::new();
    let mut queued = HashSet::new();
    for other in rest {
        for key in base.diff(store, other)?.added {
            if queued.insert(key) {
                acc.add_edit(key.encode(), Some(Vec::new()));
            }
        }
    }
    for parent in parents {
        let key = parent.closure_key();
        if queued.insert(key) {
            acc.add_edit(key.encode(), Some(Vec::new()));
        }
    }

    let mut provider = acc.finished_editing()?;
    let (map, stats) = apply_edits(store, base.map(), provider.as_mut())?;
    provider.close()?;
    debug!(
        closure = %map.root().short_hex(),
        parents = parents.len(),
        added = stats.additions,
        "wrote parent closure"
    );
    Ok(map.root())
}
