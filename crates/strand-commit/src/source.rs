//! Answering "is this commit an ancestor?" three ways.

use std::collections::{BinaryHeap, HashSet};

use strand_store::{ClosureKey, ContentStore};
use tokio_util::sync::CancellationToken;

use crate::closure::ParentClosure;
use crate::commit::{load_commit, Commit};
use crate::error::{GraphError, GraphResult};

/// Membership test over the strict ancestors of one commit.
pub trait ParentClosureSource {
    /// Whether `key` names a strict ancestor. Takes `&mut self` so sources
    /// can expand lazily.
    fn contains(&mut self, key: &ClosureKey) -> GraphResult<bool>;
}

/// The persisted closure loaded into a hash set up front.
#[derive(Debug, Default)]
pub struct MaterializedClosure {
    keys: HashSet<ClosureKey>,
}

impl MaterializedClosure {
    /// Read `commit`'s persisted closure into memory.
    pub fn load(store: &dyn ContentStore, commit: &Commit) -> GraphResult<Self> {
        let closure = ParentClosure::load(store, commit)?;
        let keys = closure.iter_desc(store).collect::<GraphResult<_>>()?;
        Ok(Self { keys })
    }

    /// Number of ancestors loaded.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ParentClosureSource for MaterializedClosure {
    fn contains(&mut self, key: &ClosureKey) -> GraphResult<bool> {
        Ok(self.keys.contains(key))
    }
}

/// Ancestors discovered on demand by walking parent lists.
///
/// Commits are expanded tallest first, and only down to the height of the
/// key being asked about: every ancestor at or above that height is known
/// once the heap's top falls below it.
pub struct LazyClosure<'a> {
    store: &'a dyn ContentStore,
    cancel: &'a CancellationToken,
    pending: BinaryHeap<ClosureKey>,
    queued: HashSet<ClosureKey>,
    expanded: HashSet<ClosureKey>,
}

impl<'a> LazyClosure<'a> {
    /// Start with only `commit`'s direct parents queued. Fails if a parent
    /// is not in `store`.
    pub fn new(
        store: &'a dyn ContentStore,
        cancel: &'a CancellationToken,
        commit: &Commit,
    ) -> GraphResult<Self> {
        let mut lazy = Self {
            store,
            cancel,
            pending: BinaryHeap::new(),
            queued: HashSet::new(),
            expanded: HashSet::new(),
        };
        lazy.enqueue_parents(commit)?;
        Ok(lazy)
    }

    fn enqueue_parents(&mut self, commit: &Commit) -> GraphResult<()> {
        for parent in commit.parents() {
            let key = load_commit(self.store, parent)?.closure_key();
            if self.queued.insert(key) {
                self.pending.push(key);
            }
        }
        Ok(())
    }

    /// Number of ancestors expanded so far.
    pub fn expanded(&self) -> usize {
        self.expanded.len()
    }
}

impl ParentClosureSource for LazyClosure<'_> {
    fn contains(&mut self, key: &ClosureKey) -> GraphResult<bool> {
        while self.pending.peek().is_some_and(|top| top.height >= key.height) {
            if self.cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            let Some(next) = self.pending.pop() else {
                break;
            };
            let commit = load_commit(self.store, &next.address)?;
            self.enqueue_parents(&commit)?;
            self.expanded.insert(next);
        }
        Ok(self.expanded.contains(key))
    }
}

/// Every ancestor found by an eager walk of parent lists.
///
/// Works for commits that never recorded a closure.
#[derive(Debug, Default)]
pub struct ParentListClosure {
    keys: HashSet<ClosureKey>,
}

impl ParentListClosure {
    /// Collect every ancestor of `commit` from parent lists alone.
    pub fn walk(
        store: &dyn ContentStore,
        cancel: &CancellationToken,
        commit: &Commit,
    ) -> GraphResult<Self> {
        let mut keys = HashSet::new();
        let mut stack: Vec<_> = commit.parents().to_vec();
        while let Some(address) = stack.pop() {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            let parent = load_commit(store, &address)?;
            if keys.insert(parent.closure_key()) {
                stack.extend_from_slice(parent.parents());
            }
        }
        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ParentClosureSource for ParentListClosure {
    fn contains(&mut self, key: &ClosureKey) -> GraphResult<bool> {
        Ok(self.keys.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::write_commit;
    use strand_store::{Blob, InMemoryChunkStore};
    use strand_types::Address;

    fn commit(store: &dyn ContentStore, name: &str, parents: &[Address]) -> Address {
        let value = store.put(&Blob::new(name.as_bytes()).to_chunk()).unwrap();
        write_commit(store, value, parents, None).unwrap()
    }

    fn chain(store: &dyn ContentStore, len: usize) -> Vec<Address> {
        let mut out = vec![commit(store, "c0", &[])];
        for i in 1..len {
            let prev = out[i - 1];
            out.push(commit(store, &format!("c{i}"), &[prev]));
        }
        out
    }

    #[test]
    fn all_sources_agree_on_membership() {
        let store = InMemoryChunkStore::new();
        let cancel = CancellationToken::new();
        let commits = chain(&store, 12);
        let side = commit(&store, "side", &[commits[3]]);
        let tip = load_commit(&store, &commits[11]).unwrap();

        let mut materialized = MaterializedClosure::load(&store, &tip).unwrap();
        let mut lazy = LazyClosure::new(&store, &cancel, &tip).unwrap();
        let mut listed = ParentListClosure::walk(&store, &cancel, &tip).unwrap();
        assert_eq!(materialized.len(), 11);
        assert_eq!(listed.len(), 11);

        for addr in commits.iter().chain([&side]) {
            let key = load_commit(&store, addr).unwrap().closure_key();
            let expected = key != tip.closure_key() && *addr != side;
            assert_eq!(materialized.contains(&key).unwrap(), expected);
            assert_eq!(lazy.contains(&key).unwrap(), expected);
            assert_eq!(listed.contains(&key).unwrap(), expected);
        }
    }

    #[test]
    fn lazy_closure_expands_only_to_queried_height() {
        let store = InMemoryChunkStore::new();
        let cancel = CancellationToken::new();
        let commits = chain(&store, 50);
        let tip = load_commit(&store, &commits[49]).unwrap();
        let mut lazy = LazyClosure::new(&store, &cancel, &tip).unwrap();

        let near = load_commit(&store, &commits[45]).unwrap().closure_key();
        assert!(lazy.contains(&near).unwrap());
        assert_eq!(lazy.expanded(), 4);
    }

    #[test]
    fn cancelled_walks_stop() {
        let store = InMemoryChunkStore::new();
        let cancel = CancellationToken::new();
        let commits = chain(&store, 5);
        let tip = load_commit(&store, &commits[4]).unwrap();
        cancel.cancel();
        assert!(matches!(
            ParentListClosure::walk(&store, &cancel, &tip),
            Err(GraphError::Cancelled)
        ));
        let mut lazy = LazyClosure::new(&store, &cancel, &tip).unwrap();
        let root = load_commit(&store, &commits[0]).unwrap().closure_key();
        assert!(matches!(lazy.contains(&root), Err(GraphError::Cancelled)));
    }
}
