//! Closest common ancestor of two commits.
//!
//! "Closest" means the common ancestor-or-self that sorts first by height
//! descending, then by address descending. The two commits may live in
//! different stores; each side is only ever loaded from its own store.

use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::iter::Peekable;
use std::str::FromStr;

use strand_store::{ClosureKey, ContentStore};
use strand_types::Address;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::closure::ParentClosure;
use crate::commit::{load_commit, Commit};
use crate::error::{GraphError, GraphResult};
use crate::source::{LazyClosure, MaterializedClosure, ParentClosureSource, ParentListClosure};

/// How to search for a common ancestor. Every strategy returns the same
/// answer; they differ in what they read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AncestorStrategy {
    /// Closure merge-walk when both commits recorded closures, otherwise
    /// the parent-list walk.
    #[default]
    Auto,
    /// Merge-walk both persisted closures in descending order.
    Closure,
    /// Expand the first commit's ancestry on demand.
    Lazy,
    /// Load the first commit's closure into a set.
    SetClosure,
    /// Walk explicit parent lists on both sides.
    ParentList,
}

impl AncestorStrategy {
    pub const ALL: [AncestorStrategy; 5] = [
        Self::Auto,
        Self::Closure,
        Self::Lazy,
        Self::SetClosure,
        Self::ParentList,
    ];

    /// The name accepted by `FromStr` and shown by `Display`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Closure => "closure",
            Self::Lazy => "lazy",
            Self::SetClosure => "set-closure",
            Self::ParentList => "parent-list",
        }
    }
}

impl fmt::Display for AncestorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AncestorStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| format!("unknown ancestor strategy: {s}"))
    }
}

/// Find the closest common ancestor of `c1` (in `store1`) and `c2` (in
/// `store2`), or `None` if their histories are disjoint.
pub fn find_common_ancestor(
    cancel: &CancellationToken,
    c1: &Address,
    c2: &Address,
    store1: &dyn ContentStore,
    store2: &dyn ContentStore,
) -> GraphResult<Option<Address>> {
    find_common_ancestor_with(AncestorStrategy::Auto, cancel, c1, c2, store1, store2)
}

/// [`find_common_ancestor`] with an explicit strategy.
pub fn find_common_ancestor_with(
    strategy: AncestorStrategy,
    cancel: &CancellationToken,
    c1: &Address,
    c2: &Address,
    store1: &dyn ContentStore,
    store2: &dyn ContentStore,
) -> GraphResult<Option<Address>> {
    if cancel.is_cancelled() {
        return Err(GraphError::Cancelled);
    }
    let left = load_commit(store1, c1)?;
    let right = load_commit(store2, c2)?;
    let closures_usable = left.has_closure() && right.has_closure();

    let found = match strategy {
        AncestorStrategy::Auto | AncestorStrategy::Closure if closures_usable => {
            closure_merge_walk(cancel, &left, &right, store1, store2)?
        }
        AncestorStrategy::Auto | AncestorStrategy::Closure | AncestorStrategy::ParentList => {
            parent_list_walk(cancel, &left, &right, store1, store2)?
        }
        AncestorStrategy::Lazy => {
            let mut source = LazyClosure::new(store1, cancel, &left)?;
            walk_against(cancel, &mut source, &left, &right, store2)?
        }
        AncestorStrategy::SetClosure if left.has_closure() => {
            let mut source = MaterializedClosure::load(store1, &left)?;
            walk_against(cancel, &mut source, &left, &right, store2)?
        }
        AncestorStrategy::SetClosure => {
            let mut source = ParentListClosure::walk(store1, cancel, &left)?;
            walk_against(cancel, &mut source, &left, &right, store2)?
        }
    };

    debug!(
        left = %c1.short_hex(),
        right = %c2.short_hex(),
        %strategy,
        found = ?found.map(|a| a.short_hex()),
        "resolved common ancestor"
    );
    Ok(found)
}

/// Merge two descending `self ++ closure` streams; the first key both
/// streams share is the answer.
fn closure_merge_walk(
    cancel: &CancellationToken,
    left: &Commit,
    right: &Commit,
    store1: &dyn ContentStore,
    store2: &dyn ContentStore,
) -> GraphResult<Option<Address>> {
    let mut a = std::iter::once(Ok(left.closure_key()))
        .chain(ParentClosure::load(store1, left)?.iter_desc(store1))
        .peekable();
    let mut b = std::iter::once(Ok(right.closure_key()))
        .chain(ParentClosure::load(store2, right)?.iter_desc(store2))
        .peekable();

    loop {
        if cancel.is_cancelled() {
            return Err(GraphError::Cancelled);
        }
        let (Some(ka), Some(kb)) = (front(&mut a)?, front(&mut b)?) else {
            return Ok(None);
        };
        if ka == kb {
            return Ok(Some(ka.address));
        }
        if ka > kb {
            a.next();
        } else {
            b.next();
        }
    }
}

fn front<I>(iter: &mut Peekable<I>) -> GraphResult<Option<ClosureKey>>
where
    I: Iterator<Item = GraphResult<ClosureKey>>,
{
    match iter.peek() {
        None => Ok(None),
        Some(Ok(key)) => Ok(Some(*key)),
        Some(Err(_)) => match iter.next() {
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        },
    }
}

/// Ancestry-or-self of one commit in descending key order, discovered
/// through a max-heap over parent lists.
struct AncestryWalk<'a> {
    store: &'a dyn ContentStore,
    heap: BinaryHeap<ClosureKey>,
    seen: HashSet<ClosureKey>,
}

impl<'a> AncestryWalk<'a> {
    fn new(store: &'a dyn ContentStore, start: &Commit) -> Self {
        let key = start.closure_key();
        Self {
            store,
            heap: BinaryHeap::from([key]),
            seen: HashSet::from([key]),
        }
    }

    fn peek(&self) -> Option<ClosureKey> {
        self.heap.peek().copied()
    }

    /// Pop the tallest pending commit and queue its unseen parents.
    fn advance(&mut self) -> GraphResult<Option<ClosureKey>> {
        let Some(key) = self.heap.pop() else {
            return Ok(None);
        };
        let commit = load_commit(self.store, &key.address)?;
        for parent in commit.parents() {
            let parent_key = load_commit(self.store, parent)?.closure_key();
            if self.seen.insert(parent_key) {
                self.heap.push(parent_key);
            }
        }
        Ok(Some(key))
    }
}

/// Walk `right`'s ancestry from the top; the first commit that is `left`
/// itself or in `left`'s closure wins.
fn walk_against(
    cancel: &CancellationToken,
    source: &mut dyn ParentClosureSource,
    left: &Commit,
    right: &Commit,
    store2: &dyn ContentStore,
) -> GraphResult<Option<Address>> {
    let target = left.closure_key();
    let mut walk = AncestryWalk::new(store2, right);
    while let Some(key) = walk.advance()? {
        if cancel.is_cancelled() {
            return Err(GraphError::Cancelled);
        }
        if key == target || source.contains(&key)? {
            return Ok(Some(key.address));
        }
    }
    Ok(None)
}

/// Two height-ordered walks over parent lists; the taller front advances
/// until both fronts meet.
fn parent_list_walk(
    cancel: &CancellationToken,
    left: &Commit,
    right: &Commit,
    store1: &dyn ContentStore,
    store2: &dyn ContentStore,
) -> GraphResult<Option<Address>> {
    let mut a = AncestryWalk::new(store1, left);
    let mut b = AncestryWalk::new(store2, right);
    loop {
        if cancel.is_cancelled() {
            return Err(GraphError::Cancelled);
        }
        let (Some(ka), Some(kb)) = (a.peek(), b.peek()) else {
            return Ok(None);
        };
        if ka == kb {
            return Ok(Some(ka.address));
        }
        if ka > kb {
            a.advance()?;
        } else {
            b.advance()?;
        }
    }
}
