//! Buffered, unordered edits replayed in key order.

use crate::error::TreeResult;

/// A single pending change to a map. `value: None` deletes the key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edit {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl Edit {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// Replays edits in ascending key order, one key at most once.
///
/// Consumed by a single reader.
pub trait EditProvider: Send {
    /// The next edit, or `None` once the provider is exhausted.
    fn next_edit(&mut self) -> TreeResult<Option<Edit>>;

    /// Whether `next_edit` has already returned `None`.
    fn reached_eof(&self) -> bool;

    /// Release any resources held by the provider.
    fn close(&mut self) -> TreeResult<()> {
        Ok(())
    }
}

/// Collects edits in any order from a single writer.
///
/// Not safe for concurrent `add_edit` calls; callers serialize access until
/// `finished_editing`.
pub trait EditAccumulator {
    /// Buffer an edit. A later edit to the same key wins.
    fn add_edit(&mut self, key: Vec<u8>, value: Option<Vec<u8>>);

    /// Number of edits buffered since the last finish or close.
    fn edits_added(&self) -> usize;

    /// Hand the buffered edits over as a sorted, deduplicated provider,
    /// leaving the accumulator empty.
    fn finished_editing(&mut self) -> TreeResult<Box<dyn EditProvider>>;

    /// Discard buffered edits. Safe to call repeatedly.
    fn close(&mut self);
}

/// [`EditAccumulator`] that buffers everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryEditAccumulator {
    edits: Vec<Edit>,
}

impl InMemoryEditAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EditAccumulator for InMemoryEditAccumulator {
    fn add_edit(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.edits.push(Edit { key, value });
    }

    fn edits_added(&self) -> usize {
        self.edits.len()
    }

    fn finished_editing(&mut self) -> TreeResult<Box<dyn EditProvider>> {
        let mut edits = std::mem::take(&mut self.edits);
        // Stable: equal keys keep insertion order, so the last one is newest.
        edits.sort_by(|a, b| a.key.cmp(&b.key));
        let mut deduped: Vec<Edit> = Vec::with_capacity(edits.len());
        for edit in edits {
            match deduped.last_mut() {
                Some(last) if last.key == edit.key => *last = edit,
                _ => deduped.push(edit),
            }
        }
        Ok(Box::new(VecEditProvider::new(deduped)))
    }

    fn close(&mut self) {
        self.edits.clear();
    }
}

/// Provider over edits that are already sorted and unique.
#[derive(Debug)]
pub struct VecEditProvider {
    edits: std::vec::IntoIter<Edit>,
    eof: bool,
}

impl VecEditProvider {
    pub fn new(edits: Vec<Edit>) -> Self {
        Self {
            edits: edits.into_iter(),
            eof: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl EditProvider for VecEditProvider {
    fn next_edit(&mut self) -> TreeResult<Option<Edit>> {
        let next = self.edits.next();
        if next.is_none() {
            self.eof = true;
        }
        Ok(next)
    }

    fn reached_eof(&self) -> bool {
        self.eof
    }

    fn close(&mut self) -> TreeResult<()> {
        self.edits = Vec::new().into_iter();
        Ok(())
    }
}

/// Counts of what applying a batch of edits did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppliedEditStats {
    pub additions: u64,
    pub modifications: u64,
    /// Puts whose value matched what was already stored.
    pub same_value: u64,
    pub deletions: u64,
    /// Deletes of keys that were not present.
    pub nonexistent_deletes: u64,
}

impl AppliedEditStats {
    pub fn total(&self) -> u64 {
        self.additions + self.modifications + self.same_value + self.deletions + self.nonexistent_deletes
    }
}

impl std::ops::AddAssign for AppliedEditStats {
    fn add_assign(&mut self, rhs: Self) {
        self.additions += rhs.additions;
        self.modifications += rhs.modifications;
        self.same_value += rhs.same_value;
        self.deletions += rhs.deletions;
        self.nonexistent_deletes += rhs.nonexistent_deletes;
    }
}
