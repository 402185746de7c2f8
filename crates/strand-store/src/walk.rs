use strand_types::Address;

use crate::chunk::{Chunk, ChunkKind};
use crate::error::StoreResult;
use crate::object::{ClosureKey, CommitObject, NodeObject, TagObject};

/// Extracts the addresses a chunk embeds: its out-edges in the chunk DAG.
///
/// Graph walkers (the puller, integrity checks) traverse stores through this
/// trait without knowing any payload schema.
pub trait RefWalker: Send + Sync {
    fn walk_refs(&self, chunk: &Chunk) -> StoreResult<Vec<Address>>;
}

/// The [`RefWalker`] for every chunk kind defined by this crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkRefWalker;

impl RefWalker for ChunkRefWalker {
    fn walk_refs(&self, chunk: &Chunk) -> StoreResult<Vec<Address>> {
        let refs = match chunk.kind() {
            ChunkKind::Commit => {
                let commit = CommitObject::from_chunk(chunk)?;
                let mut refs = Vec::with_capacity(commit.parents.len() + 2);
                refs.push(commit.value);
                refs.extend(commit.parent_closure);
                refs.extend(commit.parents);
                refs
            }
            ChunkKind::Tag => vec![TagObject::from_chunk(chunk)?.commit],
            ChunkKind::Map | ChunkKind::AddressMap | ChunkKind::Closure => {
                let node = NodeObject::from_chunk(chunk)?;
                if !node.is_leaf() {
                    node.children
                } else {
                    match chunk.kind() {
                        ChunkKind::AddressMap => node
                            .values
                            .iter()
                            .map(|v| Address::from_slice(v))
                            .collect::<Result<Vec<_>, _>>()?,
                        ChunkKind::Closure => node
                            .keys
                            .iter()
                            .map(|k| ClosureKey::decode(k).map(|key| key.address))
                            .collect::<Result<Vec<_>, _>>()?,
                        _ => Vec::new(),
                    }
                }
            }
            ChunkKind::Blob => Vec::new(),
        };
        Ok(refs.into_iter().filter(|a| !a.is_empty()).collect())
    }
}
