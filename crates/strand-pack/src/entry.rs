use strand_store::ChunkKind;

/// Type byte written ahead of each pack entry.
///
/// The chunk's own file id is inside the compressed data; the type byte lets
/// a reader filter or sanity-check entries without decompressing them.
pub fn type_byte(kind: ChunkKind) -> u8 {
    match kind {
        ChunkKind::Commit => 1,
        ChunkKind::Tag => 2,
        ChunkKind::Closure => 3,
        ChunkKind::Map => 4,
        ChunkKind::AddressMap => 5,
        ChunkKind::Blob => 6,
    }
}

pub fn kind_from_type_byte(byte: u8) -> Option<ChunkKind> {
    ChunkKind::ALL.into_iter().find(|k| type_byte(*k) == byte)
}
