pub mod chunker;
pub mod context;
pub mod recent;
pub mod search;
pub mod stats;
pub mod store;
pub mod sync;
pub mod types;

/// Serialize an embedding as little-endian IEEE-754 `f32`s for a BLOB column.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_bytes`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
