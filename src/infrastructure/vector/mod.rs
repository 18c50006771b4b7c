//! Vector index backends and the embedding service.

mod embedding;
mod memory_index;
mod sqlite_index;

pub use embedding::{HashEmbeddingService, DEFAULT_DIMENSION};
pub use memory_index::MemoryVectorIndex;
pub use sqlite_index::{SqliteVectorIndex, VectorImplementation};

/// Cosine similarity mapped into [0, 1]: negative similarity clamps to 0.
///
/// Mismatched dimensions and zero-magnitude inputs score 0 so they can
/// never outrank a genuine match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
}

/// Serialize an embedding to little-endian bytes for storage.
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding from stored bytes.
pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// True when every `(key, value)` in `filter` matches a string field of
/// `metadata` exactly.
pub(crate) fn metadata_matches(
    metadata: &serde_json::Value,
    filter: &std::collections::BTreeMap<String, String>,
) -> bool {
    filter.iter().all(|(key, expected)| {
        metadata
            .get(key)
            .and_then(|v| v.as_str())
            .is_some_and(|actual| actual == expected)
    })
}
