//! Deterministic local embedding service.
//!
//! Feature-hashes lowercase word tokens (unigrams and adjacent bigrams)
//! into a fixed-dimension vector, then L2-normalizes. The same input always
//! produces the same unit vector, which is what the mirror invariant and
//! the property suite rely on. It is a placeholder for a model-backed
//! service behind the same port, not an attempt at semantic quality.

use async_trait::async_trait;

use crate::domain::error::ForestResult;
use crate::domain::ports::EmbeddingService;

/// Default embedding width.
pub const DEFAULT_DIMENSION: usize = 384;

pub struct HashEmbeddingService {
    dimension: usize,
}

impl HashEmbeddingService {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    fn scatter(&self, token: &str, weight: f32, out: &mut [f32]) {
        // xorshift over the token hash spreads each token across a handful
        // of signed components.
        let mut state = Self::fnv1a(token) | 1;
        for _ in 0..4 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            #[allow(clippy::cast_possible_truncation)]
            let idx = (state as usize) % self.dimension;
            let sign = if state & (1 << 63) == 0 { 1.0 } else { -1.0 };
            out[idx] += sign * weight;
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension];
        let tokens = Self::tokenize(text);
        for token in &tokens {
            self.scatter(token, 1.0, &mut out);
        }
        for pair in tokens.windows(2) {
            self.scatter(&format!("{} {}", pair[0], pair[1]), 0.5, &mut out);
        }

        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut out {
                *value /= norm;
            }
        } else {
            // Empty input still embeds to a unit vector.
            out[0] = 1.0;
        }
        out
    }
}

impl Default for HashEmbeddingService {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingService for HashEmbeddingService {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> ForestResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}
