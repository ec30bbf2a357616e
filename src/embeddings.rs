//! Deterministic sentence and phrase embeddings plus cosine helpers.
//!
//! Embeddings are feature-hash vectors: token unigrams and bigrams are
//! hashed into a fixed number of buckets with a signed contribution, then
//! L2-normalized. The embedder owns a per-job LRU cache; instances are never
//! shared across jobs so one document's vocabulary cannot leak into another.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::config::EmbeddingConfig;
use crate::phrases::Sentence;

const HASH_SEED_INDEX: u64 = 0x517c_c1b7_2722_0a95;
const HASH_SEED_SIGN: u64 = 0x9e37_79b1_85eb_ca87;

/// Per-job embedding model over feature-hashed token counts.
pub struct Embedder {
    dimensions: usize,
    cache: LruCache<String, Arc<Vec<f32>>>,
}

impl Embedder {
    /// Builds a new embedder for one ingestion job.
    pub fn new(config: EmbeddingConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1))
            .expect("cache capacity is clamped to at least one");
        Self {
            dimensions: config.dimensions.max(1),
            cache: LruCache::new(capacity),
        }
    }

    /// Output dimensionality of every vector this embedder produces.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embeds a text, reusing the cache for repeated inputs.
    pub fn embed_text(&mut self, text: &str) -> Arc<Vec<f32>> {
        if let Some(hit) = self.cache.get(text) {
            return Arc::clone(hit);
        }
        let vector = Arc::new(hash_embed(text, self.dimensions));
        self.cache.put(text.to_string(), Arc::clone(&vector));
        vector
    }

    /// Embeds a phrase as the mean vector of the sentences containing it.
    ///
    /// Each occurrence sentence is embedded with the phrase bracketed so the
    /// phrase tokens weigh into the vector; the mean is re-normalized.
    pub fn embed_phrase(
        &mut self,
        phrase: &str,
        occurrence_indices: &[usize],
        sentences: &[Sentence],
    ) -> Vec<f32> {
        let mut sum = vec![0.0f32; self.dimensions];
        let mut count = 0usize;
        for &index in occurrence_indices {
            let Some(sentence) = sentences.iter().find(|s| s.index == index) else {
                continue;
            };
            let highlighted = sentence.text.replace(phrase, &format!("[{phrase}]"));
            let vector = self.embed_text(&highlighted);
            for (slot, value) in sum.iter_mut().zip(vector.iter()) {
                *slot += value;
            }
            count += 1;
        }

        if count == 0 {
            return hash_embed(phrase, self.dimensions);
        }
        for slot in sum.iter_mut() {
            *slot /= count as f32;
        }
        normalize(&mut sum);
        sum
    }
}

/// Hashes a text into a signed, L2-normalized bucket-count vector.
fn hash_embed(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    let tokens: Vec<&str> = text.split_whitespace().collect();

    for token in &tokens {
        add_feature(&mut vector, token.as_bytes());
    }
    for pair in tokens.windows(2) {
        let mut joined = Vec::with_capacity(pair[0].len() + pair[1].len() + 1);
        joined.extend_from_slice(pair[0].as_bytes());
        joined.push(b' ');
        joined.extend_from_slice(pair[1].as_bytes());
        add_feature(&mut vector, &joined);
    }

    normalize(&mut vector);
    vector
}

fn add_feature(vector: &mut [f32], feature: &[u8]) {
    let bucket = (mix_hash(feature, HASH_SEED_INDEX) as usize) % vector.len();
    let sign = if mix_hash(feature, HASH_SEED_SIGN) & 1 == 0 {
        1.0
    } else {
        -1.0
    };
    vector[bucket] += sign;
}

fn mix_hash(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed ^ data.len() as u64;
    for &byte in data {
        hash ^= (byte as u64).wrapping_mul(0x1000_0000_01b3);
        hash = hash.rotate_left(13).wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    hash ^ (hash >> 33)
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value = (*value as f64 / norm) as f32;
        }
    }
}

/// Cosine similarity between two `f32` vectors, computed in `f64`.
pub fn cosine_f32(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine similarity between two `f64` vectors.
pub fn cosine_f64(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x.powi(2);
        norm_b += y.powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Pairwise cosine matrix over row vectors, with an exact unit diagonal.
pub fn cosine_matrix(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut matrix = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let sim = cosine_f64(&rows[i], &rows[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> Embedder {
        Embedder::new(EmbeddingConfig::default())
    }

    #[test]
    fn embeddings_are_deterministic() {
        let mut a = embedder();
        let mut b = embedder();
        assert_eq!(
            *a.embed_text("knowledge graphs connect concepts"),
            *b.embed_text("knowledge graphs connect concepts")
        );
    }

    #[test]
    fn identical_texts_have_unit_cosine() {
        let mut embedder = embedder();
        let v = embedder.embed_text("quantum entanglement");
        let sim = cosine_f32(&v, &v);
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_texts_are_not_identical() {
        let mut embedder = embedder();
        let a = embedder.embed_text("quantum entanglement in physics");
        let b = embedder.embed_text("medieval castle architecture");
        assert!(cosine_f32(&a, &b) < 0.99);
    }

    #[test]
    fn phrase_embedding_falls_back_to_phrase_text() {
        let mut embedder = embedder();
        let direct = embedder.embed_phrase("quantum", &[], &[]);
        assert_eq!(direct.len(), embedder.dimensions());
        assert!(direct.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn cosine_matrix_has_unit_diagonal() {
        let rows = vec![vec![1.0, 0.0], vec![0.5, 0.5], vec![0.0, 1.0]];
        let matrix = cosine_matrix(&rows);
        for (i, row) in matrix.iter().enumerate() {
            assert!((row[i] - 1.0).abs() < 1e-12);
        }
        assert!((matrix[0][2]).abs() < 1e-12);
    }

    #[test]
    fn zero_vectors_have_zero_similarity() {
        assert_eq!(cosine_f64(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
