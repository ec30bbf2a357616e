//! Pipeline tuning knobs shared across stages.

use std::time::Duration;

/// Settings that bound the recursive chunker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkerConfig {
    /// Documents shorter than this many characters skip recursive chunking.
    pub recursive_min_chars: usize,
    /// Depth at which recursion stops splitting.
    pub max_depth: usize,
    /// Chunks with at most this many sentences are dropped outright.
    pub drop_max_sentences: usize,
    /// Chunks with at most this many tokens are dropped outright.
    pub drop_max_tokens: usize,
    /// Above this token count a depth-capped chunk is split flat instead of finalized.
    pub flat_split_min_tokens: usize,
    /// Sentence groups under this token total keep their sentences as the node description.
    pub inline_description_max_tokens: usize,
    /// Upper bound on sub-chunks produced by one grouping step.
    pub max_groups_per_step: usize,
    /// Maximum flat sub-chunks produced by the non-recursive fallback.
    pub max_flat_chunks: usize,
    /// Multiplier applied to the similarity threshold at each depth.
    pub threshold_growth: f64,
    /// Quantile of the root similarity matrix used to seed the threshold.
    pub threshold_quantile: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            recursive_min_chars: 2000,
            max_depth: 5,
            drop_max_sentences: 3,
            drop_max_tokens: 20,
            flat_split_min_tokens: 500,
            inline_description_max_tokens: 15,
            max_groups_per_step: 10,
            max_flat_chunks: 5,
            threshold_growth: 1.1,
            threshold_quantile: 0.25,
        }
    }
}

/// Topic model hyperparameters.
///
/// The seed is a contract, not an incidental choice: reports and tests assume
/// a reproducible fit for identical input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopicConfig {
    /// Number of latent topics.
    pub num_topics: usize,
    /// Nominal full sweeps over the corpus.
    pub passes: usize,
    /// Total resampling budget; bounds sweeps on large chunks.
    pub iterations: usize,
    /// Seed for the sampler RNG.
    pub seed: u64,
    /// Symmetric document-topic smoothing prior.
    pub alpha: f64,
    /// Symmetric topic-term smoothing prior.
    pub beta: f64,
    /// Wall-clock budget for one fit; exceeding it counts as a fit failure.
    pub time_budget: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            num_topics: 5,
            passes: 20,
            iterations: 400,
            seed: 8,
            alpha: 0.1,
            beta: 0.01,
            time_budget: Duration::from_secs(60),
        }
    }
}

/// Phrase scoring and per-chunk emission limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringConfig {
    /// Embedding cosine at or above which two phrases count as near-duplicates.
    pub group_threshold: f64,
    /// New top-level phrase nodes emitted per finalized chunk.
    pub max_new_nodes: usize,
    /// Child nodes emitted per near-duplicate group.
    pub max_group_children: usize,
    /// Sentences recorded as description entries per node.
    pub max_description_sentences: usize,
    /// Longest sentence usable as an edge relation label.
    pub max_relation_chars: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            group_threshold: 0.98,
            max_new_nodes: 5,
            max_group_children: 5,
            max_description_sentences: 5,
            max_relation_chars: 80,
        }
    }
}

/// Settings for the deterministic feature-hash embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Output vector dimensionality.
    pub dimensions: usize,
    /// Capacity of the per-job phrase embedding cache.
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 128,
            cache_capacity: 2048,
        }
    }
}

/// Top-level configuration consumed by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineConfig {
    /// Recursive chunker settings.
    pub chunker: ChunkerConfig,
    /// Topic model hyperparameters.
    pub topics: TopicConfig,
    /// Phrase scoring and emission limits.
    pub scoring: ScoringConfig,
    /// Embedder settings.
    pub embedding: EmbeddingConfig,
}
