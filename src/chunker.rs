//! Recursive top-down chunking driven by topic-vector similarity.
//!
//! Depth zero fits the topic model over the whole document, emits the root
//! hierarchy node, and seeds the similarity threshold from the lower
//! quartile of the root similarity matrix. Each recursive step either
//! terminates (drop, finalize, or flat split) or groups adjacent sentences
//! and recurses with the threshold scaled up, so recursion depth stays
//! bounded.

use tracing::{debug, warn};

use crate::config::{ChunkerConfig, TopicConfig};
use crate::graph::{
    AlreadyMade, DescriptionEntry, GraphBatch, GraphEdge, KeywordNode, SentenceRecord,
};
use crate::phrases::Sentence;
use crate::tfidf;
use crate::topics;

/// Relation label used for hierarchy edges and co-occurrence fallbacks.
pub const RELATED: &str = "Related";

/// A chunk the recursion stopped splitting; input to concept extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedChunk {
    /// Document-wide sentence indices, in order.
    pub indices: Vec<usize>,
    /// Name of the hierarchy node the chunk hangs under; may be empty when
    /// keyword derivation was exhausted for the chunk's lineage.
    pub keyword: String,
}

/// Everything the chunker produced for one document.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Chunks to hand to concept extraction, in document order.
    pub finalized: Vec<FinalizedChunk>,
    /// Hierarchy nodes and edges emitted while splitting.
    pub batch: GraphBatch,
    /// Starred name of the document's root keyword; empty when the root
    /// topic fit failed.
    pub root_keyword: String,
}

struct Recursion<'a> {
    sentences: &'a [Sentence],
    similarity: Vec<Vec<f64>>,
    source_id: &'a str,
    config: &'a ChunkerConfig,
    already_made: &'a mut AlreadyMade,
    outcome: ChunkOutcome,
}

/// Runs recursive chunking over a whole document.
///
/// A root topic fit failure aborts with an empty outcome; the caller
/// decides whether that is an error or a zero-emit result.
pub fn run(
    sentences: &[Sentence],
    source_id: &str,
    config: &ChunkerConfig,
    topic_config: &TopicConfig,
    already_made: &mut AlreadyMade,
) -> ChunkOutcome {
    let docs: Vec<Vec<String>> = sentences.iter().map(|s| s.tokens.clone()).collect();
    let fit = topics::fit(&docs, topic_config);
    if fit.is_failure() {
        warn!(source_id, depth = 0, "root topic fit failed; document yields no graph");
        return ChunkOutcome::default();
    }

    let root_keyword = format!("{}*", fit.top_keyword);
    let mut recursion = Recursion {
        sentences,
        similarity: fit.similarity,
        source_id,
        config,
        already_made,
        outcome: ChunkOutcome::default(),
    };

    recursion.already_made.insert(&fit.top_keyword);
    let root_node = hierarchy_node(&root_keyword, &root_keyword, &[], sentences, source_id);
    recursion.outcome.batch.push_node(root_node);
    recursion.outcome.root_keyword = root_keyword.clone();

    let threshold = initial_threshold(&recursion.similarity, config.threshold_quantile);
    let all_indices: Vec<usize> = sentences.iter().map(|s| s.index).collect();
    recursion.split(&all_indices, 0, &root_keyword, threshold);
    recursion.outcome
}

impl Recursion<'_> {
    fn recurse(&mut self, chunk: &[usize], depth: usize, keyword: &str, threshold: f64) {
        let token_total = self.token_total(chunk);

        let mut flag = -1i8;
        if chunk.len() <= self.config.drop_max_sentences
            || token_total <= self.config.drop_max_tokens
        {
            flag = 1;
        }
        if depth >= self.config.max_depth {
            flag = if token_total > self.config.flat_split_min_tokens {
                3
            } else {
                2
            };
        }

        match flag {
            1 => {
                debug!(source_id = self.source_id, depth, flag, "chunk dropped");
            }
            2 => {
                debug!(source_id = self.source_id, depth, flag, "chunk finalized");
                self.outcome.finalized.push(FinalizedChunk {
                    indices: chunk.to_vec(),
                    keyword: keyword.to_string(),
                });
            }
            3 => {
                debug!(source_id = self.source_id, depth, flag, "chunk split flat");
                for piece in flat_split(chunk, &self.similarity, self.config.max_flat_chunks) {
                    self.outcome.finalized.push(FinalizedChunk {
                        indices: piece,
                        keyword: keyword.to_string(),
                    });
                }
            }
            _ => self.split(chunk, depth, keyword, threshold),
        }
    }

    fn split(&mut self, chunk: &[usize], depth: usize, keyword: &str, threshold: f64) {
        let groups = group_adjacent(
            chunk,
            &self.similarity,
            threshold,
            self.config.max_groups_per_step,
        );

        let group_tokens: Vec<Vec<String>> = groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .flat_map(|&index| self.sentences[index].tokens.iter().cloned())
                    .collect()
            })
            .collect();
        let ranked = tfidf::rank_keywords(&group_tokens);

        let mut child_keywords = Vec::with_capacity(groups.len());
        for (group, candidates) in groups.iter().zip(ranked.iter()) {
            match candidates.iter().find(|k| !self.already_made.contains(k)) {
                Some(candidate) => {
                    let child = self.emit_hierarchy_node(group, candidate, keyword);
                    self.already_made.insert(candidate);
                    child_keywords.push(child);
                }
                None => {
                    warn!(
                        source_id = self.source_id,
                        depth,
                        fallback = "unnamed subtree",
                        "no fresh keyword for sub-chunk"
                    );
                    child_keywords.push(String::new());
                }
            }
        }

        let next_threshold = threshold * self.config.threshold_growth;
        for (group, child) in groups.iter().zip(child_keywords.iter()) {
            self.recurse(group, depth + 1, child, next_threshold);
        }
    }

    /// Emits a hierarchy node and its parent edge; returns the child name.
    ///
    /// Small sentence groups keep their sentences as the node description;
    /// larger groups become connective nodes with a starred name and an
    /// empty description.
    fn emit_hierarchy_node(&mut self, group: &[usize], candidate: &str, parent: &str) -> String {
        let group_tokens = self.token_total(group);
        let (name, indices): (String, &[usize]) =
            if group_tokens < self.config.inline_description_max_tokens {
                (candidate.to_string(), group)
            } else {
                (format!("{candidate}*"), &[])
            };

        let node = hierarchy_node(&name, candidate, indices, self.sentences, self.source_id);
        self.outcome.batch.push_node(node);
        self.outcome.batch.push_edge(GraphEdge {
            source: parent.to_string(),
            target: name.clone(),
            relation: RELATED.to_string(),
            source_id: self.source_id.to_string(),
        });
        name
    }

    fn token_total(&self, chunk: &[usize]) -> usize {
        chunk
            .iter()
            .map(|&index| self.sentences[index].tokens.len())
            .sum()
    }
}

/// Builds a hierarchy node whose description is the joined group text.
fn hierarchy_node(
    name: &str,
    label: &str,
    indices: &[usize],
    sentences: &[Sentence],
    source_id: &str,
) -> KeywordNode {
    let resolved = indices
        .iter()
        .filter_map(|&index| sentences.get(index).map(|s| s.text.as_str()))
        .collect::<Vec<_>>()
        .join(" ");

    KeywordNode {
        name: name.to_string(),
        label: label.to_string(),
        descriptions: vec![DescriptionEntry {
            description: resolved.clone(),
            source_id: source_id.to_string(),
            sentence_indices: indices.to_vec(),
        }],
        original_sentences: vec![SentenceRecord {
            original_sentence: resolved,
            source_id: source_id.to_string(),
            score: 1.0,
            sentence_indices: indices.to_vec(),
        }],
        source_id: source_id.to_string(),
        embedding: None,
    }
}

/// Lower-quartile seed for the adjacency threshold.
///
/// Uses the upper-triangular entries excluding the diagonal; a matrix too
/// small to have any falls back to the midpoint.
fn initial_threshold(similarity: &[Vec<f64>], quantile: f64) -> f64 {
    let mut upper = Vec::new();
    for i in 0..similarity.len() {
        for j in (i + 1)..similarity.len() {
            upper.push(similarity[i][j]);
        }
    }
    if upper.is_empty() {
        return 0.5;
    }
    upper.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let position = (upper.len() - 1) as f64 * quantile.clamp(0.0, 1.0);
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    if low == high {
        upper[low]
    } else {
        let fraction = position - low as f64;
        upper[low] * (1.0 - fraction) + upper[high] * fraction
    }
}

/// Sweeps the chunk left to right into contiguous groups.
///
/// With more than `max_groups` sentences the threshold is clamped to the
/// `(max_groups - 1)`-th smallest adjacent similarity, which bounds the
/// number of groups one step can produce.
fn group_adjacent(
    chunk: &[usize],
    similarity: &[Vec<f64>],
    mut threshold: f64,
    max_groups: usize,
) -> Vec<Vec<usize>> {
    if chunk.is_empty() {
        return Vec::new();
    }

    if chunk.len() > max_groups {
        let mut gaps: Vec<f64> = (1..chunk.len())
            .map(|i| similarity[chunk[i]][chunk[i - 1]])
            .collect();
        gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        threshold = threshold.min(gaps[max_groups - 2]);
    }

    let mut groups = Vec::new();
    let mut current = vec![chunk[0]];
    for i in 1..chunk.len() {
        if similarity[chunk[i]][chunk[i - 1]] >= threshold {
            current.push(chunk[i]);
        } else {
            groups.push(std::mem::take(&mut current));
            current.push(chunk[i]);
        }
    }
    groups.push(current);
    groups
}

/// Splits a depth-capped oversized chunk at its weakest adjacent
/// similarities into at most `max_pieces` flat pieces.
fn flat_split(chunk: &[usize], similarity: &[Vec<f64>], max_pieces: usize) -> Vec<Vec<usize>> {
    let pieces = chunk.len().min(max_pieces.max(1));
    if pieces <= 1 || chunk.len() < 2 {
        return vec![chunk.to_vec()];
    }

    let mut gaps: Vec<(f64, usize)> = (1..chunk.len())
        .map(|i| (similarity[chunk[i]][chunk[i - 1]], i))
        .collect();
    gaps.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut boundaries: Vec<usize> = gaps.iter().take(pieces - 1).map(|&(_, i)| i).collect();
    boundaries.sort_unstable();

    let mut result = Vec::with_capacity(pieces);
    let mut start = 0usize;
    for boundary in boundaries {
        result.push(chunk[start..boundary].to_vec());
        start = boundary;
    }
    result.push(chunk[start..].to_vec());
    result
}
