//! Latent topic model over tokenized sentences.
//!
//! A small collapsed Gibbs sampler stands in for the usual variational LDA:
//! it only has to produce a stable top keyword and per-sentence topic
//! distributions for cosine comparison, so a fixed-seed sampler with a
//! bounded sweep count is enough. Instances are per-job; nothing is shared.

use std::collections::HashMap;
use std::time::Instant;

use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::TopicConfig;
use crate::embeddings::cosine_matrix;

/// Outcome of one topic model fit.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicFit {
    /// Highest-weight term of topic zero, empty on fit failure.
    pub top_keyword: String,
    /// Pairwise cosine similarity of per-sentence topic vectors; empty on
    /// fit failure.
    pub similarity: Vec<Vec<f64>>,
}

impl TopicFit {
    /// The fit-failure value callers must treat as "chunk is terminal".
    pub fn failed() -> Self {
        Self {
            top_keyword: String::new(),
            similarity: Vec::new(),
        }
    }

    /// True when the fit failed (empty vocabulary, degenerate corpus, or
    /// exceeded time budget).
    pub fn is_failure(&self) -> bool {
        self.similarity.is_empty()
    }
}

/// Fits the topic model over per-sentence token lists.
///
/// The similarity matrix is indexed by position in `docs`; callers map
/// positions back to global sentence indices themselves.
pub fn fit(docs: &[Vec<String>], config: &TopicConfig) -> TopicFit {
    let started = Instant::now();

    let mut vocab_ids: HashMap<&str, usize> = HashMap::new();
    let mut vocab: Vec<&str> = Vec::new();
    let mut corpus: Vec<Vec<usize>> = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut ids = Vec::with_capacity(doc.len());
        for token in doc {
            let next_id = vocab.len();
            let id = *vocab_ids.entry(token.as_str()).or_insert(next_id);
            if id == next_id {
                vocab.push(token.as_str());
            }
            ids.push(id);
        }
        corpus.push(ids);
    }

    if corpus.is_empty() || vocab.is_empty() {
        return TopicFit::failed();
    }

    let topics = config.num_topics.max(1);
    let vocab_size = vocab.len();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let mut doc_topic = vec![vec![0u32; topics]; corpus.len()];
    let mut topic_term = vec![vec![0u32; vocab_size]; topics];
    let mut topic_total = vec![0u32; topics];
    let mut assignments: Vec<Vec<usize>> = Vec::with_capacity(corpus.len());

    // Deterministic round-robin initialization keeps the seed the only
    // source of randomness during sampling.
    let mut cursor = 0usize;
    for (d, doc) in corpus.iter().enumerate() {
        let mut doc_assignments = Vec::with_capacity(doc.len());
        for &word in doc {
            let topic = cursor % topics;
            cursor += 1;
            doc_topic[d][topic] += 1;
            topic_term[topic][word] += 1;
            topic_total[topic] += 1;
            doc_assignments.push(topic);
        }
        assignments.push(doc_assignments);
    }

    let sweeps = config
        .passes
        .min((config.iterations / corpus.len().max(1)).max(1))
        .max(1);

    let mut weights = vec![0.0f64; topics];
    for _ in 0..sweeps {
        if started.elapsed() > config.time_budget {
            return TopicFit::failed();
        }
        for d in 0..corpus.len() {
            for n in 0..corpus[d].len() {
                let word = corpus[d][n];
                let old = assignments[d][n];
                doc_topic[d][old] -= 1;
                topic_term[old][word] -= 1;
                topic_total[old] -= 1;

                for (k, weight) in weights.iter_mut().enumerate() {
                    let doc_part = doc_topic[d][k] as f64 + config.alpha;
                    let term_part = (topic_term[k][word] as f64 + config.beta)
                        / (topic_total[k] as f64 + vocab_size as f64 * config.beta);
                    *weight = doc_part * term_part;
                }
                let new = match WeightedIndex::new(&weights) {
                    Ok(dist) => dist.sample(&mut rng),
                    Err(_) => old,
                };

                doc_topic[d][new] += 1;
                topic_term[new][word] += 1;
                topic_total[new] += 1;
                assignments[d][n] = new;
            }
        }
    }

    let theta: Vec<Vec<f64>> = corpus
        .iter()
        .enumerate()
        .map(|(d, doc)| {
            let total = doc.len() as f64 + topics as f64 * config.alpha;
            (0..topics)
                .map(|k| (doc_topic[d][k] as f64 + config.alpha) / total)
                .collect()
        })
        .collect();

    // Vocabulary ids follow first occurrence, so a strict comparison breaks
    // weight ties toward the earliest-appearing term.
    let mut best = 0usize;
    for (word, &count) in topic_term[0].iter().enumerate() {
        if count > topic_term[0][best] {
            best = word;
        }
    }

    TopicFit {
        top_keyword: vocab[best].to_string(),
        similarity: cosine_matrix(&theta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn fit_is_reproducible() {
        let docs = vec![
            doc(&["alpha", "letter"]),
            doc(&["beta", "letter"]),
            doc(&["alpha", "beta", "gamma"]),
        ];
        let config = TopicConfig::default();
        let first = fit(&docs, &config);
        let second = fit(&docs, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn top_keyword_comes_from_the_vocabulary() {
        let docs = vec![doc(&["graph", "node"]), doc(&["graph", "edge"])];
        let result = fit(&docs, &TopicConfig::default());
        assert!(!result.is_failure());
        assert!(["graph", "node", "edge"].contains(&result.top_keyword.as_str()));
    }

    #[test]
    fn similarity_matrix_matches_corpus_shape() {
        let docs = vec![doc(&["one"]), doc(&["two"]), doc(&["three"])];
        let result = fit(&docs, &TopicConfig::default());
        assert_eq!(result.similarity.len(), 3);
        for (i, row) in result.similarity.iter().enumerate() {
            assert_eq!(row.len(), 3);
            assert!((row[i] - 1.0).abs() < 1e-12);
            for (j, value) in row.iter().enumerate() {
                assert!((value - result.similarity[j][i]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn empty_corpus_is_a_fit_failure() {
        assert!(fit(&[], &TopicConfig::default()).is_failure());
        assert!(fit(&[Vec::new(), Vec::new()], &TopicConfig::default()).is_failure());
    }

    #[test]
    fn exhausted_time_budget_is_a_fit_failure() {
        let docs = vec![doc(&["alpha"]), doc(&["beta"])];
        let config = TopicConfig {
            time_budget: std::time::Duration::ZERO,
            ..TopicConfig::default()
        };
        assert!(fit(&docs, &config).is_failure());
    }
}
