//! TF-IDF over pre-tokenized groups.
//!
//! Tokens arrive already phrase-extracted, so the vectorizer consumes them
//! as-is: no lowercasing, no re-tokenization. Scores use smoothed inverse
//! document frequency with L2 row normalization.

use std::collections::HashMap;

use crate::phrases;

/// Vocabulary cap when ranking sub-chunk keywords.
pub const RANK_MAX_FEATURES: usize = 1000;
/// Vocabulary cap when scoring the document's chunk collection.
pub const CHUNK_MAX_FEATURES: usize = 5000;

/// Ranks each group's tokens by TF-IDF, best first.
///
/// Only tokens with a positive score appear; equal scores keep the
/// earlier-appearing token first. An empty vocabulary yields empty ranks
/// for every group.
pub fn rank_keywords(groups: &[Vec<String>]) -> Vec<Vec<String>> {
    let Some(fitted) = fit(groups, RANK_MAX_FEATURES) else {
        return groups.iter().map(|_| Vec::new()).collect();
    };

    fitted
        .rows
        .iter()
        .map(|row| {
            let mut scored: Vec<(usize, f64)> = row
                .iter()
                .enumerate()
                .filter(|(_, score)| **score > 0.0)
                .map(|(feature, score)| (feature, *score))
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored
                .into_iter()
                .map(|(feature, _)| fitted.features[feature].clone())
                .collect()
        })
        .collect()
}

/// Scores every token of every chunk against the whole chunk collection.
pub fn chunk_scores(chunks: &[Vec<String>]) -> Vec<HashMap<String, f64>> {
    let Some(fitted) = fit(chunks, CHUNK_MAX_FEATURES) else {
        return chunks.iter().map(|_| HashMap::new()).collect();
    };

    fitted
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter(|(_, score)| **score > 0.0)
                .map(|(feature, score)| (fitted.features[feature].clone(), *score))
                .collect()
        })
        .collect()
}

struct Fitted {
    features: Vec<String>,
    rows: Vec<Vec<f64>>,
}

fn fit(docs: &[Vec<String>], max_features: usize) -> Option<Fitted> {
    if docs.is_empty() {
        return None;
    }

    // Vocabulary in first-occurrence order; ranking relies on this for its
    // tie-break.
    let mut order: Vec<String> = Vec::new();
    let mut corpus_counts: HashMap<String, usize> = HashMap::new();
    for doc in docs {
        for token in doc {
            if phrases::is_stopword_en(token) {
                continue;
            }
            let entry = corpus_counts.entry(token.clone()).or_insert(0);
            if *entry == 0 {
                order.push(token.clone());
            }
            *entry += 1;
        }
    }
    if order.is_empty() {
        return None;
    }

    let features = cap_features(order, &corpus_counts, max_features);
    let index: HashMap<&str, usize> = features
        .iter()
        .enumerate()
        .map(|(i, f)| (f.as_str(), i))
        .collect();

    let mut document_frequency = vec![0usize; features.len()];
    let mut term_counts: Vec<HashMap<usize, usize>> = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for token in doc {
            if let Some(&feature) = index.get(token.as_str()) {
                *counts.entry(feature).or_insert(0) += 1;
            }
        }
        for &feature in counts.keys() {
            document_frequency[feature] += 1;
        }
        term_counts.push(counts);
    }

    let doc_total = docs.len() as f64;
    let idf: Vec<f64> = document_frequency
        .iter()
        .map(|&df| ((1.0 + doc_total) / (1.0 + df as f64)).ln() + 1.0)
        .collect();

    let rows = term_counts
        .into_iter()
        .map(|counts| {
            let mut row = vec![0.0f64; features.len()];
            for (feature, count) in counts {
                row[feature] = count as f64 * idf[feature];
            }
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for value in row.iter_mut() {
                    *value /= norm;
                }
            }
            row
        })
        .collect();

    Some(Fitted { features, rows })
}

/// Keeps the `max_features` most frequent terms, first occurrence winning ties.
fn cap_features(
    order: Vec<String>,
    corpus_counts: &HashMap<String, usize>,
    max_features: usize,
) -> Vec<String> {
    if order.len() <= max_features {
        return order;
    }
    let mut ranked: Vec<(usize, String)> = order.into_iter().enumerate().map(|(i, t)| (i, t)).collect();
    ranked.sort_by(|a, b| {
        corpus_counts[&b.1]
            .cmp(&corpus_counts[&a.1])
            .then(a.0.cmp(&b.0))
    });
    ranked.truncate(max_features);
    ranked.sort_by_key(|(i, _)| *i);
    ranked.into_iter().map(|(_, t)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn distinguishing_terms_outrank_shared_terms() {
        let groups = vec![
            doc(&["graph", "node", "node"]),
            doc(&["graph", "query"]),
        ];
        let ranks = rank_keywords(&groups);
        assert_eq!(ranks[0][0], "node");
        assert_eq!(ranks[1][0], "query");
    }

    #[test]
    fn zero_score_terms_are_excluded() {
        let groups = vec![doc(&["alpha"]), doc(&["beta"])];
        let ranks = rank_keywords(&groups);
        assert_eq!(ranks[0], vec!["alpha"]);
        assert_eq!(ranks[1], vec!["beta"]);
    }

    #[test]
    fn stopword_only_groups_produce_empty_ranks() {
        let groups = vec![doc(&["the", "and"]), doc(&["of"])];
        let ranks = rank_keywords(&groups);
        assert!(ranks.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn equal_scores_keep_first_appearance_order() {
        let groups = vec![doc(&["left", "right"])];
        let ranks = rank_keywords(&groups);
        assert_eq!(ranks[0], vec!["left", "right"]);
    }

    #[test]
    fn chunk_scores_cover_each_chunk_vocabulary() {
        let chunks = vec![doc(&["graph", "node"]), doc(&["graph", "edge"])];
        let scores = chunk_scores(&chunks);
        assert!(scores[0].contains_key("node"));
        assert!(scores[1].contains_key("edge"));
        assert!(scores[0]["node"] > scores[0]["graph"]);
    }
}
