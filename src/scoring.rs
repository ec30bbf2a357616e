//! Phrase importance scoring and near-duplicate grouping within one chunk.

use std::collections::HashMap;

use crate::embeddings::{cosine_f32, Embedder};
use crate::phrases::Sentence;

/// Occurrence map for one chunk: phrase → sentence indices, in order of
/// first appearance. Lives only while the chunk is being extracted.
#[derive(Debug, Default)]
pub struct PhraseMap {
    entries: Vec<(String, Vec<usize>)>,
    index: HashMap<String, usize>,
}

impl PhraseMap {
    /// Builds the occurrence map over the sentences of one chunk.
    pub fn from_sentences<'a, I>(sentences: I) -> Self
    where
        I: IntoIterator<Item = &'a Sentence>,
    {
        let mut map = Self::default();
        for sentence in sentences {
            for token in &sentence.tokens {
                match map.index.get(token) {
                    Some(&slot) => {
                        let indices = &mut map.entries[slot].1;
                        if indices.last() != Some(&sentence.index) {
                            indices.push(sentence.index);
                        }
                    }
                    None => {
                        map.index.insert(token.clone(), map.entries.len());
                        map.entries.push((token.clone(), vec![sentence.index]));
                    }
                }
            }
        }
        map
    }

    /// Sentence indices where the phrase occurs.
    pub fn get(&self, phrase: &str) -> Option<&[usize]> {
        self.index
            .get(phrase)
            .map(|&slot| self.entries[slot].1.as_slice())
    }

    /// True when the phrase occurs in this chunk.
    pub fn contains(&self, phrase: &str) -> bool {
        self.index.contains_key(phrase)
    }

    /// Phrases with their occurrence indices, in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.entries
            .iter()
            .map(|(phrase, indices)| (phrase.as_str(), indices.as_slice()))
    }

    /// Number of distinct phrases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no phrase occurs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A phrase with its importance score and chunk-level embedding.
#[derive(Debug, Clone)]
pub struct ScoredPhrase {
    /// The phrase text.
    pub phrase: String,
    /// Importance within the chunk; higher is better.
    pub score: f64,
    /// Mean embedding over the phrase's occurrence sentences.
    pub embedding: Vec<f32>,
}

/// Scores every phrase of the chunk, best first.
///
/// The score combines occurrence count, phrase length, and the phrase's
/// TF-IDF weight within the document's chunk collection; phrases the
/// collection never scored fall back to their in-chunk term frequency.
/// Equal scores keep first-appearance order. Embeddings are computed once
/// here and reused by grouping and node emission.
pub fn score_phrases(
    occurrences: &PhraseMap,
    sentences: &[Sentence],
    chunk_tfidf: &HashMap<String, f64>,
    embedder: &mut Embedder,
) -> Vec<ScoredPhrase> {
    let total_sentences = occurrences
        .iter()
        .flat_map(|(_, indices)| indices.iter())
        .collect::<std::collections::HashSet<_>>()
        .len()
        .max(1);

    let mut scored: Vec<ScoredPhrase> = occurrences
        .iter()
        .map(|(phrase, indices)| {
            let weight = chunk_tfidf
                .get(phrase)
                .copied()
                .unwrap_or(indices.len() as f64 / total_sentences as f64);
            let count_part = 1.0 + (1.0 + indices.len() as f64).ln();
            let length_part = 1.0 + (1.0 + phrase.chars().count() as f64).ln();
            ScoredPhrase {
                phrase: phrase.to_string(),
                score: count_part * length_part * weight,
                embedding: embedder.embed_phrase(phrase, indices, sentences),
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// Groups near-duplicate phrases by embedding cosine.
///
/// Walking phrases best-first, each ungrouped phrase seeds a group and
/// collects the remaining phrases whose cosine clears the threshold against
/// the seed and every member already accepted. The seed is the group's
/// representative, so the representative is always the highest-scored
/// member. Returns representative → other members, best first.
pub fn group_near_duplicates(
    scored: &[ScoredPhrase],
    threshold: f64,
) -> HashMap<String, Vec<String>> {
    let mut grouped = vec![false; scored.len()];
    let mut groups = HashMap::new();

    for seed in 0..scored.len() {
        if grouped[seed] {
            continue;
        }
        grouped[seed] = true;
        let mut members: Vec<usize> = Vec::new();
        for candidate in (seed + 1)..scored.len() {
            if grouped[candidate] {
                continue;
            }
            let close_to_seed =
                cosine_f32(&scored[seed].embedding, &scored[candidate].embedding) >= threshold;
            let close_to_members = members.iter().all(|&member| {
                cosine_f32(&scored[member].embedding, &scored[candidate].embedding) >= threshold
            });
            if close_to_seed && close_to_members {
                grouped[candidate] = true;
                members.push(candidate);
            }
        }
        groups.insert(
            scored[seed].phrase.clone(),
            members
                .into_iter()
                .map(|member| scored[member].phrase.clone())
                .collect(),
        );
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::language::Language;

    fn sentence(index: usize, text: &str, tokens: &[&str]) -> Sentence {
        Sentence {
            index,
            text: text.to_string(),
            lang: Language::English,
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn embedder() -> Embedder {
        Embedder::new(EmbeddingConfig::default())
    }

    #[test]
    fn occurrences_preserve_first_appearance_order() {
        let sentences = vec![
            sentence(0, "alpha beta", &["alpha", "beta"]),
            sentence(1, "beta gamma", &["beta", "gamma"]),
        ];
        let map = PhraseMap::from_sentences(&sentences);
        let phrases: Vec<&str> = map.iter().map(|(p, _)| p).collect();
        assert_eq!(phrases, vec!["alpha", "beta", "gamma"]);
        assert_eq!(map.get("beta"), Some(&[0usize, 1][..]));
    }

    #[test]
    fn frequent_phrases_score_higher_than_rare_ones() {
        let sentences = vec![
            sentence(0, "graph theory basics", &["graph theory"]),
            sentence(1, "graph theory again", &["graph theory"]),
            sentence(2, "one appearance", &["appearance"]),
        ];
        let map = PhraseMap::from_sentences(&sentences);
        let scored = score_phrases(&map, &sentences, &HashMap::new(), &mut embedder());
        assert_eq!(scored[0].phrase, "graph theory");
        assert!(scored[0].score > scored[1].score);
    }

    #[test]
    fn chunk_tfidf_outweighs_raw_frequency() {
        let sentences = vec![sentence(0, "alpha beta", &["alpha", "beta"])];
        let map = PhraseMap::from_sentences(&sentences);
        let mut tfidf = HashMap::new();
        tfidf.insert("alpha".to_string(), 0.1);
        tfidf.insert("beta".to_string(), 0.9);
        let scored = score_phrases(&map, &sentences, &tfidf, &mut embedder());
        assert_eq!(scored[0].phrase, "beta");
    }

    #[test]
    fn phrases_sharing_identical_context_are_grouped() {
        // Neither phrase occurs literally in the text, so both embed the
        // same unhighlighted sentence and land in one group.
        let sentences = vec![sentence(0, "shared context sentence", &["alpha", "beta"])];
        let map = PhraseMap::from_sentences(&sentences);
        let scored = score_phrases(&map, &sentences, &HashMap::new(), &mut embedder());
        let groups = group_near_duplicates(&scored, 0.98);
        assert_eq!(groups.len(), 1);
        let (representative, members) = groups.iter().next().unwrap();
        assert_eq!(representative, &scored[0].phrase);
        assert_eq!(members, &vec![scored[1].phrase.clone()]);
    }

    #[test]
    fn distinct_phrases_stay_in_their_own_groups() {
        let sentences = vec![
            sentence(0, "quantum physics is strange", &["quantum physics"]),
            sentence(1, "medieval castles have moats", &["medieval castles"]),
        ];
        let map = PhraseMap::from_sentences(&sentences);
        let scored = score_phrases(&map, &sentences, &HashMap::new(), &mut embedder());
        let groups = group_near_duplicates(&scored, 0.98);
        assert_eq!(groups.len(), 2);
        assert!(groups.values().all(|members| members.is_empty()));
    }
}
