//! Concept node and edge emission for one finalized chunk.
//!
//! The chunk's phrases are scored and grouped once, then emitted best
//! first: an edge to the parent keyword for every phrase, a node for every
//! phrase not yet emitted this job, and the near-duplicates of a chosen
//! phrase as its children. Emission stops after a fixed number of new
//! top-level nodes so one chunk cannot dominate the graph.

use std::collections::HashMap;

use tracing::debug;

use crate::chunker::RELATED;
use crate::config::ScoringConfig;
use crate::embeddings::Embedder;
use crate::graph::{
    strip_star, AlreadyMade, DescriptionEntry, GraphBatch, GraphEdge, KeywordNode, SentenceRecord,
};
use crate::phrases::Sentence;
use crate::scoring::{self, PhraseMap, ScoredPhrase};

/// Emits nodes and edges for one finalized chunk.
///
/// Emission is aborted when the parent keyword's base name does not occur
/// in the chunk; the chunk then contributes nothing.
#[allow(clippy::too_many_arguments)]
pub fn extract_from_chunk(
    indices: &[usize],
    sentences: &[Sentence],
    parent_keyword: &str,
    chunk_tfidf: &HashMap<String, f64>,
    already_made: &mut AlreadyMade,
    embedder: &mut Embedder,
    source_id: &str,
    config: &ScoringConfig,
) -> GraphBatch {
    let mut batch = GraphBatch::new();
    if parent_keyword.is_empty() {
        return batch;
    }

    let occurrences = PhraseMap::from_sentences(indices.iter().map(|&i| &sentences[i]));
    let base = strip_star(parent_keyword);
    let Some(parent_indices) = occurrences.get(base).map(|indices| indices.to_vec()) else {
        debug!(
            source_id,
            parent = parent_keyword,
            "parent keyword absent from chunk; emission skipped"
        );
        return batch;
    };

    let scored = scoring::score_phrases(&occurrences, sentences, chunk_tfidf, embedder);
    let groups = scoring::group_near_duplicates(&scored, config.group_threshold);
    let embeddings: HashMap<&str, &[f32]> = scored
        .iter()
        .map(|p| (p.phrase.as_str(), p.embedding.as_slice()))
        .collect();

    batch.push_node(concept_node(
        parent_keyword,
        &parent_indices,
        sentences,
        source_id,
        embeddings.get(base).map(|e| e.to_vec()),
        config,
    ));

    let mut new_nodes = 0usize;
    for ScoredPhrase { phrase, .. } in &scored {
        if phrase == base {
            continue;
        }

        batch.push_edge(GraphEdge {
            source: parent_keyword.to_string(),
            target: phrase.clone(),
            relation: relation_label(&occurrences, sentences, base, phrase, config),
            source_id: source_id.to_string(),
        });

        if already_made.contains(phrase) {
            continue;
        }
        let phrase_indices = occurrences.get(phrase).unwrap_or(&[]);
        batch.push_node(concept_node(
            phrase,
            phrase_indices,
            sentences,
            source_id,
            embeddings.get(phrase.as_str()).map(|e| e.to_vec()),
            config,
        ));
        already_made.insert(phrase);
        new_nodes += 1;

        if let Some(members) = groups.get(phrase) {
            emit_group_children(
                &mut batch,
                phrase,
                members,
                &occurrences,
                sentences,
                &embeddings,
                already_made,
                source_id,
                config,
            );
        }

        if new_nodes >= config.max_new_nodes {
            break;
        }
    }
    batch
}

/// Emits the near-duplicate members of a chosen phrase as its children.
#[allow(clippy::too_many_arguments)]
fn emit_group_children(
    batch: &mut GraphBatch,
    representative: &str,
    members: &[String],
    occurrences: &PhraseMap,
    sentences: &[Sentence],
    embeddings: &HashMap<&str, &[f32]>,
    already_made: &mut AlreadyMade,
    source_id: &str,
    config: &ScoringConfig,
) {
    for member in members.iter().take(config.max_group_children) {
        if already_made.contains(member) {
            continue;
        }
        let member_indices = occurrences.get(member).unwrap_or(&[]);
        batch.push_node(concept_node(
            member,
            member_indices,
            sentences,
            source_id,
            embeddings.get(member.as_str()).map(|e| e.to_vec()),
            config,
        ));
        already_made.insert(member);
        batch.push_edge(GraphEdge {
            source: representative.to_string(),
            target: member.clone(),
            relation: relation_label(occurrences, sentences, representative, member, config),
            source_id: source_id.to_string(),
        });
    }
}

/// Builds a concept node carrying its occurrence sentences as descriptions.
fn concept_node(
    name: &str,
    indices: &[usize],
    sentences: &[Sentence],
    source_id: &str,
    embedding: Option<Vec<f32>>,
    config: &ScoringConfig,
) -> KeywordNode {
    let mut descriptions = Vec::new();
    let mut original_sentences = Vec::new();

    for &index in indices.iter().take(config.max_description_sentences) {
        let Some(sentence) = sentences.get(index) else {
            continue;
        };
        descriptions.push(DescriptionEntry {
            description: sentence.text.clone(),
            source_id: source_id.to_string(),
            sentence_indices: vec![index],
        });
        original_sentences.push(SentenceRecord {
            original_sentence: sentence.text.clone(),
            source_id: source_id.to_string(),
            score: 1.0,
            sentence_indices: vec![index],
        });
    }

    if descriptions.is_empty() {
        descriptions.push(DescriptionEntry {
            description: String::new(),
            source_id: source_id.to_string(),
            sentence_indices: Vec::new(),
        });
        original_sentences.push(SentenceRecord {
            original_sentence: String::new(),
            source_id: source_id.to_string(),
            score: 1.0,
            sentence_indices: Vec::new(),
        });
    }

    KeywordNode {
        name: name.to_string(),
        label: name.to_string(),
        descriptions,
        original_sentences,
        source_id: source_id.to_string(),
        embedding,
    }
}

/// Derives the relation label from where source and target co-occur.
///
/// The shortest co-occurrence sentence within the length bound wins; ties
/// go to the earlier sentence. Pairs that never co-occur fall back to the
/// generic label.
fn relation_label(
    occurrences: &PhraseMap,
    sentences: &[Sentence],
    source: &str,
    target: &str,
    config: &ScoringConfig,
) -> String {
    let (Some(source_indices), Some(target_indices)) =
        (occurrences.get(source), occurrences.get(target))
    else {
        return RELATED.to_string();
    };

    let mut best: Option<(usize, usize)> = None;
    for &index in source_indices {
        if !target_indices.contains(&index) {
            continue;
        }
        let Some(sentence) = sentences.get(index) else {
            continue;
        };
        let length = sentence.text.chars().count();
        if length > config.max_relation_chars {
            continue;
        }
        if best.map_or(true, |(shortest, _)| length < shortest) {
            best = Some((length, index));
        }
    }

    best.map_or_else(
        || RELATED.to_string(),
        |(_, index)| sentences[index].text.clone(),
    )
}
