//! Typed records flowing from extraction into the persisted graph.
//!
//! Descriptions and original sentences stay typed structs for the whole
//! pipeline and are serialized to JSON only at the persistence boundary.

use std::collections::HashSet;

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};

/// One description contributed to a node by one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionEntry {
    /// Resolved description text; may be empty for connective nodes.
    pub description: String,
    /// Source that contributed this entry.
    pub source_id: String,
    /// Document-wide indices of the sentences behind the text.
    #[serde(default)]
    pub sentence_indices: Vec<usize>,
}

/// One original sentence backing a description entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceRecord {
    /// The sentence text as segmented.
    pub original_sentence: String,
    /// Source that contributed this entry.
    pub source_id: String,
    /// Extraction confidence; rule-based extraction always reports 1.0.
    pub score: f64,
    /// Document-wide indices of the sentences behind the text.
    #[serde(default)]
    pub sentence_indices: Vec<usize>,
}

/// A concept or hierarchy node destined for the project graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordNode {
    /// Unique name within a project; hierarchy roots carry a trailing `*`.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Description entries, parallel to `original_sentences`.
    pub descriptions: Vec<DescriptionEntry>,
    /// Original-sentence entries, parallel to `descriptions`.
    pub original_sentences: Vec<SentenceRecord>,
    /// Source that emitted this record.
    pub source_id: String,
    /// Mean embedding of the contributing sentences, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A directed labelled relation between two node names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Name of the source node.
    pub source: String,
    /// Name of the target node.
    pub target: String,
    /// Short human-readable relation label.
    pub relation: String,
    /// Source that emitted this record.
    pub source_id: String,
}

/// Removes the hierarchy marker from a node name.
pub fn strip_star(name: &str) -> &str {
    name.strip_suffix('*').unwrap_or(name)
}

/// Per-job cache of node names already emitted, keyed by base name.
#[derive(Debug, Default)]
pub struct AlreadyMade {
    names: HashSet<String>,
}

impl AlreadyMade {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a name; returns false when its base name was already present.
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(strip_star(name).to_string())
    }

    /// True when the base name has been emitted before.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(strip_star(name))
    }

    /// Number of distinct base names recorded.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The in-memory emission batch for one ingestion job.
///
/// Nodes are merged by exact name on insert, so each name appears at most
/// once in the stream handed to the graph store.
#[derive(Debug, Default, Clone)]
pub struct GraphBatch {
    /// Nodes in emission order.
    pub nodes: Vec<KeywordNode>,
    /// Edges in emission order.
    pub edges: Vec<GraphEdge>,
}

impl GraphBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the batch holds neither nodes nor edges.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Adds a node, merging entry lists when the name was already emitted.
    pub fn push_node(&mut self, node: KeywordNode) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.name == node.name) {
            existing.label = node.label;
            merge_descriptions(&mut existing.descriptions, node.descriptions);
            merge_sentences(&mut existing.original_sentences, node.original_sentences);
            if existing.embedding.is_none() {
                existing.embedding = node.embedding;
            }
        } else {
            self.nodes.push(node);
        }
    }

    /// Adds an edge, dropping exact duplicates.
    pub fn push_edge(&mut self, edge: GraphEdge) {
        let duplicate = self.edges.iter().any(|e| {
            e.source == edge.source && e.target == edge.target && e.relation == edge.relation
        });
        if !duplicate {
            self.edges.push(edge);
        }
    }

    /// Appends another batch, keeping the node-name and edge uniqueness.
    pub fn extend(&mut self, other: GraphBatch) {
        for node in other.nodes {
            self.push_node(node);
        }
        for edge in other.edges {
            self.push_edge(edge);
        }
    }
}

/// Unions description entries, deduplicated by serialized structural equality.
pub fn merge_descriptions(existing: &mut Vec<DescriptionEntry>, incoming: Vec<DescriptionEntry>) {
    let mut seen: HashSet<u32> = existing.iter().map(record_key).collect();
    for entry in incoming {
        if seen.insert(record_key(&entry)) {
            existing.push(entry);
        }
    }
}

/// Unions original-sentence entries, deduplicated like descriptions.
pub fn merge_sentences(existing: &mut Vec<SentenceRecord>, incoming: Vec<SentenceRecord>) {
    let mut seen: HashSet<u32> = existing.iter().map(record_key).collect();
    for entry in incoming {
        if seen.insert(record_key(&entry)) {
            existing.push(entry);
        }
    }
}

/// Structural-equality key: CRC32 of the serialized record.
pub(crate) fn record_key<T: Serialize>(record: &T) -> u32 {
    let bytes = serde_json::to_vec(record).expect("graph records serialize to JSON");
    let mut hasher = Crc32::new();
    hasher.update(&bytes);
    hasher.finalize()
}

/// Counts reported back to the caller after one ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Nodes newly created in the project graph.
    pub nodes_created: usize,
    /// Edges newly created in the project graph.
    pub edges_created: usize,
    /// Finalized chunks the document was reduced to.
    pub chunks: usize,
    /// Root keyword of the document's hierarchy, empty on zero-emit runs.
    pub root_keyword: String,
    /// Wall-clock duration of the ingestion.
    pub duration_ms: u64,
}

impl IngestReport {
    /// Report for runs that produced nothing and wrote nothing.
    pub fn zero(duration_ms: u64) -> Self {
        Self {
            nodes_created: 0,
            edges_created: 0,
            chunks: 0,
            root_keyword: String::new(),
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, description: &str, source: &str) -> KeywordNode {
        KeywordNode {
            name: name.to_string(),
            label: name.to_string(),
            descriptions: vec![DescriptionEntry {
                description: description.to_string(),
                source_id: source.to_string(),
                sentence_indices: vec![0],
            }],
            original_sentences: vec![SentenceRecord {
                original_sentence: description.to_string(),
                source_id: source.to_string(),
                score: 1.0,
                sentence_indices: vec![0],
            }],
            source_id: source.to_string(),
            embedding: None,
        }
    }

    #[test]
    fn already_made_ignores_hierarchy_marker() {
        let mut cache = AlreadyMade::new();
        assert!(cache.insert("letter*"));
        assert!(cache.contains("letter"));
        assert!(!cache.insert("letter"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn batch_merges_nodes_by_name() {
        let mut batch = GraphBatch::new();
        batch.push_node(node("quantum", "first sentence", "s1"));
        batch.push_node(node("quantum", "second sentence", "s1"));
        assert_eq!(batch.nodes.len(), 1);
        assert_eq!(batch.nodes[0].descriptions.len(), 2);
    }

    #[test]
    fn batch_drops_duplicate_entries_and_edges() {
        let mut batch = GraphBatch::new();
        batch.push_node(node("quantum", "same sentence", "s1"));
        batch.push_node(node("quantum", "same sentence", "s1"));
        assert_eq!(batch.nodes[0].descriptions.len(), 1);

        let edge = GraphEdge {
            source: "a".to_string(),
            target: "b".to_string(),
            relation: "Related".to_string(),
            source_id: "s1".to_string(),
        };
        batch.push_edge(edge.clone());
        batch.push_edge(edge);
        assert_eq!(batch.edges.len(), 1);
    }

    #[test]
    fn strip_star_only_removes_the_suffix() {
        assert_eq!(strip_star("letter*"), "letter");
        assert_eq!(strip_star("letter"), "letter");
        assert_eq!(strip_star("a*b"), "a*b");
    }
}
