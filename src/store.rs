//! Graph persistence contract and the in-memory reference store.
//!
//! Stores are addressed only through the MERGE contract: merging a batch
//! twice yields the same graph as merging it once, node identity is
//! `(name, brain_id)`, and edge identity is
//! `(source, target, relation, brain_id)`.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::graph::{merge_descriptions, merge_sentences, GraphBatch, GraphEdge, KeywordNode};

/// Counts of rows a merge actually created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Nodes that did not exist before the merge.
    pub nodes_created: usize,
    /// Edges that did not exist before the merge.
    pub edges_created: usize,
}

/// Counts of rows touched while removing one source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoveStats {
    /// Nodes deleted because their entry lists became empty.
    pub nodes_removed: usize,
    /// Nodes that lost entries but survived with other sources' data.
    pub nodes_updated: usize,
    /// Edges deleted.
    pub edges_removed: usize,
}

/// Errors surfaced by graph stores.
#[derive(Debug)]
pub enum StoreError {
    /// Transient I/O failure; stores retry these before surfacing.
    Transient(String),
    /// Contract violation or corruption that retries cannot fix.
    Fatal(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(message) => write!(f, "transient store failure: {message}"),
            Self::Fatal(message) => write!(f, "fatal store failure: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence seam for project graphs.
///
/// A batch is transactional: either all of its nodes and edges are
/// persisted or none are. Edges whose endpoints are missing from both the
/// batch and the store cause the endpoint to be created as a bare node, the
/// way a labelled-property-graph MERGE would.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotently merges a batch into the project graph.
    async fn merge(&self, batch: &GraphBatch, brain_id: &str) -> Result<MergeStats, StoreError>;

    /// Removes exactly the contributions of one source from the project
    /// graph, deleting nodes only when their entry lists become empty.
    async fn remove_source(
        &self,
        source_id: &str,
        brain_id: &str,
    ) -> Result<RemoveStats, StoreError>;
}

#[derive(Debug, Default, Clone)]
struct ProjectGraph {
    nodes: HashMap<String, KeywordNode>,
    edges: Vec<GraphEdge>,
}

/// In-memory store used by tests and embedded callers.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    projects: Mutex<HashMap<String, ProjectGraph>>,
}

impl MemoryGraphStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one node, if present.
    pub async fn node(&self, brain_id: &str, name: &str) -> Option<KeywordNode> {
        let projects = self.projects.lock().await;
        projects.get(brain_id)?.nodes.get(name).cloned()
    }

    /// Number of nodes in a project graph.
    pub async fn node_count(&self, brain_id: &str) -> usize {
        let projects = self.projects.lock().await;
        projects.get(brain_id).map_or(0, |graph| graph.nodes.len())
    }

    /// Number of edges in a project graph.
    pub async fn edge_count(&self, brain_id: &str) -> usize {
        let projects = self.projects.lock().await;
        projects.get(brain_id).map_or(0, |graph| graph.edges.len())
    }

    /// Snapshot of a project's edges in insertion order.
    pub async fn edges(&self, brain_id: &str) -> Vec<GraphEdge> {
        let projects = self.projects.lock().await;
        projects
            .get(brain_id)
            .map_or_else(Vec::new, |graph| graph.edges.clone())
    }

    /// Snapshot of a project's node names, sorted.
    pub async fn node_names(&self, brain_id: &str) -> Vec<String> {
        let projects = self.projects.lock().await;
        let mut names: Vec<String> = projects
            .get(brain_id)
            .map_or_else(Vec::new, |graph| graph.nodes.keys().cloned().collect());
        names.sort();
        names
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn merge(&self, batch: &GraphBatch, brain_id: &str) -> Result<MergeStats, StoreError> {
        let mut projects = self.projects.lock().await;
        let graph = projects.entry(brain_id.to_string()).or_default();
        let mut stats = MergeStats::default();

        for node in &batch.nodes {
            match graph.nodes.get_mut(&node.name) {
                Some(existing) => {
                    existing.label = node.label.clone();
                    existing.source_id = node.source_id.clone();
                    merge_descriptions(&mut existing.descriptions, node.descriptions.clone());
                    merge_sentences(&mut existing.original_sentences, node.original_sentences.clone());
                    if existing.embedding.is_none() {
                        existing.embedding = node.embedding.clone();
                    }
                }
                None => {
                    graph.nodes.insert(node.name.clone(), node.clone());
                    stats.nodes_created += 1;
                }
            }
        }

        for edge in &batch.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !graph.nodes.contains_key(endpoint) {
                    graph
                        .nodes
                        .insert(endpoint.clone(), bare_node(endpoint, &edge.source_id));
                    stats.nodes_created += 1;
                }
            }
            let exists = graph.edges.iter().any(|e| {
                e.source == edge.source && e.target == edge.target && e.relation == edge.relation
            });
            if !exists {
                graph.edges.push(edge.clone());
                stats.edges_created += 1;
            }
        }

        Ok(stats)
    }

    async fn remove_source(
        &self,
        source_id: &str,
        brain_id: &str,
    ) -> Result<RemoveStats, StoreError> {
        let mut projects = self.projects.lock().await;
        let mut stats = RemoveStats::default();
        let Some(graph) = projects.get_mut(brain_id) else {
            return Ok(stats);
        };

        let edge_count = graph.edges.len();
        graph.edges.retain(|edge| edge.source_id != source_id);
        stats.edges_removed = edge_count - graph.edges.len();

        let names: Vec<String> = graph.nodes.keys().cloned().collect();
        for name in names {
            let Some(node) = graph.nodes.get_mut(&name) else {
                continue;
            };
            let touched = node.source_id == source_id
                || node.descriptions.iter().any(|d| d.source_id == source_id)
                || node
                    .original_sentences
                    .iter()
                    .any(|s| s.source_id == source_id);
            if !touched {
                continue;
            }

            node.descriptions.retain(|d| d.source_id != source_id);
            node.original_sentences.retain(|s| s.source_id != source_id);
            if node.descriptions.is_empty() && node.original_sentences.is_empty() {
                graph.nodes.remove(&name);
                stats.nodes_removed += 1;
            } else {
                stats.nodes_updated += 1;
            }
        }

        Ok(stats)
    }
}

/// Node created implicitly for an edge endpoint the batch never emitted.
fn bare_node(name: &str, source_id: &str) -> KeywordNode {
    KeywordNode {
        name: name.to_string(),
        label: name.to_string(),
        descriptions: Vec::new(),
        original_sentences: Vec::new(),
        source_id: source_id.to_string(),
        embedding: None,
    }
}
