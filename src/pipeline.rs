//! Orchestration of one ingestion job per source.
//!
//! The CPU-bound stages (segmentation through extraction) run inside a
//! blocking worker; only the topic model fit and the store may block for
//! non-trivial time. Merging is serialized per project so list-append
//! merges observe a consistent prior state, and cancellation is honored
//! everywhere except during the merge itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chunker::{self, FinalizedChunk};
use crate::config::PipelineConfig;
use crate::embeddings::Embedder;
use crate::extractor;
use crate::graph::{AlreadyMade, GraphBatch, IngestReport};
use crate::phrases::{self, Sentence};
use crate::segmenter;
use crate::store::{GraphStore, RemoveStats, StoreError};
use crate::tfidf;
use crate::topics;

/// Cooperative cancellation flag shared between caller and job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Creates a flag in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; jobs stop at their next checkpoint.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Release);
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }
}

/// Errors surfaced by ingestion and removal.
#[derive(Debug)]
pub enum IngestError {
    /// The input failed validation; nothing was written.
    InputRejected(String),
    /// The job was cancelled before persistence; nothing was written.
    Cancelled,
    /// The store failed after its retries; the batch was discarded.
    Store(StoreError),
    /// The blocking worker terminated abnormally.
    Worker(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputRejected(reason) => write!(f, "input rejected: {reason}"),
            Self::Cancelled => write!(f, "ingestion cancelled"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Worker(reason) => write!(f, "pipeline worker failed: {reason}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Knowledge graph construction pipeline bound to one store.
pub struct Pipeline<S> {
    store: Arc<S>,
    config: PipelineConfig,
    merge_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: GraphStore> Pipeline<S> {
    /// Creates a pipeline over the given store and configuration.
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            merge_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ingests one source document into the project graph.
    pub async fn ingest(
        &self,
        source_id: &str,
        project_id: &str,
        raw_text: &str,
    ) -> Result<IngestReport, IngestError> {
        self.ingest_with_cancel(source_id, project_id, raw_text, CancelFlag::new())
            .await
    }

    /// Ingests one source document, honoring a cancellation flag.
    ///
    /// Cancellation observed before the merge discards the batch with no
    /// write; once the merge has started it runs to completion.
    pub async fn ingest_with_cancel(
        &self,
        source_id: &str,
        project_id: &str,
        raw_text: &str,
        cancel: CancelFlag,
    ) -> Result<IngestReport, IngestError> {
        let started = Instant::now();
        if raw_text.trim().is_empty() {
            return Err(IngestError::InputRejected("empty text".to_string()));
        }

        let config = self.config;
        let text = raw_text.to_string();
        let source = source_id.to_string();
        let worker_cancel = cancel.clone();
        let output = tokio::task::spawn_blocking(move || {
            build_batch(&text, &source, &config, &worker_cancel)
        })
        .await
        .map_err(|err| IngestError::Worker(err.to_string()))??;

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let duration_ms = started.elapsed().as_millis() as u64;
        if output.batch.is_empty() {
            return Ok(IngestReport::zero(duration_ms));
        }

        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;
        let stats = self.store.merge(&output.batch, project_id).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            source_id,
            project_id,
            nodes_created = stats.nodes_created,
            edges_created = stats.edges_created,
            chunks = output.chunks,
            "ingest complete"
        );
        Ok(IngestReport {
            nodes_created: stats.nodes_created,
            edges_created: stats.edges_created,
            chunks: output.chunks,
            root_keyword: output.root_keyword,
            duration_ms,
        })
    }

    /// Ingests several sources of one project concurrently.
    ///
    /// Jobs overlap in their CPU phases; merges are still serialized per
    /// project by the merge lock.
    pub async fn ingest_many(
        &self,
        project_id: &str,
        jobs: &[(String, String)],
    ) -> Vec<Result<IngestReport, IngestError>> {
        join_all(
            jobs.iter()
                .map(|(source_id, text)| self.ingest(source_id, project_id, text)),
        )
        .await
    }

    /// Removes exactly one source's contributions from the project graph.
    pub async fn remove_source(
        &self,
        source_id: &str,
        project_id: &str,
    ) -> Result<RemoveStats, IngestError> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;
        Ok(self.store.remove_source(source_id, project_id).await?)
    }

    /// Splits text into topic-coherent chunk texts without writing anywhere.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let sentence_texts = segmenter::split_sentences(text);
        if sentence_texts.is_empty() {
            return Vec::new();
        }
        let sentences = phrases::tokenize_sentences(&sentence_texts);
        let mut already_made = AlreadyMade::new();
        let outcome = chunker::run(
            &sentences,
            "-1",
            &self.config.chunker,
            &self.config.topics,
            &mut already_made,
        );
        outcome
            .finalized
            .iter()
            .map(|chunk| joined_text(&chunk.indices, &sentences))
            .collect()
    }

    async fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.merge_locks.lock().await;
        locks.entry(project_id.to_string()).or_default().clone()
    }
}

struct BuildOutput {
    batch: GraphBatch,
    chunks: usize,
    root_keyword: String,
}

impl BuildOutput {
    fn empty() -> Self {
        Self {
            batch: GraphBatch::new(),
            chunks: 0,
            root_keyword: String::new(),
        }
    }
}

/// Runs the CPU-bound stages for one document and returns the batch.
fn build_batch(
    text: &str,
    source_id: &str,
    config: &PipelineConfig,
    cancel: &CancelFlag,
) -> Result<BuildOutput, IngestError> {
    let sentence_texts = segmenter::split_sentences(text);
    if sentence_texts.is_empty() {
        warn!(source_id, "segmentation produced no sentences; nothing to ingest");
        return Ok(BuildOutput::empty());
    }
    let sentences = phrases::tokenize_sentences(&sentence_texts);
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }

    let mut already_made = AlreadyMade::new();
    let mut batch = GraphBatch::new();
    let finalized: Vec<FinalizedChunk>;
    let root_keyword: String;

    if text.chars().count() >= config.chunker.recursive_min_chars {
        let outcome = chunker::run(
            &sentences,
            source_id,
            &config.chunker,
            &config.topics,
            &mut already_made,
        );
        if outcome.root_keyword.is_empty() {
            return Ok(BuildOutput::empty());
        }
        root_keyword = outcome.root_keyword;
        finalized = outcome.finalized;
        batch.extend(outcome.batch);
    } else {
        // Short documents skip recursive chunking: one finalized chunk
        // under the root keyword, with the root node emitted by extraction.
        let docs: Vec<Vec<String>> = sentences.iter().map(|s| s.tokens.clone()).collect();
        let fit = topics::fit(&docs, &config.topics);
        if fit.is_failure() {
            warn!(
                source_id,
                depth = 0,
                fallback = "zero emission",
                "topic fit failed for short document"
            );
            return Ok(BuildOutput::empty());
        }
        already_made.insert(&fit.top_keyword);
        root_keyword = format!("{}*", fit.top_keyword);
        finalized = vec![FinalizedChunk {
            indices: sentences.iter().map(|s| s.index).collect(),
            keyword: root_keyword.clone(),
        }];
    }

    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }

    let chunk_tokens: Vec<Vec<String>> = finalized
        .iter()
        .map(|chunk| {
            chunk
                .indices
                .iter()
                .flat_map(|&index| sentences[index].tokens.iter().cloned())
                .collect()
        })
        .collect();
    let chunk_tfidf = tfidf::chunk_scores(&chunk_tokens);

    let mut embedder = Embedder::new(config.embedding);
    for (chunk, tfidf_map) in finalized.iter().zip(chunk_tfidf.iter()) {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        if chunk.keyword.is_empty() {
            debug!(source_id, "finalized chunk without keyword skipped");
            continue;
        }
        let emitted = extractor::extract_from_chunk(
            &chunk.indices,
            &sentences,
            &chunk.keyword,
            tfidf_map,
            &mut already_made,
            &mut embedder,
            source_id,
            &config.scoring,
        );
        batch.extend(emitted);
    }

    Ok(BuildOutput {
        batch,
        chunks: finalized.len(),
        root_keyword,
    })
}

fn joined_text(indices: &[usize], sentences: &[Sentence]) -> String {
    indices
        .iter()
        .filter_map(|&index| sentences.get(index).map(|s| s.text.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGraphStore;

    fn pipeline() -> Pipeline<MemoryGraphStore> {
        Pipeline::new(Arc::new(MemoryGraphStore::new()), PipelineConfig::default())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_text_is_rejected() {
        let pipeline = pipeline();
        let result = pipeline.ingest("s1", "p1", "   \n  ").await;
        assert!(matches!(result, Err(IngestError::InputRejected(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pre_cancelled_jobs_write_nothing() {
        let pipeline = pipeline();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = pipeline
            .ingest_with_cancel("s1", "p1", "Alpha beta gamma. Alpha is a letter.", cancel)
            .await;
        assert!(matches!(result, Err(IngestError::Cancelled)));
        assert_eq!(pipeline.store.node_count("p1").await, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn punctuation_only_text_yields_zero_report() {
        let pipeline = pipeline();
        let report = pipeline.ingest("s1", "p1", "!! ?? .. !!").await.expect("report");
        assert_eq!(report.nodes_created, 0);
        assert_eq!(report.edges_created, 0);
        assert_eq!(report.chunks, 0);
        assert!(report.root_keyword.is_empty());
    }

    #[test]
    fn cancel_flag_round_trips() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
        assert!(flag.clone().is_cancelled());
    }
}
