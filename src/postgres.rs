//! Postgres-backed graph store emulating MERGE on unique indices.
//!
//! Node identity maps to the `(name, brain_id)` primary key and edge
//! identity to `(source, target, relation, brain_id)`; idempotence comes
//! from `ON CONFLICT` upserts inside one transaction per batch. Node
//! embeddings land in a nullable `pgvector` column.

use std::time::Duration;

use anyhow::{Context, Result};
use pgvector::Vector;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls};
use tracing::warn;

use async_trait::async_trait;

use crate::graph::{
    merge_descriptions, merge_sentences, DescriptionEntry, GraphBatch, SentenceRecord,
};
use crate::store::{GraphStore, MergeStats, RemoveStats, StoreError};

/// Settings for the Postgres graph store.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Schema holding the graph tables.
    pub schema: String,
    /// Retries after a transient failure before surfacing it.
    pub max_retries: usize,
    /// Dimensionality of the node embedding column.
    pub embedding_dimensions: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            max_retries: 2,
            embedding_dimensions: 128,
        }
    }
}

/// Graph store persisting into two Postgres tables.
pub struct PostgresGraphStore {
    client: Mutex<Client>,
    config: PostgresConfig,
}

impl PostgresGraphStore {
    /// Connects to Postgres and spawns the connection driver task.
    pub async fn connect(database_url: &str, config: PostgresConfig) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to Postgres at {database_url}"))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgres connection terminated");
            }
        });
        Ok(Self {
            client: Mutex::new(client),
            config,
        })
    }

    /// Creates the extension, tables, and keys when they are missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .context("failed to ensure pgvector extension")?;

        let nodes = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT NOT NULL,
                brain_id TEXT NOT NULL,
                label TEXT NOT NULL,
                source_id TEXT NOT NULL,
                descriptions JSONB NOT NULL DEFAULT '[]'::jsonb,
                original_sentences JSONB NOT NULL DEFAULT '[]'::jsonb,
                embedding VECTOR({}),
                PRIMARY KEY (name, brain_id)
            )",
            self.nodes_table(),
            self.config.embedding_dimensions.max(1)
        );
        client
            .execute(&nodes, &[])
            .await
            .context("failed to create graph node table")?;

        let edges = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                relation TEXT NOT NULL,
                brain_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                PRIMARY KEY (source, target, relation, brain_id)
            )",
            self.edges_table()
        );
        client
            .execute(&edges, &[])
            .await
            .context("failed to create graph edge table")?;
        Ok(())
    }

    fn nodes_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.config.schema), quote_ident("graph_nodes"))
    }

    fn edges_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.config.schema), quote_ident("graph_edges"))
    }

    async fn merge_once(&self, batch: &GraphBatch, brain_id: &str) -> Result<MergeStats, StoreError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(map_pg_error)?;
        let mut stats = MergeStats::default();

        let select = format!(
            "SELECT descriptions, original_sentences FROM {} \
             WHERE name = $1 AND brain_id = $2 FOR UPDATE",
            self.nodes_table()
        );
        let insert = format!(
            "INSERT INTO {} \
             (name, brain_id, label, source_id, descriptions, original_sentences, embedding) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.nodes_table()
        );
        let update = format!(
            "UPDATE {} SET label = $3, source_id = $4, descriptions = $5, \
             original_sentences = $6, embedding = COALESCE($7, embedding) \
             WHERE name = $1 AND brain_id = $2",
            self.nodes_table()
        );

        for node in &batch.nodes {
            let embedding = node.embedding.as_ref().map(|e| Vector::from(e.clone()));
            let existing = tx
                .query_opt(&select, &[&node.name, &brain_id])
                .await
                .map_err(map_pg_error)?;
            match existing {
                Some(row) => {
                    let Json(mut descriptions): Json<Vec<DescriptionEntry>> = row.get(0);
                    let Json(mut sentences): Json<Vec<SentenceRecord>> = row.get(1);
                    merge_descriptions(&mut descriptions, node.descriptions.clone());
                    merge_sentences(&mut sentences, node.original_sentences.clone());
                    tx.execute(
                        &update,
                        &[
                            &node.name,
                            &brain_id,
                            &node.label,
                            &node.source_id,
                            &Json(&descriptions),
                            &Json(&sentences),
                            &embedding,
                        ],
                    )
                    .await
                    .map_err(map_pg_error)?;
                }
                None => {
                    tx.execute(
                        &insert,
                        &[
                            &node.name,
                            &brain_id,
                            &node.label,
                            &node.source_id,
                            &Json(&node.descriptions),
                            &Json(&node.original_sentences),
                            &embedding,
                        ],
                    )
                    .await
                    .map_err(map_pg_error)?;
                    stats.nodes_created += 1;
                }
            }
        }

        // Edge endpoints the batch never emitted are created bare, then the
        // edge insert is conflict-free to repeat.
        let ensure_endpoint = format!(
            "INSERT INTO {} (name, brain_id, label, source_id) VALUES ($1, $2, $1, $3) \
             ON CONFLICT (name, brain_id) DO NOTHING",
            self.nodes_table()
        );
        let insert_edge = format!(
            "INSERT INTO {} (source, target, relation, brain_id, source_id) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (source, target, relation, brain_id) DO NOTHING",
            self.edges_table()
        );

        for edge in &batch.edges {
            for endpoint in [&edge.source, &edge.target] {
                let created = tx
                    .execute(&ensure_endpoint, &[endpoint, &brain_id, &edge.source_id])
                    .await
                    .map_err(map_pg_error)?;
                stats.nodes_created += created as usize;
            }
            let created = tx
                .execute(
                    &insert_edge,
                    &[
                        &edge.source,
                        &edge.target,
                        &edge.relation,
                        &brain_id,
                        &edge.source_id,
                    ],
                )
                .await
                .map_err(map_pg_error)?;
            stats.edges_created += created as usize;
        }

        tx.commit().await.map_err(map_pg_error)?;
        Ok(stats)
    }

    async fn remove_once(
        &self,
        source_id: &str,
        brain_id: &str,
    ) -> Result<RemoveStats, StoreError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(map_pg_error)?;
        let mut stats = RemoveStats::default();

        let delete_edges = format!(
            "DELETE FROM {} WHERE brain_id = $1 AND source_id = $2",
            self.edges_table()
        );
        stats.edges_removed = tx
            .execute(&delete_edges, &[&brain_id, &source_id])
            .await
            .map_err(map_pg_error)? as usize;

        let tag = Json(serde_json::json!([{ "source_id": source_id }]));
        let select = format!(
            "SELECT name, descriptions, original_sentences FROM {} \
             WHERE brain_id = $1 AND (source_id = $2 OR descriptions @> $3 OR original_sentences @> $3) \
             FOR UPDATE",
            self.nodes_table()
        );
        let rows = tx
            .query(&select, &[&brain_id, &source_id, &tag])
            .await
            .map_err(map_pg_error)?;

        let delete_node = format!(
            "DELETE FROM {} WHERE name = $1 AND brain_id = $2",
            self.nodes_table()
        );
        let update_node = format!(
            "UPDATE {} SET descriptions = $3, original_sentences = $4 \
             WHERE name = $1 AND brain_id = $2",
            self.nodes_table()
        );

        for row in rows {
            let name: String = row.get(0);
            let Json(mut descriptions): Json<Vec<DescriptionEntry>> = row.get(1);
            let Json(mut sentences): Json<Vec<SentenceRecord>> = row.get(2);
            descriptions.retain(|d| d.source_id != source_id);
            sentences.retain(|s| s.source_id != source_id);

            if descriptions.is_empty() && sentences.is_empty() {
                tx.execute(&delete_node, &[&name, &brain_id])
                    .await
                    .map_err(map_pg_error)?;
                stats.nodes_removed += 1;
            } else {
                tx.execute(
                    &update_node,
                    &[&name, &brain_id, &Json(&descriptions), &Json(&sentences)],
                )
                .await
                .map_err(map_pg_error)?;
                stats.nodes_updated += 1;
            }
        }

        tx.commit().await.map_err(map_pg_error)?;
        Ok(stats)
    }

}

#[async_trait]
impl GraphStore for PostgresGraphStore {
    async fn merge(&self, batch: &GraphBatch, brain_id: &str) -> Result<MergeStats, StoreError> {
        let mut attempt = 0usize;
        loop {
            match self.merge_once(batch, brain_id).await {
                Ok(stats) => return Ok(stats),
                Err(StoreError::Transient(message)) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %message, "transient merge failure; retrying");
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn remove_source(
        &self,
        source_id: &str,
        brain_id: &str,
    ) -> Result<RemoveStats, StoreError> {
        let mut attempt = 0usize;
        loop {
            match self.remove_once(source_id, brain_id).await {
                Ok(stats) => return Ok(stats),
                Err(StoreError::Transient(message)) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %message, "transient removal failure; retrying");
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Quotes a Postgres identifier, escaping embedded quotes.
fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

/// Classifies driver errors into the §7 transient/fatal split.
fn map_pg_error(err: tokio_postgres::Error) -> StoreError {
    match err.as_db_error() {
        Some(db) => {
            let code = db.code();
            if code == &SqlState::T_R_SERIALIZATION_FAILURE
                || code == &SqlState::T_R_DEADLOCK_DETECTED
                || code == &SqlState::CONNECTION_EXCEPTION
                || code == &SqlState::ADMIN_SHUTDOWN
            {
                StoreError::Transient(db.message().to_string())
            } else {
                StoreError::Fatal(db.message().to_string())
            }
        }
        None => StoreError::Transient(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("public"), "\"public\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2000));
        assert_eq!(retry_backoff(9), retry_backoff(5));
    }
}
