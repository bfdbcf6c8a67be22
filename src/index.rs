//! Per-job embedding index.
//!
//! [`EmbeddingIndex`] pairs an [`Embedder`] with a [`VectorStore`]. Each
//! job gets its own collection, `job_<uuid>`, which the orchestrator
//! deletes when the job reaches a terminal state. A failed batch fails the
//! whole build; there is no partial resume.

use std::sync::Arc;

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use repo_health_core::embedding::Embedder;
use repo_health_core::models::{Chunk, JobId};
use repo_health_core::store::memory::InMemoryStore;
use repo_health_core::store::{Neighbor, StoreError, VectorStore};

use crate::errors::EmbeddingError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::sqlite_store::SqliteVectorStore;

/// Collection name for a job's vectors.
pub fn collection_name(job_id: JobId) -> String {
    format!("job_{}", job_id.simple())
}

/// Build the store selected by `[index] backend`.
pub fn create_store(backend: &str, pool: &SqlitePool) -> Result<Arc<dyn VectorStore>> {
    match backend {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "sqlite" => Ok(Arc::new(SqliteVectorStore::new(pool.clone()))),
        other => bail!("Unknown index backend: {}", other),
    }
}

#[derive(Clone)]
pub struct EmbeddingIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl EmbeddingIndex {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed every chunk and store it in the job's collection.
    ///
    /// Returns the number of stored vectors. A leftover collection for the
    /// same job is replaced.
    pub async fn build(
        &self,
        job_id: JobId,
        chunks: &[Chunk],
        progress: &dyn ProgressSink,
    ) -> Result<usize, EmbeddingError> {
        let dims = self.embedder.dims();
        if dims == 0 {
            return Err(EmbeddingError::Disabled);
        }

        let name = collection_name(job_id);
        match self.store.create_collection(&name, dims).await {
            Ok(()) => {}
            Err(StoreError::CollectionExists(_)) => {
                self.store.delete_collection(&name).await?;
                self.store.create_collection(&name, dims).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let total = chunks.len();
        let mut done = 0;
        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| EmbeddingError::Provider {
                    batch: batch_no,
                    size: batch.len(),
                    message: format!("{:#}", e),
                })?;

            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dims,
                    actual: bad.len(),
                });
            }

            let entries = batch.iter().cloned().zip(vectors).collect();
            self.store.insert(&name, entries).await?;

            done += batch.len();
            progress.report(ProgressEvent::Embedding { done, total }).await;
        }

        tracing::info!(
            %job_id,
            vectors = done,
            model = self.embedder.model_name(),
            dims,
            "embedding index built"
        );
        Ok(done)
    }

    /// Top-`k` chunks nearest to `query`.
    pub async fn nearest(
        &self,
        job_id: JobId,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, EmbeddingError> {
        Ok(self
            .store
            .nearest(&collection_name(job_id), query, k)
            .await?)
    }

    /// Embed `text` and return the top-`k` chunks nearest to it.
    pub async fn query_text(
        &self,
        job_id: JobId,
        text: &str,
        k: usize,
    ) -> Result<Vec<Neighbor>, EmbeddingError> {
        let mut vectors = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .map_err(|e| EmbeddingError::Provider {
                batch: 0,
                size: 1,
                message: format!("{:#}", e),
            })?;
        let query = vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })?;
        self.nearest(job_id, &query, k).await
    }

    /// All chunks of the job's collection, ordered by path and index.
    pub async fn chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, EmbeddingError> {
        Ok(self.store.chunks(&collection_name(job_id)).await?)
    }

    pub async fn count(&self, job_id: JobId) -> Result<usize, EmbeddingError> {
        Ok(self.store.count(&collection_name(job_id)).await?)
    }

    /// Drop the job's collection. Missing collections are fine.
    pub async fn delete(&self, job_id: JobId) -> Result<(), EmbeddingError> {
        Ok(self
            .store
            .delete_collection(&collection_name(job_id))
            .await?)
    }
}
