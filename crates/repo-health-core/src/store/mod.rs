//! Per-job vector collections.
//!
//! The [`VectorStore`] trait defines everything the embedding index
//! needs: named collections with a fixed dimensionality, bulk insert,
//! brute-force or indexed nearest-neighbour lookup, and deletion.
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`create_collection`](VectorStore::create_collection) | Create an empty collection with fixed dims |
//! | [`insert`](VectorStore::insert) | Insert or replace chunk vectors |
//! | [`nearest`](VectorStore::nearest) | Top-k chunks by cosine distance |
//! | [`chunks`](VectorStore::chunks) | All chunks of a collection, in file/index order |
//! | [`count`](VectorStore::count) | Number of vectors (0 for a missing collection) |
//! | [`delete_collection`](VectorStore::delete_collection) | Drop a collection and its vectors |

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::Chunk;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    #[error("collection '{0}' does not exist")]
    NoSuchCollection(String),

    #[error("vector dimension mismatch: collection has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store backend error: {0}")]
    Backend(String),
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Neighbor {
    pub chunk_id: String,
    pub file_path: String,
    pub chunk_index: usize,
    /// Cosine distance (`1 - similarity`); smaller is nearer.
    pub distance: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create an empty collection. Fails if `name` already exists.
    async fn create_collection(&self, name: &str, dims: usize) -> Result<(), StoreError>;

    /// Insert vectors keyed by chunk id; an existing id is replaced.
    /// Every vector must match the collection's dimensionality.
    async fn insert(&self, name: &str, entries: Vec<(Chunk, Vec<f32>)>) -> Result<(), StoreError>;

    /// The `k` nearest chunks to `query`, nearest first. Ties break on chunk id.
    async fn nearest(&self, name: &str, query: &[f32], k: usize)
        -> Result<Vec<Neighbor>, StoreError>;

    /// Every stored chunk ordered by `(file_path, chunk_index)`.
    async fn chunks(&self, name: &str) -> Result<Vec<Chunk>, StoreError>;

    /// Number of stored vectors; `0` when the collection does not exist.
    async fn count(&self, name: &str) -> Result<usize, StoreError>;

    /// Remove the collection. Deleting a missing collection is not an error.
    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;
}

/// Sort neighbours nearest-first with a stable tie-break and keep `k`.
pub fn rank_neighbors(mut hits: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);
    hits
}
