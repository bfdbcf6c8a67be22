//! In-memory [`VectorStore`] implementation.
//!
//! Uses a `HashMap` of collections behind `std::sync::RwLock`.
//! Nearest-neighbour lookup is brute-force cosine distance over every
//! vector in the collection, which is plenty for one repository's chunks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::Chunk;

use super::{rank_neighbors, Neighbor, StoreError, VectorStore};

struct Collection {
    dims: usize,
    /// Keyed by `(file_path, chunk_index)` so iteration is already ordered.
    entries: BTreeMap<(String, usize), (Chunk, Vec<f32>)>,
}

/// In-memory vector store for tests and ephemeral runs.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend("collection lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend("collection lock poisoned".into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn create_collection(&self, name: &str, dims: usize) -> Result<(), StoreError> {
        let mut cols = self.write()?;
        if cols.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        cols.insert(
            name.to_string(),
            Collection {
                dims,
                entries: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn insert(&self, name: &str, entries: Vec<(Chunk, Vec<f32>)>) -> Result<(), StoreError> {
        let mut cols = self.write()?;
        let col = cols
            .get_mut(name)
            .ok_or_else(|| StoreError::NoSuchCollection(name.to_string()))?;

        // Validate the whole batch before touching the collection.
        if let Some((_, v)) = entries.iter().find(|(_, v)| v.len() != col.dims) {
            return Err(StoreError::DimensionMismatch {
                expected: col.dims,
                actual: v.len(),
            });
        }

        // Chunk ids derive from (file_path, chunk_index), so the key alone upserts.
        for (chunk, vector) in entries {
            col.entries
                .insert((chunk.file_path.clone(), chunk.chunk_index), (chunk, vector));
        }
        Ok(())
    }

    async fn nearest(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let cols = self.read()?;
        let col = cols
            .get(name)
            .ok_or_else(|| StoreError::NoSuchCollection(name.to_string()))?;
        if query.len() != col.dims {
            return Err(StoreError::DimensionMismatch {
                expected: col.dims,
                actual: query.len(),
            });
        }

        let hits = col
            .entries
            .values()
            .map(|(chunk, vector)| Neighbor {
                chunk_id: chunk.id.clone(),
                file_path: chunk.file_path.clone(),
                chunk_index: chunk.chunk_index,
                distance: cosine_distance(query, vector),
            })
            .collect();
        Ok(rank_neighbors(hits, k))
    }

    async fn chunks(&self, name: &str) -> Result<Vec<Chunk>, StoreError> {
        let cols = self.read()?;
        let col = cols
            .get(name)
            .ok_or_else(|| StoreError::NoSuchCollection(name.to_string()))?;
        Ok(col.entries.values().map(|(c, _)| c.clone()).collect())
    }

    async fn count(&self, name: &str) -> Result<usize, StoreError> {
        Ok(self.read()?.get(name).map(|c| c.entries.len()).unwrap_or(0))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.write()?.remove(name);
        Ok(())
    }
}
