//! SQLite-backed [`VectorStore`].
//!
//! Collections are rows in `vector_collections`; vectors live in
//! `chunk_vectors` as little-endian f32 BLOBs next to the chunk text and
//! metadata. Nearest-neighbour lookup loads the collection and ranks by
//! cosine distance in Rust.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use repo_health_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use repo_health_core::models::Chunk;
use repo_health_core::store::{rank_neighbors, Neighbor, StoreError, VectorStore};

#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn dims_of(&self, name: &str) -> Result<Option<usize>, StoreError> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vector_collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        Ok(dims.map(|d| d as usize))
    }

    async fn require_dims(&self, name: &str) -> Result<usize, StoreError> {
        self.dims_of(name)
            .await?
            .ok_or_else(|| StoreError::NoSuchCollection(name.to_string()))
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn create_collection(&self, name: &str, dims: usize) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO vector_collections (name, dims, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(dims as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        Ok(())
    }

    async fn insert(&self, name: &str, entries: Vec<(Chunk, Vec<f32>)>) -> Result<(), StoreError> {
        let dims = self.require_dims(name).await?;
        if let Some((_, bad)) = entries.iter().find(|(_, v)| v.len() != dims) {
            return Err(StoreError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;
        for (chunk, vector) in &entries {
            sqlx::query(
                "INSERT OR REPLACE INTO chunk_vectors
                 (collection, chunk_id, file_path, chunk_index, byte_offset, language, text, hash, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(name)
            .bind(&chunk.id)
            .bind(&chunk.file_path)
            .bind(chunk.chunk_index as i64)
            .bind(chunk.byte_offset as i64)
            .bind(&chunk.language)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn nearest(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let dims = self.require_dims(name).await?;
        if query.len() != dims {
            return Err(StoreError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }

        let rows = sqlx::query(
            "SELECT chunk_id, file_path, chunk_index, embedding FROM chunk_vectors WHERE collection = ?",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let chunk_index: i64 = row.get("chunk_index");
                Neighbor {
                    chunk_id: row.get("chunk_id"),
                    file_path: row.get("file_path"),
                    chunk_index: chunk_index as usize,
                    distance: cosine_distance(query, &blob_to_vec(&blob)),
                }
            })
            .collect();
        Ok(rank_neighbors(hits, k))
    }

    async fn chunks(&self, name: &str) -> Result<Vec<Chunk>, StoreError> {
        self.require_dims(name).await?;
        let rows = sqlx::query(
            "SELECT chunk_id, file_path, chunk_index, byte_offset, language, text, hash
             FROM chunk_vectors WHERE collection = ?
             ORDER BY file_path, chunk_index",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .iter()
            .map(|row| {
                let chunk_index: i64 = row.get("chunk_index");
                let byte_offset: i64 = row.get("byte_offset");
                Chunk {
                    id: row.get("chunk_id"),
                    file_path: row.get("file_path"),
                    chunk_index: chunk_index as usize,
                    byte_offset: byte_offset as usize,
                    text: row.get("text"),
                    language: row.get("language"),
                    hash: row.get("hash"),
                }
            })
            .collect())
    }

    async fn count(&self, name: &str) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE collection = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(n as usize)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM chunk_vectors WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM vector_collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repo_health_core::chunk::chunk_id;

    async fn store() -> SqliteVectorStore {
        let pool = crate::db::connect_in_memory().await.unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        SqliteVectorStore::new(pool)
    }

    fn chunk(path: &str, index: usize) -> Chunk {
        Chunk {
            id: chunk_id(path, index),
            file_path: path.to_string(),
            chunk_index: index,
            byte_offset: index * 10,
            text: format!("{} #{}", path, index),
            language: "rust".to_string(),
            hash: format!("h{}", index),
        }
    }

    #[tokio::test]
    async fn round_trips_chunks_in_order() {
        let s = store().await;
        s.create_collection("job_a", 2).await.unwrap();
        s.insert(
            "job_a",
            vec![
                (chunk("src/b.rs", 1), vec![0.0, 1.0]),
                (chunk("src/a.rs", 0), vec![1.0, 0.0]),
                (chunk("src/b.rs", 0), vec![0.5, 0.5]),
            ],
        )
        .await
        .unwrap();

        let chunks = s.chunks("job_a").await.unwrap();
        let keys: Vec<(&str, usize)> = chunks
            .iter()
            .map(|c| (c.file_path.as_str(), c.chunk_index))
            .collect();
        assert_eq!(keys, vec![("src/a.rs", 0), ("src/b.rs", 0), ("src/b.rs", 1)]);
        assert_eq!(chunks[2], chunk("src/b.rs", 1));
        assert_eq!(s.count("job_a").await.unwrap(), 3);

        let hits = s.nearest("job_a", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].file_path, "src/a.rs");
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn rejects_duplicates_missing_and_mismatched() {
        let s = store().await;
        s.create_collection("c", 3).await.unwrap();
        assert_eq!(
            s.create_collection("c", 3).await,
            Err(StoreError::CollectionExists("c".into()))
        );
        assert_eq!(
            s.insert("c", vec![(chunk("x.rs", 0), vec![1.0])]).await,
            Err(StoreError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        );
        assert_eq!(s.count("c").await.unwrap(), 0);
        assert_eq!(
            s.chunks("missing").await,
            Err(StoreError::NoSuchCollection("missing".into()))
        );
        assert_eq!(s.count("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_removes_vectors_and_is_idempotent() {
        let s = store().await;
        s.create_collection("c", 1).await.unwrap();
        s.insert("c", vec![(chunk("x.rs", 0), vec![1.0])])
            .await
            .unwrap();
        s.delete_collection("c").await.unwrap();
        s.delete_collection("c").await.unwrap();
        assert_eq!(s.count("c").await.unwrap(), 0);
        // name is free again
        s.create_collection("c", 1).await.unwrap();
    }
}
