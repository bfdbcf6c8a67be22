//! Schema migrations. Every statement is idempotent, so `rh init` and
//! server start-up can both run them.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect to the configured database and create all tables.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an existing pool.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Analysis jobs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            repo_url TEXT NOT NULL,
            branch TEXT,
            status TEXT NOT NULL,
            progress_detail TEXT NOT NULL DEFAULT '',
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Completed reports (one per job, immutable)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            job_id TEXT PRIMARY KEY,
            report_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-job vector collections (sqlite index backend)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            collection TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            byte_offset INTEGER NOT NULL,
            language TEXT NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, chunk_id),
            FOREIGN KEY (collection) REFERENCES vector_collections(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_order ON chunk_vectors(collection, file_path, chunk_index)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
