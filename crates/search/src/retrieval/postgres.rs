//! Postgres collections using pgvector and full-text search
//!
//! All collections share one chunk table keyed by `(collection_id, id)`.
//! Dense mode ranks by cosine distance; sparse mode by `ts_rank_cd`.

use super::{Chunk, ChunkKind, ChunkRecord, Collection, CollectionBackend, RetrievalMode, SearchQuery};
use async_trait::async_trait;
use docfill_common::db::DbPool;
use docfill_common::errors::{AppError, Result};
use sea_orm::{ConnectionTrait, DbBackend, QueryResult, Statement, Value};
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA: &str = r#"
    CREATE EXTENSION IF NOT EXISTS vector;
    CREATE TABLE IF NOT EXISTS docfill_collections (
        id TEXT PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE TABLE IF NOT EXISTS docfill_chunks (
        collection_id TEXT NOT NULL REFERENCES docfill_collections(id) ON DELETE CASCADE,
        id TEXT NOT NULL,
        source_id TEXT NOT NULL,
        text TEXT NOT NULL,
        kind TEXT NOT NULL,
        page TEXT NOT NULL,
        embedding vector NOT NULL,
        PRIMARY KEY (collection_id, id)
    );
"#;

/// Format an embedding as a pgvector literal
fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

fn statement(sql: &str, values: Vec<Value>) -> Statement {
    Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
}

pub struct PgCollection {
    id: String,
    db: Arc<DbPool>,
}

impl PgCollection {
    fn failure(&self, e: impl std::fmt::Display) -> AppError {
        AppError::RetrievalFailure {
            collection: self.id.clone(),
            message: e.to_string(),
        }
    }

    fn row_to_chunk(&self, row: &QueryResult) -> Result<Chunk> {
        let kind: String = row.try_get("", "kind").map_err(|e| self.failure(e))?;
        let score: f64 = row.try_get("", "score").map_err(|e| self.failure(e))?;
        Ok(Chunk {
            id: row.try_get("", "id").map_err(|e| self.failure(e))?,
            source_id: row.try_get("", "source_id").map_err(|e| self.failure(e))?,
            text: row.try_get("", "text").map_err(|e| self.failure(e))?,
            kind: ChunkKind::parse(&kind).unwrap_or(ChunkKind::Text),
            score: score as f32,
        })
    }
}

#[async_trait]
impl Collection for PgCollection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()> {
        let sql = r#"
            INSERT INTO docfill_chunks (collection_id, id, source_id, text, kind, page, embedding)
            VALUES ($1, $2, $3, $4, $5, $6, $7::vector)
            ON CONFLICT (collection_id, id) DO UPDATE SET
                source_id = EXCLUDED.source_id,
                text = EXCLUDED.text,
                kind = EXCLUDED.kind,
                page = EXCLUDED.page,
                embedding = EXCLUDED.embedding
        "#;

        let conn = self.db.conn();
        for record in records {
            conn.execute(statement(
                sql,
                vec![
                    self.id.clone().into(),
                    record.id.into(),
                    record.source_id.into(),
                    record.text.into(),
                    record.kind.as_str().to_string().into(),
                    record.page.into(),
                    vector_literal(&record.embedding).into(),
                ],
            ))
            .await?;
        }
        Ok(())
    }

    async fn query(&self, query: &SearchQuery, mode: RetrievalMode, k: usize) -> Result<Vec<Chunk>> {
        let (sql, values): (&str, Vec<Value>) = match mode {
            RetrievalMode::Dense => {
                let embedding = query
                    .embedding
                    .as_ref()
                    .ok_or_else(|| self.failure("dense query without embedding"))?;
                (
                    r#"
                    SELECT id, source_id, text, kind,
                           (1 - (embedding <=> $2::vector))::float8 AS score
                    FROM docfill_chunks
                    WHERE collection_id = $1
                    ORDER BY embedding <=> $2::vector
                    LIMIT $3
                    "#,
                    vec![
                        self.id.clone().into(),
                        vector_literal(embedding).into(),
                        (k as i64).into(),
                    ],
                )
            }
            RetrievalMode::Sparse => (
                r#"
                SELECT id, source_id, text, kind,
                       ts_rank_cd(
                           to_tsvector('english', text),
                           plainto_tsquery('english', $2),
                           32
                       )::float8 AS score
                FROM docfill_chunks
                WHERE collection_id = $1
                  AND to_tsvector('english', text) @@ plainto_tsquery('english', $2)
                ORDER BY score DESC
                LIMIT $3
                "#,
                vec![
                    self.id.clone().into(),
                    query.text.clone().into(),
                    (k as i64).into(),
                ],
            ),
        };

        let rows = self
            .db
            .conn()
            .query_all(statement(sql, values))
            .await
            .map_err(|e| self.failure(e))?;

        rows.iter().map(|row| self.row_to_chunk(row)).collect()
    }

    async fn clear(&self) -> Result<()> {
        self.db
            .conn()
            .execute(statement(
                "DELETE FROM docfill_chunks WHERE collection_id = $1",
                vec![self.id.clone().into()],
            ))
            .await?;
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = (0..ids.len())
            .map(|i| format!("${}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DELETE FROM docfill_chunks WHERE collection_id = $1 AND id IN ({})",
            placeholders
        );

        let mut values: Vec<Value> = vec![self.id.clone().into()];
        values.extend(ids.iter().map(|id| Value::from(id.clone())));

        self.db.conn().execute(statement(&sql, values)).await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let row = self
            .db
            .conn()
            .query_one(statement(
                "SELECT COUNT(*)::int8 AS n FROM docfill_chunks WHERE collection_id = $1",
                vec![self.id.clone().into()],
            ))
            .await?;

        let n: i64 = match row {
            Some(row) => row.try_get("", "n")?,
            None => 0,
        };
        Ok(n as usize)
    }
}

/// Collections stored in Postgres
pub struct PgBackend {
    db: Arc<DbPool>,
}

impl PgBackend {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Create the extension and tables if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        self.db.conn().execute_unprepared(SCHEMA).await?;
        info!("Chunk schema ready");
        Ok(())
    }

    fn collection(&self, id: &str) -> Arc<dyn Collection> {
        Arc::new(PgCollection {
            id: id.to_string(),
            db: self.db.clone(),
        })
    }
}

#[async_trait]
impl CollectionBackend for PgBackend {
    async fn open(&self, id: &str) -> Result<Arc<dyn Collection>> {
        self.db
            .conn()
            .execute(statement(
                "INSERT INTO docfill_collections (id) VALUES ($1) ON CONFLICT (id) DO NOTHING",
                vec![id.to_string().into()],
            ))
            .await?;
        Ok(self.collection(id))
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<dyn Collection>>> {
        let row = self
            .db
            .conn()
            .query_one(statement(
                "SELECT id FROM docfill_collections WHERE id = $1",
                vec![id.to_string().into()],
            ))
            .await?;
        Ok(row.map(|_| self.collection(id)))
    }

    async fn drop_collection(&self, id: &str) -> Result<()> {
        // Chunks cascade with the collection row
        self.db
            .conn()
            .execute(statement(
                "DELETE FROM docfill_collections WHERE id = $1",
                vec![id.to_string().into()],
            ))
            .await?;
        debug!(collection = id, "Collection dropped");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let rows = self
            .db
            .conn()
            .query_all(statement(
                "SELECT id FROM docfill_collections ORDER BY id",
                vec![],
            ))
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String>("", "id").map_err(AppError::from))
            .collect()
    }
}
