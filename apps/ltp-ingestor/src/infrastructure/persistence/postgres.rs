//! `PostgreSQL` tick store.
//!
//! Uses `PostgreSQL` via `SQLx`. Topic rows are written on the pool, outside
//! any tick transaction; tick rows go through [`PgTickTransaction`].

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use crate::application::ports::{
    NewTopic, StoreError, TickRow, TickStore, TickTransaction, TopicStore,
};
use crate::domain::observation::TopicId;

/// `PostgreSQL` caps bind parameters per statement at 65535; each row binds two.
const MAX_ROWS_PER_STATEMENT: usize = 32_000;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS topics (
        topic_id   BIGSERIAL PRIMARY KEY,
        topic_name TEXT NOT NULL UNIQUE,
        index_name TEXT,
        type       TEXT NOT NULL,
        strike     BIGINT
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS ltp_data (
        topic_id   BIGINT NOT NULL REFERENCES topics (topic_id),
        ltp        DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS ltp_data_topic_created_idx
        ON ltp_data (topic_id, created_at)
    ",
];

/// Tick store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgTickStore {
    pool: PgPool,
}

impl PgTickStore {
    /// Connect a pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be connected.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(max_connections, "PostgreSQL connection pool initialized");
        Ok(Self { pool })
    }

    /// Create the tables and index if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Write(e.to_string()))?;
        }
        debug!("Schema ensured");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL connection pool closed");
    }
}

fn map_topic_insert_error(err: sqlx::Error, name: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::DuplicateTopic(name.to_string())
        }
        _ => StoreError::Write(err.to_string()),
    }
}

#[async_trait]
impl TopicStore for PgTickStore {
    async fn find_topic_id(&self, name: &str) -> Result<Option<TopicId>, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT topic_id FROM topics WHERE topic_name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Read(e.to_string()))
    }

    async fn insert_topic(&self, topic: &NewTopic) -> Result<TopicId, StoreError> {
        sqlx::query_scalar::<_, i64>(
            r"
            INSERT INTO topics (topic_name, index_name, type, strike)
            VALUES ($1, $2, $3, $4)
            RETURNING topic_id
            ",
        )
        .bind(&topic.name)
        .bind(topic.index_name.as_deref())
        .bind(topic.kind.as_str())
        .bind(topic.strike)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_topic_insert_error(e, &topic.name))
    }
}

#[async_trait]
impl TickStore for PgTickStore {
    async fn begin(&self) -> Result<Box<dyn TickTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Box::new(PgTickTransaction { tx }))
    }
}

/// An open `PostgreSQL` transaction for tick rows.
pub struct PgTickTransaction {
    tx: Transaction<'static, Postgres>,
}

fn build_insert(rows: &[TickRow]) -> QueryBuilder<'_, Postgres> {
    let mut query = QueryBuilder::new("INSERT INTO ltp_data (topic_id, ltp) ");
    query.push_values(rows, |mut values, row| {
        values.push_bind(row.topic_id).push_bind(row.price);
    });
    query
}

#[async_trait]
impl TickTransaction for PgTickTransaction {
    async fn insert_ticks(&mut self, rows: &[TickRow]) -> Result<u64, StoreError> {
        let mut written = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let result = build_insert(chunk)
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(|e| StoreError::Write(e.to_string()))?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Write(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::Write(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
