//! Nonce store collaborators
//!
//! The store is the serialization point for nonce assignment across
//! replicas. The in-memory TTL map is the default for a single instance;
//! the PostgreSQL store is for deployments sharing one sequence.

use crate::error::{SentryError, SentryResult};

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::{Duration, Instant};
use tracing::debug;

/// Last-sent nonce records keyed by partition key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn get_last_sent(&self, key: &str) -> SentryResult<Option<u64>>;

    async fn set_last_sent(&self, key: &str, nonce: u64) -> SentryResult<()>;

    /// Backend liveness, surfaced by the readiness endpoint
    async fn health_check(&self) -> SentryResult<()> {
        Ok(())
    }
}

/// In-memory TTL store
///
/// Entries expire so that a stalled account recalibrates from the chain
/// instead of trusting stale bookkeeping forever.
pub struct MemoryNonceStore {
    entries: DashMap<String, (u64, Instant)>,
    ttl: Duration,
}

impl MemoryNonceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn get_last_sent(&self, key: &str) -> SentryResult<Option<u64>> {
        if let Some(entry) = self.entries.get(key) {
            let (nonce, written_at) = *entry;
            if written_at.elapsed() < self.ttl {
                return Ok(Some(nonce));
            }
        }

        self.entries.remove(key);
        Ok(None)
    }

    async fn set_last_sent(&self, key: &str, nonce: u64) -> SentryResult<()> {
        self.entries
            .insert(key.to_string(), (nonce, Instant::now()));
        Ok(())
    }
}

/// PostgreSQL-backed store
pub struct PgNonceStore {
    pool: PgPool,
}

impl PgNonceStore {
    pub async fn new(url: &str, max_connections: u32) -> SentryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| SentryError::Store(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> SentryResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nonce_records (
                partition_key TEXT PRIMARY KEY,
                last_sent BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SentryError::Store(e.to_string()))?;

        debug!("nonce store migrations complete");
        Ok(())
    }
}

#[async_trait]
impl NonceStore for PgNonceStore {
    async fn get_last_sent(&self, key: &str) -> SentryResult<Option<u64>> {
        let row = sqlx::query("SELECT last_sent FROM nonce_records WHERE partition_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SentryError::Store(e.to_string()))?;

        Ok(row.map(|r| r.get::<i64, _>("last_sent") as u64))
    }

    async fn set_last_sent(&self, key: &str, nonce: u64) -> SentryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO nonce_records (partition_key, last_sent, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (partition_key)
            DO UPDATE SET last_sent = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(nonce as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| SentryError::Store(e.to_string()))?;

        Ok(())
    }

    async fn health_check(&self) -> SentryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| SentryError::Store(e.to_string()))?;
        Ok(())
    }
}
