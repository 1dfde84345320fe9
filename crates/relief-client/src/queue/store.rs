//! Persistence for queued mutations.
//!
//! Stores are synchronous; [`MutationQueue`](super::MutationQueue) calls
//! them from `spawn_blocking`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use relief_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings, MigrationError, PoolError};
use relief_types::QueuedMutation;
use rusqlite::{params, ErrorCode};
use thiserror::Error;

/// Errors raised by a [`MutationStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open mutation store: {0}")]
    Open(#[from] PoolError),

    #[error("failed to migrate mutation store: {0}")]
    Migration(#[from] MigrationError),

    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode mutation input: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("mutation {0} is already queued")]
    DuplicateId(String),

    /// The store refuses writes, e.g. storage quota exhausted.
    #[error("mutation store unavailable: {0}")]
    Unavailable(String),
}

/// Durable, insertion-ordered storage of pending mutations.
pub trait MutationStore: Send + Sync {
    /// Persists `mutation`. Must not return before the record is durable.
    fn add(&self, mutation: &QueuedMutation) -> Result<(), StoreError>;

    /// Every stored mutation in insertion order.
    fn all(&self) -> Result<Vec<QueuedMutation>, StoreError>;

    /// Removes the mutation with `id`. Removing an absent id is not an error.
    fn delete(&self, id: &str) -> Result<(), StoreError>;

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.all()?.len())
    }
}

/// SQLite-backed store; the queue survives process restarts.
#[derive(Debug, Clone)]
pub struct SqliteMutationStore {
    pool: DbPool,
}

impl SqliteMutationStore {
    /// Opens (creating if needed) the store at `path` and applies pending
    /// migrations.
    pub fn open(path: &str, settings: DbRuntimeSettings) -> Result<Self, StoreError> {
        let pool = create_pool(path, settings)?;
        Self::new(pool)
    }

    /// Wraps an existing pool, applying pending migrations.
    pub fn new(pool: DbPool) -> Result<Self, StoreError> {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(applied, "applied mutation store migrations");
        }
        drop(conn);
        Ok(Self { pool })
    }
}

impl MutationStore for SqliteMutationStore {
    fn add(&self, mutation: &QueuedMutation) -> Result<(), StoreError> {
        let input_json = serde_json::to_string(&mutation.input)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO mutation_queue (id, endpoint, input_json, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![mutation.id, mutation.endpoint, input_json, mutation.timestamp],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StoreError::DuplicateId(mutation.id.clone()),
            Some(ErrorCode::DiskFull) => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Database(e),
        })?;
        Ok(())
    }

    /// Rows whose input no longer decodes are moved to
    /// `mutation_dead_letter` so they cannot hold up the rest of the queue.
    fn all(&self) -> Result<Vec<QueuedMutation>, StoreError> {
        let conn = self.pool.get()?;
        let rows = {
            let mut stmt = conn.prepare(
                "SELECT id, endpoint, input_json, enqueued_at FROM mutation_queue ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut mutations = Vec::with_capacity(rows.len());
        let mut undecodable = Vec::new();
        for (id, endpoint, input_json, timestamp) in rows {
            match serde_json::from_str(&input_json) {
                Ok(input) => mutations.push(QueuedMutation {
                    id,
                    endpoint,
                    input,
                    timestamp,
                }),
                Err(e) => {
                    tracing::warn!(%id, %endpoint, "queued mutation input is unreadable, moving to dead letter: {}", e);
                    undecodable.push((id, e.to_string()));
                }
            }
        }

        if !undecodable.is_empty() {
            let tx = conn.unchecked_transaction()?;
            for (id, reason) in &undecodable {
                tx.execute(
                    "INSERT OR REPLACE INTO mutation_dead_letter (id, endpoint, input_json, enqueued_at, reason)
                     SELECT id, endpoint, input_json, enqueued_at, ?2 FROM mutation_queue WHERE id = ?1",
                    params![id, reason],
                )?;
                tx.execute("DELETE FROM mutation_queue WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
        }
        Ok(mutations)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM mutation_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM mutation_queue", [], |row| {
            row.get(0)
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryMutationStore {
    records: Mutex<Vec<QueuedMutation>>,
}

impl MemoryMutationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<QueuedMutation>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MutationStore for MemoryMutationStore {
    fn add(&self, mutation: &QueuedMutation) -> Result<(), StoreError> {
        let mut records = self.records();
        if records.iter().any(|m| m.id == mutation.id) {
            return Err(StoreError::DuplicateId(mutation.id.clone()));
        }
        records.push(mutation.clone());
        Ok(())
    }

    fn all(&self) -> Result<Vec<QueuedMutation>, StoreError> {
        Ok(self.records().clone())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records().retain(|m| m.id != id);
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records().len())
    }
}
