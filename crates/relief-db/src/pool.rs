//! SQLite pool for the client's local queue database.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Path that opens a private in-memory database.
const IN_MEMORY: &str = ":memory:";

/// How hard SQLite works to make a committed write survive power loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// `synchronous = FULL`: a commit is on disk before it returns.
    Full,
    /// `synchronous = NORMAL`: survives process crashes, may lose the last
    /// commits on power loss.
    Normal,
}

impl Durability {
    fn pragma(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Normal => "NORMAL",
        }
    }
}

/// Connection tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a writer waits on a locked database.
    pub busy_timeout: Duration,
    /// Upper bound on pooled connections; in-memory pools always use one.
    pub max_connections: u32,
    pub durability: Durability,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_connections: 4,
            durability: Durability::Full,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open queue database: {0}")]
    Open(#[from] r2d2::Error),
}

/// Applies WAL journaling, durability and busy timeout to a new connection.
fn prepare_connection(conn: &mut Connection, settings: DbRuntimeSettings) -> rusqlite::Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    // A private in-memory database cannot use WAL and keeps "memory".
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal mode stayed {mode}")),
        ));
    }
    conn.pragma_update(None, "synchronous", settings.durability.pragma())?;
    conn.busy_timeout(settings.busy_timeout)
}

/// Opens a pool over the database at `db_path`, creating the file if needed.
///
/// # Errors
///
/// Returns `PoolError::Open` if no connection can be established or
/// configured.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_init(move |conn| prepare_connection(conn, settings));

    // Each `:memory:` connection would be a separate, empty database.
    let max_size = match db_path {
        IN_MEMORY => 1,
        _ => settings.max_connections.max(1),
    };
    let pool = Pool::builder().max_size(max_size).build(manager)?;

    tracing::debug!(path = db_path, max_size, durability = ?settings.durability, "opened queue database");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma_i64(pool: &DbPool, name: &str) -> i64 {
        let conn = pool.get().expect("connection");
        conn.query_row(&format!("PRAGMA {name}"), [], |row| row.get(0))
            .expect("pragma query")
    }

    #[test]
    fn in_memory_pool_has_one_connection() {
        let settings = DbRuntimeSettings {
            busy_timeout: Duration::from_millis(1_250),
            max_connections: 8,
            durability: Durability::Normal,
        };
        let pool = create_pool(IN_MEMORY, settings).expect("pool");

        assert_eq!(pool.max_size(), 1);
        assert_eq!(pragma_i64(&pool, "busy_timeout"), 1_250);
        // NORMAL = 1, FULL = 2
        assert_eq!(pragma_i64(&pool, "synchronous"), 1);
    }

    #[test]
    fn file_pool_is_wal_and_fully_synchronous_by_default() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("queue.db");
        let pool = create_pool(path.to_str().expect("utf-8 path"), DbRuntimeSettings::default())
            .expect("pool");

        let conn = pool.get().expect("connection");
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("journal_mode");
        drop(conn);

        assert_eq!(mode, "wal");
        assert_eq!(pragma_i64(&pool, "synchronous"), 2);
        assert_eq!(pool.max_size(), 4);
    }
}
