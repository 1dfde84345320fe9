//! Schema versions for the queue database.
//!
//! Each step is a SQL file compiled into the binary. Applied steps are
//! recorded by version in `_relief_migrations`; a step and its record commit
//! together or not at all.

use rusqlite::{params, Connection};
use thiserror::Error;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// Schema history, oldest first. Versions must be strictly increasing.
const STEPS: &[Step] = &[
    Step {
        version: 0,
        name: "mutation_queue",
        sql: include_str!("migrations/000_mutation_queue.sql"),
    },
    Step {
        version: 1,
        name: "mutation_dead_letter",
        sql: include_str!("migrations/001_mutation_dead_letter.sql"),
    },
];

const CREATE_TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _relief_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL DEFAULT (unixepoch())
)";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("schema step {version} ({name}) failed: {source}")]
    Step {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },

    #[error("cannot read schema version: {0}")]
    Version(#[source] rusqlite::Error),
}

/// Brings the schema up to date. Returns the number of steps applied.
///
/// # Errors
///
/// Returns `MigrationError` if the current version cannot be read or a step
/// fails; the failing step leaves no trace.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, STEPS)
}

/// Highest applied schema version, if any.
///
/// # Errors
///
/// Returns `MigrationError::Version` if the tracking table cannot be read.
pub fn schema_version(conn: &Connection) -> Result<Option<u32>, MigrationError> {
    conn.execute_batch(CREATE_TRACKING_TABLE)
        .map_err(MigrationError::Version)?;
    conn.query_row("SELECT MAX(version) FROM _relief_migrations", [], |row| {
        row.get::<_, Option<u32>>(0)
    })
    .map_err(MigrationError::Version)
}

fn apply(conn: &Connection, steps: &[Step]) -> Result<usize, MigrationError> {
    let current = schema_version(conn)?;
    let pending = steps
        .iter()
        .filter(|step| current.map_or(true, |v| step.version > v));

    let mut applied = 0;
    for step in pending {
        let fail = |source| MigrationError::Step {
            version: step.version,
            name: step.name,
            source,
        };
        let tx = conn.unchecked_transaction().map_err(fail)?;
        tx.execute_batch(step.sql).map_err(fail)?;
        tx.execute(
            "INSERT INTO _relief_migrations (version, name) VALUES (?1, ?2)",
            params![step.version, step.name],
        )
        .map_err(fail)?;
        tx.commit().map_err(fail)?;

        tracing::info!(version = step.version, name = step.name, "applied schema step");
        applied += 1;
    }
    Ok(applied)
}
