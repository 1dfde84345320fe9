//! Local SQLite storage for the relief client.
//!
//! The durable mutation queue lives here. The database runs in WAL mode so a
//! drain pass reading the queue never blocks an enqueue, and its schema is
//! versioned by the steps in [`run_migrations`].

mod migrations;
mod pool;

pub use migrations::{run_migrations, schema_version, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, Durability, PoolError};
