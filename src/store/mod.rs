//! SQLite persistence.
//!
//! One database file holds both the message correlations and the identity
//! records. The connection is shared behind a mutex; every statement is
//! short, so holding the lock from async code is fine.

pub mod posts;
pub mod users;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use crate::common::error::{StoreError, StoreResult};

pub use posts::{Correlation, CorrelationStore};
pub use users::{UserRecord, UserTable};

/// Current schema version, tracked with `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS posts (
        event_id   TEXT PRIMARY KEY NOT NULL,
        post_id    TEXT NOT NULL,
        is_primary INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS posts_by_post_id ON posts (post_id);
    CREATE UNIQUE INDEX IF NOT EXISTS posts_primary_by_post_id
        ON posts (post_id) WHERE is_primary = 1;

    CREATE TABLE IF NOT EXISTS users (
        mattermost_user_id TEXT PRIMARY KEY NOT NULL,
        matrix_user_id     TEXT NOT NULL UNIQUE,
        access_token       TEXT,
        is_matrix_user     INTEGER NOT NULL,
        display_name       TEXT
    );
";

/// Shared handle to the bridge database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and migrate it.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let db = Self::from_connection(conn)?;
        info!("Opened database at {}", path.display());
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn schema_version(&self) -> StoreResult<i64> {
        self.with_conn(|conn| conn.query_row("PRAGMA user_version", [], |row| row.get(0)))
    }

    fn migrate(&self) -> StoreResult<()> {
        let found = self.schema_version()?;
        if found > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        if found < 1 {
            self.with_conn(|conn| {
                conn.execute_batch(SCHEMA_V1)?;
                conn.pragma_update(None, "user_version", 1)
            })?;
        }
        Ok(())
    }

    /// Run a closure against the connection.
    pub(crate) fn with_conn<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&conn)?)
    }
}

/// Map a uniqueness violation to [`StoreError::Duplicate`].
pub(crate) fn map_duplicate(error: rusqlite::Error, what: impl FnOnce() -> String) -> StoreError {
    match error {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate { what: what() }
        }
        other => StoreError::Sqlite(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database_is_migrated() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.db");

        {
            let db = Database::open(&path).unwrap();
            assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        }

        let result = Database::open(&path);
        assert!(matches!(
            result,
            Err(StoreError::UnsupportedSchemaVersion { .. })
        ));
    }
}
