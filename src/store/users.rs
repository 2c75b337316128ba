//! Identity records: which Matrix user stands for which Mattermost user.

use rusqlite::{params, OptionalExtension, Row};

use crate::common::error::{StoreError, StoreResult};
use crate::store::{map_duplicate, Database};

/// One bridged identity.
///
/// A record with `is_matrix_user` set describes a Matrix user and the
/// Mattermost puppet account the bridge created for it (with that puppet's
/// access token). Otherwise it describes a Mattermost user and its Matrix
/// ghost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub mattermost_user_id: String,
    pub matrix_user_id: String,
    pub access_token: Option<String>,
    pub is_matrix_user: bool,
    pub display_name: Option<String>,
}

impl UserRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            mattermost_user_id: row.get(0)?,
            matrix_user_id: row.get(1)?,
            access_token: row.get(2)?,
            is_matrix_user: row.get(3)?,
            display_name: row.get(4)?,
        })
    }
}

const COLUMNS: &str = "mattermost_user_id, matrix_user_id, access_token, is_matrix_user, display_name";

/// Access to the `users` table.
#[derive(Clone)]
pub struct UserTable {
    db: Database,
}

impl UserTable {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, record: &UserRecord) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    &format!("INSERT INTO users ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                    params![
                        record.mattermost_user_id,
                        record.matrix_user_id,
                        record.access_token,
                        record.is_matrix_user,
                        record.display_name
                    ],
                )
            })
            .map_err(|e| match e {
                StoreError::Sqlite(e) => map_duplicate(e, || {
                    format!(
                        "user {} <-> {}",
                        record.mattermost_user_id, record.matrix_user_id
                    )
                }),
                other => other,
            })?;
        Ok(())
    }

    pub fn find_by_mattermost(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM users WHERE mattermost_user_id = ?1"),
                params![user_id],
                UserRecord::from_row,
            )
            .optional()
        })
    }

    pub fn find_by_matrix(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM users WHERE matrix_user_id = ?1"),
                params![user_id],
                UserRecord::from_row,
            )
            .optional()
        })
    }

    pub fn set_display_name(&self, mattermost_user_id: &str, display_name: &str) -> StoreResult<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET display_name = ?2 WHERE mattermost_user_id = ?1",
                params![mattermost_user_id, display_name],
            )
        })?;
        Ok(())
    }

    /// All records, used to warm the in-memory caches at startup.
    pub fn all(&self) -> StoreResult<Vec<UserRecord>> {
        self.db.with_conn(|conn| {
            let mut statement = conn.prepare(&format!("SELECT {COLUMNS} FROM users"))?;
            let rows = statement.query_map([], UserRecord::from_row)?;
            rows.collect()
        })
    }
}
