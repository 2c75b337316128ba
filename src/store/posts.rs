//! Correlation store: Mattermost post ids <-> Matrix event ids.
//!
//! Rows are written once when a message is relayed in either direction and
//! never updated or deleted, since threads and edits may refer to arbitrarily
//! old messages. Writes only happen from inside a relay lane.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use crate::common::error::{StoreError, StoreResult};
use crate::store::{map_duplicate, Database};

/// Link between one Mattermost post (part) and one Matrix event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Mattermost post id.
    pub post_id: String,
    /// Matrix event id.
    pub event_id: String,
    /// Anchor of a multi-part post; only primaries are reply/thread targets.
    pub is_primary: bool,
}

impl Correlation {
    pub fn primary(post_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            event_id: event_id.into(),
            is_primary: true,
        }
    }

    pub fn secondary(post_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            event_id: event_id.into(),
            is_primary: false,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            post_id: row.get(0)?,
            event_id: row.get(1)?,
            is_primary: row.get(2)?,
        })
    }
}

/// Persistent correlation store.
#[derive(Clone)]
pub struct CorrelationStore {
    db: Database,
}

impl CorrelationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a correlation.
    ///
    /// Fails with `StoreError::Duplicate` if the event is already correlated
    /// or the post already has a primary correlation.
    pub fn record(&self, correlation: &Correlation) -> StoreResult<()> {
        let created_at = Utc::now().to_rfc3339();
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO posts (event_id, post_id, is_primary, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        correlation.event_id,
                        correlation.post_id,
                        correlation.is_primary,
                        created_at
                    ],
                )
            })
            .map_err(|e| match e {
                StoreError::Sqlite(e) => map_duplicate(e, || {
                    format!(
                        "correlation {} <-> {}",
                        correlation.post_id, correlation.event_id
                    )
                }),
                other => other,
            })?;

        debug!(
            post_id = %correlation.post_id,
            event_id = %correlation.event_id,
            primary = correlation.is_primary,
            "Recorded correlation"
        );
        Ok(())
    }

    /// Look up the correlation of a Mattermost post.
    ///
    /// Returns the primary row when there is one, otherwise the oldest
    /// secondary row.
    pub fn find_by_post_id(&self, post_id: &str) -> StoreResult<Option<Correlation>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT post_id, event_id, is_primary FROM posts
                 WHERE post_id = ?1
                 ORDER BY is_primary DESC, rowid ASC
                 LIMIT 1",
                params![post_id],
                Correlation::from_row,
            )
            .optional()
        })
    }

    /// Look up the correlation of a Matrix event.
    pub fn find_by_event_id(&self, event_id: &str) -> StoreResult<Option<Correlation>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT post_id, event_id, is_primary FROM posts WHERE event_id = ?1",
                params![event_id],
                Correlation::from_row,
            )
            .optional()
        })
    }

    /// Number of stored correlations.
    pub fn len(&self) -> StoreResult<usize> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }
}
