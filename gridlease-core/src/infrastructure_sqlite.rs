//! SQLite-backed VersionedStore implementation.
//! Keeps the grid document across server restarts.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! gridlease-core = { path = "../gridlease-core", features = ["sqlite"] }
//! ```

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{GridError, GridResult};
use crate::infrastructure::{CasOutcome, VersionedStore};
use crate::types::document;
use crate::types::{GridDims, GridSnapshot, Version};

/// A persistent grid store backed by a single SQLite row.
///
/// The row's integer `version` column is the compare-and-swap token.
pub struct SqliteGridStore {
    conn: Mutex<Connection>,
    path: String,
    dims: GridDims,
    busy_timeout: Duration,
}

impl SqliteGridStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str, dims: GridDims, busy_timeout: Duration) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        // WAL lets status reads proceed while a writer holds the lock
        let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(busy_timeout)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS grid_document (
                id          INTEGER PRIMARY KEY CHECK (id = 1),
                body        TEXT NOT NULL,
                version     INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_string(),
            dims,
            busy_timeout,
        })
    }

    fn map_err(&self, e: rusqlite::Error) -> GridError {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                GridError::Timeout(self.busy_timeout)
            }
            _ => GridError::StoreUnavailable(format!("sqlite: {}", e)),
        }
    }

    fn connection(&self) -> GridResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GridError::StoreUnavailable("sqlite connection poisoned".into()))
    }
}

impl VersionedStore for SqliteGridStore {
    fn read(&self) -> GridResult<(GridSnapshot, Version)> {
        let conn = self.connection()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT body, version FROM grid_document WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| self.map_err(e))?;

        match row {
            None => Ok((GridSnapshot::new(), Version::initial())),
            Some((body, version)) => {
                let snapshot = document::decode(Some(&body), self.dims)?;
                Ok((snapshot, Version::new(version.to_string())))
            }
        }
    }

    fn compare_and_swap(&self, snapshot: &GridSnapshot, expected: &Version) -> GridResult<CasOutcome> {
        let body = document::encode(snapshot)?;
        let conn = self.connection()?;

        if expected.is_initial() {
            let rows = conn
                .execute(
                    "INSERT INTO grid_document (id, body, version) VALUES (1, ?1, 1)
                     ON CONFLICT(id) DO NOTHING",
                    params![body],
                )
                .map_err(|e| self.map_err(e))?;
            return Ok(if rows == 1 {
                CasOutcome::Committed(Version::new("1"))
            } else {
                CasOutcome::Conflict
            });
        }

        // A token this store never handed out cannot match
        let Ok(expected_num) = expected.as_str().parse::<i64>() else {
            return Ok(CasOutcome::Conflict);
        };

        let rows = conn
            .execute(
                "UPDATE grid_document
                 SET body = ?1, version = version + 1, updated_at = strftime('%s', 'now')
                 WHERE id = 1 AND version = ?2",
                params![body, expected_num],
            )
            .map_err(|e| self.map_err(e))?;

        if rows == 0 {
            Ok(CasOutcome::Conflict)
        } else {
            Ok(CasOutcome::Committed(Version::new((expected_num + 1).to_string())))
        }
    }

    fn describe(&self) -> String {
        format!("sqlite ({})", self.path)
    }
}
