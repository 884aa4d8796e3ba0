use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// Thread-safe handle over the SQLite database.
///
/// Wraps a single connection in a `Mutex`; clones share the connection.
/// Sufficient for a single-node deployment; swap in a pool if contention
/// ever shows up in the handler latency histograms.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Wrap an already-open connection, initialising the schema.
    pub fn new(conn: Connection) -> Result<Self> {
        // Several subsystems hold their own connection to the same file;
        // wait out short write locks instead of surfacing SQLITE_BUSY.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            // Ignore failures here; the open below will surface them.
            let _ = std::fs::create_dir_all(dir);
        }
        Self::new(Connection::open(path)?)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// RFC-3339 encoding used for every timestamp column.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Invalid(format!("bad timestamp {s:?}: {e}")))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|v| parse_ts(&v)).transpose()
}

/// Map a stored enum string through `FromStr` into a typed value.
pub(crate) fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T> {
    s.parse().map_err(StoreError::Invalid)
}

/// Wrap a stored-value parse failure so it can surface through a rusqlite
/// row mapper.
pub(crate) fn conversion_err(col: usize, e: StoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        rusqlite::types::Type::Text,
        e.to_string().into(),
    )
}

/// Decode a JSON-array column (`manager_ids`, `accountant_usernames`, …).
pub(crate) fn from_json_list<T: serde::de::DeserializeOwned>(s: &str) -> Result<Vec<T>> {
    Ok(serde_json::from_str(s)?)
}

pub(crate) fn to_json_list<T: serde::Serialize>(v: &[T]) -> Result<String> {
    Ok(serde_json::to_string(v)?)
}
