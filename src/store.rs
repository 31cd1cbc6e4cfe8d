//! Persistent store: the allocation counter and the link table.
//!
//! Everything lives in `<database_directory>/state.sqlite`. Each operation
//! opens its own connection (WAL journal, 10s busy timeout), so several
//! threads and several server processes can share the database and rely on
//! SQLite's own locking for coordination.
//!
//! ## Schema
//!
//! ```text
//! state(key TEXT UNIQUE, value INTEGER)          named monotonic counters
//! links(id TEXT UNIQUE, expires INTEGER, owner TEXT, download INTEGER,
//!       hits INTEGER, mount TEXT, path BLOB)     one row per issued link
//! ```
//!
//! `path` is a BLOB holding the raw path bytes; TEXT values are accepted on
//! read so rows written by older tooling still load.

use crate::paths::{path_from_bytes, path_to_bytes};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Name of the database file within the database directory.
pub const DATABASE_FILENAME: &str = "state.sqlite";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("counter {0:?} does not fit in a signed 64-bit column")]
    CounterOverflow(String),
}

/// One issued link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub id: String,
    /// Unix timestamp; the link is dead once `expires <= now`.
    pub expires: i64,
    pub owner: String,
    /// Serve as an attachment rather than inline.
    pub download: bool,
    pub hits: u64,
    pub mount: String,
    /// Path relative to the mount root. May not be valid UTF-8.
    pub path: PathBuf,
}

/// Handle on the SQLite database. Cheap to share: it only holds the path.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the database in `directory`.
    pub fn open(directory: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(directory)?;
        let store = Self {
            path: directory.join(DATABASE_FILENAME),
        };
        let conn = store.connection()?;
        init_schema(&conn)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh connection with the pragmas every caller relies on.
    pub fn connection(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        Ok(conn)
    }

    /// Run `f` inside an immediate transaction and commit if it succeeds.
    ///
    /// The write lock is taken up front, so a read-then-write inside `f`
    /// cannot interleave with another writer. An `Err` from `f` rolls back.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let result = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(result)
    }

    /// Current value of a named counter (0 if never touched).
    pub fn counter(&self, key: &str) -> Result<u64, StoreError> {
        counter_value(&self.connection()?, key)
    }

    /// Look up a link regardless of expiry.
    pub fn link(&self, id: &str) -> Result<Option<LinkRow>, StoreError> {
        select_link(&self.connection()?, id)
    }

    /// Look up a link that is still alive at `now`.
    pub fn live_link(&self, id: &str, now: i64) -> Result<Option<LinkRow>, StoreError> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                "SELECT id, expires, owner, download, hits, mount, path
                 FROM links WHERE id = ?1 AND expires > ?2",
                params![id, now],
                read_link,
            )
            .optional()?;
        Ok(row)
    }

    /// Count a download of a live link and return the updated row.
    pub fn record_hit(&self, id: &str, now: i64) -> Result<Option<LinkRow>, StoreError> {
        self.transaction(|tx| {
            let changed = tx.execute(
                "UPDATE links SET hits = hits + 1 WHERE id = ?1 AND expires > ?2",
                params![id, now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            select_link(tx, id)
        })
    }

    /// Delete every link with `expires <= now`. Returns the number removed.
    pub fn delete_expired(&self, now: i64) -> Result<usize, StoreError> {
        self.transaction(|tx| {
            let removed = tx.execute("DELETE FROM links WHERE expires <= ?1", params![now])?;
            Ok(removed)
        })
    }

    pub fn link_count(&self) -> Result<u64, StoreError> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            id TEXT NOT NULL,
            expires INTEGER NOT NULL,
            owner TEXT NOT NULL,
            download INTEGER NOT NULL,
            hits INTEGER NOT NULL,
            mount TEXT NOT NULL,
            path BLOB NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS links_id_index ON links (id ASC);
        CREATE INDEX IF NOT EXISTS links_expires_index ON links (expires ASC);
        CREATE TABLE IF NOT EXISTS state (
            key TEXT NOT NULL,
            value INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS state_key_index ON state (key ASC);
        "#,
    )?;
    Ok(())
}

// =============================================================================
// Statement helpers usable inside a caller's transaction
// =============================================================================

/// Read a named counter. Missing counters read as 0.
pub fn counter_value(conn: &Connection, key: &str) -> Result<u64, StoreError> {
    let value: Option<i64> = conn
        .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    u64::try_from(value.unwrap_or(0)).map_err(|_| StoreError::CounterOverflow(key.to_string()))
}

/// Overwrite a named counter. Only call this inside an immediate transaction
/// that read the previous value.
pub fn set_counter(conn: &Connection, key: &str, value: u64) -> Result<(), StoreError> {
    let value = i64::try_from(value).map_err(|_| StoreError::CounterOverflow(key.to_string()))?;
    conn.execute(
        "INSERT INTO state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    debug!(key, value, "counter advanced");
    Ok(())
}

pub fn insert_link(conn: &Connection, link: &LinkRow) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO links (id, expires, owner, download, hits, mount, path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            link.id,
            link.expires,
            link.owner,
            link.download,
            i64::try_from(link.hits).unwrap_or(i64::MAX),
            link.mount,
            path_to_bytes(&link.path),
        ],
    )?;
    Ok(())
}

pub fn select_link(conn: &Connection, id: &str) -> Result<Option<LinkRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, expires, owner, download, hits, mount, path FROM links WHERE id = ?1",
            params![id],
            read_link,
        )
        .optional()?;
    Ok(row)
}

/// Shift a link's expiry by `delay` seconds (clamped to `0..=i64::MAX`) and
/// optionally change its disposition. Returns the updated row, or `None` if
/// unknown.
pub fn update_link(
    conn: &Connection,
    id: &str,
    delay: i64,
    download: Option<bool>,
) -> Result<Option<LinkRow>, StoreError> {
    let Some(current) = select_link(conn, id)? else {
        return Ok(None);
    };
    if delay != 0 {
        // SQLite turns an overflowing integer sum into a REAL.
        let expires = current.expires.saturating_add(delay).max(0);
        conn.execute(
            "UPDATE links SET expires = ?1 WHERE id = ?2",
            params![expires, id],
        )?;
    }
    if let Some(download) = download {
        conn.execute(
            "UPDATE links SET download = ?1 WHERE id = ?2",
            params![download, id],
        )?;
    }
    select_link(conn, id)
}

fn read_link(row: &Row<'_>) -> rusqlite::Result<LinkRow> {
    let path = match row.get_ref(6)? {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                6,
                "path".into(),
                other.data_type(),
            ));
        }
    };
    let hits: i64 = row.get(4)?;
    Ok(LinkRow {
        id: row.get(0)?,
        expires: row.get(1)?,
        owner: row.get(2)?,
        download: row.get(3)?,
        hits: hits.max(0) as u64,
        mount: row.get(5)?,
        path: path_from_bytes(path),
    })
}

/// Seconds since the Unix epoch from the local clock.
///
/// All servers sharing one database are assumed to agree on this clock.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
