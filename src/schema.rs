//! # SQLite Schema
//!
//! One table holds the whole log. The rowid primary key doubles as the
//! global position: `AUTOINCREMENT` guarantees monotonically increasing,
//! never-reused values even after deletes, which is exactly the position
//! contract.
//!
//! ## Table Layout
//!
//! ```text
//! events
//!   position     INTEGER PRIMARY KEY AUTOINCREMENT   -- global order
//!   event_id     TEXT NOT NULL UNIQUE                -- event identity
//!   event_type   TEXT NOT NULL
//!   data         TEXT NOT NULL                       -- JSON
//!   metadata     TEXT NOT NULL                       -- JSON
//!   stream       TEXT NOT NULL
//!   revision     INTEGER NOT NULL
//!   timestamp_ms INTEGER NOT NULL                    -- shared per batch
//!   UNIQUE (stream, revision)
//! ```
//!
//! The `(stream, revision)` unique index is the optimistic-concurrency
//! backstop: two writers racing to append revision N to one stream cannot
//! both commit, regardless of which process they live in. The writer thread
//! translates that constraint violation into a revision-mismatch error.
//!
//! The timestamp index serves the subscription clock-skew backfill, which
//! positions a live feed by wall-clock time.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::error::{Error, Result};

/// Bumped when the table layout changes incompatibly.
const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS events (
    position     INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id     TEXT NOT NULL,
    event_type   TEXT NOT NULL,
    data         TEXT NOT NULL,
    metadata     TEXT NOT NULL,
    stream       TEXT NOT NULL,
    revision     INTEGER NOT NULL,
    timestamp_ms INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_events_stream_revision
    ON events (stream, revision);

CREATE UNIQUE INDEX IF NOT EXISTS idx_events_event_id
    ON events (event_id);

CREATE INDEX IF NOT EXISTS idx_events_timestamp
    ON events (timestamp_ms);

CREATE TABLE IF NOT EXISTS metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

// =============================================================================
// Database Handle
// =============================================================================

/// An initialized store database: schema created, pragmas applied, version
/// verified.
///
/// This is a construction-time wrapper. The backend unwraps it with
/// [`into_connection`](Database::into_connection) and hands the connection
/// to the thread that will own it.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and prepares it for
    /// use as the write connection.
    ///
    /// WAL journaling lets readers proceed while the writer commits;
    /// `synchronous=NORMAL` is the standard WAL pairing (a power loss may
    /// drop the last transactions but never corrupts the file).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self { conn };
        db.initialize()?;
        debug!(path = %path.as_ref().display(), "database opened");
        Ok(db)
    }

    /// Opens an additional read-only connection to the same database, for
    /// reader threads. WAL allows any number of these alongside the writer.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_TABLES)?;
        self.verify_or_set_version()
    }

    /// Records the schema version on first open; refuses to run against a
    /// database written by an incompatible layout.
    fn verify_or_set_version(&self) -> Result<()> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)",
                    [SCHEMA_VERSION.to_string()],
                )?;
                Ok(())
            }
            Some(version) if version == SCHEMA_VERSION.to_string() => Ok(()),
            Some(version) => Err(Error::SchemaVersion {
                found: version,
                expected: SCHEMA_VERSION,
            }),
        }
    }

    /// Surrenders the underlying connection to its owning thread.
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
