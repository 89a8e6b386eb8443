//! SQLite-based local store for synced records.
//!
//! The database lives at `<data_dir>/daybook.db` and holds the account
//! registry, synced emails and calendar events, imported transcripts, the
//! contact registry (written by the surrounding system, read-only here),
//! and per-source sync metadata.

use std::path::PathBuf;

use rusqlite::Connection;

pub mod accounts;
pub mod contacts;
pub mod emails;
pub mod events;
pub mod transcripts;

pub use accounts::Account;
pub use emails::NewEmail;
pub use events::NewEvent;

pub struct SyncDb {
    conn: Connection,
}

impl SyncDb {
    /// Open (or create) the database at the default path and apply the schema.
    pub fn open() -> Result<Self, String> {
        Self::open_at(crate::config::db_path())
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create data dir: {e}"))?;
            }
        }

        let conn = Connection::open(&path)
            .map_err(|e| format!("Failed to open database at {}: {e}", path.display()))?;

        // WAL for concurrent reads from the tool layer
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| format!("Failed to enable WAL: {e}"))?;

        crate::migrations::run_migrations(&conn)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| format!("Failed to enable foreign keys: {e}"))?;

        Ok(Self { conn })
    }

    /// Open an in-memory database with the full schema. Test-only convenience.
    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory()
            .map_err(|e| format!("Failed to open in-memory database: {e}"))?;
        crate::migrations::run_migrations(&conn)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| format!("Failed to enable foreign keys: {e}"))?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Self) -> Result<T, String>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| format!("Failed to begin transaction: {e}"))?;
        match f(self) {
            Ok(val) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| format!("Failed to commit transaction: {e}"))?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Sync metadata (per-source staleness timestamps)
    // =========================================================================

    /// Read a sync metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>, String> {
        use rusqlite::OptionalExtension;
        self.conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| format!("Failed to read sync_meta[{key}]: {e}"))
    }

    /// Write a sync metadata value (upsert).
    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO sync_meta (key, value, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                [key, value],
            )
            .map_err(|e| format!("Failed to write sync_meta[{key}]: {e}"))?;
        Ok(())
    }
}
