//! SQLite persistence for project records and the sync audit log.

pub mod queries;
pub mod schema;

pub use queries::AuditLogEntry;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Shared handle to the project database.
///
/// One connection behind a `Mutex`; the service and the web layer share it
/// through the service's `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path`, creating its parent
    /// directory first.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::configure(conn)
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to date. Safe to call on every start.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Lock the connection, recovering from a poisoned mutex.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_database_creates_parent_and_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/sandsync.db");
        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        assert!(path.exists());

        let mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_reopen_keeps_projects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandsync.db");
        {
            let db = Database::new(&path).unwrap();
            db.initialize().unwrap();
            db.insert_project("p1", "demo").unwrap();
        }
        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        assert_eq!(db.get_project("p1").unwrap().unwrap().name, "demo");
    }
}
