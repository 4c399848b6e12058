//! SQLite storage for extracted emails, the activity log and cached OAuth
//! tokens.
//!
//! [`Database`] wraps one rusqlite connection behind a mutex; repositories
//! are free functions taking `&Database`. The pipeline only sees the
//! [`EmailSink`] trait.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod activity_repo;
pub mod email_repo;
pub mod error;
pub mod migrations;
pub mod oauth_repo;
pub mod sink;

pub use activity_repo::{ActivityLogRow, ActivityStatus, NewActivityLog};
pub use email_repo::{ExtractionStats, RawEmailRow, StoreOutcome};
pub use error::DatabaseError;
pub use oauth_repo::CachedToken;
pub use sink::EmailSink;

/// Shared handle to the email database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the database file, creating missing parent
    /// directories, and migrates it to the latest schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        let db = Self::migrated(conn)?;

        log::info!(
            "Email database ready at {} (schema v{})",
            path.display(),
            db.schema_version()?
        );
        Ok(db)
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::migrated(Connection::open_in_memory()?)
    }

    fn migrated(conn: Connection) -> Result<Self, DatabaseError> {
        let applied = migrations::run_all(&conn)?;
        if applied > 0 {
            log::debug!("Applied {} schema migration(s)", applied);
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn schema_version(&self) -> Result<u32, DatabaseError> {
        self.with_conn(migrations::schema_version)
    }

    /// Runs `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::FetchedMessage;
    use chrono::NaiveDate;

    fn message(id: &str) -> FetchedMessage {
        FetchedMessage {
            message_id: id.to_string(),
            sender: "alerts@bank.example".to_string(),
            subject: "Transfer".to_string(),
            received_at: NaiveDate::from_ymd_opt(2025, 1, 14)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            body_plain: "10 EUR".to_string(),
            body_html: String::new(),
            raw_headers: String::new(),
        }
    }

    #[test]
    fn test_in_memory_is_fully_migrated() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), migrations::latest_version());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join("emails.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.schema_version().unwrap(), migrations::latest_version());
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emails.db");

        {
            let db = Database::open(&path).unwrap();
            email_repo::store(&db, &message("kept@bank.example"), Some("bank")).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(email_repo::count(&db).unwrap(), 1);
        assert_eq!(
            email_repo::store(&db, &message("kept@bank.example"), Some("bank")).unwrap(),
            StoreOutcome::AlreadyExists
        );
    }

    #[test]
    fn test_clones_share_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();

        email_repo::store(&db, &message("shared@bank.example"), None).unwrap();
        assert_eq!(email_repo::count(&other).unwrap(), 1);
    }
}
