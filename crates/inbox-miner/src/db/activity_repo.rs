//! Activity log repository: the append-only `email_processing_logs` table.

use std::fmt;

use chrono::{NaiveDateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use super::{Database, DatabaseError};

/// Action recorded for a single message.
pub const ACTION_EXTRACTED: &str = "extracted";
/// Action recorded when a whole batch fails before any message is handled.
pub const ACTION_EXTRACTION_BATCH: &str = "extraction_batch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Skipped,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Error => "error",
            ActivityStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log entry to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivityLog {
    pub raw_email_id: Option<i64>,
    pub action: String,
    pub processor_type: Option<String>,
    pub status: ActivityStatus,
    pub message: Option<String>,
    pub error_details: Option<String>,
    pub processing_time_ms: Option<i64>,
}

impl NewActivityLog {
    pub fn new(action: &str, status: ActivityStatus) -> Self {
        Self {
            raw_email_id: None,
            action: action.to_string(),
            processor_type: None,
            status,
            message: None,
            error_details: None,
            processing_time_ms: None,
        }
    }

    pub fn with_raw_email_id(mut self, id: i64) -> Self {
        self.raw_email_id = Some(id);
        self
    }

    pub fn with_processor_type(mut self, processor_type: Option<&str>) -> Self {
        self.processor_type = processor_type.map(str::to_string);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }

    pub fn with_processing_time_ms(mut self, ms: i64) -> Self {
        self.processing_time_ms = Some(ms);
        self
    }
}

/// A stored log entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLogRow {
    pub id: i64,
    pub raw_email_id: Option<i64>,
    pub action: String,
    pub processor_type: Option<String>,
    pub status: String,
    pub message: Option<String>,
    pub error_details: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub created_at: NaiveDateTime,
}

/// Appends a log entry and returns its id.
pub fn insert(db: &Database, entry: &NewActivityLog) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO email_processing_logs
               (raw_email_id, action, processor_type, status, message, error_details,
                processing_time_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.raw_email_id,
                entry.action,
                entry.processor_type,
                entry.status.as_str(),
                entry.message,
                entry.error_details,
                entry.processing_time_ms,
                Utc::now().naive_utc(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Newest entries first.
pub fn list_recent(db: &Database, limit: u32) -> Result<Vec<ActivityLogRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, raw_email_id, action, processor_type, status, message, error_details,
                    processing_time_ms, created_at
             FROM email_processing_logs
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityLogRow {
                    id: row.get(0)?,
                    raw_email_id: row.get(1)?,
                    action: row.get(2)?,
                    processor_type: row.get(3)?,
                    status: row.get(4)?,
                    message: row.get(5)?,
                    error_details: row.get(6)?,
                    processing_time_ms: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_status(db: &Database, status: ActivityStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM email_processing_logs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    })
}
