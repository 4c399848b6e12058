//! Raw email repository: the `raw_emails` table.
//!
//! `message_id` carries a unique index and is the only thing that makes
//! ingestion idempotent. [`store`] checks for an existing row and inserts
//! inside one `BEGIN IMMEDIATE` transaction, so a second writer on the same
//! file waits on the busy timeout instead of failing its lock upgrade and
//! then sees the winner's row. A constraint violation is still reported as
//! [`StoreOutcome::AlreadyExists`].

use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;

use crate::mail::FetchedMessage;

use super::error::is_constraint_violation;
use super::{Database, DatabaseError};

/// Result of a store attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// New row with its surrogate id.
    Inserted(i64),
    /// A row with the same `message_id` already exists.
    AlreadyExists,
}

/// A stored email row.
#[derive(Debug, Clone, Serialize)]
pub struct RawEmailRow {
    pub id: i64,
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
    pub received_date: NaiveDateTime,
    pub processed: bool,
    pub processor_type: Option<String>,
    pub raw_headers: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Counts over stored emails, optionally narrowed to one processor type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub total: u64,
    pub processed: u64,
    pub unprocessed: u64,
    pub latest_extraction: Option<NaiveDateTime>,
    pub processor_type: Option<String>,
}

const SELECT_COLUMNS: &str = "id, message_id, sender, subject, body_plain, body_html, received_date, processed, processor_type, raw_headers, created_at, updated_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEmailRow> {
    Ok(RawEmailRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        sender: row.get(2)?,
        subject: row.get(3)?,
        body_plain: row.get(4)?,
        body_html: row.get(5)?,
        received_date: row.get(6)?,
        processed: row.get(7)?,
        processor_type: row.get(8)?,
        raw_headers: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Stores a message unless one with the same `message_id` exists.
pub fn store(
    db: &Database,
    message: &FetchedMessage,
    processor_type: Option<&str>,
) -> Result<StoreOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM raw_emails WHERE message_id = ?1",
                params![message.message_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(StoreOutcome::AlreadyExists);
        }

        let now = Utc::now().naive_utc();
        let inserted = tx.execute(
            "INSERT INTO raw_emails
               (message_id, sender, subject, body_plain, body_html, received_date,
                processed, processor_type, raw_headers, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9)",
            params![
                message.message_id,
                message.sender,
                message.subject,
                message.body_plain,
                message.body_html,
                message.received_at,
                processor_type,
                message.raw_headers,
                now,
            ],
        );

        match inserted {
            Ok(_) => {
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(StoreOutcome::Inserted(id))
            }
            Err(e) if is_constraint_violation(&e) => Ok(StoreOutcome::AlreadyExists),
            Err(e) => Err(DatabaseError::Sqlite(e)),
        }
    })
}

/// Finds a stored email by its Message-ID.
pub fn find_by_message_id(
    db: &Database,
    message_id: &str,
) -> Result<Option<RawEmailRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM raw_emails WHERE message_id = ?1",
            SELECT_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![message_id], map_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Total number of stored emails.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM raw_emails", [], |r| r.get(0))?;
        Ok(count as u64)
    })
}

/// Flags a row as handled by a downstream processor. Returns false when no
/// row has that id.
pub fn mark_processed(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE raw_emails SET processed = 1, updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().naive_utc()],
        )?;
        Ok(changed > 0)
    })
}

/// Returns totals and the latest extraction time, for one processor type or
/// for every row when `processor_type` is `None`.
pub fn extraction_stats(
    db: &Database,
    processor_type: Option<&str>,
) -> Result<ExtractionStats, DatabaseError> {
    db.with_conn(|conn| {
        let (total, processed, latest): (i64, i64, Option<NaiveDateTime>) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(processed), 0), MAX(created_at)
             FROM raw_emails
             WHERE ?1 IS NULL OR processor_type = ?1",
            params![processor_type],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

        Ok(ExtractionStats {
            total: total as u64,
            processed: processed as u64,
            unprocessed: (total - processed) as u64,
            latest_extraction: latest,
            processor_type: processor_type.map(str::to_string),
        })
    })
}
